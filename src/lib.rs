mod align_pole_vector_op;
mod base;
mod chain;
mod chain_set;
mod copy_base_pose;
mod debug;
mod fk_chains_op;
mod hierarchy;
mod ik_chains_op;
mod ik_goal;
mod ik_rig_solver;
mod logger;
mod math;
mod op;
mod op_stack;
mod pelvis_motion_op;
mod pin_bone_op;
mod processor;
mod retarget_pose;
mod rig;
mod root_motion_op;
mod run_ik_rig_op;
mod skeleton;
mod stride_warp_op;

pub mod test_utils;

pub use align_pole_vector_op::{
    chain_pole_vector, AlignPoleVectorChainSettings, AlignPoleVectorOp, AlignPoleVectorSettings,
};
pub use base::*;
pub use chain::{BoneChain, ChainWarning, ResolvedBoneChain};
pub use chain_set::{AutoMapChainType, ChainMapping, ChainPair, RetargetChainSet, RigChains};
pub use copy_base_pose::{BasePoseCopier, CopyBasePoseSettings};
pub use debug::{DebugSink, DebugSnapshot, SnapshotDebugSink};
pub use fk_chains_op::{FKChainSettings, FKChainsOp, FKChainsSettings, FKRotationMode, FKTranslationMode};
pub use hierarchy::{BoneHierarchy, ResolvedRetargetPose, TargetBoneHierarchy};
pub use ik_chains_op::{IKChainSettings, IKChainsOp, IKChainsSettings};
pub use ik_goal::{IKGoal, IKGoalContainer, IKGoalSpace};
pub use ik_rig_solver::{IKRigSolver, IKRigSolverFactory};
pub use logger::{LogLevel, LogMessage, RetargetLog};
pub use math::{
    quat_abs_diff_eq, quat_blend, quat_from_vectors, quat_swing_twist, safe_div, safe_normalize, safe_scale_recip, yaw_of,
    Transform,
};
pub use op::{
    FrameContext, OpHeader, OpInitContext, OpKind, OpPostInitContext, OpRunContext, OpSettings, PelvisMotionDelta,
    RetargetOp,
};
pub use op_stack::{OpStack, OpStackInitContext};
pub use pelvis_motion_op::{PelvisMotionOp, PelvisMotionSettings};
pub use pin_bone_op::{PinBoneData, PinBoneOp, PinBoneSettings, PinBoneType};
pub use processor::{RetargetAsset, RetargetProcessor, RetargetProfile};
pub use retarget_pose::{RetargetPose, DEFAULT_POSE_NAME};
pub use rig::{IKGoalDefinition, IKRigDefinition};
pub use root_motion_op::{RootMotionHeightSource, RootMotionOp, RootMotionSettings, RootMotionSource};
pub use run_ik_rig_op::{RunIKRigOp, RunIKRigSettings};
pub use skeleton::Skeleton;
pub use stride_warp_op::{StrideWarpOp, StrideWarpSettings, WarpingDirectionSource};

//!
//! Retarget op trait and the contexts ops run in.
//!
//! Ops communicate through `FrameContext` only: an op that produces a value (the pelvis
//! delta, IK goals) writes it there and later ops read it through typed accessors.
//!

use glam::{Quat, Vec3};
use std::fmt::Debug;
use std::sync::Arc;

use crate::align_pole_vector_op::AlignPoleVectorSettings;
use crate::base::{RetargetError, RetargetSide};
use crate::chain_set::{ChainMapping, RetargetChainSet};
use crate::fk_chains_op::FKChainsSettings;
use crate::hierarchy::{BoneHierarchy, TargetBoneHierarchy};
use crate::ik_chains_op::IKChainsSettings;
use crate::ik_goal::IKGoalContainer;
use crate::logger::RetargetLog;
use crate::math::Transform;
use crate::pelvis_motion_op::PelvisMotionSettings;
use crate::pin_bone_op::PinBoneSettings;
use crate::rig::IKRigDefinition;
use crate::root_motion_op::RootMotionSettings;
use crate::run_ik_rig_op::RunIKRigSettings;
use crate::stride_warp_op::StrideWarpSettings;

/// Closed set of op types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpKind {
    PelvisMotion,
    FKChains,
    IKChains,
    RunIKRig,
    StrideWarp,
    PinBone,
    RootMotion,
    AlignPoleVector,
}

impl OpKind {
    #[inline]
    pub fn default_name(&self) -> &'static str {
        return match self {
            OpKind::PelvisMotion => "Pelvis Motion",
            OpKind::FKChains => "FK Chains",
            OpKind::IKChains => "IK Chains",
            OpKind::RunIKRig => "Run IK Rig",
            OpKind::StrideWarp => "Stride Warp",
            OpKind::PinBone => "Pin Bone",
            OpKind::RootMotion => "Root Motion",
            OpKind::AlignPoleVector => "Align Pole Vector",
        };
    }
}

///
/// Settings blob of an op. Used by assets, profiles and `RetargetOp::set_settings`.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpSettings {
    PelvisMotion(PelvisMotionSettings),
    FKChains(FKChainsSettings),
    IKChains(IKChainsSettings),
    RunIKRig(RunIKRigSettings),
    StrideWarp(StrideWarpSettings),
    PinBone(PinBoneSettings),
    RootMotion(RootMotionSettings),
    AlignPoleVector(AlignPoleVectorSettings),
}

impl OpSettings {
    #[inline]
    pub fn kind(&self) -> OpKind {
        return match self {
            OpSettings::PelvisMotion(_) => OpKind::PelvisMotion,
            OpSettings::FKChains(_) => OpKind::FKChains,
            OpSettings::IKChains(_) => OpKind::IKChains,
            OpSettings::RunIKRig(_) => OpKind::RunIKRig,
            OpSettings::StrideWarp(_) => OpKind::StrideWarp,
            OpSettings::PinBone(_) => OpKind::PinBone,
            OpSettings::RootMotion(_) => OpKind::RootMotion,
            OpSettings::AlignPoleVector(_) => OpKind::AlignPoleVector,
        };
    }

    /// Tests if switching from `self` to `other` requires re-initializing the op.
    /// Settings of different kinds always do.
    pub fn requires_reinit(&self, other: &OpSettings) -> bool {
        return match (self, other) {
            (OpSettings::PelvisMotion(a), OpSettings::PelvisMotion(b)) => a.requires_reinit(b),
            (OpSettings::FKChains(a), OpSettings::FKChains(b)) => a.requires_reinit(b),
            (OpSettings::IKChains(a), OpSettings::IKChains(b)) => a.requires_reinit(b),
            (OpSettings::RunIKRig(a), OpSettings::RunIKRig(b)) => a.requires_reinit(b),
            (OpSettings::StrideWarp(a), OpSettings::StrideWarp(b)) => a.requires_reinit(b),
            (OpSettings::PinBone(a), OpSettings::PinBone(b)) => a.requires_reinit(b),
            (OpSettings::RootMotion(a), OpSettings::RootMotion(b)) => a.requires_reinit(b),
            (OpSettings::AlignPoleVector(a), OpSettings::AlignPoleVector(b)) => a.requires_reinit(b),
            _ => true,
        };
    }

    /// Creates a new op of the matching kind.
    pub fn create_op(&self, name: impl Into<String>) -> Box<dyn RetargetOp> {
        use crate::{
            AlignPoleVectorOp, FKChainsOp, IKChainsOp, PelvisMotionOp, PinBoneOp, RootMotionOp, RunIKRigOp,
            StrideWarpOp,
        };
        let name = name.into();
        return match self {
            OpSettings::PelvisMotion(s) => Box::new(PelvisMotionOp::new(name, s.clone())),
            OpSettings::FKChains(s) => Box::new(FKChainsOp::new(name, s.clone())),
            OpSettings::IKChains(s) => Box::new(IKChainsOp::new(name, s.clone())),
            OpSettings::RunIKRig(s) => Box::new(RunIKRigOp::new(name, s.clone())),
            OpSettings::StrideWarp(s) => Box::new(StrideWarpOp::new(name, s.clone())),
            OpSettings::PinBone(s) => Box::new(PinBoneOp::new(name, s.clone())),
            OpSettings::RootMotion(s) => Box::new(RootMotionOp::new(name, s.clone())),
            OpSettings::AlignPoleVector(s) => Box::new(AlignPoleVectorOp::new(name, s.clone())),
        };
    }
}

/// State shared by every op type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpHeader {
    pub name: String,
    pub enabled: bool,
    pub parent: Option<String>,
    pub initialized: bool,
}

impl OpHeader {
    pub fn new(name: impl Into<String>) -> OpHeader {
        return OpHeader {
            name: name.into(),
            enabled: true,
            parent: None,
            initialized: false,
        };
    }
}

/// Pelvis motion published by the pelvis op for later ops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PelvisMotionDelta {
    /// Target pelvis bone.
    pub pelvis: usize,
    /// Source pelvis translation minus its retarget pose translation, scaled to the target.
    pub translation_delta: Vec3,
    /// Target pelvis rotation times the inverse of its retarget pose rotation.
    pub rotation_delta: Quat,
}

///
/// Per-frame state shared by the op stack.
///
#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    pub goals: IKGoalContainer,
    pelvis_motion: Option<PelvisMotionDelta>,
    ik_disabled: bool,
}

impl FrameContext {
    pub fn new() -> FrameContext {
        return FrameContext::default();
    }

    /// Resets goals to neutral and forgets values published last frame.
    pub fn reset(&mut self, ik_disabled: bool) {
        self.goals.reset();
        self.pelvis_motion = None;
        self.ik_disabled = ik_disabled;
    }

    #[inline]
    pub fn set_pelvis_motion(&mut self, delta: PelvisMotionDelta) {
        self.pelvis_motion = Some(delta);
    }

    #[inline]
    pub fn pelvis_motion(&self) -> Option<&PelvisMotionDelta> {
        return self.pelvis_motion.as_ref();
    }

    /// Translation delta of the target pelvis this frame, zero when no op published one.
    #[inline]
    pub fn pelvis_translation_delta(&self) -> Vec3 {
        return self.pelvis_motion.map(|p| p.translation_delta).unwrap_or(Vec3::ZERO);
    }

    /// True when the profile forces IK off this frame.
    #[inline]
    pub fn is_ik_disabled(&self) -> bool {
        return self.ik_disabled;
    }
}

/// What an op may look at while initializing.
pub struct OpInitContext<'t> {
    pub source: &'t BoneHierarchy,
    pub target: &'t BoneHierarchy,
    pub chains: &'t RetargetChainSet,
    pub source_rig: &'t Arc<IKRigDefinition>,
    pub target_rig: &'t Arc<IKRigDefinition>,
    /// Parent op, already validated against `RetargetOp::parent_op_kind`.
    pub parent: Option<&'t dyn RetargetOp>,
    pub goals: &'t mut IKGoalContainer,
    pub log: &'t mut RetargetLog,
}

impl OpInitContext<'_> {
    /// Target rig the op works with: the parent's rig if it holds one, else the asset's.
    pub fn effective_target_rig(&self) -> &Arc<IKRigDefinition> {
        if let Some(rig) = self.parent.and_then(|p| p.ik_rig()) {
            return rig;
        }
        return self.target_rig;
    }

    #[inline]
    pub fn hierarchy(&self, side: RetargetSide) -> &BoneHierarchy {
        return match side {
            RetargetSide::Source => self.source,
            RetargetSide::Target => self.target,
        };
    }
}

/// What an op may look at after the retargeted bone mask has been published.
pub struct OpPostInitContext<'t> {
    pub source: &'t BoneHierarchy,
    pub target: &'t TargetBoneHierarchy,
    pub log: &'t mut RetargetLog,
}

/// What an op works on every frame.
pub struct OpRunContext<'t> {
    pub delta_time: f32,
    pub source: &'t BoneHierarchy,
    pub target: &'t BoneHierarchy,
    pub chains: &'t RetargetChainSet,
    /// Full source pose, global space.
    pub source_pose: &'t [Transform],
    /// Evolving target pose, global space. Prior ops' writes are committed here.
    pub target_pose: &'t mut [Transform],
    pub frame: &'t mut FrameContext,
}

///
/// One retargeting operation of the op stack.
///
/// Lifecycle: `initialize` (per op, stack order) → retargeted bones collected →
/// `post_initialize` → `run` once per frame while enabled and initialized. Ops are cloned
/// from the asset template at every processor initialization.
///
pub trait RetargetOp: Debug + Send {
    fn kind(&self) -> OpKind;
    fn header(&self) -> &OpHeader;
    fn header_mut(&mut self) -> &mut OpHeader;

    /// Prepares the op. Returns false on a missing bone/chain/goal/rig; the op is then
    /// skipped until the next initialization.
    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool;

    fn post_initialize(&mut self, _ctx: &mut OpPostInitContext) {}

    fn run(&mut self, ctx: &mut OpRunContext);

    /// Appends every target bone this op writes.
    fn collect_retargeted_bones(&self, _out: &mut Vec<usize>) {}

    /// Kind of op this op must be parented to, if any.
    fn parent_op_kind(&self) -> Option<OpKind> {
        return None;
    }

    fn chain_mapping(&self) -> Option<&ChainMapping> {
        return None;
    }

    /// IK rig held by this op (used by its children).
    fn ik_rig(&self) -> Option<&Arc<IKRigDefinition>> {
        return None;
    }

    fn settings(&self) -> OpSettings;

    /// Replaces the settings. Returns `Ok(true)` when the change requires re-initializing.
    fn set_settings(&mut self, settings: &OpSettings) -> Result<bool, RetargetError>;

    fn clone_op(&self) -> Box<dyn RetargetOp>;

    #[inline]
    fn name(&self) -> &str {
        return &self.header().name;
    }

    #[inline]
    fn is_enabled(&self) -> bool {
        return self.header().enabled;
    }

    #[inline]
    fn set_enabled(&mut self, enabled: bool) {
        self.header_mut().enabled = enabled;
    }

    #[inline]
    fn is_initialized(&self) -> bool {
        return self.header().initialized;
    }

    #[inline]
    fn parent_name(&self) -> Option<&str> {
        return self.header().parent.as_deref();
    }
}

impl Clone for Box<dyn RetargetOp> {
    fn clone(&self) -> Box<dyn RetargetOp> {
        return self.clone_op();
    }
}

/// Implements the settings plumbing every op shares.
macro_rules! impl_op_settings {
    ($variant:ident) => {
        fn settings(&self) -> crate::op::OpSettings {
            return crate::op::OpSettings::$variant(self.settings.clone());
        }

        fn set_settings(&mut self, settings: &crate::op::OpSettings) -> Result<bool, crate::base::RetargetError> {
            match settings {
                crate::op::OpSettings::$variant(settings) => {
                    let reinit = self.settings.requires_reinit(settings);
                    self.settings = settings.clone();
                    return Ok(reinit);
                }
                other => {
                    return Err(crate::base::RetargetError::SettingsMismatch(format!(
                        "{} got {:?} settings",
                        self.header.name,
                        other.kind()
                    )));
                }
            }
        }

        fn clone_op(&self) -> Box<dyn crate::op::RetargetOp> {
            return Box::new(self.clone());
        }

        fn header(&self) -> &crate::op::OpHeader {
            return &self.header;
        }

        fn header_mut(&mut self) -> &mut crate::op::OpHeader {
            return &mut self.header;
        }
    };
}

pub(crate) use impl_op_settings;

use glam::{Quat, Vec3};
use std::error::Error;
use std::sync::Arc;

use crate::base::RetargetSide;
use crate::chain::BoneChain;
use crate::chain_set::RetargetChainSet;
use crate::hierarchy::{BoneHierarchy, TargetBoneHierarchy};
use crate::ik_goal::{IKGoalContainer, IKGoalSpace};
use crate::ik_rig_solver::{IKRigSolver, IKRigSolverFactory};
use crate::logger::RetargetLog;
use crate::math::{quat_blend, Transform};
use crate::op::{FrameContext, OpInitContext, OpPostInitContext, OpRunContext, RetargetOp};
use crate::retarget_pose::DEFAULT_POSE_NAME;
use crate::rig::{IKGoalDefinition, IKRigDefinition};
use crate::skeleton::Skeleton;

pub const BIPED_PELVIS: &str = "pelvis";

const BIPED_BONES: [(&str, i32, [f32; 3]); 22] = [
    ("root", -1, [0.0, 0.0, 0.0]),
    ("pelvis", 0, [0.0, 0.0, 100.0]),
    ("spine", 1, [0.0, 0.0, 10.0]),
    ("spine_02", 2, [0.0, 0.0, 15.0]),
    ("neck", 3, [0.0, 0.0, 20.0]),
    ("head", 4, [0.0, 0.0, 10.0]),
    ("clavicle_l", 3, [5.0, 0.0, 15.0]),
    ("upperarm_l", 6, [10.0, 0.0, 0.0]),
    ("lowerarm_l", 7, [25.0, 0.0, 0.0]),
    ("hand_l", 8, [25.0, 0.0, 0.0]),
    ("clavicle_r", 3, [-5.0, 0.0, 15.0]),
    ("upperarm_r", 10, [-10.0, 0.0, 0.0]),
    ("lowerarm_r", 11, [-25.0, 0.0, 0.0]),
    ("hand_r", 12, [-25.0, 0.0, 0.0]),
    ("thigh_l", 1, [10.0, 0.0, -5.0]),
    ("calf_l", 14, [0.0, 0.0, -45.0]),
    ("foot_l", 15, [0.0, 0.0, -45.0]),
    ("ball_l", 16, [0.0, 10.0, -5.0]),
    ("thigh_r", 1, [-10.0, 0.0, -5.0]),
    ("calf_r", 18, [0.0, 0.0, -45.0]),
    ("foot_r", 19, [0.0, 0.0, -45.0]),
    ("ball_r", 20, [0.0, 10.0, -5.0]),
];

/// A Z-up, +Y forward biped in T-pose, every bone offset multiplied by `scale`.
/// The pelvis stands at `100 * scale`, the legs are `90 * scale` long.
pub fn new_biped_skeleton(scale: f32) -> Skeleton {
    let names = BIPED_BONES.iter().map(|b| b.0.to_string()).collect();
    let parents = BIPED_BONES.iter().map(|b| b.1).collect();
    let poses = BIPED_BONES
        .iter()
        .map(|b| Transform::from_translation(Vec3::from(b.2) * scale))
        .collect();
    return Skeleton::new(names, parents, poses).unwrap();
}

/// Hierarchy on the default pose, pelvis set. Logs nothing.
pub fn new_hierarchy(skeleton: Skeleton) -> (BoneHierarchy, RetargetLog) {
    let mut log = RetargetLog::new("test");
    let hierarchy = BoneHierarchy::new(
        Arc::new(skeleton),
        &[],
        DEFAULT_POSE_NAME,
        Some(BIPED_PELVIS),
        1.0,
        &mut log,
    );
    return (hierarchy, log);
}

/// IK rig matching `new_biped_skeleton()`: spine, head, arms and legs, one goal per limb.
pub fn new_biped_rig(name: &str) -> IKRigDefinition {
    return IKRigDefinition::new(name, BIPED_PELVIS)
        .with_chain(BoneChain::new("Spine", "spine", "spine_02"))
        .with_chain(BoneChain::new("Head", "neck", "head"))
        .with_chain(BoneChain::new("LeftArm", "upperarm_l", "hand_l").with_goal("LeftHandIK"))
        .with_chain(BoneChain::new("RightArm", "upperarm_r", "hand_r").with_goal("RightHandIK"))
        .with_chain(BoneChain::new("LeftLeg", "thigh_l", "foot_l").with_goal("LeftFootIK"))
        .with_chain(BoneChain::new("RightLeg", "thigh_r", "foot_r").with_goal("RightFootIK"))
        .with_goal(IKGoalDefinition::new("LeftHandIK", "hand_l"))
        .with_goal(IKGoalDefinition::new("RightHandIK", "hand_r"))
        .with_goal(IKGoalDefinition::new("LeftFootIK", "foot_l"))
        .with_goal(IKGoalDefinition::new("RightFootIK", "foot_r"));
}

/// Global pose of `skeleton` after `edit` modified a copy of its local reference pose.
pub fn posed_global(skeleton: &Skeleton, edit: impl FnOnce(&[i32], &mut [Transform])) -> Vec<Transform> {
    let mut local = skeleton.bone_ref_poses().to_vec();
    edit(skeleton.bone_parents(), &mut local);
    let mut global: Vec<Transform> = Vec::with_capacity(local.len());
    for (idx, transform) in local.iter().enumerate() {
        match skeleton.parent_of(idx) {
            Some(parent) => {
                let parent_global = global[parent];
                global.push(parent_global.mul_transform(transform));
            }
            None => global.push(*transform),
        }
    }
    return global;
}

/// Rotation of `angle` radians about +Z.
pub fn yaw(angle: f32) -> Quat {
    return Quat::from_rotation_z(angle);
}

pub fn compare_poses(actual: &[Transform], expected: &[Transform], diff: f32) -> Result<(), Box<dyn Error>> {
    if actual.len() != expected.len() {
        return Err(format!("compare_poses() len:{} != {}", actual.len(), expected.len()).into());
    }
    for idx in 0..actual.len() {
        if !actual[idx].abs_diff_eq(&expected[idx], diff) {
            println!("actual: {:?}", actual[idx]);
            println!("expected: {:?}", expected[idx]);
            return Err(format!("compare_poses() idx:{}", idx).into());
        }
    }
    return Ok(());
}

///
/// Stand-in IK solver: moves each goal bone towards its goal, weighted by the goal alphas,
/// and carries the bone's subtree along rigidly.
///
#[derive(Debug, Default)]
pub struct GoalSnapSolver {
    skeleton: Option<Skeleton>,
    goal_bones: Vec<(String, usize)>,
    pose: Vec<Transform>,
    num_solves: usize,
}

impl GoalSnapSolver {
    #[inline]
    pub fn num_solves(&self) -> usize {
        return self.num_solves;
    }
}

impl IKRigSolver for GoalSnapSolver {
    fn initialize(&mut self, rig: &IKRigDefinition, skeleton: &Skeleton, _goals: &IKGoalContainer) -> bool {
        self.goal_bones.clear();
        for goal in &rig.goals {
            match skeleton.bone_by_name(&goal.bone) {
                Some(bone) => self.goal_bones.push((goal.name.clone(), bone)),
                None => return false,
            }
        }
        self.pose = skeleton.ref_pose_global();
        self.skeleton = Some(skeleton.clone());
        return true;
    }

    fn set_input_pose(&mut self, pose: &[Transform]) {
        self.pose.clear();
        self.pose.extend_from_slice(pose);
    }

    fn solve(&mut self, goals: &IKGoalContainer) {
        let skeleton = match &self.skeleton {
            Some(skeleton) => skeleton,
            None => return,
        };
        for (name, bone) in &self.goal_bones {
            let goal = match goals.goal(name) {
                Some(goal) if goal.enabled => goal,
                _ => continue,
            };
            let current = self.pose[*bone];
            let (position, rotation) = match goal.space {
                IKGoalSpace::Additive => (current.translation + goal.position, goal.rotation * current.rotation),
                IKGoalSpace::Component | IKGoalSpace::World => (goal.position, goal.rotation),
            };
            let mut solved = current;
            solved.translation += (position - current.translation) * goal.position_weights * goal.position_alpha;
            solved.rotation = quat_blend(current.rotation, rotation, goal.rotation_alpha);

            for idx in (*bone + 1)..=skeleton.last_descendant(*bone) {
                let relative = self.pose[idx].relative_to(&current);
                self.pose[idx] = solved.mul_transform(&relative);
            }
            self.pose[*bone] = solved;
        }
        self.num_solves += 1;
    }

    fn output_pose(&self) -> &[Transform] {
        return &self.pose;
    }
}

#[derive(Debug, Default)]
pub struct GoalSnapSolverFactory;

impl IKRigSolverFactory for GoalSnapSolverFactory {
    fn create(&self) -> Box<dyn IKRigSolver> {
        return Box::new(GoalSnapSolver::default());
    }
}

///
/// Runs single ops outside a processor: biped source and target hierarchies, both biped
/// rigs resolved into a chain set, and a frame context.
///
#[derive(Debug)]
pub struct OpHarness {
    pub source: BoneHierarchy,
    pub target: TargetBoneHierarchy,
    pub chains: RetargetChainSet,
    pub source_rig: Arc<IKRigDefinition>,
    pub target_rig: Arc<IKRigDefinition>,
    pub frame: FrameContext,
    pub log: RetargetLog,
}

impl OpHarness {
    pub fn new(source_scale: f32, target_scale: f32) -> OpHarness {
        let mut log = RetargetLog::new("harness");
        let source = BoneHierarchy::new(
            Arc::new(new_biped_skeleton(source_scale)),
            &[],
            DEFAULT_POSE_NAME,
            Some(BIPED_PELVIS),
            1.0,
            &mut log,
        );
        let target = BoneHierarchy::new(
            Arc::new(new_biped_skeleton(target_scale)),
            &[],
            DEFAULT_POSE_NAME,
            Some(BIPED_PELVIS),
            1.0,
            &mut log,
        );
        let source_rig = Arc::new(new_biped_rig("SourceRig"));
        let target_rig = Arc::new(new_biped_rig("TargetRig"));
        let mut chains = RetargetChainSet::new();
        chains.add_rig(RetargetSide::Source, &source_rig, &source, &mut log);
        chains.add_rig(RetargetSide::Target, &target_rig, &target, &mut log);
        return OpHarness {
            source,
            target: TargetBoneHierarchy::new(target),
            chains,
            source_rig,
            target_rig,
            frame: FrameContext::new(),
            log,
        };
    }

    /// Source pose built from the source reference pose, see `posed_global()`.
    pub fn source_pose(&self, edit: impl FnOnce(&[i32], &mut [Transform])) -> Vec<Transform> {
        return posed_global(self.source.skeleton(), edit);
    }

    pub fn source_bone(&self, name: &str) -> usize {
        return self.source.find_bone_index_by_name(name).unwrap();
    }

    pub fn target_bone(&self, name: &str) -> usize {
        return self.target.find_bone_index_by_name(name).unwrap();
    }

    /// Initializes `op` like the op stack would, publishing its bones to the retargeted mask.
    pub fn initialize(&mut self, op: &mut dyn RetargetOp, parent: Option<&dyn RetargetOp>) -> bool {
        let mut ctx = OpInitContext {
            source: &self.source,
            target: self.target.hierarchy(),
            chains: &self.chains,
            source_rig: &self.source_rig,
            target_rig: &self.target_rig,
            parent,
            goals: &mut self.frame.goals,
            log: &mut self.log,
        };
        let ok = op.initialize(&mut ctx);
        op.header_mut().initialized = ok;
        if ok {
            let mut bones = Vec::new();
            op.collect_retargeted_bones(&mut bones);
            self.target.set_retargeted_bones(bones);
            op.post_initialize(&mut OpPostInitContext {
                source: &self.source,
                target: &self.target,
                log: &mut self.log,
            });
        }
        return ok;
    }

    /// Starts a new frame from the target retarget pose and runs `op` once.
    pub fn run(&mut self, op: &mut dyn RetargetOp, source_pose: &[Transform]) -> Vec<Transform> {
        self.target.generate_base_pose();
        self.frame.reset(false);
        return self.run_again(op, source_pose);
    }

    /// Runs `op` on the current output pose and frame context, without resetting them.
    pub fn run_again(&mut self, op: &mut dyn RetargetOp, source_pose: &[Transform]) -> Vec<Transform> {
        let (target, output) = self.target.split_output_mut();
        let mut ctx = OpRunContext {
            delta_time: 1.0 / 30.0,
            source: &self.source,
            target,
            chains: &self.chains,
            source_pose,
            target_pose: output,
            frame: &mut self.frame,
        };
        op.run(&mut ctx);
        return self.target.output_pose().to_vec();
    }
}

use std::fmt::Debug;

use crate::ik_goal::IKGoalContainer;
use crate::math::Transform;
use crate::rig::IKRigDefinition;
use crate::skeleton::Skeleton;

///
/// The IK solving collaborator.
///
/// The retargeter never solves IK itself: it fills the goal container and hands it to an
/// implementation of this trait, which owns whatever solver stack the rig describes.
/// Poses are global (component space) and ordered like the target skeleton.
///
pub trait IKRigSolver: Debug + Send {
    /// Prepares the solver for `rig` on `skeleton`. Returns false when the rig can not be
    /// solved on this skeleton; the owning op is then disabled.
    fn initialize(&mut self, rig: &IKRigDefinition, skeleton: &Skeleton, goals: &IKGoalContainer) -> bool;

    /// Sets the pose the next `solve` starts from.
    fn set_input_pose(&mut self, pose: &[Transform]);

    /// Solves the goals against the input pose.
    fn solve(&mut self, goals: &IKGoalContainer);

    /// Result of the last `solve`, ordered like the skeleton.
    fn output_pose(&self) -> &[Transform];
}

/// Creates fresh solver instances each time the op stack is (re)initialized.
pub trait IKRigSolverFactory: Debug + Send + Sync {
    fn create(&self) -> Box<dyn IKRigSolver>;
}

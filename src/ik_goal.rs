use glam::{Quat, Vec3};

use crate::base::{deterministic_map, DeterministicMap};
use crate::math::Transform;
use crate::rig::IKRigDefinition;

/// Space an IK goal's transform is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IKGoalSpace {
    /// Offset added on top of the bone's current transform.
    #[default]
    Additive,
    /// Component (skeleton root) space.
    Component,
    /// World space.
    World,
}

///
/// A named goal for the IK solver.
///
/// `position_weights` scales the pull of the goal per axis. Alphas blend the solved
/// result against the input pose, 0 meaning the goal is ignored.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IKGoal {
    pub name: String,
    pub bone: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub position_weights: Vec3,
    pub position_alpha: f32,
    pub rotation_alpha: f32,
    pub space: IKGoalSpace,
    pub enabled: bool,
}

impl IKGoal {
    pub fn new(name: impl Into<String>, bone: impl Into<String>) -> IKGoal {
        let mut goal = IKGoal {
            name: name.into(),
            bone: bone.into(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            position_weights: Vec3::ONE,
            position_alpha: 0.0,
            rotation_alpha: 0.0,
            space: IKGoalSpace::Additive,
            enabled: true,
        };
        goal.reset();
        return goal;
    }

    /// Neutral additive goal: no offset, no pull.
    pub fn reset(&mut self) {
        self.position = Vec3::ZERO;
        self.rotation = Quat::IDENTITY;
        self.position_weights = Vec3::ONE;
        self.position_alpha = 0.0;
        self.rotation_alpha = 0.0;
        self.space = IKGoalSpace::Additive;
        self.enabled = true;
    }

    ///
    /// Writes a component space goal on top of what earlier ops wrote this frame.
    ///
    /// The first writer sets the goal. Later writers add their offset from `baseline` (the
    /// current end bone transform) to it, and the larger alphas win.
    ///
    pub fn add_component_goal(
        &mut self,
        position: Vec3,
        rotation: Quat,
        baseline: &Transform,
        position_alpha: f32,
        rotation_alpha: f32,
    ) {
        if self.space != IKGoalSpace::Component {
            self.position = position;
            self.rotation = rotation;
            self.position_weights = Vec3::ONE;
            self.position_alpha = position_alpha;
            self.rotation_alpha = rotation_alpha;
            self.space = IKGoalSpace::Component;
            return;
        }
        self.position += position - baseline.translation;
        self.rotation = (rotation * baseline.rotation.inverse() * self.rotation).normalize();
        self.position_alpha = self.position_alpha.max(position_alpha);
        self.rotation_alpha = self.rotation_alpha.max(rotation_alpha);
    }

    /// Tests if the goal carries no effect.
    pub fn is_neutral(&self) -> bool {
        return self.space == IKGoalSpace::Additive
            && self.position == Vec3::ZERO
            && self.rotation == Quat::IDENTITY
            && self.position_alpha == 0.0
            && self.rotation_alpha == 0.0;
    }
}

///
/// Frame scoped goal container shared by the op stack.
///
/// Reset to neutral at the start of every frame, written (possibly by several ops) during
/// the frame, then consumed once by the IK solver.
///
#[derive(Debug, Clone, Default)]
pub struct IKGoalContainer {
    goals: DeterministicMap<String, IKGoal>,
}

impl IKGoalContainer {
    pub fn new() -> IKGoalContainer {
        return IKGoalContainer {
            goals: deterministic_map(),
        };
    }

    /// Registers every goal of `rig`, keeping goals already present.
    pub fn add_rig_goals(&mut self, rig: &IKRigDefinition) {
        for goal in &rig.goals {
            self.goals
                .entry(goal.name.clone())
                .or_insert_with(|| IKGoal::new(goal.name.clone(), goal.bone.clone()));
        }
    }

    /// Resets every goal to neutral, keeping names and bones.
    pub fn reset(&mut self) {
        self.goals.values_mut().for_each(|goal| goal.reset());
    }

    pub fn clear(&mut self) {
        self.goals.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        return self.goals.len();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        return self.goals.is_empty();
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        return self.goals.contains_key(name);
    }

    #[inline]
    pub fn goal(&self, name: &str) -> Option<&IKGoal> {
        return self.goals.get(name);
    }

    #[inline]
    pub fn goal_mut(&mut self, name: &str) -> Option<&mut IKGoal> {
        return self.goals.get_mut(name);
    }

    /// Inserts or replaces a goal.
    pub fn set_goal(&mut self, goal: IKGoal) {
        self.goals.insert(goal.name.clone(), goal);
    }

    pub fn iter(&self) -> impl Iterator<Item = &IKGoal> {
        return self.goals.values();
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut IKGoal> {
        return self.goals.values_mut();
    }
}

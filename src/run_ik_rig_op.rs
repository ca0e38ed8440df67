use std::sync::Arc;

use crate::ik_rig_solver::{IKRigSolver, IKRigSolverFactory};
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpRunContext, RetargetOp};
use crate::rig::IKRigDefinition;

///
/// Settings of `RunIKRigOp`.
///
/// Neither field is serialized: hosts attach the rig and the solver at runtime. A missing
/// rig falls back to the asset's target rig, a missing solver disables the op.
///
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunIKRigSettings {
    #[cfg_attr(feature = "serde", serde(skip))]
    pub ik_rig: Option<Arc<IKRigDefinition>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub solver: Option<Arc<dyn IKRigSolverFactory>>,
}

impl PartialEq for RunIKRigSettings {
    fn eq(&self, other: &RunIKRigSettings) -> bool {
        let same_rig = match (&self.ik_rig, &other.ik_rig) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        let same_solver = match (&self.solver, &other.solver) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        return same_rig && same_solver;
    }
}

impl RunIKRigSettings {
    pub fn new(ik_rig: Option<Arc<IKRigDefinition>>, solver: Arc<dyn IKRigSolverFactory>) -> RunIKRigSettings {
        return RunIKRigSettings {
            ik_rig,
            solver: Some(solver),
        };
    }

    #[inline]
    pub fn requires_reinit(&self, other: &RunIKRigSettings) -> bool {
        return self != other;
    }
}

///
/// Runs the IK solver on the target pose, using the goals its child ops wrote.
///
/// Child ops (`IKChainsOp`, `StrideWarpOp`) run before this op in the stack.
///
#[derive(Debug)]
pub struct RunIKRigOp {
    header: OpHeader,
    settings: RunIKRigSettings,
    solver: Option<Box<dyn IKRigSolver>>,
}

impl Clone for RunIKRigOp {
    fn clone(&self) -> RunIKRigOp {
        // solvers are recreated at initialization
        return RunIKRigOp {
            header: self.header.clone(),
            settings: self.settings.clone(),
            solver: None,
        };
    }
}

impl RunIKRigOp {
    pub fn new(name: impl Into<String>, settings: RunIKRigSettings) -> RunIKRigOp {
        return RunIKRigOp {
            header: OpHeader::new(name),
            settings,
            solver: None,
        };
    }

    #[inline]
    pub fn solver(&self) -> Option<&dyn IKRigSolver> {
        return self.solver.as_deref();
    }
}

impl RetargetOp for RunIKRigOp {
    impl_op_settings!(RunIKRig);

    fn kind(&self) -> OpKind {
        return OpKind::RunIKRig;
    }

    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool {
        self.solver = None;
        let rig = match &self.settings.ik_rig {
            Some(rig) => rig.clone(),
            None => ctx.target_rig.clone(),
        };
        let factory = match &self.settings.solver {
            Some(factory) => factory,
            None => {
                ctx.log
                    .warning(format!("{}: no IK solver attached to rig '{}'", self.header.name, rig.name));
                return false;
            }
        };

        ctx.goals.add_rig_goals(&rig);
        let mut solver = factory.create();
        if !solver.initialize(&rig, ctx.target.skeleton(), ctx.goals) {
            ctx.log.warning(format!(
                "{}: IK rig '{}' could not be initialized on the target skeleton",
                self.header.name, rig.name
            ));
            return false;
        }
        self.solver = Some(solver);
        return true;
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        if ctx.frame.is_ik_disabled() {
            return;
        }
        let solver = match &mut self.solver {
            Some(solver) => solver,
            None => return,
        };
        solver.set_input_pose(ctx.target_pose);
        solver.solve(&ctx.frame.goals);
        let output = solver.output_pose();
        if output.len() == ctx.target_pose.len() {
            ctx.target_pose.copy_from_slice(output);
        }
    }

    fn ik_rig(&self) -> Option<&Arc<IKRigDefinition>> {
        return self.settings.ik_rig.as_ref();
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::ik_goal::IKGoalSpace;
    use crate::test_utils::{GoalSnapSolverFactory, OpHarness};

    #[test]
    fn test_run_solver() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = RunIKRigOp::new("IK", RunIKRigSettings::new(None, Arc::new(GoalSnapSolverFactory)));
        assert!(harness.initialize(&mut op, None));
        assert_eq!(harness.frame.goals.len(), 4);
        assert!(op.ik_rig().is_none());

        let source = harness.source_pose(|_, _| {});
        harness.target.generate_base_pose();
        harness.frame.reset(false);
        {
            let goal = harness.frame.goals.goal_mut("LeftFootIK").unwrap();
            goal.position = Vec3::new(10.0, 20.0, 5.0);
            goal.position_alpha = 1.0;
            goal.space = IKGoalSpace::Component;
        }
        let output = harness.run_again(&mut op, &source);
        let foot = harness.target_bone("foot_l");
        assert!(output[foot].translation.abs_diff_eq(Vec3::new(10.0, 20.0, 5.0), 1e-4));

        // forced off
        harness.target.generate_base_pose();
        harness.frame.reset(true);
        let output = harness.run_again(&mut op, &source);
        assert_eq!(output.as_slice(), harness.target.retarget_global_pose());
    }

    #[test]
    fn test_missing_solver() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = RunIKRigOp::new("IK", RunIKRigSettings::default());
        assert!(!harness.initialize(&mut op, None));
        assert!(op.solver().is_none());

        let cloned = RunIKRigOp::new("IK", RunIKRigSettings::new(None, Arc::new(GoalSnapSolverFactory)));
        let settings = cloned.settings();
        assert_eq!(op.set_settings(&settings), Ok(true));
        assert_eq!(op.set_settings(&settings), Ok(false));
    }
}

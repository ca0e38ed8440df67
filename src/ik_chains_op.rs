use glam::{Quat, Vec3};

use crate::base::RetargetSide;
use crate::chain::ResolvedBoneChain;
use crate::chain_set::{AutoMapChainType, ChainMapping};
use crate::math::{quat_blend, safe_div, Transform};
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpRunContext, RetargetOp};

/// Per target chain settings of `IKChainsOp`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IKChainSettings {
    pub target_chain: String,
    pub enable_ik: bool,

    /// Blends the goal position towards the raw source end bone position.
    pub blend_to_source_translation: f32,
    /// Blends the goal rotation towards the raw source end bone rotation.
    pub blend_to_source_rotation: f32,
    /// Per-axis weights of `blend_to_source_translation`.
    pub blend_to_source_weights: Vec3,

    /// Static offset in global space.
    pub static_offset: Vec3,
    /// Static offset in the goal's local space.
    pub static_local_offset: Vec3,
    /// Static rotation offset in the goal's local space.
    pub static_rotation_offset: Quat,

    /// Multiplies the goal height.
    pub scale_vertical: f32,
    /// Scales the reach of the goal from the chain root.
    pub extension: f32,

    pub position_alpha: f32,
    pub rotation_alpha: f32,
}

impl Default for IKChainSettings {
    fn default() -> IKChainSettings {
        return IKChainSettings {
            target_chain: String::new(),
            enable_ik: true,
            blend_to_source_translation: 0.0,
            blend_to_source_rotation: 0.0,
            blend_to_source_weights: Vec3::ONE,
            static_offset: Vec3::ZERO,
            static_local_offset: Vec3::ZERO,
            static_rotation_offset: Quat::IDENTITY,
            scale_vertical: 1.0,
            extension: 1.0,
            position_alpha: 1.0,
            rotation_alpha: 1.0,
        };
    }
}

impl IKChainSettings {
    pub fn new(target_chain: impl Into<String>) -> IKChainSettings {
        return IKChainSettings {
            target_chain: target_chain.into(),
            ..Default::default()
        };
    }
}

/// Settings of `IKChainsOp`.
///
/// * `affect_ik_horizontal` - When false, goals do not follow the pelvis horizontally.
/// * `affect_ik_vertical` - When false, goals do not follow the pelvis vertically.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IKChainsSettings {
    pub chain_mapping: ChainMapping,
    pub chains: Vec<IKChainSettings>,
    pub affect_ik_horizontal: bool,
    pub affect_ik_vertical: bool,
}

impl Default for IKChainsSettings {
    fn default() -> IKChainsSettings {
        return IKChainsSettings {
            chain_mapping: ChainMapping::new(),
            chains: Vec::new(),
            affect_ik_horizontal: true,
            affect_ik_vertical: false,
        };
    }
}

impl IKChainsSettings {
    pub fn requires_reinit(&self, other: &IKChainsSettings) -> bool {
        if self.chain_mapping != other.chain_mapping || self.chains.len() != other.chains.len() {
            return true;
        }
        return self
            .chains
            .iter()
            .zip(other.chains.iter())
            .any(|(a, b)| a.target_chain != b.target_chain || a.enable_ik != b.enable_ik);
    }

    #[inline]
    pub fn chain(&self, target_chain: &str) -> Option<&IKChainSettings> {
        return self.chains.iter().find(|c| c.target_chain == target_chain);
    }
}

/// Source end effector, normalized by the source chain length.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct EncodedSource {
    end_position: Vec3,
    end_rotation: Quat,
    direction_normalized: Vec3,
    rotation_delta: Quat,
}

#[derive(Debug, Clone)]
struct IKChainPair {
    goal: String,
    settings_index: Option<usize>,
    source: ResolvedBoneChain,
    target: ResolvedBoneChain,
    source_length_inv: f32,
}

impl IKChainPair {
    fn encode(&self, source_pose: &[Transform]) -> EncodedSource {
        let (start, end) = match (self.source.start_bone(), self.source.end_bone()) {
            (Some(start), Some(end)) => (start, end),
            _ => return EncodedSource::default(),
        };
        let root = source_pose[start].translation;
        let end = source_pose[end];
        let end_initial = match self.source.ref_pose_global().last() {
            Some(initial) => initial.rotation,
            None => Quat::IDENTITY,
        };
        return EncodedSource {
            end_position: end.translation,
            end_rotation: end.rotation,
            direction_normalized: (end.translation - root) * self.source_length_inv,
            rotation_delta: (end.rotation * end_initial.inverse()).normalize(),
        };
    }
}

///
/// Retargets IK goals from source chains onto target chains.
///
/// Must be parented to a `RunIKRigOp`, which owns the target rig and runs the solver after
/// its children wrote the goals.
///
#[derive(Debug, Clone)]
pub struct IKChainsOp {
    header: OpHeader,
    settings: IKChainsSettings,
    mapping: ChainMapping,
    pairs: Vec<IKChainPair>,
}

impl IKChainsOp {
    pub fn new(name: impl Into<String>, settings: IKChainsSettings) -> IKChainsOp {
        return IKChainsOp {
            header: OpHeader::new(name),
            settings,
            mapping: ChainMapping::new(),
            pairs: Vec::new(),
        };
    }

    /// Names of the goals driven by this op.
    pub fn goals(&self) -> impl Iterator<Item = &str> {
        return self.pairs.iter().map(|p| p.goal.as_str());
    }

    ///
    /// Decodes a goal for the target chain. Steps run in this order:
    ///
    /// 1. target root + normalized source direction * target chain length,
    /// 2. blend towards the raw source end effector,
    /// 3. static global, local and rotation offsets,
    /// 4. vertical scale,
    /// 5. reach extension from the target chain root.
    ///
    fn decode(&self, pair: &IKChainPair, encoded: &EncodedSource, target_pose: &[Transform]) -> (Vec3, Quat) {
        let default_settings = IKChainSettings::default();
        let settings = match pair.settings_index {
            Some(idx) => &self.settings.chains[idx],
            None => &default_settings,
        };
        let target_root = match pair.target.start_bone() {
            Some(start) => target_pose[start].translation,
            None => Vec3::ZERO,
        };
        let target_end_initial = match pair.target.ref_pose_global().last() {
            Some(initial) => initial.rotation,
            None => Quat::IDENTITY,
        };

        let mut position = target_root + encoded.direction_normalized * pair.target.initial_length();
        let mut rotation = (encoded.rotation_delta * target_end_initial).normalize();

        let blend = settings.blend_to_source_weights * settings.blend_to_source_translation;
        position += (encoded.end_position - position) * blend;
        rotation = quat_blend(rotation, encoded.end_rotation, settings.blend_to_source_rotation);

        position += settings.static_offset;
        position += rotation * settings.static_local_offset;
        rotation = (rotation * settings.static_rotation_offset).normalize();

        position.z *= settings.scale_vertical;

        position = target_root + (position - target_root) * settings.extension;
        return (position, rotation);
    }
}

impl RetargetOp for IKChainsOp {
    impl_op_settings!(IKChains);

    fn kind(&self) -> OpKind {
        return OpKind::IKChains;
    }

    fn parent_op_kind(&self) -> Option<OpKind> {
        return Some(OpKind::RunIKRig);
    }

    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool {
        let source_rig = ctx.source_rig.clone();
        let target_rig = ctx.effective_target_rig().clone();
        ctx.goals.add_rig_goals(&target_rig);

        self.mapping = self.settings.chain_mapping.clone();
        if self.mapping.pairs().is_empty() {
            self.mapping
                .auto_map(&source_rig.chains, &target_rig.chains, AutoMapChainType::Exact, true);
        }

        self.pairs.clear();
        for (target_name, source_name) in self.mapping.mapped_pairs() {
            let settings_index = self.settings.chains.iter().position(|c| c.target_chain == target_name);
            if let Some(idx) = settings_index {
                if !self.settings.chains[idx].enable_ik {
                    continue;
                }
            }
            let goal = match target_rig.chain(target_name).and_then(|c| c.ik_goal.clone()) {
                Some(goal) => goal,
                // FK only chain
                None => continue,
            };
            if target_rig.goal(&goal).is_none() || !ctx.goals.contains(&goal) {
                ctx.log.warning(format!(
                    "{}: goal '{}' of chain '{}' not found in rig '{}'",
                    self.header.name, goal, target_name, target_rig.name
                ));
                return false;
            }

            let target = ctx.chains.chain(RetargetSide::Target, &target_rig.name, target_name);
            let source = ctx.chains.chain(RetargetSide::Source, &source_rig.name, source_name);
            let (source, target) = match (source, target) {
                (Some(source), Some(target)) => (source, target),
                _ => {
                    ctx.log.warning(format!(
                        "{}: chain pair '{}' <- '{}' not found",
                        self.header.name, target_name, source_name
                    ));
                    return false;
                }
            };
            if !source.is_valid() || !target.is_valid() {
                ctx.log.warning(format!(
                    "{}: skipping invalid chain pair '{}' <- '{}'",
                    self.header.name, target_name, source_name
                ));
                continue;
            }

            self.pairs.push(IKChainPair {
                goal,
                settings_index,
                source_length_inv: safe_div(1.0, source.initial_length(), 0.0),
                source: source.clone(),
                target: target.clone(),
            });
        }
        return true;
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        let pelvis_delta = ctx.frame.pelvis_translation_delta();
        for pair in &self.pairs {
            let encoded = pair.encode(ctx.source_pose);
            let (mut position, rotation) = self.decode(pair, &encoded, ctx.target_pose);

            if !self.settings.affect_ik_horizontal {
                position.x -= pelvis_delta.x;
                position.y -= pelvis_delta.y;
            }
            if !self.settings.affect_ik_vertical {
                position.z -= pelvis_delta.z;
            }

            let settings = pair.settings_index.map(|idx| &self.settings.chains[idx]);
            let baseline = match pair.target.end_bone() {
                Some(end) => ctx.target_pose[end],
                None => continue,
            };
            let goal = match ctx.frame.goals.goal_mut(&pair.goal) {
                Some(goal) => goal,
                None => continue,
            };
            goal.add_component_goal(
                position,
                rotation,
                &baseline,
                settings.map(|s| s.position_alpha).unwrap_or(1.0),
                settings.map(|s| s.rotation_alpha).unwrap_or(1.0),
            );
        }
    }

    fn collect_retargeted_bones(&self, out: &mut Vec<usize>) {
        for pair in &self.pairs {
            out.extend_from_slice(pair.target.bone_indices());
        }
    }

    fn chain_mapping(&self) -> Option<&ChainMapping> {
        return Some(&self.mapping);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ik_goal::IKGoalSpace;
    use crate::run_ik_rig_op::{RunIKRigOp, RunIKRigSettings};
    use crate::test_utils::{GoalSnapSolverFactory, OpHarness};

    fn ik_ops(settings: IKChainsSettings) -> (IKChainsOp, RunIKRigOp) {
        let mut ik = IKChainsOp::new("IK Chains", settings);
        ik.header_mut().parent = Some("Run IK".into());
        let run = RunIKRigOp::new("Run IK", RunIKRigSettings::new(None, Arc::new(GoalSnapSolverFactory)));
        return (ik, run);
    }

    #[test]
    fn test_identity_goals() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let (mut ik, run) = ik_ops(IKChainsSettings::default());
        assert!(harness.initialize(&mut ik, Some(&run)));
        assert_eq!(ik.goals().count(), 4);
        assert_eq!(ik.parent_op_kind(), Some(OpKind::RunIKRig));

        let calf = harness.source_bone("calf_l");
        let source = harness.source_pose(|_, local| local[calf].rotation = Quat::from_rotation_x(0.6));
        harness.run(&mut ik, &source);

        let goal = harness.frame.goals.goal("LeftFootIK").unwrap();
        let foot = harness.source_bone("foot_l");
        assert_eq!(goal.space, IKGoalSpace::Component);
        assert!(goal.position.abs_diff_eq(source[foot].translation, 1e-3));
        assert!(goal.rotation.abs_diff_eq(source[foot].rotation, 1e-4));
        assert_eq!(goal.position_alpha, 1.0);
    }

    #[test]
    fn test_extension_doubles_reach() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let (mut ik, run) = ik_ops(IKChainsSettings {
            chains: vec![IKChainSettings {
                extension: 2.0,
                ..IKChainSettings::new("LeftLeg")
            }],
            ..Default::default()
        });
        assert!(harness.initialize(&mut ik, Some(&run)));

        let source = harness.source_pose(|_, _| {});
        harness.run(&mut ik, &source);
        let goal = harness.frame.goals.goal("LeftFootIK").unwrap();
        let root = harness.target.retarget_global_pose()[harness.target_bone("thigh_l")].translation;
        let end = harness.target.retarget_global_pose()[harness.target_bone("foot_l")].translation;
        assert!(goal.position.abs_diff_eq(root + (end - root) * 2.0, 1e-3));
    }

    #[test]
    fn test_sibling_ops_add_up() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let (mut legs, run) = ik_ops(IKChainsSettings {
            chains: vec![IKChainSettings {
                static_offset: Vec3::new(1.0, 0.0, 0.0),
                ..IKChainSettings::new("LeftLeg")
            }],
            ..Default::default()
        });
        let mut offsets = IKChainsOp::new(
            "IK Offsets",
            IKChainsSettings {
                chain_mapping: ChainMapping::from_pairs([("LeftLeg", "LeftLeg")]),
                chains: vec![IKChainSettings {
                    static_offset: Vec3::new(0.0, 5.0, 0.0),
                    position_alpha: 0.5,
                    ..IKChainSettings::new("LeftLeg")
                }],
                ..Default::default()
            },
        );
        offsets.header_mut().parent = Some("Run IK".into());
        assert!(harness.initialize(&mut legs, Some(&run)));
        assert!(harness.initialize(&mut offsets, Some(&run)));

        let source = harness.source_pose(|_, _| {});
        harness.run(&mut legs, &source);
        harness.run_again(&mut offsets, &source);

        // foot at (10, 0, 5), both offsets kept
        let goal = harness.frame.goals.goal("LeftFootIK").unwrap();
        assert_eq!(goal.space, IKGoalSpace::Component);
        assert!(goal.position.abs_diff_eq(Vec3::new(11.0, 5.0, 5.0), 1e-3));
        assert_eq!(goal.position_alpha, 1.0);
        let goal = harness.frame.goals.goal("RightFootIK").unwrap();
        assert!(goal.position.abs_diff_eq(Vec3::new(-10.0, 0.0, 5.0), 1e-3));
    }

    #[test]
    fn test_scaled_target() {
        let mut harness = OpHarness::new(1.0, 2.0);
        let (mut ik, run) = ik_ops(IKChainsSettings::default());
        assert!(harness.initialize(&mut ik, Some(&run)));

        // knee bent so the foot moves 10% of the leg length forward
        let thigh = harness.source_bone("thigh_l");
        let source = harness.source_pose(|_, local| {
            local[thigh].rotation = Quat::from_rotation_x((0.1f32).asin());
        });
        harness.run(&mut ik, &source);
        let goal = harness.frame.goals.goal("LeftFootIK").unwrap();
        let root = harness.target.retarget_global_pose()[harness.target_bone("thigh_l")].translation;
        let reach = goal.position - root;
        assert!((reach.length() - 180.0).abs() < 1e-2);
        assert!((reach.y - 18.0).abs() < 1e-2);
    }

    #[test]
    fn test_offsets_and_vertical_scale() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let (mut ik, run) = ik_ops(IKChainsSettings {
            chains: vec![IKChainSettings {
                static_offset: Vec3::new(1.0, 0.0, 0.0),
                static_local_offset: Vec3::new(0.0, 2.0, 0.0),
                scale_vertical: 2.0,
                ..IKChainSettings::new("LeftLeg")
            }],
            ..Default::default()
        });
        assert!(harness.initialize(&mut ik, Some(&run)));
        let source = harness.source_pose(|_, _| {});
        harness.run(&mut ik, &source);
        let goal = harness.frame.goals.goal("LeftFootIK").unwrap();
        // foot at (10, 0, 5) in the reference pose
        assert!(goal.position.abs_diff_eq(Vec3::new(11.0, 2.0, 10.0), 1e-3));
    }

    #[test]
    fn test_pelvis_delta_removed() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let (mut ik, run) = ik_ops(IKChainsSettings {
            affect_ik_horizontal: false,
            affect_ik_vertical: false,
            ..Default::default()
        });
        assert!(harness.initialize(&mut ik, Some(&run)));

        harness.target.generate_base_pose();
        harness.frame.reset(false);
        harness.frame.set_pelvis_motion(crate::op::PelvisMotionDelta {
            pelvis: harness.target_bone("pelvis"),
            translation_delta: Vec3::new(3.0, 4.0, 5.0),
            rotation_delta: Quat::IDENTITY,
        });
        let source = harness.source_pose(|_, _| {});
        harness.run_again(&mut ik, &source);
        let goal = harness.frame.goals.goal("LeftFootIK").unwrap();
        assert!(goal.position.abs_diff_eq(Vec3::new(7.0, -4.0, 0.0), 1e-3));
    }

    #[test]
    fn test_missing_goal() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut rig = crate::test_utils::new_biped_rig("TargetRig");
        rig.goals.retain(|g| g.name != "LeftFootIK");
        harness.target_rig = Arc::new(rig);
        harness.frame.goals.clear();

        let (mut ik, run) = ik_ops(IKChainsSettings::default());
        harness.log.clear();
        assert!(!harness.initialize(&mut ik, Some(&run)));
        assert!(harness.log.contains(crate::logger::LogLevel::Warning, "LeftFootIK"));
    }
}

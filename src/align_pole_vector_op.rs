use glam::{Quat, Vec3};

use crate::base::RetargetSide;
use crate::chain::ResolvedBoneChain;
use crate::chain_set::{AutoMapChainType, ChainMapping};
use crate::math::{safe_normalize, Transform};
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpRunContext, RetargetOp};

/// Per target chain settings of `AlignPoleVectorOp`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AlignPoleVectorChainSettings {
    pub target_chain: String,
    pub enabled: bool,
    /// Weight of the alignment, 0 keeps the input pose.
    pub align_alpha: f32,
    /// Extra twist about the chain axis, in degrees.
    pub static_angular_offset: f32,
    /// Keeps the pole vector angle between the chains in the retarget poses.
    pub maintain_offset: bool,
}

impl Default for AlignPoleVectorChainSettings {
    fn default() -> AlignPoleVectorChainSettings {
        return AlignPoleVectorChainSettings {
            target_chain: String::new(),
            enabled: true,
            align_alpha: 1.0,
            static_angular_offset: 0.0,
            maintain_offset: false,
        };
    }
}

impl AlignPoleVectorChainSettings {
    pub fn new(target_chain: impl Into<String>) -> AlignPoleVectorChainSettings {
        return AlignPoleVectorChainSettings {
            target_chain: target_chain.into(),
            ..Default::default()
        };
    }
}

/// Settings of `AlignPoleVectorOp`. An empty `chain_mapping` maps chains by exact name.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AlignPoleVectorSettings {
    pub chain_mapping: ChainMapping,
    pub chains: Vec<AlignPoleVectorChainSettings>,
}

impl AlignPoleVectorSettings {
    pub fn requires_reinit(&self, other: &AlignPoleVectorSettings) -> bool {
        if self.chain_mapping != other.chain_mapping || self.chains.len() != other.chains.len() {
            return true;
        }
        return self
            .chains
            .iter()
            .zip(other.chains.iter())
            .any(|(a, b)| a.target_chain != b.target_chain || a.enabled != b.enabled);
    }
}

/// Direction the chain bends towards: the normalized sum of every joint's offset from the
/// root to tip axis. `None` for straight chains.
pub fn chain_pole_vector(chain: &ResolvedBoneChain, pose: &[Transform]) -> Option<(Vec3, Vec3)> {
    let root = pose.get(chain.start_bone()?)?.translation;
    let tip = pose.get(chain.end_bone()?)?.translation;
    let axis = safe_normalize(tip - root)?;
    let mut pole = Vec3::ZERO;
    for &bone in chain.bone_indices() {
        let offset = pose.get(bone)?.translation - root;
        pole += offset - axis * offset.dot(axis);
    }
    return Some((axis, safe_normalize(pole)?));
}

/// Signed angle about `axis` taking `from` onto `to` projected on the plane normal to `axis`.
fn angle_about_axis(axis: Vec3, from: Vec3, to: Vec3) -> Option<f32> {
    let from = safe_normalize(from - axis * from.dot(axis))?;
    let to = safe_normalize(to - axis * to.dot(axis))?;
    return Some(axis.dot(from.cross(to)).atan2(from.dot(to)));
}

#[derive(Debug, Clone)]
struct PoleVectorPair {
    settings_index: Option<usize>,
    source: ResolvedBoneChain,
    target: ResolvedBoneChain,
    reference_angle: f32,
}

///
/// Twists target chains about their root to tip axis so they bend the same way as their
/// source chains.
///
#[derive(Debug, Clone)]
pub struct AlignPoleVectorOp {
    header: OpHeader,
    settings: AlignPoleVectorSettings,
    mapping: ChainMapping,
    pairs: Vec<PoleVectorPair>,
}

impl AlignPoleVectorOp {
    pub fn new(name: impl Into<String>, settings: AlignPoleVectorSettings) -> AlignPoleVectorOp {
        return AlignPoleVectorOp {
            header: OpHeader::new(name),
            settings,
            mapping: ChainMapping::new(),
            pairs: Vec::new(),
        };
    }

    #[inline]
    pub fn num_chain_pairs(&self) -> usize {
        return self.pairs.len();
    }
}

impl RetargetOp for AlignPoleVectorOp {
    impl_op_settings!(AlignPoleVector);

    fn kind(&self) -> OpKind {
        return OpKind::AlignPoleVector;
    }

    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool {
        let source_rig = ctx.source_rig.clone();
        let target_rig = ctx.effective_target_rig().clone();

        self.mapping = self.settings.chain_mapping.clone();
        if self.mapping.pairs().is_empty() {
            self.mapping
                .auto_map(&source_rig.chains, &target_rig.chains, AutoMapChainType::Exact, true);
        }

        self.pairs.clear();
        for (target_name, source_name) in self.mapping.mapped_pairs() {
            let settings_index = self.settings.chains.iter().position(|c| c.target_chain == target_name);
            if settings_index.is_some_and(|idx| !self.settings.chains[idx].enabled) {
                continue;
            }
            let source = ctx.chains.valid_chain(RetargetSide::Source, &source_rig.name, source_name);
            let target = ctx.chains.valid_chain(RetargetSide::Target, &target_rig.name, target_name);
            let (source, target) = match (source, target) {
                (Some(source), Some(target)) => (source, target),
                _ => {
                    ctx.log.warning(format!(
                        "{}: skipping chain pair '{}' <- '{}', chain missing or invalid",
                        self.header.name, target_name, source_name
                    ));
                    continue;
                }
            };

            let source_pole = chain_pole_vector(source, ctx.source.retarget_global_pose());
            let target_pole = chain_pole_vector(target, ctx.target.retarget_global_pose());
            let reference_angle = match (source_pole, target_pole) {
                (Some((_, source_pole)), Some((axis, target_pole))) => {
                    angle_about_axis(axis, target_pole, source_pole).unwrap_or(0.0)
                }
                _ => 0.0,
            };
            self.pairs.push(PoleVectorPair {
                settings_index,
                source: source.clone(),
                target: target.clone(),
                reference_angle,
            });
        }
        // parents first
        self.pairs.sort_by_key(|p| p.target.start_bone());
        return true;
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        let default_settings = AlignPoleVectorChainSettings::default();
        for pair in &self.pairs {
            let settings = match pair.settings_index {
                Some(idx) => &self.settings.chains[idx],
                None => &default_settings,
            };
            let source_pole = chain_pole_vector(&pair.source, ctx.source_pose);
            let target_pole = chain_pole_vector(&pair.target, ctx.target_pose);
            let (axis, angle) = match (source_pole, target_pole) {
                (Some((_, source_pole)), Some((axis, target_pole))) => {
                    match angle_about_axis(axis, target_pole, source_pole) {
                        Some(angle) => (axis, angle),
                        None => continue,
                    }
                }
                _ => continue,
            };

            let mut angle = angle;
            if settings.maintain_offset {
                angle -= pair.reference_angle;
            }
            angle += settings.static_angular_offset.to_radians();
            angle *= settings.align_alpha;

            let root = match pair.target.start_bone() {
                Some(root) => root,
                None => continue,
            };
            let current = ctx.target_pose[root];
            let new_root = Transform {
                rotation: (Quat::from_axis_angle(axis, angle) * current.rotation).normalize(),
                ..current
            };
            ctx.target
                .set_global_transform_and_update_children(root, &new_root, ctx.target_pose);
        }
    }

    fn chain_mapping(&self) -> Option<&ChainMapping> {
        return Some(&self.mapping);
    }
}

#[cfg(test)]
mod tests {
    use core::f32::consts;

    use super::*;
    use crate::test_utils::OpHarness;

    fn leg_op(settings: AlignPoleVectorChainSettings) -> AlignPoleVectorOp {
        return AlignPoleVectorOp::new(
            "Align Poles",
            AlignPoleVectorSettings {
                chain_mapping: ChainMapping::from_pairs([("LeftLeg", "LeftLeg")]),
                chains: vec![settings],
            },
        );
    }

    // bends the target knee sideways, runs the op against a source bending forwards
    fn run_bent(harness: &mut OpHarness, op: &mut AlignPoleVectorOp) -> Vec<Transform> {
        let calf = harness.source_bone("calf_l");
        let source = harness.source_pose(|_, local| local[calf].rotation = Quat::from_rotation_x(0.6));

        let calf = harness.target_bone("calf_l");
        harness.target.generate_base_pose();
        let (target, output) = harness.target.split_output_mut();
        let mut local = target.retarget_local_pose().to_vec();
        local[calf].rotation = Quat::from_rotation_y(0.6);
        target.update_global_transforms_all(&local, output);

        harness.frame.reset(false);
        return harness.run_again(op, &source);
    }

    fn leg_pole(harness: &OpHarness, pose: &[Transform], side: RetargetSide) -> (Vec3, Vec3) {
        let rig = match side {
            RetargetSide::Source => "SourceRig",
            RetargetSide::Target => "TargetRig",
        };
        let chain = harness.chains.valid_chain(side, rig, "LeftLeg").unwrap();
        return chain_pole_vector(chain, pose).unwrap();
    }

    #[test]
    fn test_straight_chain_has_no_pole() {
        let harness = OpHarness::new(1.0, 1.0);
        let chain = harness.chains.valid_chain(RetargetSide::Target, "TargetRig", "LeftLeg").unwrap();
        assert!(chain_pole_vector(chain, harness.target.retarget_global_pose()).is_none());
    }

    #[test]
    fn test_align_to_source() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = leg_op(AlignPoleVectorChainSettings::new("LeftLeg"));
        assert!(harness.initialize(&mut op, None));
        assert_eq!(op.num_chain_pairs(), 1);

        let output = run_bent(&mut harness, &mut op);
        let calf = harness.source_bone("calf_l");
        let source = harness.source_pose(|_, local| local[calf].rotation = Quat::from_rotation_x(0.6));
        let (_, source_pole) = leg_pole(&harness, &source, RetargetSide::Source);
        let (axis, target_pole) = leg_pole(&harness, &output, RetargetSide::Target);
        let angle = angle_about_axis(axis, target_pole, source_pole).unwrap();
        assert!(angle.abs() < 1e-3);

        // the chain tip stays on the axis
        let foot = harness.target_bone("foot_l");
        let thigh = harness.target_bone("thigh_l");
        let tip = output[foot].translation - output[thigh].translation;
        assert!(tip.normalize().abs_diff_eq(axis, 1e-4));
    }

    #[test]
    fn test_alpha_and_static_offset() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = leg_op(AlignPoleVectorChainSettings {
            align_alpha: 0.0,
            ..AlignPoleVectorChainSettings::new("LeftLeg")
        });
        assert!(harness.initialize(&mut op, None));
        let before = {
            harness.target.generate_base_pose();
            let mut local = harness.target.retarget_local_pose().to_vec();
            local[harness.target_bone("calf_l")].rotation = Quat::from_rotation_y(0.6);
            let mut global = local.clone();
            harness.target.update_global_transforms_all(&local, &mut global);
            global
        };
        let output = run_bent(&mut harness, &mut op);
        assert!(output[harness.target_bone("foot_l")].abs_diff_eq(&before[harness.target_bone("foot_l")], 1e-4));

        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = leg_op(AlignPoleVectorChainSettings {
            static_angular_offset: 90.0,
            ..AlignPoleVectorChainSettings::new("LeftLeg")
        });
        assert!(harness.initialize(&mut op, None));
        let output = run_bent(&mut harness, &mut op);
        let calf = harness.source_bone("calf_l");
        let source = harness.source_pose(|_, local| local[calf].rotation = Quat::from_rotation_x(0.6));
        let (_, source_pole) = leg_pole(&harness, &source, RetargetSide::Source);
        let (axis, target_pole) = leg_pole(&harness, &output, RetargetSide::Target);
        let angle = angle_about_axis(axis, source_pole, target_pole).unwrap();
        assert!((angle - consts::FRAC_PI_2).abs() < 1e-3);
    }

    #[test]
    fn test_disabled_and_missing_chains() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = leg_op(AlignPoleVectorChainSettings {
            enabled: false,
            ..AlignPoleVectorChainSettings::new("LeftLeg")
        });
        assert!(harness.initialize(&mut op, None));
        assert_eq!(op.num_chain_pairs(), 0);

        let mut op = AlignPoleVectorOp::new(
            "Align Poles",
            AlignPoleVectorSettings {
                chain_mapping: ChainMapping::from_pairs([("Tail", "LeftLeg"), ("RightLeg", "RightLeg")]),
                chains: Vec::new(),
            },
        );
        assert!(harness.initialize(&mut op, None));
        assert_eq!(op.num_chain_pairs(), 1);
    }
}

//!
//! Forward kinematics chain transfer.
//!
//! Each mapped target chain copies the rotation deltas of its source chain, bone by bone.
//! Chains of different bone counts are matched through their normalized parameters: a
//! target bone at parameter `t` reads the source chain transform interpolated at `t`.
//!

use crate::base::RetargetSide;
use crate::chain::ResolvedBoneChain;
use crate::chain_set::{AutoMapChainType, ChainMapping};
use crate::hierarchy::BoneHierarchy;
use crate::math::{quat_blend, quat_from_vectors, safe_div, Transform};
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpRunContext, RetargetOp};

/// How a target bone finds the source transform it copies rotation from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FKRotationMode {
    /// Source chain transform interpolated at the target bone's parameter.
    #[default]
    Interpolated,
    /// Bone `i` of the target reads bone `i` of the source, extra target bones read the source tip.
    OneToOne,
    /// Like `OneToOne`, counted from the tip. Extra target bones read the source root.
    OneToOneReversed,
    /// `Interpolated`, then bones are swung so the chain follows the source chain's shape.
    MatchChain,
    /// `MatchChain` with the source shape scaled by the chain length ratio.
    MatchScaledChain,
    /// Keep reference local rotations.
    None,
}

/// How target bone translations are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FKTranslationMode {
    /// Keep reference local offsets.
    #[default]
    None,
    /// Source global positions scaled by the pelvis height ratio.
    GloballyScaled,
    /// Source global positions, as is.
    Absolute,
    /// Reference offsets scaled by the source chain's stretch.
    StretchBoneLengthUniformly,
    /// Reference offsets scaled by the stretch of the source segment at each bone's parameter.
    StretchBoneLengthNonUniformly,
}

/// Per target chain settings of `FKChainsOp`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FKChainSettings {
    pub target_chain: String,
    pub enable_fk: bool,
    pub rotation_mode: FKRotationMode,
    pub rotation_alpha: f32,
    pub translation_mode: FKTranslationMode,
    pub translation_alpha: f32,
}

impl Default for FKChainSettings {
    fn default() -> FKChainSettings {
        return FKChainSettings {
            target_chain: String::new(),
            enable_fk: true,
            rotation_mode: FKRotationMode::Interpolated,
            rotation_alpha: 1.0,
            translation_mode: FKTranslationMode::None,
            translation_alpha: 1.0,
        };
    }
}

impl FKChainSettings {
    pub fn new(target_chain: impl Into<String>) -> FKChainSettings {
        return FKChainSettings {
            target_chain: target_chain.into(),
            ..Default::default()
        };
    }
}

/// Settings of `FKChainsOp`.
///
/// An empty `chain_mapping` maps chains by exact name at initialization. Target chains
/// without an entry in `chains` use `FKChainSettings::default()`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FKChainsSettings {
    pub chain_mapping: ChainMapping,
    pub chains: Vec<FKChainSettings>,
}

impl FKChainsSettings {
    pub fn requires_reinit(&self, other: &FKChainsSettings) -> bool {
        if self.chain_mapping != other.chain_mapping || self.chains.len() != other.chains.len() {
            return true;
        }
        return self
            .chains
            .iter()
            .zip(other.chains.iter())
            .any(|(a, b)| a.target_chain != b.target_chain || a.enable_fk != b.enable_fk);
    }

    #[inline]
    pub fn chain(&self, target_chain: &str) -> Option<&FKChainSettings> {
        return self.chains.iter().find(|c| c.target_chain == target_chain);
    }
}

#[derive(Debug, Clone)]
struct FKChainPair {
    settings_index: Option<usize>,
    source: ResolvedBoneChain,
    target: ResolvedBoneChain,
}

#[derive(Debug, Clone)]
pub struct FKChainsOp {
    header: OpHeader,
    settings: FKChainsSettings,
    mapping: ChainMapping,
    pairs: Vec<FKChainPair>,
    global_scale: f32,

    input_local: Vec<Transform>,
    written: Vec<bool>,
    source_current: Vec<Transform>,
    chain_global: Vec<Transform>,
    polyline: Vec<Transform>,
}

impl FKChainsOp {
    pub fn new(name: impl Into<String>, settings: FKChainsSettings) -> FKChainsOp {
        return FKChainsOp {
            header: OpHeader::new(name),
            settings,
            mapping: ChainMapping::new(),
            pairs: Vec::new(),
            global_scale: 1.0,
            input_local: Vec::new(),
            written: Vec::new(),
            source_current: Vec::new(),
            chain_global: Vec::new(),
            polyline: Vec::new(),
        };
    }

    /// Number of chain pairs resolved at initialization.
    #[inline]
    pub fn num_chain_pairs(&self) -> usize {
        return self.pairs.len();
    }

    /// Refreshes ancestors of `bone` this op does not write, root first.
    fn refresh_ancestors(&self, target: &BoneHierarchy, bone: usize, pose: &mut [Transform]) {
        let mut path = Vec::new();
        let mut current = target.parent_index(bone);
        while let Some(ancestor) = current {
            path.push(ancestor);
            current = target.parent_index(ancestor);
        }
        for &ancestor in path.iter().rev() {
            if self.written[ancestor] {
                continue;
            }
            if let Some(parent) = target.parent_index(ancestor) {
                pose[ancestor] = pose[parent].mul_transform(&self.input_local[ancestor]);
            }
        }
    }

    fn decode_chain(&mut self, pair_idx: usize, source_pose: &[Transform], pose: &mut [Transform]) {
        let pair = &self.pairs[pair_idx];
        let default_settings = FKChainSettings::default();
        let settings = match pair.settings_index {
            Some(idx) => &self.settings.chains[idx],
            None => &default_settings,
        };
        let source = &pair.source;
        let target = &pair.target;
        let num_source = source.num_bones();
        let num_target = target.num_bones();

        source.gather(source_pose, &mut self.source_current);
        let source_current = &self.source_current;
        let source_initial = source.ref_pose_global();
        let target_initial = target.ref_pose_global();
        let target_ref_local = target.ref_pose_local();
        let parent_global = match target.parent_index() {
            Some(parent) => pose[parent],
            None => Transform::IDENTITY,
        };
        let chain_stretch = safe_div(source.current_length(source_pose), source.initial_length(), 1.0);

        self.chain_global.clear();
        for idx in 0..num_target {
            let param = target.params()[idx];
            let (source_cur, source_init) = match settings.rotation_mode {
                FKRotationMode::OneToOne => {
                    let src = usize::min(idx, num_source - 1);
                    (source_current[src], source_initial[src])
                }
                FKRotationMode::OneToOneReversed => {
                    let from_tip = num_target - 1 - idx;
                    let src = (num_source - 1).saturating_sub(from_tip);
                    (source_current[src], source_initial[src])
                }
                _ => (
                    source.transform_at_param(source_current, param),
                    source.transform_at_param(source_initial, param),
                ),
            };

            let parent = match idx {
                0 => parent_global,
                _ => self.chain_global[idx - 1],
            };
            let ref_local = &target_ref_local[idx];

            let rotation = match settings.rotation_mode {
                FKRotationMode::None => parent.rotation * ref_local.rotation,
                _ => (source_cur.rotation * source_init.rotation.inverse()) * target_initial[idx].rotation,
            };

            // the chain root keeps its offset from its parent when stretching
            let translation = match settings.translation_mode {
                FKTranslationMode::None => parent.transform_point(ref_local.translation),
                FKTranslationMode::GloballyScaled => source_cur.translation * self.global_scale,
                FKTranslationMode::Absolute => source_cur.translation,
                FKTranslationMode::StretchBoneLengthUniformly if idx > 0 => {
                    parent.transform_point(ref_local.translation * chain_stretch)
                }
                FKTranslationMode::StretchBoneLengthNonUniformly if idx > 0 => {
                    let stretch = source.stretch_at_param(source_initial, source_current, param);
                    parent.transform_point(ref_local.translation * stretch)
                }
                _ => parent.transform_point(ref_local.translation),
            };

            self.chain_global.push(Transform {
                translation,
                rotation: rotation.normalize(),
                scale: parent.scale * ref_local.scale,
            });
        }

        let match_scale = match settings.rotation_mode {
            FKRotationMode::MatchChain => Some(1.0),
            FKRotationMode::MatchScaledChain => Some(safe_div(target.initial_length(), source.initial_length(), 1.0)),
            _ => None,
        };
        if let Some(scale) = match_scale {
            if num_source > 1 && num_target > 1 {
                let source_root = source_current[0].translation;
                let anchor = self.chain_global[0].translation;
                self.polyline.clear();
                self.polyline.extend(source_current.iter().map(|t| Transform {
                    translation: anchor + (t.translation - source_root) * scale,
                    ..*t
                }));
                for idx in 0..(num_target - 1) {
                    let desired = source.transform_at_param(&self.polyline, target.params()[idx + 1]).translation;
                    let pivot = self.chain_global[idx].translation;
                    let swing = quat_from_vectors(self.chain_global[idx + 1].translation - pivot, desired - pivot);
                    self.chain_global[idx].rotation = (swing * self.chain_global[idx].rotation).normalize();
                    for child in &mut self.chain_global[(idx + 1)..] {
                        child.translation = pivot + swing * (child.translation - pivot);
                        child.rotation = (swing * child.rotation).normalize();
                    }
                }
            }
        }

        if settings.rotation_alpha < 1.0 || settings.translation_alpha < 1.0 {
            let mut unblended_parent = parent_global;
            let mut blended_parent = parent_global;
            for idx in 0..num_target {
                let local = self.chain_global[idx].relative_to(&unblended_parent);
                let ref_local = &target_ref_local[idx];
                let blended = Transform {
                    translation: ref_local.translation.lerp(local.translation, settings.translation_alpha),
                    rotation: quat_blend(ref_local.rotation, local.rotation, settings.rotation_alpha),
                    scale: local.scale,
                };
                unblended_parent = self.chain_global[idx];
                self.chain_global[idx] = blended_parent.mul_transform(&blended);
                blended_parent = self.chain_global[idx];
            }
        }

        for (idx, &bone) in target.bone_indices().iter().enumerate() {
            pose[bone] = self.chain_global[idx];
        }
    }
}

impl RetargetOp for FKChainsOp {
    impl_op_settings!(FKChains);

    fn kind(&self) -> OpKind {
        return OpKind::FKChains;
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
            if let Some(idx) = settings_index {
                if !self.settings.chains[idx].enable_fk {
                    continue;
                }
            }

            let target = ctx.chains.chain(RetargetSide::Target, &target_rig.name, target_name);
            let source = ctx.chains.chain(RetargetSide::Source, &source_rig.name, source_name);
            let (source, target) = match (source, target) {
                (Some(source), Some(target)) => (source, target),
                (source, target) => {
                    if target.is_none() {
                        ctx.log.warning(format!(
                            "{}: target chain '{}' not found in rig '{}'",
                            self.header.name, target_name, target_rig.name
                        ));
                    }
                    if source.is_none() {
                        ctx.log.warning(format!(
                            "{}: source chain '{}' not found in rig '{}'",
                            self.header.name, source_name, source_rig.name
                        ));
                    }
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
            self.pairs.push(FKChainPair {
                settings_index,
                source: source.clone(),
                target: target.clone(),
            });
        }

        if self.pairs.is_empty() {
            ctx.log.warning(format!("{}: no chains mapped", self.header.name));
        }
        // parents first, so child chains read updated ancestors
        self.pairs.sort_by_key(|p| p.target.start_bone());

        self.global_scale = safe_div(ctx.target.pelvis_height(), ctx.source.pelvis_height(), 1.0);
        self.written = vec![false; ctx.target.num_bones()];
        self.input_local = vec![Transform::IDENTITY; ctx.target.num_bones()];
        return true;
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        let num_bones = ctx.target.num_bones();
        if self.written.len() != num_bones {
            return;
        }
        ctx.target.update_local_transforms_all(&mut self.input_local, ctx.target_pose);
        self.written.iter_mut().for_each(|w| *w = false);

        for pair_idx in 0..self.pairs.len() {
            if let Some(start) = self.pairs[pair_idx].target.start_bone() {
                self.refresh_ancestors(ctx.target, start, ctx.target_pose);
            }
            self.decode_chain(pair_idx, ctx.source_pose, ctx.target_pose);
            for &bone in self.pairs[pair_idx].target.bone_indices() {
                self.written[bone] = true;
            }
        }

        for idx in 0..num_bones {
            if self.written[idx] {
                continue;
            }
            if let Some(parent) = ctx.target.parent_index(idx) {
                ctx.target_pose[idx] = ctx.target_pose[parent].mul_transform(&self.input_local[idx]);
            }
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
    use core::f32::consts;
    use glam::{Quat, Vec3};

    use super::*;
    use crate::test_utils::OpHarness;

    fn fk_op(chains: Vec<FKChainSettings>) -> FKChainsOp {
        return fk_op_mapped(ChainMapping::new(), chains);
    }

    fn fk_op_mapped(chain_mapping: ChainMapping, chains: Vec<FKChainSettings>) -> FKChainsOp {
        return FKChainsOp::new("FK", FKChainsSettings { chain_mapping, chains });
    }

    fn local_pose(harness: &OpHarness, global: &[Transform]) -> Vec<Transform> {
        let mut local = vec![Transform::IDENTITY; global.len()];
        harness.target.update_local_transforms_all(&mut local, global);
        return local;
    }

    #[test]
    fn test_auto_mapping() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = fk_op(vec![]);
        assert!(harness.initialize(&mut op, None));
        assert_eq!(op.num_chain_pairs(), 6);
        assert_eq!(op.chain_mapping().unwrap().source_chain("LeftLeg"), Some("LeftLeg"));

        let thigh = harness.target_bone("thigh_l");
        let ball = harness.target_bone("ball_l");
        assert!(harness.target.is_retargeted(thigh));
        assert!(!harness.target.is_retargeted(ball));
    }

    #[test]
    fn test_identity_reproduces_source() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = fk_op(vec![]);
        assert!(harness.initialize(&mut op, None));

        let source = harness.source_pose(|_, local| {
            local[2].rotation = Quat::from_rotation_y(0.3);
            local[7].rotation = Quat::from_rotation_z(-0.8);
            local[8].rotation = Quat::from_rotation_x(0.4);
            local[15].rotation = Quat::from_rotation_x(0.9);
            local[19].rotation = Quat::from_rotation_y(-0.5);
        });
        let output = harness.run(&mut op, &source);
        crate::test_utils::compare_poses(&output, &source, 1e-3).unwrap();
    }

    #[test]
    fn test_one_to_one_rotation() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = fk_op(vec![FKChainSettings {
            rotation_mode: FKRotationMode::OneToOne,
            ..FKChainSettings::new("LeftLeg")
        }]);
        assert!(harness.initialize(&mut op, None));

        let calf = harness.source_bone("calf_l");
        let rotation = Quat::from_rotation_x(consts::FRAC_PI_2);
        let source = harness.source_pose(|_, local| local[calf].rotation = rotation);
        let output = harness.run(&mut op, &source);
        let local = local_pose(&harness, &output);
        let reference = harness.target.retarget_local_pose();

        let (thigh, calf, foot) = (
            harness.target_bone("thigh_l"),
            harness.target_bone("calf_l"),
            harness.target_bone("foot_l"),
        );
        assert!(local[thigh].abs_diff_eq(&reference[thigh], 1e-4));
        assert!(local[calf].rotation.abs_diff_eq(reference[calf].rotation * rotation, 1e-4));
        assert!(local[foot].abs_diff_eq(&reference[foot], 1e-4));
    }

    #[test]
    fn test_scaled_target_keeps_proportions() {
        let mut harness = OpHarness::new(1.0, 2.0);
        let mut op = fk_op(vec![]);
        assert!(harness.initialize(&mut op, None));

        let thigh = harness.source_bone("thigh_l");
        let source = harness.source_pose(|_, local| local[thigh].rotation = Quat::from_rotation_x(0.5));
        let output = harness.run(&mut op, &source);

        let (t_thigh, t_foot) = (harness.target_bone("thigh_l"), harness.target_bone("foot_l"));
        let length = output[t_foot].translation.distance(output[t_thigh].translation);
        assert!((length - 180.0).abs() < 1e-2);
        assert!(output[t_thigh].rotation.abs_diff_eq(source[thigh].rotation, 1e-4));
    }

    #[test]
    fn test_translation_modes() {
        let mut harness = OpHarness::new(1.0, 2.0);
        let mut op = fk_op(vec![FKChainSettings {
            translation_mode: FKTranslationMode::GloballyScaled,
            ..FKChainSettings::new("LeftArm")
        }]);
        assert!(harness.initialize(&mut op, None));
        let source = harness.source_pose(|_, _| {});
        let output = harness.run(&mut op, &source);
        let hand = harness.source_bone("hand_l");
        assert!(output[harness.target_bone("hand_l")]
            .translation
            .abs_diff_eq(source[hand].translation * 2.0, 1e-3));

        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = fk_op(vec![FKChainSettings {
            translation_mode: FKTranslationMode::StretchBoneLengthUniformly,
            ..FKChainSettings::new("LeftLeg")
        }]);
        assert!(harness.initialize(&mut op, None));
        let (calf, foot) = (harness.source_bone("calf_l"), harness.source_bone("foot_l"));
        let source = harness.source_pose(|_, local| {
            local[calf].translation *= 1.5;
            local[foot].translation *= 1.5;
        });
        let output = harness.run(&mut op, &source);
        let (t_thigh, t_foot) = (harness.target_bone("thigh_l"), harness.target_bone("foot_l"));
        let length = output[t_foot].translation.distance(output[t_thigh].translation);
        assert!((length - 135.0).abs() < 1e-2);
    }

    #[test]
    fn test_match_chain() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = fk_op(vec![FKChainSettings {
            rotation_mode: FKRotationMode::MatchChain,
            ..FKChainSettings::new("LeftLeg")
        }]);
        assert!(harness.initialize(&mut op, None));

        let calf = harness.source_bone("calf_l");
        let source = harness.source_pose(|_, local| local[calf].rotation = Quat::from_rotation_x(-0.7));
        let output = harness.run(&mut op, &source);
        for name in ["thigh_l", "calf_l", "foot_l"] {
            let src = harness.source_bone(name);
            let tgt = harness.target_bone(name);
            assert!(output[tgt].translation.abs_diff_eq(source[src].translation, 1e-2), "{}", name);
        }
    }

    #[test]
    fn test_alpha_and_children() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = fk_op_mapped(
            ChainMapping::from_pairs([("Spine", "Spine")]),
            vec![FKChainSettings {
                rotation_alpha: 0.0,
                ..FKChainSettings::new("Spine")
            }],
        );
        assert!(harness.initialize(&mut op, None));

        let spine = harness.source_bone("spine");
        let source = harness.source_pose(|_, local| local[spine].rotation = Quat::from_rotation_y(1.0));
        let output = harness.run(&mut op, &source);

        // spine rotation is ignored, so arms (non chain children) stay in place
        let reference = harness.target.retarget_global_pose();
        let hand = harness.target_bone("hand_l");
        assert!(output[hand].abs_diff_eq(&reference[hand], 1e-3));

        // the head chain follows the rotated spine when alpha is one
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = fk_op(vec![FKChainSettings {
            enable_fk: false,
            ..FKChainSettings::new("Head")
        }]);
        assert!(harness.initialize(&mut op, None));
        let output = harness.run(&mut op, &source);
        let neck = harness.target_bone("neck");
        let spine_02 = harness.target_bone("spine_02");
        let expected = output[spine_02].transform_point(Vec3::new(0.0, 0.0, 20.0));
        assert!(output[neck].translation.abs_diff_eq(expected, 1e-3));
        assert!(!harness.target.is_retargeted(neck));
    }
}

use glam::{Quat, Vec3};

use crate::base::KINDA_SMALL_NUMBER;
use crate::hierarchy::BoneHierarchy;
use crate::logger::RetargetLog;
use crate::math::{quat_blend, Transform};
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpRunContext, PelvisMotionDelta, RetargetOp};

///
/// Settings of `PelvisMotionOp`.
///
/// Only the pelvis bone names require re-initializing, every other field applies live.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PelvisMotionSettings {
    /// Source pelvis bone, empty for the source rig's pelvis.
    pub source_pelvis_bone: String,
    /// Target pelvis bone, empty for the target rig's pelvis.
    pub target_pelvis_bone: String,

    /// Blends the retargeted rotation against the target reference rotation.
    pub rotation_alpha: f32,
    /// Blends the retargeted translation against the target reference translation.
    pub translation_alpha: f32,

    /// Blends the rotation towards the raw source pelvis rotation.
    pub blend_to_source_rotation: f32,
    /// Blends the translation towards the raw source pelvis position.
    pub blend_to_source_translation: f32,
    /// Per-axis weights of `blend_to_source_translation`.
    pub blend_to_source_translation_weights: Vec3,

    /// Scales the horizontal (XY) displacement from the reference position.
    pub scale_horizontal: f32,
    /// Scales the vertical (Z) displacement from the reference position.
    pub scale_vertical: f32,

    /// Static global translation offset.
    pub translation_offset: Vec3,
    /// Static global rotation offset.
    pub rotation_offset: Quat,
}

impl Default for PelvisMotionSettings {
    fn default() -> PelvisMotionSettings {
        return PelvisMotionSettings {
            source_pelvis_bone: String::new(),
            target_pelvis_bone: String::new(),
            rotation_alpha: 1.0,
            translation_alpha: 1.0,
            blend_to_source_rotation: 0.0,
            blend_to_source_translation: 0.0,
            blend_to_source_translation_weights: Vec3::ONE,
            scale_horizontal: 1.0,
            scale_vertical: 1.0,
            translation_offset: Vec3::ZERO,
            rotation_offset: Quat::IDENTITY,
        };
    }
}

impl PelvisMotionSettings {
    pub fn requires_reinit(&self, other: &PelvisMotionSettings) -> bool {
        return self.source_pelvis_bone != other.source_pelvis_bone
            || self.target_pelvis_bone != other.target_pelvis_bone;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct PelvisSource {
    bone: usize,
    initial: Transform,
    height_inv: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct PelvisTarget {
    bone: usize,
    initial: Transform,
    height: f32,
}

///
/// Transfers pelvis motion from the source to the target.
///
/// Source displacement is normalized by the source pelvis height and rescaled by the
/// target pelvis height, so a character twice as tall moves twice as far. The resulting
/// delta is published to the frame context for the ops running afterwards.
///
#[derive(Debug, Clone)]
pub struct PelvisMotionOp {
    header: OpHeader,
    settings: PelvisMotionSettings,
    source: PelvisSource,
    target: PelvisTarget,
}

impl PelvisMotionOp {
    pub fn new(name: impl Into<String>, settings: PelvisMotionSettings) -> PelvisMotionOp {
        return PelvisMotionOp {
            header: OpHeader::new(name),
            settings,
            source: PelvisSource::default(),
            target: PelvisTarget::default(),
        };
    }

    fn find_pelvis(hierarchy: &BoneHierarchy, bone: &str, side: &str, log: &mut RetargetLog) -> Option<usize> {
        let pelvis = match bone.is_empty() {
            true => hierarchy.pelvis(),
            false => hierarchy.find_bone_index_by_name(bone),
        };
        if pelvis.is_none() {
            log.warning(format!("pelvis motion: {} pelvis bone '{}' not found", side, bone));
        }
        return pelvis;
    }

    /// Target pelvis global transform for the given source pelvis global transform.
    fn decode(&self, source_current: &Transform) -> Transform {
        let s = &self.settings;
        let source_initial = &self.source.initial;
        let target_initial = &self.target.initial;

        // normalized displacement, rescaled to the target
        let displacement = source_current.translation - source_initial.translation;
        let mut translation =
            target_initial.translation + displacement * (self.source.height_inv * self.target.height);

        let blend = s.blend_to_source_translation_weights * s.blend_to_source_translation;
        translation += (source_current.translation - translation) * blend;

        let offset = translation - target_initial.translation;
        let offset = Vec3::new(
            offset.x * s.scale_horizontal,
            offset.y * s.scale_horizontal,
            offset.z * s.scale_vertical,
        );
        translation = target_initial.translation + offset + s.translation_offset;

        let rotation_delta = source_current.rotation * source_initial.rotation.inverse();
        let mut rotation = (rotation_delta * target_initial.rotation).normalize();
        rotation = quat_blend(rotation, source_current.rotation, s.blend_to_source_rotation);
        rotation = (s.rotation_offset * rotation).normalize();

        return Transform {
            translation: target_initial.translation.lerp(translation, s.translation_alpha),
            rotation: quat_blend(target_initial.rotation, rotation, s.rotation_alpha),
            scale: target_initial.scale,
        };
    }
}

impl RetargetOp for PelvisMotionOp {
    impl_op_settings!(PelvisMotion);

    fn kind(&self) -> OpKind {
        return OpKind::PelvisMotion;
    }

    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool {
        let source = Self::find_pelvis(ctx.source, &self.settings.source_pelvis_bone, "source", ctx.log);
        let target = Self::find_pelvis(ctx.target, &self.settings.target_pelvis_bone, "target", ctx.log);
        let (source, target) = match (source, target) {
            (Some(source), Some(target)) => (source, target),
            _ => return false,
        };

        let source_initial = ctx.source.retarget_global_pose()[source];
        let source_height = source_initial.translation.z;
        let height_inv = if source_height.abs() < KINDA_SMALL_NUMBER {
            ctx.log.warning(format!(
                "pelvis motion: source pelvis '{}' is at ground level, displacement left unnormalized",
                ctx.source.bone_name(source)
            ));
            1.0
        } else {
            1.0 / source_height
        };

        let target_initial = ctx.target.retarget_global_pose()[target];
        let target_height = if source_height.abs() < KINDA_SMALL_NUMBER {
            1.0
        } else {
            target_initial.translation.z
        };

        self.source = PelvisSource {
            bone: source,
            initial: source_initial,
            height_inv,
        };
        self.target = PelvisTarget {
            bone: target,
            initial: target_initial,
            height: target_height,
        };
        return true;
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        let source_current = match ctx.source_pose.get(self.source.bone) {
            Some(transform) => *transform,
            None => return,
        };
        let new_pelvis = self.decode(&source_current);
        ctx.target
            .set_global_transform_and_update_children(self.target.bone, &new_pelvis, ctx.target_pose);

        ctx.frame.set_pelvis_motion(PelvisMotionDelta {
            pelvis: self.target.bone,
            translation_delta: new_pelvis.translation - self.target.initial.translation,
            rotation_delta: (new_pelvis.rotation * self.target.initial.rotation.inverse()).normalize(),
        });
    }

    fn collect_retargeted_bones(&self, out: &mut Vec<usize>) {
        out.push(self.target.bone);
    }
}

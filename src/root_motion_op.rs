use glam::Vec3;

use crate::base::KINDA_SMALL_NUMBER;
use crate::hierarchy::BoneHierarchy;
use crate::math::{quat_swing_twist, Transform};
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpPostInitContext, OpRunContext, RetargetOp};

/// Where the target root motion comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootMotionSource {
    /// Source root motion, scaled by the pelvis height ratio.
    #[default]
    CopyFromSourceRoot,
    /// Target pelvis projected to the ground, yaw only.
    GenerateFromTargetPelvis,
}

/// Where the target root height comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootMotionHeightSource {
    #[default]
    CopyHeightFromSource,
    SnapToGround,
}

/// Settings of `RootMotionOp`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RootMotionSettings {
    pub root_motion_source: RootMotionSource,
    pub root_height_source: RootMotionHeightSource,

    /// Source root bone, empty for the first bone.
    pub source_root_bone: String,
    /// Target root bone, empty for the first bone.
    pub target_root_bone: String,
    /// Target pelvis bone, empty for the target rig's pelvis.
    pub target_pelvis_bone: String,

    /// Carries the children of the root that no op retargets.
    pub propagate_to_non_retargeted_children: bool,
    /// Static component space offset.
    pub global_offset: Transform,
}

impl Default for RootMotionSettings {
    fn default() -> RootMotionSettings {
        return RootMotionSettings {
            root_motion_source: RootMotionSource::CopyFromSourceRoot,
            root_height_source: RootMotionHeightSource::CopyHeightFromSource,
            source_root_bone: String::new(),
            target_root_bone: String::new(),
            target_pelvis_bone: String::new(),
            propagate_to_non_retargeted_children: true,
            global_offset: Transform::IDENTITY,
        };
    }
}

impl RootMotionSettings {
    pub fn requires_reinit(&self, other: &RootMotionSettings) -> bool {
        return self.source_root_bone != other.source_root_bone
            || self.target_root_bone != other.target_root_bone
            || self.target_pelvis_bone != other.target_pelvis_bone;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct RootBones {
    source_root: usize,
    target_root: usize,
    target_pelvis: usize,
    source_root_initial: Transform,
    target_root_initial: Transform,
    target_pelvis_initial: Transform,
    height_scale: f32,
}

///
/// Moves the target root bone, either copying the source root motion or deriving it from
/// the target pelvis.
///
/// Should run after the ops moving the pelvis.
///
#[derive(Debug, Clone)]
pub struct RootMotionOp {
    header: OpHeader,
    settings: RootMotionSettings,
    bones: RootBones,
    non_retargeted_children: Vec<usize>,
}

impl RootMotionOp {
    pub fn new(name: impl Into<String>, settings: RootMotionSettings) -> RootMotionOp {
        return RootMotionOp {
            header: OpHeader::new(name),
            settings,
            bones: RootBones::default(),
            non_retargeted_children: Vec::new(),
        };
    }

    /// Direct children of the target root carried along with it.
    #[inline]
    pub fn non_retargeted_children(&self) -> &[usize] {
        return &self.non_retargeted_children;
    }

    fn find_bone(hierarchy: &BoneHierarchy, name: &str, fallback: Option<usize>) -> Option<usize> {
        return match name.is_empty() {
            true => fallback,
            false => hierarchy.find_bone_index_by_name(name),
        };
    }

    fn copy_from_source(&self, source_root: &Transform) -> Transform {
        let b = &self.bones;
        let displacement = source_root.translation - b.source_root_initial.translation;
        let rotation_delta = source_root.rotation * b.source_root_initial.rotation.inverse();
        return Transform {
            translation: b.target_root_initial.translation + displacement * b.height_scale,
            rotation: (rotation_delta * b.target_root_initial.rotation).normalize(),
            scale: b.target_root_initial.scale,
        };
    }

    fn generate_from_pelvis(&self, source_root: &Transform, target_pelvis: &Transform) -> Transform {
        let b = &self.bones;
        let pelvis_delta = target_pelvis.rotation * b.target_pelvis_initial.rotation.inverse();
        let (_, yaw) = quat_swing_twist(pelvis_delta, Vec3::Z);

        let offset = b.target_pelvis_initial.translation - b.target_root_initial.translation;
        let offset = yaw * Vec3::new(offset.x, offset.y, 0.0);
        let height = b.target_root_initial.translation.z
            + (source_root.translation.z - b.source_root_initial.translation.z) * b.height_scale;
        return Transform {
            translation: Vec3::new(
                target_pelvis.translation.x - offset.x,
                target_pelvis.translation.y - offset.y,
                height,
            ),
            rotation: (yaw * b.target_root_initial.rotation).normalize(),
            scale: b.target_root_initial.scale,
        };
    }
}

impl RetargetOp for RootMotionOp {
    impl_op_settings!(RootMotion);

    fn kind(&self) -> OpKind {
        return OpKind::RootMotion;
    }

    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool {
        let s = &self.settings;
        let first = |h: &BoneHierarchy| if h.num_bones() > 0 { Some(0) } else { None };
        let source_root = Self::find_bone(ctx.source, &s.source_root_bone, first(ctx.source));
        let target_root = Self::find_bone(ctx.target, &s.target_root_bone, first(ctx.target));
        let target_pelvis = Self::find_bone(ctx.target, &s.target_pelvis_bone, ctx.target.pelvis());
        let (source_root, target_root, target_pelvis) = match (source_root, target_root, target_pelvis) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => {
                ctx.log.warning(format!(
                    "{}: root bones not found (source '{}', target '{}', target pelvis '{}')",
                    self.header.name, s.source_root_bone, s.target_root_bone, s.target_pelvis_bone
                ));
                return false;
            }
        };
        if target_root == target_pelvis {
            ctx.log.warning(format!(
                "{}: target root and pelvis are the same bone '{}'",
                self.header.name,
                ctx.target.bone_name(target_root)
            ));
            return false;
        }

        let source_height = ctx.source.pelvis_height();
        let height_scale = if source_height.abs() < KINDA_SMALL_NUMBER {
            ctx.log.warning(format!(
                "{}: source pelvis is at ground level, root motion left unscaled",
                self.header.name
            ));
            1.0
        } else {
            ctx.target.pelvis_height() / source_height
        };

        self.bones = RootBones {
            source_root,
            target_root,
            target_pelvis,
            source_root_initial: ctx.source.retarget_global_pose()[source_root],
            target_root_initial: ctx.target.retarget_global_pose()[target_root],
            target_pelvis_initial: ctx.target.retarget_global_pose()[target_pelvis],
            height_scale,
        };
        return true;
    }

    fn post_initialize(&mut self, ctx: &mut OpPostInitContext) {
        self.non_retargeted_children = ctx
            .target
            .children_indices(self.bones.target_root)
            .into_iter()
            .filter(|child| !ctx.target.is_retargeted(*child))
            .collect();
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        let source_root = match ctx.source_pose.get(self.bones.source_root) {
            Some(root) => *root,
            None => return,
        };
        let mut new_root = match self.settings.root_motion_source {
            RootMotionSource::CopyFromSourceRoot => self.copy_from_source(&source_root),
            RootMotionSource::GenerateFromTargetPelvis => {
                self.generate_from_pelvis(&source_root, &ctx.target_pose[self.bones.target_pelvis])
            }
        };
        if self.settings.root_height_source == RootMotionHeightSource::SnapToGround {
            new_root.translation.z = 0.0;
        }
        let offset = &self.settings.global_offset;
        new_root = Transform {
            translation: new_root.translation + offset.translation,
            rotation: (offset.rotation * new_root.rotation).normalize(),
            scale: new_root.scale * offset.scale,
        };

        let old_root = ctx.target_pose[self.bones.target_root];
        ctx.target_pose[self.bones.target_root] = new_root;
        if !self.settings.propagate_to_non_retargeted_children {
            return;
        }
        for child in &self.non_retargeted_children {
            let relative = ctx.target_pose[*child].relative_to(&old_root);
            let new_child = new_root.mul_transform(&relative);
            ctx.target
                .set_global_transform_and_update_children(*child, &new_child, ctx.target_pose);
        }
    }

    fn collect_retargeted_bones(&self, out: &mut Vec<usize>) {
        out.push(self.bones.target_root);
    }
}

#[cfg(test)]
mod tests {
    use core::f32::consts;

    use glam::Quat;

    use super::*;
    use crate::pelvis_motion_op::{PelvisMotionOp, PelvisMotionSettings};
    use crate::test_utils::{yaw, OpHarness};

    #[test]
    fn test_copy_from_source() {
        let mut harness = OpHarness::new(1.0, 2.0);
        let mut op = RootMotionOp::new("Root", RootMotionSettings::default());
        assert!(harness.initialize(&mut op, None));
        assert!(harness.target.is_retargeted(0));

        let source = harness.source_pose(|_, local| {
            local[0].translation = Vec3::new(5.0, 10.0, 0.0);
            local[0].rotation = yaw(consts::FRAC_PI_2);
        });
        let output = harness.run(&mut op, &source);
        assert!(output[0].translation.abs_diff_eq(Vec3::new(10.0, 20.0, 0.0), 1e-4));
        assert!(output[0].rotation.abs_diff_eq(yaw(consts::FRAC_PI_2), 1e-5));
    }

    #[test]
    fn test_snap_to_ground() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = RootMotionOp::new(
            "Root",
            RootMotionSettings {
                root_height_source: RootMotionHeightSource::SnapToGround,
                global_offset: Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)),
                ..Default::default()
            },
        );
        assert!(harness.initialize(&mut op, None));
        let source = harness.source_pose(|_, local| local[0].translation = Vec3::new(0.0, 4.0, 3.0));
        let output = harness.run(&mut op, &source);
        assert!(output[0].translation.abs_diff_eq(Vec3::new(1.0, 4.0, 0.0), 1e-5));
    }

    #[test]
    fn test_generate_from_pelvis() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut pelvis = PelvisMotionOp::new("Pelvis", PelvisMotionSettings::default());
        let mut root = RootMotionOp::new(
            "Root",
            RootMotionSettings {
                root_motion_source: RootMotionSource::GenerateFromTargetPelvis,
                ..Default::default()
            },
        );
        assert!(harness.initialize(&mut pelvis, None));
        assert!(harness.initialize(&mut root, None));
        assert!(root.non_retargeted_children().is_empty());

        let source = harness.source_pose(|_, local| {
            local[1].translation += Vec3::new(20.0, 0.0, -10.0);
            local[1].rotation = yaw(consts::FRAC_PI_2) * Quat::from_rotation_x(0.3);
        });
        harness.run(&mut pelvis, &source);
        let output = harness.run_again(&mut root, &source);
        assert!(output[0].translation.abs_diff_eq(Vec3::new(20.0, 0.0, 0.0), 1e-3));
        assert!(output[0].rotation.abs_diff_eq(yaw(consts::FRAC_PI_2), 1e-4));

        // the pelvis is retargeted, it is not carried by the root
        assert!(output[1].translation.abs_diff_eq(Vec3::new(20.0, 0.0, 90.0), 1e-3));
    }

    #[test]
    fn test_propagation() {
        let source_edit = |_: &[i32], local: &mut [Transform]| local[0].translation = Vec3::new(0.0, 10.0, 0.0);

        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = RootMotionOp::new("Root", RootMotionSettings::default());
        assert!(harness.initialize(&mut op, None));
        assert_eq!(op.non_retargeted_children(), &[1]);
        let source = harness.source_pose(source_edit);
        let output = harness.run(&mut op, &source);
        assert!(output[5].translation.abs_diff_eq(Vec3::new(0.0, 10.0, 155.0), 1e-4));

        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = RootMotionOp::new(
            "Root",
            RootMotionSettings {
                propagate_to_non_retargeted_children: false,
                ..Default::default()
            },
        );
        assert!(harness.initialize(&mut op, None));
        let output = harness.run(&mut op, &source);
        assert!(output[5].translation.abs_diff_eq(Vec3::new(0.0, 0.0, 155.0), 1e-4));
    }
}

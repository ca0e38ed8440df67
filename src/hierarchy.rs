use glam::Vec3;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::base::{deterministic_map, BoneIndex, DeterministicMap, NO_PARENT};
use crate::logger::RetargetLog;
use crate::math::Transform;
use crate::retarget_pose::{RetargetPose, DEFAULT_POSE_NAME};
use crate::skeleton::Skeleton;

///
/// A retarget pose resolved against one skeleton: full local and global arrays.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRetargetPose {
    pub name: String,
    pub scale_factor: f32,
    pub local: Vec<Transform>,
    pub global: Vec<Transform>,
}

///
/// Bone topology plus every named retarget pose resolved for one skeleton.
///
/// The current pose is never missing: when the requested pose is not resolved, the
/// hierarchy falls back to the mandatory default pose.
///
#[derive(Debug, Clone)]
pub struct BoneHierarchy {
    skeleton: Arc<Skeleton>,
    poses: DeterministicMap<String, ResolvedRetargetPose>,
    current_pose: String,
    pelvis: Option<usize>,
    scale_factor: f32,
}

impl BoneHierarchy {
    /// Builds the hierarchy and bakes `poses` (plus the default pose).
    ///
    /// * `pelvis_name` - The bone receiving the root translation delta of each pose.
    /// * `scale_factor` - Uniform scale applied to all global translations of every pose.
    pub fn new(
        skeleton: Arc<Skeleton>,
        poses: &[RetargetPose],
        current_pose: &str,
        pelvis_name: Option<&str>,
        scale_factor: f32,
        log: &mut RetargetLog,
    ) -> BoneHierarchy {
        let pelvis = match pelvis_name {
            Some(name) if !name.is_empty() => {
                let pelvis = skeleton.bone_by_name(name);
                if pelvis.is_none() {
                    log.warning(format!("pelvis bone '{}' not found in skeleton", name));
                }
                pelvis
            }
            _ => None,
        };

        let mut hierarchy = BoneHierarchy {
            skeleton,
            poses: deterministic_map(),
            current_pose: DEFAULT_POSE_NAME.to_string(),
            pelvis,
            scale_factor,
        };

        hierarchy.resolve_pose(&RetargetPose::default_pose(), log);
        for pose in poses {
            hierarchy.resolve_pose(pose, log);
        }
        if !hierarchy.set_current_pose(current_pose) {
            log.warning(format!(
                "retarget pose '{}' not found, falling back to '{}'",
                current_pose, DEFAULT_POSE_NAME
            ));
        }
        return hierarchy;
    }

    #[inline]
    pub fn skeleton(&self) -> &Arc<Skeleton> {
        return &self.skeleton;
    }

    #[inline]
    pub fn num_bones(&self) -> usize {
        return self.skeleton.num_bones();
    }

    #[inline]
    pub fn pelvis(&self) -> Option<usize> {
        return self.pelvis;
    }

    #[inline]
    pub fn scale_factor(&self) -> f32 {
        return self.scale_factor;
    }

    /// Index of the bone named `name`, `None` on a miss.
    #[inline]
    pub fn find_bone_index_by_name(&self, name: &str) -> Option<usize> {
        return self.skeleton.bone_by_name(name);
    }

    #[inline]
    pub fn bone_name(&self, bone: impl BoneIndex) -> &str {
        return self.skeleton.bone_name(bone).unwrap_or("");
    }

    #[inline]
    pub fn parent_index(&self, bone: impl BoneIndex) -> Option<usize> {
        return self.skeleton.parent_of(bone);
    }

    /// Direct children of `bone`.
    #[inline]
    pub fn children_indices(&self, bone: impl BoneIndex) -> Vec<usize> {
        return self.skeleton.children(bone);
    }

    /// Every descendant of `bone`, a contiguous index range.
    #[inline]
    pub fn children_indices_recursive(&self, bone: impl BoneIndex) -> std::ops::RangeInclusive<usize> {
        let bone = bone.usize();
        return bone + 1..=self.skeleton.last_descendant(bone);
    }

    #[inline]
    pub fn is_parent_of(&self, parent: impl BoneIndex, child: impl BoneIndex) -> bool {
        return self.skeleton.is_descendant(child, parent);
    }

    /// Bakes `pose` against the reference pose, replacing any previous bake with the same name.
    ///
    /// 1. per-bone local rotation offsets are applied root to tip,
    /// 2. the root translation delta is added to the pelvis in global space,
    /// 3. global translations are scaled and local transforms re-derived.
    pub fn resolve_pose(&mut self, pose: &RetargetPose, log: &mut RetargetLog) {
        let skeleton = &self.skeleton;
        let num_bones = skeleton.num_bones();

        for bone in pose.bone_rotation_offsets().keys() {
            if skeleton.bone_by_name(bone).is_none() {
                log.warning(format!(
                    "retarget pose '{}' references bone '{}' missing from skeleton",
                    pose.name(),
                    bone
                ));
            }
        }

        let mut local: Vec<Transform> = skeleton.bone_ref_poses().to_vec();
        for (idx, transform) in local.iter_mut().enumerate() {
            if let Some(name) = skeleton.bone_name(idx) {
                if let Some(offset) = pose.bone_rotation_offsets().get(name) {
                    transform.rotation = (transform.rotation * *offset).normalize();
                }
            }
        }

        let mut global = vec![Transform::IDENTITY; num_bones];
        self.update_global_transforms_all(&local, &mut global);

        if let Some(pelvis) = self.pelvis {
            let delta = pose.root_translation_delta();
            if delta != Vec3::ZERO {
                global[pelvis].translation += delta;
                local[pelvis] = match skeleton.parent_of(pelvis) {
                    Some(parent) => global[pelvis].relative_to(&global[parent]),
                    None => global[pelvis],
                };
                self.update_global_transforms_below_bone(pelvis, &local, &mut global);
            }
        }

        if self.scale_factor != 1.0 {
            for transform in global.iter_mut() {
                transform.translation *= self.scale_factor;
            }
            self.update_local_transforms_all(&mut local, &global);
        }

        self.poses.insert(
            pose.name().to_string(),
            ResolvedRetargetPose {
                name: pose.name().to_string(),
                scale_factor: self.scale_factor,
                local,
                global,
            },
        );
    }

    /// Switches the current pose. Returns false (and selects the default pose) when `name`
    /// was never resolved.
    pub fn set_current_pose(&mut self, name: &str) -> bool {
        if self.poses.contains_key(name) {
            self.current_pose = name.to_string();
            return true;
        }
        self.current_pose = DEFAULT_POSE_NAME.to_string();
        return false;
    }

    #[inline]
    pub fn current_pose_name(&self) -> &str {
        return &self.current_pose;
    }

    /// Current resolved pose, the default pose when the current name is unknown.
    pub fn current_pose(&self) -> &ResolvedRetargetPose {
        return match self.poses.get(&self.current_pose) {
            Some(pose) => pose,
            None => &self.poses[DEFAULT_POSE_NAME],
        };
    }

    #[inline]
    pub fn pose(&self, name: &str) -> Option<&ResolvedRetargetPose> {
        return self.poses.get(name);
    }

    #[inline]
    pub fn retarget_global_pose(&self) -> &[Transform] {
        return &self.current_pose().global;
    }

    #[inline]
    pub fn retarget_local_pose(&self) -> &[Transform] {
        return &self.current_pose().local;
    }

    /// Global height of the pelvis in the current retarget pose, 0 without pelvis.
    pub fn pelvis_height(&self) -> f32 {
        return match self.pelvis {
            Some(pelvis) => self.retarget_global_pose()[pelvis].translation.z,
            None => 0.0,
        };
    }

    /// Updates the global transform of every bone from `local`.
    pub fn update_global_transforms_all(&self, local: &[Transform], global: &mut [Transform]) {
        for idx in 0..self.num_bones() {
            global[idx] = match self.skeleton.bone_parent(idx) {
                NO_PARENT => local[idx],
                parent => global[parent as usize].mul_transform(&local[idx]),
            };
        }
    }

    /// Updates the local transform of every bone from `global`.
    pub fn update_local_transforms_all(&self, local: &mut [Transform], global: &[Transform]) {
        for idx in 0..self.num_bones() {
            local[idx] = match self.skeleton.bone_parent(idx) {
                NO_PARENT => global[idx],
                parent => global[idx].relative_to(&global[parent as usize]),
            };
        }
    }

    /// Single forward pass over the descendants of `start`. `start` itself is not touched.
    pub fn update_global_transforms_below_bone(&self, start: impl BoneIndex, local: &[Transform], global: &mut [Transform]) {
        let start = start.usize();
        for idx in self.children_indices_recursive(start) {
            let parent = self.skeleton.bone_parent(idx) as usize;
            global[idx] = global[parent].mul_transform(&local[idx]);
        }
    }

    /// Single pass over the descendants of `start` re-deriving their local transforms.
    pub fn update_local_transforms_below_bone(&self, start: impl BoneIndex, local: &mut [Transform], global: &[Transform]) {
        let start = start.usize();
        for idx in self.children_indices_recursive(start) {
            let parent = self.skeleton.bone_parent(idx) as usize;
            local[idx] = global[idx].relative_to(&global[parent]);
        }
    }

    /// Moves `bone` to `new_global` and carries every descendant along rigidly.
    pub fn set_global_transform_and_update_children(
        &self,
        bone: impl BoneIndex,
        new_global: &Transform,
        global: &mut [Transform],
    ) {
        let bone = bone.usize();
        let old_global = global[bone];
        global[bone] = *new_global;
        for idx in self.children_indices_recursive(bone) {
            let relative = global[idx].relative_to(&old_global);
            global[idx] = new_global.mul_transform(&relative);
        }
    }
}

///
/// Target side hierarchy: adds the "is retargeted" mask and the live output pose.
///
/// Bones claimed by an op are flagged retargeted at initialization. The output pose is
/// overwritten in place every frame and handed back to the caller.
///
#[derive(Debug, Clone)]
pub struct TargetBoneHierarchy {
    hierarchy: BoneHierarchy,
    is_retargeted: Vec<bool>,
    output_global: Vec<Transform>,
}

impl Deref for TargetBoneHierarchy {
    type Target = BoneHierarchy;

    #[inline]
    fn deref(&self) -> &BoneHierarchy {
        return &self.hierarchy;
    }
}

impl DerefMut for TargetBoneHierarchy {
    #[inline]
    fn deref_mut(&mut self) -> &mut BoneHierarchy {
        return &mut self.hierarchy;
    }
}

impl TargetBoneHierarchy {
    pub fn new(hierarchy: BoneHierarchy) -> TargetBoneHierarchy {
        let num_bones = hierarchy.num_bones();
        let output_global = hierarchy.retarget_global_pose().to_vec();
        return TargetBoneHierarchy {
            hierarchy,
            is_retargeted: vec![false; num_bones],
            output_global,
        };
    }

    #[inline]
    pub fn hierarchy(&self) -> &BoneHierarchy {
        return &self.hierarchy;
    }

    #[inline]
    pub fn is_retargeted(&self, bone: impl BoneIndex) -> bool {
        return self.is_retargeted[bone.usize()];
    }

    #[inline]
    pub fn retargeted_mask(&self) -> &[bool] {
        return &self.is_retargeted;
    }

    pub fn reset_retargeted_mask(&mut self) {
        self.is_retargeted.iter_mut().for_each(|flag| *flag = false);
    }

    /// Flags every bone in `bones` as retargeted. Out of range indices are ignored.
    pub fn set_retargeted_bones(&mut self, bones: impl IntoIterator<Item = usize>) {
        for bone in bones {
            if let Some(flag) = self.is_retargeted.get_mut(bone) {
                *flag = true;
            }
        }
    }

    /// Resets the output pose to the current retarget pose.
    pub fn generate_base_pose(&mut self) {
        let TargetBoneHierarchy {
            hierarchy,
            output_global,
            ..
        } = self;
        output_global.copy_from_slice(hierarchy.retarget_global_pose());
    }

    #[inline]
    pub fn output_pose(&self) -> &[Transform] {
        return &self.output_global;
    }

    #[inline]
    pub fn output_pose_mut(&mut self) -> &mut [Transform] {
        return &mut self.output_global;
    }

    /// Splits into the read-only hierarchy and the mutable output pose.
    #[inline]
    pub fn split_output_mut(&mut self) -> (&BoneHierarchy, &mut [Transform]) {
        return (&self.hierarchy, &mut self.output_global);
    }
}

use crate::hierarchy::BoneHierarchy;
use crate::logger::RetargetLog;
use crate::math::Transform;

/// Settings of the base pose copy, applied before the op stack runs.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CopyBasePoseSettings {
    pub enabled: bool,
    /// Only bones under this target bone (inclusive) are copied. Empty copies every bone.
    pub copy_base_pose_root: String,
    /// Target bones never copied.
    pub bones_to_exclude: Vec<String>,
}

///
/// Copies the local transforms of source bones onto target bones of the same name.
///
/// Used when source and target share most of their skeleton: the copied pose becomes the
/// base the op stack works on.
///
#[derive(Debug, Clone, Default)]
pub struct BasePoseCopier {
    // (target, source)
    pairs: Vec<(usize, usize)>,
    first_bone: usize,
    source_local: Vec<Transform>,
    target_local: Vec<Transform>,
}

impl BasePoseCopier {
    pub fn new() -> BasePoseCopier {
        return BasePoseCopier::default();
    }

    /// Matches bones by name. Returns false, with a warning, when nothing can be copied.
    pub fn initialize(
        &mut self,
        settings: &CopyBasePoseSettings,
        source: &BoneHierarchy,
        target: &BoneHierarchy,
        log: &mut RetargetLog,
    ) -> bool {
        self.pairs.clear();
        if !settings.enabled {
            return false;
        }

        let range = match settings.copy_base_pose_root.is_empty() {
            true => 0..target.num_bones(),
            false => match target.find_bone_index_by_name(&settings.copy_base_pose_root) {
                Some(root) => root..(*target.children_indices_recursive(root).end() + 1),
                None => {
                    log.warning(format!(
                        "copy base pose: root bone '{}' not found in the target skeleton",
                        settings.copy_base_pose_root
                    ));
                    return false;
                }
            },
        };
        self.first_bone = range.start;

        for target_bone in range {
            let name = target.bone_name(target_bone);
            if settings.bones_to_exclude.iter().any(|excluded| excluded == name) {
                continue;
            }
            if let Some(source_bone) = source.find_bone_index_by_name(name) {
                self.pairs.push((target_bone, source_bone));
            }
        }
        if self.pairs.is_empty() {
            log.warning("copy base pose: no target bone matches a source bone by name");
            return false;
        }

        self.source_local = vec![Transform::IDENTITY; source.num_bones()];
        self.target_local = vec![Transform::IDENTITY; target.num_bones()];
        return true;
    }

    #[inline]
    pub fn num_copied_bones(&self) -> usize {
        return self.pairs.len();
    }

    /// Overrides the matched target locals with the source locals and rebuilds the globals.
    pub fn copy(
        &mut self,
        source: &BoneHierarchy,
        source_pose: &[Transform],
        target: &BoneHierarchy,
        target_pose: &mut [Transform],
    ) {
        if self.pairs.is_empty()
            || source_pose.len() != self.source_local.len()
            || target_pose.len() != self.target_local.len()
        {
            return;
        }
        source.update_local_transforms_all(&mut self.source_local, source_pose);
        target.update_local_transforms_all(&mut self.target_local, target_pose);
        for &(target_bone, source_bone) in &self.pairs {
            self.target_local[target_bone] = self.source_local[source_bone];
        }
        let first = self.first_bone;
        target_pose[first] = match target.parent_index(first) {
            Some(parent) => target_pose[parent].mul_transform(&self.target_local[first]),
            None => self.target_local[first],
        };
        target.update_global_transforms_below_bone(self.first_bone, &self.target_local, target_pose);
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;
    use crate::test_utils::{new_biped_skeleton, new_hierarchy, posed_global};

    #[test]
    fn test_copy_whole_skeleton() {
        let (source, _) = new_hierarchy(new_biped_skeleton(1.0));
        let (target, mut log) = new_hierarchy(new_biped_skeleton(2.0));
        let mut copier = BasePoseCopier::new();
        let settings = CopyBasePoseSettings {
            enabled: true,
            ..Default::default()
        };
        assert!(copier.initialize(&settings, &source, &target, &mut log));
        assert_eq!(copier.num_copied_bones(), 22);

        let source_pose = posed_global(source.skeleton(), |_, local| {
            local[2].rotation = Quat::from_rotation_x(0.5);
        });
        let mut target_pose = target.retarget_global_pose().to_vec();
        copier.copy(&source, &source_pose, &target, &mut target_pose);
        assert!(target_pose[5].abs_diff_eq(&source_pose[5], 1e-4));
    }

    #[test]
    fn test_copy_subtree_with_exclusions() {
        let (source, _) = new_hierarchy(new_biped_skeleton(1.0));
        let (target, mut log) = new_hierarchy(new_biped_skeleton(2.0));
        let mut copier = BasePoseCopier::new();
        let settings = CopyBasePoseSettings {
            enabled: true,
            copy_base_pose_root: "thigh_l".into(),
            bones_to_exclude: vec!["ball_l".into()],
        };
        assert!(copier.initialize(&settings, &source, &target, &mut log));
        assert_eq!(copier.num_copied_bones(), 3);

        let source_pose = posed_global(source.skeleton(), |_, local| {
            local[14].rotation = Quat::from_rotation_x(0.5);
            local[17].rotation = Quat::from_rotation_z(0.5);
        });
        let mut target_pose = target.retarget_global_pose().to_vec();
        copier.copy(&source, &source_pose, &target, &mut target_pose);

        // thigh copied with its source local offset, ball keeps its target local
        assert!(target_pose[14].rotation.abs_diff_eq(Quat::from_rotation_x(0.5), 1e-5));
        assert!(target_pose[14].translation.abs_diff_eq(Vec3::new(10.0, 0.0, 195.0), 1e-4));
        assert!(target_pose[17].rotation.abs_diff_eq(Quat::from_rotation_x(0.5), 1e-5));
        assert!(target_pose[18].abs_diff_eq(&target.retarget_global_pose()[18], 1e-5));
    }

    #[test]
    fn test_disabled_or_unmatched() {
        let (source, _) = new_hierarchy(new_biped_skeleton(1.0));
        let (target, mut log) = new_hierarchy(new_biped_skeleton(1.0));
        let mut copier = BasePoseCopier::new();
        assert!(!copier.initialize(&CopyBasePoseSettings::default(), &source, &target, &mut log));

        let settings = CopyBasePoseSettings {
            enabled: true,
            copy_base_pose_root: "tail".into(),
            ..Default::default()
        };
        assert!(!copier.initialize(&settings, &source, &target, &mut log));
        assert_eq!(log.num_warnings(), 1);
    }
}

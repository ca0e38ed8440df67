use glam::{Quat, Vec3};

use crate::base::{deterministic_map, DeterministicMap};

/// Name of the pose every hierarchy falls back to. It carries no offsets, so it resolves
/// to the skeleton's reference pose.
pub const DEFAULT_POSE_NAME: &str = "Default Pose";

///
/// Authored retarget pose.
///
/// Stores per-bone local rotation offsets (applied on top of the reference pose) and a
/// single translation delta for the pelvis ("retarget root"), added in global space.
/// Every edit bumps `version`, which is how the processor notices that a resolved copy
/// of the pose is stale.
///
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetargetPose {
    name: String,
    version: u32,
    root_translation_delta: Vec3,
    bone_rotation_offsets: DeterministicMap<String, Quat>,
}

impl RetargetPose {
    pub fn new(name: impl Into<String>) -> RetargetPose {
        return RetargetPose {
            name: name.into(),
            version: 0,
            root_translation_delta: Vec3::ZERO,
            bone_rotation_offsets: deterministic_map(),
        };
    }

    /// The empty pose every hierarchy resolves as a fallback.
    pub fn default_pose() -> RetargetPose {
        return RetargetPose::new(DEFAULT_POSE_NAME);
    }

    #[inline]
    pub fn name(&self) -> &str {
        return &self.name;
    }

    #[inline]
    pub fn version(&self) -> u32 {
        return self.version;
    }

    #[inline]
    pub fn root_translation_delta(&self) -> Vec3 {
        return self.root_translation_delta;
    }

    #[inline]
    pub fn bone_rotation_offsets(&self) -> &DeterministicMap<String, Quat> {
        return &self.bone_rotation_offsets;
    }

    /// Local rotation offset of `bone`, identity when not authored.
    #[inline]
    pub fn bone_rotation_offset(&self, bone: &str) -> Quat {
        return self.bone_rotation_offsets.get(bone).copied().unwrap_or(Quat::IDENTITY);
    }

    pub fn set_bone_rotation_offset(&mut self, bone: impl Into<String>, offset: Quat) {
        self.bone_rotation_offsets.insert(bone.into(), offset.normalize());
        self.version += 1;
    }

    /// Composes `offset` onto the current offset of `bone`.
    pub fn add_bone_rotation_offset(&mut self, bone: impl Into<String>, offset: Quat) {
        let bone = bone.into();
        let current = self.bone_rotation_offset(&bone);
        self.bone_rotation_offsets.insert(bone, (offset * current).normalize());
        self.version += 1;
    }

    pub fn set_root_translation_delta(&mut self, delta: Vec3) {
        self.root_translation_delta = delta;
        self.version += 1;
    }

    pub fn add_to_root_translation_delta(&mut self, delta: Vec3) {
        self.root_translation_delta += delta;
        self.version += 1;
    }

    /// Removes every offset of the listed bones, or of all bones when `bones` is empty.
    pub fn reset(&mut self, bones: &[&str]) {
        if bones.is_empty() {
            self.bone_rotation_offsets.clear();
            self.root_translation_delta = Vec3::ZERO;
        } else {
            for bone in bones {
                self.bone_rotation_offsets.remove(*bone);
            }
        }
        self.version += 1;
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.version += 1;
    }
}

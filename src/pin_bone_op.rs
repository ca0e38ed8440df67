use crate::base::RetargetSide;
use crate::math::Transform;
use crate::op::{impl_op_settings, OpHeader, OpInitContext, OpKind, OpRunContext, RetargetOp};

/// Which components of the pin-to transform are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PinBoneType {
    #[default]
    FullTransform,
    TranslateOnly,
    RotateOnly,
    ScaleOnly,
}

/// One pinned bone.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PinBoneData {
    /// Target bone receiving the transform.
    pub bone_to_pin: String,
    /// Bone the target bone is pinned to, on the `pin_to` side.
    pub bone_to_pin_to: String,
    pub pin_type: PinBoneType,
    /// Keeps the retarget pose offset between the two bones.
    pub maintain_offset: bool,
    /// Offset applied in the space of the pinned bone.
    pub local_offset: Transform,
    /// Offset applied in component space.
    pub global_offset: Transform,
}

impl Default for PinBoneData {
    fn default() -> PinBoneData {
        return PinBoneData {
            bone_to_pin: String::new(),
            bone_to_pin_to: String::new(),
            pin_type: PinBoneType::FullTransform,
            maintain_offset: true,
            local_offset: Transform::IDENTITY,
            global_offset: Transform::IDENTITY,
        };
    }
}

impl PinBoneData {
    pub fn new(bone_to_pin: impl Into<String>, bone_to_pin_to: impl Into<String>) -> PinBoneData {
        return PinBoneData {
            bone_to_pin: bone_to_pin.into(),
            bone_to_pin_to: bone_to_pin_to.into(),
            ..Default::default()
        };
    }
}

/// Settings of `PinBoneOp`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PinBoneSettings {
    pub bones: Vec<PinBoneData>,
    /// Skeleton the `bone_to_pin_to` bones are looked up in.
    pub pin_to: RetargetSide,
    /// Carries the children of pinned bones along.
    pub propagate_to_children: bool,
}

impl Default for PinBoneSettings {
    fn default() -> PinBoneSettings {
        return PinBoneSettings {
            bones: Vec::new(),
            pin_to: RetargetSide::Target,
            propagate_to_children: true,
        };
    }
}

impl PinBoneSettings {
    pub fn requires_reinit(&self, other: &PinBoneSettings) -> bool {
        if self.pin_to != other.pin_to || self.bones.len() != other.bones.len() {
            return true;
        }
        return self
            .bones
            .iter()
            .zip(other.bones.iter())
            .any(|(a, b)| a.bone_to_pin != b.bone_to_pin || a.bone_to_pin_to != b.bone_to_pin_to);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedPin {
    setting: usize,
    bone: usize,
    pin_to: usize,
    // retarget pose of the pinned bone relative to the pin-to bone
    offset: Transform,
}

///
/// Copies the global transform of a bone, on either skeleton, onto a target bone.
///
#[derive(Debug, Clone)]
pub struct PinBoneOp {
    header: OpHeader,
    settings: PinBoneSettings,
    pins: Vec<ResolvedPin>,
}

impl PinBoneOp {
    pub fn new(name: impl Into<String>, settings: PinBoneSettings) -> PinBoneOp {
        return PinBoneOp {
            header: OpHeader::new(name),
            settings,
            pins: Vec::new(),
        };
    }

    #[inline]
    pub fn num_pins(&self) -> usize {
        return self.pins.len();
    }

    fn pinned_transform(data: &PinBoneData, pin: &ResolvedPin, pin_to: &Transform, current: &Transform) -> Transform {
        let mut pinned = match data.maintain_offset {
            true => pin_to.mul_transform(&pin.offset),
            false => *pin_to,
        };
        pinned = pinned.mul_transform(&data.local_offset);
        pinned = Transform {
            translation: pinned.translation + data.global_offset.translation,
            rotation: (data.global_offset.rotation * pinned.rotation).normalize(),
            scale: pinned.scale * data.global_offset.scale,
        };

        return match data.pin_type {
            PinBoneType::FullTransform => pinned,
            PinBoneType::TranslateOnly => Transform {
                translation: pinned.translation,
                ..*current
            },
            PinBoneType::RotateOnly => Transform {
                rotation: pinned.rotation,
                ..*current
            },
            PinBoneType::ScaleOnly => Transform {
                scale: pinned.scale,
                ..*current
            },
        };
    }
}

impl RetargetOp for PinBoneOp {
    impl_op_settings!(PinBone);

    fn kind(&self) -> OpKind {
        return OpKind::PinBone;
    }

    fn initialize(&mut self, ctx: &mut OpInitContext) -> bool {
        self.pins.clear();
        let pin_side = match self.settings.pin_to {
            RetargetSide::Source => ctx.source,
            RetargetSide::Target => ctx.target,
        };
        for (setting, data) in self.settings.bones.iter().enumerate() {
            let bone = ctx.target.find_bone_index_by_name(&data.bone_to_pin);
            let pin_to = pin_side.find_bone_index_by_name(&data.bone_to_pin_to);
            let (bone, pin_to) = match (bone, pin_to) {
                (Some(bone), Some(pin_to)) => (bone, pin_to),
                _ => {
                    ctx.log.warning(format!(
                        "{}: cannot pin target bone '{}' to {} bone '{}', bone not found",
                        self.header.name,
                        data.bone_to_pin,
                        self.settings.pin_to.as_str(),
                        data.bone_to_pin_to
                    ));
                    continue;
                }
            };
            let pin_to_ref = &pin_side.retarget_global_pose()[pin_to];
            let bone_ref = &ctx.target.retarget_global_pose()[bone];
            self.pins.push(ResolvedPin {
                setting,
                bone,
                pin_to,
                offset: bone_ref.relative_to(pin_to_ref),
            });
        }
        return true;
    }

    fn run(&mut self, ctx: &mut OpRunContext) {
        for pin in &self.pins {
            let data = &self.settings.bones[pin.setting];
            let pin_to = match self.settings.pin_to {
                RetargetSide::Source => ctx.source_pose.get(pin.pin_to),
                RetargetSide::Target => ctx.target_pose.get(pin.pin_to),
            };
            let pin_to = match pin_to {
                Some(pin_to) => *pin_to,
                None => continue,
            };
            let new_global = Self::pinned_transform(data, pin, &pin_to, &ctx.target_pose[pin.bone]);
            match self.settings.propagate_to_children {
                true => ctx
                    .target
                    .set_global_transform_and_update_children(pin.bone, &new_global, ctx.target_pose),
                false => ctx.target_pose[pin.bone] = new_global,
            }
        }
    }

    fn collect_retargeted_bones(&self, out: &mut Vec<usize>) {
        out.extend(self.pins.iter().map(|pin| pin.bone));
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;
    use crate::logger::LogLevel;
    use crate::test_utils::OpHarness;

    fn pin_op(pin_to: RetargetSide, propagate: bool, bones: Vec<PinBoneData>) -> PinBoneOp {
        return PinBoneOp::new(
            "Pin",
            PinBoneSettings {
                bones,
                pin_to,
                propagate_to_children: propagate,
            },
        );
    }

    #[test]
    fn test_translate_only_from_source() {
        let mut harness = OpHarness::new(1.0, 2.0);
        let mut op = pin_op(
            RetargetSide::Source,
            true,
            vec![PinBoneData {
                pin_type: PinBoneType::TranslateOnly,
                maintain_offset: false,
                ..PinBoneData::new("hand_l", "hand_l")
            }],
        );
        assert!(harness.initialize(&mut op, None));
        assert_eq!(op.num_pins(), 1);
        assert!(harness.target.is_retargeted(harness.target_bone("hand_l")));

        let source = harness.source_pose(|_, _| {});
        let output = harness.run(&mut op, &source);
        let hand = output[harness.target_bone("hand_l")];
        assert!(hand.translation.abs_diff_eq(Vec3::new(65.0, 0.0, 115.0), 1e-4));
        assert!(hand.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn test_maintain_offset() {
        let mut harness = OpHarness::new(1.0, 2.0);
        let mut op = pin_op(RetargetSide::Source, true, vec![PinBoneData::new("hand_l", "hand_l")]);
        assert!(harness.initialize(&mut op, None));

        // the reference pose reproduces the target reference
        let source = harness.source_pose(|_, _| {});
        let output = harness.run(&mut op, &source);
        let hand = harness.target_bone("hand_l");
        assert!(output[hand].abs_diff_eq(&harness.target.retarget_global_pose()[hand], 1e-4));

        let source = harness.source_pose(|_, local| local[0].translation = Vec3::new(0.0, 10.0, 0.0));
        let output = harness.run(&mut op, &source);
        let expected = harness.target.retarget_global_pose()[hand].translation + Vec3::new(0.0, 10.0, 0.0);
        assert!(output[hand].translation.abs_diff_eq(expected, 1e-3));
    }

    #[test]
    fn test_offsets_and_propagation() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let data = PinBoneData {
            global_offset: Transform::from_translation(Vec3::new(0.0, 0.0, 10.0)),
            ..PinBoneData::new("lowerarm_r", "lowerarm_l")
        };
        let source = harness.source_pose(|_, _| {});
        let hand = harness.target_bone("hand_r");
        let lowerarm = harness.target_bone("lowerarm_r");
        let hand_ref = harness.target.retarget_global_pose()[hand];

        let mut op = pin_op(RetargetSide::Target, false, vec![data.clone()]);
        assert!(harness.initialize(&mut op, None));
        let output = harness.run(&mut op, &source);
        let expected = harness.target.retarget_global_pose()[lowerarm].translation + Vec3::new(0.0, 0.0, 10.0);
        assert!(output[lowerarm].translation.abs_diff_eq(expected, 1e-4));
        assert!(output[hand].abs_diff_eq(&hand_ref, 1e-5));

        let mut op = pin_op(RetargetSide::Target, true, vec![data]);
        assert!(harness.initialize(&mut op, None));
        let output = harness.run(&mut op, &source);
        assert!(output[hand]
            .translation
            .abs_diff_eq(hand_ref.translation + Vec3::new(0.0, 0.0, 10.0), 1e-4));
    }

    #[test]
    fn test_missing_bones() {
        let mut harness = OpHarness::new(1.0, 1.0);
        let mut op = pin_op(
            RetargetSide::Target,
            true,
            vec![PinBoneData::new("tail", "hand_l"), PinBoneData::new("hand_r", "hand_l")],
        );
        assert!(harness.initialize(&mut op, None));
        assert_eq!(op.num_pins(), 1);
        assert!(harness.log.contains(LogLevel::Warning, "tail"));

        let mut other = op.settings();
        if let crate::op::OpSettings::PinBone(settings) = &mut other {
            settings.bones[0].maintain_offset = false;
        }
        assert_eq!(op.set_settings(&other), Ok(false));
    }
}

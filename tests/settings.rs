#![cfg(feature = "serde")]

use glam::Vec3;
use pose_retarget_rs::*;

#[test]
fn test_op_settings_json() {
    let settings = OpSettings::PinBone(PinBoneSettings {
        bones: vec![PinBoneData {
            pin_type: PinBoneType::TranslateOnly,
            global_offset: Transform::from_translation(Vec3::new(0.0, 0.0, 2.0)),
            ..PinBoneData::new("ik_hand_l", "hand_l")
        }],
        ..Default::default()
    });
    let json = serde_json::to_string(&settings).unwrap();
    assert!(json.starts_with("{\"PinBone\""));
    let parsed: OpSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, settings);
    assert_eq!(parsed.kind(), OpKind::PinBone);

    let op = parsed.create_op("Pin Hands");
    assert_eq!(op.kind(), OpKind::PinBone);
    assert_eq!(op.settings(), settings);
}

#[test]
fn test_partial_json_uses_defaults() {
    let json = r#"{ "StrideWarp": { "warp_forwards": 1.5, "goals": ["LeftFootIK"] } }"#;
    let parsed: OpSettings = serde_json::from_str(json).unwrap();
    let expected = OpSettings::StrideWarp(StrideWarpSettings {
        warp_forwards: 1.5,
        goals: vec!["LeftFootIK".into()],
        ..Default::default()
    });
    assert_eq!(parsed, expected);

    let profile: RetargetProfile = serde_json::from_str(r#"{ "force_all_ik_off": true }"#).unwrap();
    assert!(profile.force_all_ik_off);
    assert!(profile.op_settings.is_empty());
    assert_eq!(profile.target_pose, None);
}

#[test]
fn test_profile_json() {
    let mut profile = RetargetProfile::new();
    profile.target_pose = Some("Turned".into());
    profile.set_op_settings(
        "FK",
        OpSettings::FKChains(FKChainsSettings {
            chain_mapping: ChainMapping::from_pairs([("LeftArm", "LeftArm")]),
            chains: vec![FKChainSettings {
                rotation_mode: FKRotationMode::MatchChain,
                ..FKChainSettings::new("LeftArm")
            }],
        }),
    );
    let json = serde_json::to_string_pretty(&profile).unwrap();
    let parsed: RetargetProfile = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, profile);
}

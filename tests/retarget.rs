use glam::{Quat, Vec3};
use pose_retarget_rs::test_utils::{compare_poses, posed_global, BIPED_PELVIS};
use pose_retarget_rs::*;
use std::sync::Arc;

mod common;

const DT: f32 = 1.0 / 30.0;

fn bone(skeleton: &Skeleton, name: &str) -> usize {
    return skeleton.bone_by_name(name).unwrap();
}

#[test]
fn test_identity_reproduces_source() {
    let mut biped = common::biped_processor(1.0, 1.0, common::biped_asset(IKChainsSettings::default()));
    let source = posed_global(&biped.source, |_, local| {
        local[1].translation += Vec3::new(2.0, 3.0, 0.0);
        local[2].rotation = Quat::from_rotation_y(0.3);
        local[8].rotation = Quat::from_rotation_x(0.4);
        local[15].rotation = Quat::from_rotation_x(0.9);
        local[19].rotation = Quat::from_rotation_y(-0.5);
    });
    let output = biped.processor.run_retargeter(&source, &biped.profile, DT).to_vec();
    compare_poses(&output, &source, 1e-3).unwrap();
}

#[test]
fn test_scaled_pelvis_and_planted_feet() {
    let mut biped = common::biped_processor(1.0, 2.0, common::biped_asset(IKChainsSettings::default()));
    let pelvis = bone(&biped.source, BIPED_PELVIS);
    let foot = bone(&biped.target, "foot_l");

    // source pelvis 100 -> 110, target pelvis 200 -> 220
    let source = posed_global(&biped.source, |_, local| local[pelvis].translation.z += 10.0);
    let output = biped.processor.run_retargeter(&source, &biped.profile, DT).to_vec();
    assert!(output[pelvis].translation.abs_diff_eq(Vec3::new(0.0, 0.0, 220.0), 1e-3));

    // vertical pelvis motion is removed from the foot goals
    assert!(output[foot].translation.abs_diff_eq(Vec3::new(20.0, 0.0, 10.0), 1e-2));

    // without IK the legs follow the pelvis
    biped.profile.force_all_ik_off = true;
    let output = biped.processor.run_retargeter(&source, &biped.profile, DT).to_vec();
    assert!(output[foot].translation.abs_diff_eq(Vec3::new(20.0, 0.0, 30.0), 1e-2));
    assert!(!biped.processor.log().contains(LogLevel::Info, "re-initializing"));
}

#[test]
fn test_fk_one_to_one() {
    let mut asset = common::biped_asset(IKChainsSettings::default());
    let fk = FKChainsSettings {
        chains: vec![FKChainSettings {
            rotation_mode: FKRotationMode::OneToOne,
            ..FKChainSettings::new("LeftArm")
        }],
        ..Default::default()
    };
    asset.ops_mut().op_mut("FK").unwrap().set_settings(&OpSettings::FKChains(fk)).unwrap();
    asset.ops_mut().op_mut("Run IK").unwrap().set_enabled(false);
    let mut biped = common::biped_processor(1.0, 1.0, asset);

    let lowerarm = bone(&biped.source, "lowerarm_l");
    let rotation = Quat::from_rotation_z(0.7);
    let source = posed_global(&biped.source, |_, local| local[lowerarm].rotation = rotation);
    let output = biped.processor.run_retargeter(&source, &biped.profile, DT).to_vec();

    let target = biped.processor.target_hierarchy().unwrap().hierarchy();
    let mut local = vec![Transform::IDENTITY; output.len()];
    target.update_local_transforms_all(&mut local, &output);
    let reference = target.retarget_local_pose();
    assert!(local[lowerarm].rotation.abs_diff_eq(reference[lowerarm].rotation * rotation, 1e-4));
    assert!(local[lowerarm - 1].abs_diff_eq(&reference[lowerarm - 1], 1e-4));
}

#[test]
fn test_ik_extension() {
    let ik = IKChainsSettings {
        chains: vec![IKChainSettings {
            extension: 2.0,
            ..IKChainSettings::new("LeftLeg")
        }],
        ..Default::default()
    };
    let mut biped = common::biped_processor(1.0, 1.0, common::biped_asset(ik));
    let source = biped.source.ref_pose_global();
    let output = biped.processor.run_retargeter(&source, &biped.profile, DT).to_vec();

    // thigh (10, 0, 95), foot (10, 0, 5), reach doubled from the thigh
    let foot_l = bone(&biped.target, "foot_l");
    let foot_r = bone(&biped.target, "foot_r");
    assert!(output[foot_l].translation.abs_diff_eq(Vec3::new(10.0, 0.0, -85.0), 1e-2));
    assert!(output[foot_r].translation.abs_diff_eq(Vec3::new(-10.0, 0.0, 5.0), 1e-2));
    assert!(biped.processor.goals().goal("LeftFootIK").is_some());
}

#[test]
fn test_children_run_before_parents() {
    // "IK" was added after its parent, setting the parent moved it up
    let asset = common::biped_asset(IKChainsSettings::default());
    let names: Vec<&str> = asset.ops().iter().map(|op| op.name()).collect();
    assert_eq!(names, vec!["Pelvis", "FK", "IK", "Run IK"]);

    let biped = common::biped_processor(1.0, 1.0, asset);
    let ops = biped.processor.ops().unwrap();
    let names: Vec<&str> = ops.iter().map(|op| op.name()).collect();
    assert_eq!(names, vec!["Pelvis", "FK", "IK", "Run IK"]);
    assert_eq!(ops.parent_index(2), Some(3));
    assert!(ops.iter().all(|op| op.is_initialized()));
}

#[test]
fn test_debug_sink_sees_every_op() {
    let mut biped = common::biped_processor(1.0, 1.0, common::biped_asset(IKChainsSettings::default()));
    let sink = Arc::new(SnapshotDebugSink::new());
    biped.processor.set_debug_sink(Some(sink.clone() as Arc<dyn DebugSink>));

    let source = biped.source.ref_pose_global();
    let output = biped.processor.run_retargeter(&source, &biped.profile, DT).to_vec();
    let snapshot = sink.snapshot().unwrap().unwrap();
    let names: Vec<&str> = snapshot.ops.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["Pelvis", "FK", "IK", "Run IK"]);
    assert_eq!(snapshot.output, output);

    biped.processor.set_op_enabled("FK", false);
    biped.processor.run_retargeter(&source, &biped.profile, DT);
    assert_eq!(sink.snapshot().unwrap().unwrap().ops.len(), 3);
    assert_eq!(sink.num_frames().unwrap(), 2);
}

#[test]
fn test_fallback_and_reinitialize() {
    common::init_logger();
    let source = Arc::new(test_utils::new_biped_skeleton(1.0));
    let target = Arc::new(test_utils::new_biped_skeleton(1.5));
    let profile = RetargetProfile::new();
    let mut processor = RetargetProcessor::new();

    assert!(!processor.initialize(Some(source.clone()), Some(target.clone()), None, &profile));
    let pose = source.ref_pose_global();
    assert_eq!(processor.run_retargeter(&pose, &profile, DT), target.ref_pose_global().as_slice());

    let mut asset = common::biped_asset(IKChainsSettings::default());
    assert!(processor.initialize(Some(source.clone()), Some(target.clone()), Some(Arc::new(asset.clone())), &profile));
    assert!(processor.is_ready());

    // an edited asset is handed over as a new Arc and rebuilds the processor
    asset.set_copy_base_pose(CopyBasePoseSettings {
        enabled: true,
        copy_base_pose_root: "spine_02".into(),
        ..Default::default()
    });
    processor.log_mut().clear();
    assert!(processor.initialize(Some(source), Some(target), Some(Arc::new(asset)), &profile));
    assert!(processor.log().contains(LogLevel::Info, "initialized"));
}

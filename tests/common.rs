#![allow(dead_code)]

use pose_retarget_rs::test_utils::{new_biped_rig, new_biped_skeleton, GoalSnapSolverFactory};
use pose_retarget_rs::*;
use std::sync::{Arc, Once};

static INIT_LOGGER: Once = Once::new();

pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Pelvis, FK, IK and a snapping IK solver, in insertion order.
pub fn biped_asset(ik: IKChainsSettings) -> RetargetAsset {
    let mut asset = RetargetAsset::new(
        "Biped",
        Arc::new(new_biped_rig("SourceRig")),
        Arc::new(new_biped_rig("TargetRig")),
    );
    asset.add_op(Box::new(PelvisMotionOp::new("Pelvis", PelvisMotionSettings::default())));
    asset.add_op(Box::new(FKChainsOp::new("FK", FKChainsSettings::default())));
    asset.add_op(Box::new(RunIKRigOp::new(
        "Run IK",
        RunIKRigSettings::new(None, Arc::new(GoalSnapSolverFactory)),
    )));
    asset.add_op(Box::new(IKChainsOp::new("IK", ik)));
    asset.ops_mut().set_parent("IK", Some("Run IK")).unwrap();
    return asset;
}

pub struct Biped {
    pub processor: RetargetProcessor,
    pub source: Arc<Skeleton>,
    pub target: Arc<Skeleton>,
    pub profile: RetargetProfile,
}

pub fn biped_processor(source_scale: f32, target_scale: f32, asset: RetargetAsset) -> Biped {
    init_logger();
    let source = Arc::new(new_biped_skeleton(source_scale));
    let target = Arc::new(new_biped_skeleton(target_scale));
    let profile = RetargetProfile::new();
    let mut processor = RetargetProcessor::new();
    assert!(processor.initialize(
        Some(source.clone()),
        Some(target.clone()),
        Some(Arc::new(asset)),
        &profile
    ));
    return Biped {
        processor,
        source,
        target,
        profile,
    };
}

//!
//! Retarget processor: builds both hierarchies, the chain set and the op stack from an asset,
//! then retargets one source pose per call.
//!

use std::sync::Arc;

use crate::base::{RetargetError, RetargetSide};
use crate::chain_set::RetargetChainSet;
use crate::copy_base_pose::{BasePoseCopier, CopyBasePoseSettings};
use crate::debug::DebugSink;
use crate::hierarchy::{BoneHierarchy, TargetBoneHierarchy};
use crate::ik_goal::IKGoalContainer;
use crate::logger::RetargetLog;
use crate::math::Transform;
use crate::op::{FrameContext, OpRunContext, OpSettings, RetargetOp};
use crate::op_stack::{OpStack, OpStackInitContext};
use crate::retarget_pose::{RetargetPose, DEFAULT_POSE_NAME};
use crate::rig::IKRigDefinition;
use crate::skeleton::Skeleton;

///
/// Retarget asset: both rigs, the authored retarget poses, and the op stack template.
///
/// Processors hold the asset behind an `Arc` and rebuild when handed a different `Arc`.
/// Edit a clone and pass the new `Arc` to `RetargetProcessor::initialize()`.
///
#[derive(Debug, Clone)]
pub struct RetargetAsset {
    name: String,
    source_rig: Arc<IKRigDefinition>,
    target_rig: Arc<IKRigDefinition>,
    source_poses: Vec<RetargetPose>,
    target_poses: Vec<RetargetPose>,
    current_source_pose: String,
    current_target_pose: String,
    source_scale: f32,
    copy_base_pose: CopyBasePoseSettings,
    ops: OpStack,
}

impl RetargetAsset {
    pub fn new(
        name: impl Into<String>,
        source_rig: Arc<IKRigDefinition>,
        target_rig: Arc<IKRigDefinition>,
    ) -> RetargetAsset {
        return RetargetAsset {
            name: name.into(),
            source_rig,
            target_rig,
            source_poses: Vec::new(),
            target_poses: Vec::new(),
            current_source_pose: DEFAULT_POSE_NAME.to_string(),
            current_target_pose: DEFAULT_POSE_NAME.to_string(),
            source_scale: 1.0,
            copy_base_pose: CopyBasePoseSettings::default(),
            ops: OpStack::new(),
        };
    }

    #[inline]
    pub fn name(&self) -> &str {
        return &self.name;
    }

    #[inline]
    pub fn rig(&self, side: RetargetSide) -> &Arc<IKRigDefinition> {
        return match side {
            RetargetSide::Source => &self.source_rig,
            RetargetSide::Target => &self.target_rig,
        };
    }

    pub fn set_rig(&mut self, side: RetargetSide, rig: Arc<IKRigDefinition>) {
        match side {
            RetargetSide::Source => self.source_rig = rig,
            RetargetSide::Target => self.target_rig = rig,
        }
    }

    #[inline]
    pub fn poses(&self, side: RetargetSide) -> &[RetargetPose] {
        return match side {
            RetargetSide::Source => &self.source_poses,
            RetargetSide::Target => &self.target_poses,
        };
    }

    fn poses_mut(&mut self, side: RetargetSide) -> &mut Vec<RetargetPose> {
        return match side {
            RetargetSide::Source => &mut self.source_poses,
            RetargetSide::Target => &mut self.target_poses,
        };
    }

    /// Adds `pose`, replacing any pose of the same name.
    pub fn add_pose(&mut self, side: RetargetSide, pose: RetargetPose) {
        let poses = self.poses_mut(side);
        match poses.iter_mut().find(|p| p.name() == pose.name()) {
            Some(existing) => *existing = pose,
            None => poses.push(pose),
        }
    }

    /// Mutable access to a pose, for editing.
    pub fn pose_mut(&mut self, side: RetargetSide, name: &str) -> Option<&mut RetargetPose> {
        return self.poses_mut(side).iter_mut().find(|p| p.name() == name);
    }

    #[inline]
    pub fn current_pose(&self, side: RetargetSide) -> &str {
        return match side {
            RetargetSide::Source => &self.current_source_pose,
            RetargetSide::Target => &self.current_target_pose,
        };
    }

    pub fn set_current_pose(&mut self, side: RetargetSide, name: impl Into<String>) {
        match side {
            RetargetSide::Source => self.current_source_pose = name.into(),
            RetargetSide::Target => self.current_target_pose = name.into(),
        }
    }

    #[inline]
    pub fn source_scale(&self) -> f32 {
        return self.source_scale;
    }

    pub fn set_source_scale(&mut self, scale: f32) {
        self.source_scale = scale;
    }

    #[inline]
    pub fn copy_base_pose(&self) -> &CopyBasePoseSettings {
        return &self.copy_base_pose;
    }

    pub fn set_copy_base_pose(&mut self, settings: CopyBasePoseSettings) {
        self.copy_base_pose = settings;
    }

    #[inline]
    pub fn ops(&self) -> &OpStack {
        return &self.ops;
    }

    /// Mutable access to the op stack template.
    pub fn ops_mut(&mut self) -> &mut OpStack {
        return &mut self.ops;
    }

    /// Appends an op to the template. Returns its unique name.
    pub fn add_op(&mut self, op: Box<dyn RetargetOp>) -> String {
        return self.ops.add_op(op);
    }
}

///
/// Per-call override layer on top of an asset.
///
/// Settings overrides and pose swaps that change how ops resolve bones, chains or goals
/// re-initialize the processor. Everything else applies live.
///
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetargetProfile {
    /// Replacement settings, by op name.
    pub op_settings: Vec<(String, OpSettings)>,
    /// Skips every IK solve.
    pub force_all_ik_off: bool,
    /// Source retarget pose used instead of the asset's current one.
    pub source_pose: Option<String>,
    /// Target retarget pose used instead of the asset's current one.
    pub target_pose: Option<String>,
}

impl RetargetProfile {
    pub fn new() -> RetargetProfile {
        return RetargetProfile::default();
    }

    /// Adds or replaces the settings override of `op_name`.
    pub fn set_op_settings(&mut self, op_name: impl Into<String>, settings: OpSettings) {
        let op_name = op_name.into();
        match self.op_settings.iter_mut().find(|(name, _)| *name == op_name) {
            Some((_, existing)) => *existing = settings,
            None => self.op_settings.push((op_name, settings)),
        }
    }

    fn pose_name<'t>(&'t self, asset: &'t RetargetAsset, side: RetargetSide) -> &'t str {
        let name = match side {
            RetargetSide::Source => self.source_pose.as_deref(),
            RetargetSide::Target => self.target_pose.as_deref(),
        };
        return name.unwrap_or_else(|| asset.current_pose(side));
    }
}

#[derive(Debug)]
struct ProcessorState {
    source: BoneHierarchy,
    target: TargetBoneHierarchy,
    chains: RetargetChainSet,
    ops: OpStack,
    copier: Option<BasePoseCopier>,
    source_pose_name: String,
    target_pose_name: String,
    // warned once, until the next initialization
    rejected_overrides: Vec<(String, OpSettings)>,
    mismatched_pose_len: Option<usize>,
}

///
/// Retargets poses from a source skeleton onto a target skeleton.
///
/// Call `initialize()` whenever the inputs may have changed (it is a no-op when they did
/// not), then `run_retargeter()` once per frame. While not ready, `run_retargeter()`
/// returns the target reference pose.
///
#[derive(Debug)]
pub struct RetargetProcessor {
    log: RetargetLog,
    source_skeleton: Option<Arc<Skeleton>>,
    target_skeleton: Option<Arc<Skeleton>>,
    asset: Option<Arc<RetargetAsset>>,
    state: Option<ProcessorState>,
    frame: FrameContext,
    fallback_pose: Vec<Transform>,
    debug: Option<Arc<dyn DebugSink>>,
}

impl Default for RetargetProcessor {
    fn default() -> RetargetProcessor {
        return RetargetProcessor::new();
    }
}

impl RetargetProcessor {
    pub fn new() -> RetargetProcessor {
        return RetargetProcessor {
            log: RetargetLog::new("retargeter"),
            source_skeleton: None,
            target_skeleton: None,
            asset: None,
            state: None,
            frame: FrameContext::new(),
            fallback_pose: Vec::new(),
            debug: None,
        };
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        return self.state.is_some();
    }

    #[inline]
    pub fn log(&self) -> &RetargetLog {
        return &self.log;
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut RetargetLog {
        return &mut self.log;
    }

    #[inline]
    pub fn asset(&self) -> Option<&Arc<RetargetAsset>> {
        return self.asset.as_ref();
    }

    #[inline]
    pub fn ops(&self) -> Option<&OpStack> {
        return self.state.as_ref().map(|s| &s.ops);
    }

    pub fn op(&self, name: &str) -> Option<&dyn RetargetOp> {
        return self.state.as_ref()?.ops.op(name);
    }

    /// Enables or disables a live op. Returns false when there is no such op.
    pub fn set_op_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let op = match self.state.as_mut().and_then(|s| s.ops.op_mut(name)) {
            Some(op) => op,
            None => return false,
        };
        op.set_enabled(enabled);
        return true;
    }

    #[inline]
    pub fn source_hierarchy(&self) -> Option<&BoneHierarchy> {
        return self.state.as_ref().map(|s| &s.source);
    }

    #[inline]
    pub fn target_hierarchy(&self) -> Option<&TargetBoneHierarchy> {
        return self.state.as_ref().map(|s| &s.target);
    }

    #[inline]
    pub fn chains(&self) -> Option<&RetargetChainSet> {
        return self.state.as_ref().map(|s| &s.chains);
    }

    /// Goals as left by the last frame.
    #[inline]
    pub fn goals(&self) -> &IKGoalContainer {
        return &self.frame.goals;
    }

    pub fn set_debug_sink(&mut self, debug: Option<Arc<dyn DebugSink>>) {
        self.debug = debug;
    }

    fn is_up_to_date(
        &self,
        source_skeleton: &Option<Arc<Skeleton>>,
        target_skeleton: &Option<Arc<Skeleton>>,
        asset: &Option<Arc<RetargetAsset>>,
    ) -> bool {
        fn same<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
            return match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
        }
        return self.is_ready()
            && same(&self.source_skeleton, source_skeleton)
            && same(&self.target_skeleton, target_skeleton)
            && same(&self.asset, asset);
    }

    ///
    /// Builds everything the processor runs from. A no-op returning true when the skeletons
    /// and asset are the same `Arc`s as in the last successful call.
    ///
    /// Returns false, leaving the processor not ready, when a skeleton or the asset is
    /// missing. Ops failing to initialize are disabled and logged, they do not fail the
    /// processor.
    ///
    pub fn initialize(
        &mut self,
        source_skeleton: Option<Arc<Skeleton>>,
        target_skeleton: Option<Arc<Skeleton>>,
        asset: Option<Arc<RetargetAsset>>,
        profile: &RetargetProfile,
    ) -> bool {
        if self.is_up_to_date(&source_skeleton, &target_skeleton, &asset) {
            return true;
        }
        self.source_skeleton = source_skeleton;
        self.target_skeleton = target_skeleton;
        self.asset = asset;
        return self.reinitialize(profile);
    }

    fn reinitialize(&mut self, profile: &RetargetProfile) -> bool {
        self.state = None;
        self.fallback_pose = match &self.target_skeleton {
            Some(skeleton) => skeleton.ref_pose_global(),
            None => Vec::new(),
        };

        return match self.build(profile) {
            Ok(state) => {
                self.state = Some(state);
                true
            }
            Err(err) => {
                self.log.error(format!("initialization failed: {}", err));
                false
            }
        };
    }

    fn build(&mut self, profile: &RetargetProfile) -> Result<ProcessorState, RetargetError> {
        let source_skeleton = self.source_skeleton.clone().ok_or(RetargetError::MissingSourceSkeleton)?;
        let target_skeleton = self.target_skeleton.clone().ok_or(RetargetError::MissingTargetSkeleton)?;
        let asset = self.asset.clone().ok_or(RetargetError::MissingAsset)?;
        self.log.set_name(asset.name());

        let log = &mut self.log;
        let source_pose_name = profile.pose_name(&asset, RetargetSide::Source).to_string();
        let target_pose_name = profile.pose_name(&asset, RetargetSide::Target).to_string();
        let source = BoneHierarchy::new(
            source_skeleton,
            asset.poses(RetargetSide::Source),
            &source_pose_name,
            Some(asset.source_rig.pelvis.as_str()),
            asset.source_scale,
            log,
        );
        let target = BoneHierarchy::new(
            target_skeleton,
            asset.poses(RetargetSide::Target),
            &target_pose_name,
            Some(asset.target_rig.pelvis.as_str()),
            1.0,
            log,
        );

        let mut ops = asset.ops.clone();
        let mut rejected_overrides = Vec::new();
        for (name, settings) in &profile.op_settings {
            match ops.op_mut(name) {
                Some(op) => {
                    if let Err(err) = op.set_settings(settings) {
                        log.warning(format!("profile override ignored: {}", err));
                        rejected_overrides.push((name.clone(), settings.clone()));
                    }
                }
                None => log.warning(format!("profile overrides unknown op '{}'", name)),
            }
        }

        let mut chains = RetargetChainSet::new();
        chains.add_rig(RetargetSide::Source, &asset.source_rig, &source, log);
        chains.add_rig(RetargetSide::Target, &asset.target_rig, &target, log);
        for op in ops.iter() {
            if let Some(rig) = op.ik_rig() {
                chains.add_rig(RetargetSide::Target, rig, &target, log);
            }
        }

        let mut target = TargetBoneHierarchy::new(target);
        let num_ops = ops.initialize(&mut OpStackInitContext {
            source: &source,
            target: &mut target,
            chains: &chains,
            source_rig: &asset.source_rig,
            target_rig: &asset.target_rig,
            goals: &mut self.frame.goals,
            log: &mut *log,
        });

        let mut copier = BasePoseCopier::new();
        let copier = match copier.initialize(&asset.copy_base_pose, &source, &target, log) {
            true => Some(copier),
            false => None,
        };

        log.info(format!(
            "initialized '{}' -> '{}': {} bones, {} ops running",
            source_pose_name,
            target_pose_name,
            target.num_bones(),
            num_ops
        ));
        return Ok(ProcessorState {
            source,
            target,
            chains,
            ops,
            copier,
            source_pose_name,
            target_pose_name,
            rejected_overrides,
            mismatched_pose_len: None,
        });
    }

    /// Applies the profile to the live ops. Returns true when a change requires re-initializing.
    fn apply_profile(&mut self, profile: &RetargetProfile) -> bool {
        let (state, asset) = match (&mut self.state, &self.asset) {
            (Some(state), Some(asset)) => (state, asset),
            _ => return false,
        };
        let mut reinit = profile.pose_name(asset, RetargetSide::Source) != state.source_pose_name
            || profile.pose_name(asset, RetargetSide::Target) != state.target_pose_name;

        for (name, settings) in &profile.op_settings {
            let op = match state.ops.op_mut(name) {
                Some(op) => op,
                None => continue,
            };
            if op.settings() == *settings {
                continue;
            }
            let rejected = state
                .rejected_overrides
                .iter()
                .any(|(rejected_name, rejected)| rejected_name == name && rejected == settings);
            if rejected {
                continue;
            }
            match op.set_settings(settings) {
                Ok(requires_reinit) => reinit |= requires_reinit,
                Err(err) => {
                    self.log.warning(format!("profile override ignored: {}", err));
                    state.rejected_overrides.push((name.clone(), settings.clone()));
                }
            }
        }
        return reinit;
    }

    /// Scales source pose translations by the asset's source scale.
    /// Call before `run_retargeter()` when the source scale is not 1.
    pub fn scale_source_pose(&self, pose: &mut [Transform]) {
        let scale = match &self.asset {
            Some(asset) => asset.source_scale(),
            None => return,
        };
        if scale == 1.0 {
            return;
        }
        for transform in pose.iter_mut() {
            transform.translation *= scale;
        }
    }

    ///
    /// Retargets `source_pose` (global space, source skeleton order) and returns the target
    /// pose (global space). The returned buffer is reused by the next call.
    ///
    /// Falls back to the target reference pose while not ready, and to the target retarget
    /// pose when `source_pose` does not match the source skeleton.
    ///
    pub fn run_retargeter(&mut self, source_pose: &[Transform], profile: &RetargetProfile, delta_time: f32) -> &[Transform] {
        if self.apply_profile(profile) {
            self.log.info("profile change requires re-initializing");
            self.reinitialize(profile);
        }

        let state = match &mut self.state {
            Some(state) => state,
            None => return &self.fallback_pose,
        };
        state.target.generate_base_pose();
        if source_pose.len() != state.source.num_bones() {
            if state.mismatched_pose_len != Some(source_pose.len()) {
                self.log.warning(format!(
                    "source pose has {} bones, source skeleton has {}",
                    source_pose.len(),
                    state.source.num_bones()
                ));
                state.mismatched_pose_len = Some(source_pose.len());
            }
            return state.target.output_pose();
        }
        state.mismatched_pose_len = None;

        let (target, output) = state.target.split_output_mut();
        if let Some(copier) = &mut state.copier {
            copier.copy(&state.source, source_pose, target, output);
        }
        self.frame.reset(profile.force_all_ik_off);

        let debug = self.debug.as_deref();
        state.ops.run(
            &mut OpRunContext {
                delta_time,
                source: &state.source,
                target,
                chains: &state.chains,
                source_pose,
                target_pose: output,
                frame: &mut self.frame,
            },
            debug,
        );
        if let Some(debug) = debug {
            debug.on_frame_finished(state.target.output_pose());
        }
        return state.target.output_pose();
    }
}

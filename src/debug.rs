use std::fmt::Debug;
use std::sync::Mutex;

use crate::base::RetargetError;
use crate::math::Transform;

///
/// Optional observer of the op stack, called on the evaluating thread.
///
/// Implementations must be cheap: they run inside the per-frame pipeline.
///
pub trait DebugSink: Debug + Send + Sync {
    /// Called after each op ran, with the target pose (global space) it left behind.
    fn on_op_finished(&self, op_name: &str, target_pose: &[Transform]);

    /// Called once the whole stack ran, with the final output pose.
    fn on_frame_finished(&self, _target_pose: &[Transform]) {}
}

/// Target poses recorded during one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DebugSnapshot {
    /// Number of frames recorded before this one.
    pub frame: u64,
    /// Pose after each op, in execution order.
    pub ops: Vec<(String, Vec<Transform>)>,
    pub output: Vec<Transform>,
}

#[derive(Debug, Default)]
struct SnapshotState {
    recording: DebugSnapshot,
    last: Option<DebugSnapshot>,
    frames: u64,
}

///
/// Keeps the last complete frame for another thread, a UI or a renderer, to read.
///
#[derive(Debug, Default)]
pub struct SnapshotDebugSink {
    state: Mutex<SnapshotState>,
}

impl SnapshotDebugSink {
    pub fn new() -> SnapshotDebugSink {
        return SnapshotDebugSink::default();
    }

    /// Last complete frame, `None` before the first one.
    pub fn snapshot(&self) -> Result<Option<DebugSnapshot>, RetargetError> {
        let state = self.state.lock().map_err(|_| RetargetError::LockPoison)?;
        return Ok(state.last.clone());
    }

    pub fn num_frames(&self) -> Result<u64, RetargetError> {
        let state = self.state.lock().map_err(|_| RetargetError::LockPoison)?;
        return Ok(state.frames);
    }
}

impl DebugSink for SnapshotDebugSink {
    fn on_op_finished(&self, op_name: &str, target_pose: &[Transform]) {
        if let Ok(mut state) = self.state.lock() {
            state.recording.ops.push((op_name.to_string(), target_pose.to_vec()));
        }
    }

    fn on_frame_finished(&self, target_pose: &[Transform]) {
        if let Ok(mut state) = self.state.lock() {
            let mut snapshot = std::mem::take(&mut state.recording);
            snapshot.frame = state.frames;
            snapshot.output = target_pose.to_vec();
            state.last = Some(snapshot);
            state.frames += 1;
        }
    }
}

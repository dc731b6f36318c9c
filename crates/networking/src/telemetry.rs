//! Where removed tracker names go once a request has been rewritten.

use std::collections::HashMap;

use bulwark_shields::ShieldsData;
use parking_lot::Mutex;

use crate::context::FrameId;

/// Receives the tracker parameters stripped from a request. Purely
/// observational.
pub trait TrackerReportSink: Send + Sync {
    fn url_params_blocked(&self, frame_id: FrameId, removed: &[String]);
}

/// Drops every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TrackerReportSink for NoopSink {
    fn url_params_blocked(&self, _frame_id: FrameId, _removed: &[String]) {}
}

/// Keeps one [`ShieldsData`] per frame
#[derive(Debug, Default)]
pub struct FrameShieldsData {
    frames: Mutex<HashMap<FrameId, ShieldsData>>,
}

impl FrameShieldsData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the record of `frame_id`, creating it if needed
    pub fn with_frame<R>(&self, frame_id: FrameId, f: impl FnOnce(&mut ShieldsData) -> R) -> R {
        let mut frames = self.frames.lock();
        f(frames.entry(frame_id).or_default())
    }

    pub fn blocked_trackers(&self, frame_id: FrameId) -> Vec<String> {
        self.frames
            .lock()
            .get(&frame_id)
            .map(ShieldsData::blocked_trackers_list)
            .unwrap_or_default()
    }

    /// Forgets a closed frame
    pub fn remove_frame(&self, frame_id: FrameId) {
        self.frames.lock().remove(&frame_id);
    }
}

impl TrackerReportSink for FrameShieldsData {
    fn url_params_blocked(&self, frame_id: FrameId, removed: &[String]) {
        self.with_frame(frame_id, |data| data.handle_url_params_blocked(removed));
    }
}

//! Latest-frame slot shared between the stream task and the render loop
//!
//! Single producer, single consumer, overwrite-latest: the stream task swaps
//! in each accepted frame, the render loop picks up whatever is newest. There
//! is no queue, so an undelivered frame is simply superseded.

use marionette_core::telemetry::{FrameError, PoseFrame};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Counters for diagnostics logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_received: u64,
    pub frames_rejected: u64,
    /// Accepted but within tolerance of the last published frame
    pub frames_suppressed: u64,
    pub frames_published: u64,
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct SlotState {
    latest: Option<PoseFrame>,
    sequence: u64,
    stats: StreamStats,
    connected: bool,
}

/// Shared "latest accepted frame" value
#[derive(Debug, Clone)]
pub struct PoseSlot {
    inner: Arc<Mutex<SlotState>>,
    tolerance: f32,
}

impl Default for PoseSlot {
    fn default() -> Self {
        Self::new(marionette_core::POSE_TOLERANCE)
    }
}

impl PoseSlot {
    pub fn new(tolerance: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState::default())),
            tolerance,
        }
    }

    /// Handle a decode result from the wire. Rejected frames are counted and
    /// leave the published frame untouched.
    pub fn ingest(&self, decoded: Result<PoseFrame, FrameError>) -> bool {
        match decoded {
            Ok(frame) => self.publish(frame),
            Err(e) => {
                debug!(error = %e, "Rejected telemetry frame");
                if let Ok(mut state) = self.inner.lock() {
                    state.stats.frames_received += 1;
                    state.stats.frames_rejected += 1;
                }
                false
            }
        }
    }

    /// Publish a frame unless it is within tolerance of the current one.
    /// Returns whether consumers will see a new sequence number.
    pub fn publish(&self, frame: PoseFrame) -> bool {
        let Ok(mut state) = self.inner.lock() else {
            return false;
        };
        state.stats.frames_received += 1;

        if let Some(latest) = &state.latest {
            if latest.approx_eq(&frame, self.tolerance) {
                state.stats.frames_suppressed += 1;
                return false;
            }
        }

        state.latest = Some(frame);
        state.sequence += 1;
        state.stats.frames_published += 1;
        true
    }

    /// Newest frame if its sequence number is past `seen`; updates `seen`
    pub fn take_newer(&self, seen: &mut u64) -> Option<PoseFrame> {
        let state = self.inner.lock().ok()?;
        if state.sequence > *seen {
            *seen = state.sequence;
            state.latest.clone()
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<PoseFrame> {
        self.inner.lock().ok().and_then(|s| s.latest.clone())
    }

    pub fn sequence(&self) -> u64 {
        self.inner.lock().map(|s| s.sequence).unwrap_or(0)
    }

    pub fn stats(&self) -> StreamStats {
        self.inner.lock().map(|s| s.stats).unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().map(|s| s.connected).unwrap_or(false)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.connected = connected;
        }
    }

    pub(crate) fn record_reconnect(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.stats.reconnects += 1;
        }
    }
}

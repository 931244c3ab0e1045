//! Playback position estimation.
//!
//! The scheduler records an anchor for every submitted segment. Between
//! anchors the position is extrapolated from the output clock, which is all a
//! seek bar or time readout needs.

use std::io;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use atomic_float::AtomicF64;
use parking_lot::Mutex;

/// Output-clock time at which the latest segment starts, and where in the
/// source that segment begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressAnchor {
    pub scheduled_time: f64,
    pub segment_start: f64,
}

/// `clamp(segment_start + (now - scheduled_time), 0, duration)`, or `None`
/// when no segment has been scheduled yet.
pub fn estimate_position(anchor: Option<ProgressAnchor>, now: f64, duration: f64) -> Option<f64> {
    let anchor = anchor?;
    let position = anchor.segment_start + (now - anchor.scheduled_time);
    Some(position.clamp(0.0, duration.max(0.0)))
}

/// Formats seconds as `m:ss`, truncating fractions.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let minutes = (total / 60.0).floor() as u64;
    let secs = (total % 60.0).floor() as u64;
    format!("{minutes}:{secs:02}")
}

/// `m:ss / m:ss` readout of a position within a recording.
pub fn format_timeline(position: f64, duration: f64) -> String {
    format!("{} / {}", format_time(position), format_time(duration))
}

/// Latest anchor plus the last published position estimate.
#[derive(Debug)]
pub struct ProgressTracker {
    anchor: Mutex<Option<ProgressAnchor>>,
    position: AtomicF64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            anchor: Mutex::new(None),
            position: AtomicF64::new(0.0),
        }
    }
}

impl ProgressTracker {
    pub fn set_anchor(&self, anchor: ProgressAnchor) {
        *self.anchor.lock() = Some(anchor);
    }

    pub fn clear_anchor(&self) {
        *self.anchor.lock() = None;
    }

    pub fn anchor(&self) -> Option<ProgressAnchor> {
        *self.anchor.lock()
    }

    pub fn estimate(&self, now: f64, duration: f64) -> Option<f64> {
        estimate_position(self.anchor(), now, duration)
    }

    pub fn publish(&self, position: f64) {
        self.position.store(position, Ordering::Release);
    }

    pub fn position(&self) -> f64 {
        self.position.load(Ordering::Acquire)
    }
}

/// Background poller that samples the position at a fixed rate until its
/// keep-alive predicate fails.
///
/// Dropping the reporter detaches the thread; it exits on its own at the
/// next tick once `keep_running` returns `false`.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn spawn<K, S>(interval: Duration, keep_running: K, mut sample: S) -> io::Result<Self>
    where
        K: Fn() -> bool + Send + 'static,
        S: FnMut() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("retrograde-progress".into())
            .spawn(move || loop {
                thread::sleep(interval);
                if !keep_running() {
                    break;
                }
                sample();
            })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Waits for the poller to exit. Only meaningful once the keep-alive
    /// predicate has started failing.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                tracing::error!(?err, "progress reporter panicked");
            }
        }
    }
}

//! Output graph abstraction.
//!
//! The scheduler never touches audio hardware. It hands fully described
//! segments to an [`OutputGraph`], which plays them against its own
//! monotonic clock, and suspends itself through a [`Pacer`].

mod offline;
#[cfg(feature = "native")]
mod realtime;
mod voice;

use std::fmt;
use std::thread;
use std::time::Duration;

pub use offline::{OfflineGraph, SegmentRecord};
#[cfg(feature = "native")]
pub use realtime::{start_realtime, CpalGraph};
pub use voice::Voice;

use crate::envelope::{GainCurve, SegmentEnvelope};
use crate::source::SourceWindow;
use crate::GraphError;

/// Opaque identifier of a submitted segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentHandle(u64);

impl SegmentHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment#{}", self.0)
    }
}

/// Everything an output graph needs to play one chunk.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub window: SourceWindow,
    /// Position of the window inside the source, in seconds.
    pub source_start: f64,
    /// Output-clock instant at which playback begins.
    pub start_time: f64,
    /// Output-clock instant at which playback is cut.
    pub stop_time: f64,
    pub envelope: SegmentEnvelope,
    pub gain: GainCurve,
}

impl SegmentRequest {
    pub fn new(
        window: SourceWindow,
        source_start: f64,
        start_time: f64,
        envelope: SegmentEnvelope,
    ) -> Self {
        Self {
            window,
            source_start,
            start_time,
            stop_time: start_time + envelope.duration,
            gain: envelope.gain_curve(),
            envelope,
        }
    }

    pub fn duration(&self) -> f64 {
        self.stop_time - self.start_time
    }
}

/// Runs once when a segment ends, either naturally or by being stopped.
pub type CompletionCallback = Box<dyn FnOnce(SegmentHandle) + Send + 'static>;

pub trait OutputGraph: Send + Sync {
    /// Monotonic output clock in seconds.
    fn now(&self) -> f64;

    fn submit(&self, request: SegmentRequest) -> Result<SegmentHandle, GraphError>;

    /// Stops and releases a segment. Stopping a segment that already ended is
    /// a no-op; implementations absorb any underlying failure.
    fn stop(&self, handle: SegmentHandle);

    /// Registers `callback` for the end of `handle`. If the segment has
    /// already ended the callback runs immediately on the calling thread.
    fn on_completion(&self, handle: SegmentHandle, callback: CompletionCallback);
}

/// Suspends the scheduling loop for one poll step.
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// Sleeps the calling thread. Used with realtime output graphs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

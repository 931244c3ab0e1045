//! Segmented reverse playback.
//!
//! A recording is played backwards as a sequence of short forward-playing
//! chunks, each taken from progressively earlier in the source and
//! crossfaded into the next. [`ReverseScheduler`] runs the chunk loop against
//! any [`OutputGraph`]: [`OfflineGraph`] renders on a virtual clock, and with
//! the `native` feature `CpalGraph` plays through the default audio device.
//!
//! ```no_run
//! use std::sync::Arc;
//! use retrograde_engine::{
//!     EngineConfig, MediaDecoder, OfflineGraph, ParameterUpdate, ReverseScheduler,
//! };
//!
//! # fn main() -> Result<(), retrograde_engine::EngineError> {
//! let source = MediaDecoder::new().decode_path("take.wav")?;
//! let graph = Arc::new(OfflineGraph::new(48_000, 2));
//! let scheduler = ReverseScheduler::new(graph.clone(), graph.clone(), EngineConfig::default());
//! scheduler.start(source, &ParameterUpdate::new().with_speed(1.5))?;
//! scheduler.join();
//! let rendered = graph.render();
//! # let _ = rendered;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod envelope;
mod error;
#[cfg(any(test, feature = "fuzzing"))]
pub mod fuzz;
pub mod graph;
pub mod media;
pub mod observer;
pub mod params;
pub mod progress;
pub mod sched;
mod source;

pub use config::{EngineConfig, ParameterDefaults};
pub use control::{CommitOutcome, ControlSurface, ToggleOutcome};
pub use envelope::SegmentEnvelope;
pub use error::{EngineError, GraphError};
#[cfg(feature = "native")]
pub use graph::{start_realtime, CpalGraph};
pub use graph::{OfflineGraph, OutputGraph, Pacer, SegmentHandle, SegmentRequest, ThreadPacer};
pub use media::{write_wav, DecodeError, MediaDecoder, SourceDecoder};
pub use observer::{NullObserver, PlaybackObserver};
pub use params::{derive_period, ParameterUpdate, PlaybackParameters};
pub use progress::{estimate_position, format_time, format_timeline};
pub use sched::{PlannedSegment, PlaybackState, ReverseScheduler, SegmentPlanner, UpdateDisposition};
pub use source::{SourceBuffer, SourceWindow};

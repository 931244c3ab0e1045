use std::collections::HashMap;
use std::fmt;
use std::thread::JoinHandle;

use serde::Serialize;

use crate::graph::SegmentHandle;
use crate::progress::ProgressReporter;
use crate::{ParameterUpdate, PlaybackParameters, SourceBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    Finished,
}

impl PlaybackState {
    pub fn is_running(self) -> bool {
        matches!(self, PlaybackState::Running)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Running => "running",
            PlaybackState::Paused => "paused",
            PlaybackState::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Everything guarded by the run lock. The generation counter lives beside
/// it as an atomic so pacing can poll without locking, but it is only ever
/// bumped while this lock is held.
pub(crate) struct RunState {
    pub state: PlaybackState,
    pub source: Option<SourceBuffer>,
    pub cursor: f64,
    pub resume_position: Option<f64>,
    pub parameters: Option<PlaybackParameters>,
    pub live_speed: Option<f64>,
    pub staged: Option<ParameterUpdate>,
    pub worker: Option<JoinHandle<()>>,
    pub reporter: Option<ProgressReporter>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            source: None,
            cursor: 0.0,
            resume_position: None,
            parameters: None,
            live_speed: None,
            staged: None,
            worker: None,
            reporter: None,
        }
    }
}

impl RunState {
    pub fn source_duration(&self) -> f64 {
        self.source.as_ref().map_or(0.0, SourceBuffer::duration)
    }
}

/// Segments submitted and not yet ended, tagged with the generation that
/// submitted them.
#[derive(Debug, Default)]
pub(crate) struct ActiveSegments {
    entries: HashMap<SegmentHandle, u64>,
}

impl ActiveSegments {
    pub fn insert(&mut self, handle: SegmentHandle, generation: u64) {
        self.entries.insert(handle, generation);
    }

    pub fn remove(&mut self, handle: &SegmentHandle) -> bool {
        self.entries.remove(handle).is_some()
    }

    pub fn drain(&mut self) -> Vec<(SegmentHandle, u64)> {
        let mut drained: Vec<_> = self.entries.drain().collect();
        drained.sort();
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

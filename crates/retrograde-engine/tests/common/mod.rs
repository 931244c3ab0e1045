#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use retrograde_engine::{
    EngineConfig, OfflineGraph, Pacer, PlaybackObserver, PlaybackParameters, ReverseScheduler,
    SourceBuffer,
};

pub const RATE: u32 = 1_000;

/// Mono source whose sample value equals its time in seconds.
pub fn ramp_source(seconds: f64) -> SourceBuffer {
    let frames = (seconds * RATE as f64) as usize;
    let samples = (0..frames).map(|i| i as f32 / RATE as f32).collect();
    SourceBuffer::with_sample_rate(RATE as f32, vec![samples])
}

pub fn offline_scheduler() -> (Arc<OfflineGraph>, ReverseScheduler) {
    let graph = Arc::new(OfflineGraph::new(RATE, 1));
    let scheduler = ReverseScheduler::new(graph.clone(), graph.clone(), EngineConfig::default());
    (graph, scheduler)
}

/// Pacer that reports every pause and blocks until the test releases it,
/// then advances the offline clock. Dropping the gate unblocks it for good.
pub struct GatedPacer {
    graph: Arc<OfflineGraph>,
    paused: Sender<Duration>,
    go: Receiver<()>,
}

impl Pacer for GatedPacer {
    fn pause(&self, duration: Duration) {
        let _ = self.paused.send(duration);
        let _ = self.go.recv();
        self.graph.advance(duration.as_secs_f64());
    }
}

pub struct Gate {
    pub paused: Receiver<Duration>,
    go: Option<Sender<()>>,
}

impl Gate {
    /// Waits for the loop to reach a pause.
    pub fn wait_paused(&self) {
        self.paused
            .recv_timeout(Duration::from_secs(5))
            .expect("scheduler never paused");
    }

    pub fn release(&self) {
        if let Some(go) = &self.go {
            go.send(()).expect("pacer gone");
        }
    }

    /// Releases pauses one at a time until `done` holds at a pause point.
    pub fn release_until(&self, mut done: impl FnMut() -> bool) {
        loop {
            self.wait_paused();
            if done() {
                return;
            }
            self.release();
        }
    }

    pub fn open(&mut self) {
        self.go = None;
    }
}

pub fn gated_scheduler() -> (Arc<OfflineGraph>, ReverseScheduler, Gate) {
    let graph = Arc::new(OfflineGraph::new(RATE, 1));
    let (paused_tx, paused_rx) = unbounded();
    let (go_tx, go_rx) = unbounded();
    let pacer = Arc::new(GatedPacer {
        graph: graph.clone(),
        paused: paused_tx,
        go: go_rx,
    });
    let scheduler = ReverseScheduler::new(graph.clone(), pacer, EngineConfig::default());
    let gate = Gate {
        paused: paused_rx,
        go: Some(go_tx),
    };
    (graph, scheduler, gate)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Parameters(PlaybackParameters),
    Position(f64),
    Playing(bool),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn playing_events(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Playing(playing) => Some(*playing),
                _ => None,
            })
            .collect()
    }
}

impl PlaybackObserver for RecordingObserver {
    fn parameters_resolved(&self, params: &PlaybackParameters) {
        self.events.lock().push(Event::Parameters(*params));
    }

    fn position_changed(&self, position: f64, _duration: f64) {
        self.events.lock().push(Event::Position(position));
    }

    fn playing_changed(&self, playing: bool) {
        self.events.lock().push(Event::Playing(playing));
    }
}

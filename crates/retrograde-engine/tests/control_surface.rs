mod common;

use std::sync::{Arc, OnceLock, Weak};

use common::{gated_scheduler, offline_scheduler, ramp_source};
use parking_lot::Mutex;
use retrograde_engine::{
    CommitOutcome, ControlSurface, PlaybackObserver, PlaybackParameters, PlaybackState,
    ToggleOutcome,
};

#[test]
fn reverse_commit_starts_then_stages() {
    let (graph, scheduler, mut gate) = gated_scheduler();
    let scheduler = Arc::new(scheduler);
    let surface = ControlSurface::new(scheduler.clone());
    surface.load(ramp_source(6.0));

    surface.set_speed(-1.0).expect("speed");
    assert_eq!(surface.commit_speed().expect("commit"), CommitOutcome::Started);
    assert!(surface.is_reverse());
    gate.wait_paused();
    let first = graph.records()[0].clone();
    assert!((first.source_start + first.duration - 3.0).abs() < 1e-9);

    surface.begin_drag();
    surface.update_drag(-2.0).expect("drag");
    assert_eq!(
        surface.end_drag().expect("end drag"),
        Some(CommitOutcome::Staged)
    );

    assert_eq!(surface.toggle().expect("pause"), ToggleOutcome::ReversePaused);
    assert_eq!(scheduler.state(), PlaybackState::Paused);
    gate.open();
    scheduler.join();

    assert_eq!(surface.toggle().expect("resume"), ToggleOutcome::ReverseResumed);
    scheduler.join();
    assert_eq!(scheduler.state(), PlaybackState::Finished);
    assert_eq!(scheduler.parameters().expect("parameters").speed, 2.0);
}

#[test]
fn seek_restarts_a_reverse_run() {
    let (graph, scheduler, mut gate) = gated_scheduler();
    let scheduler = Arc::new(scheduler);
    let surface = ControlSurface::new(scheduler.clone());
    surface.load(ramp_source(6.0));
    surface.set_speed(-1.0).expect("speed");
    surface.commit_speed().expect("commit");
    gate.wait_paused();

    let generation = scheduler.generation();
    surface.seek(5.0).expect("seek");
    gate.wait_paused();
    assert_eq!(scheduler.generation(), generation + 2);

    let records = graph.records();
    assert_eq!(records.len(), 2);
    assert!(records[0].stopped_early);
    assert!((records[1].source_start - 3.75).abs() < 1e-9);

    scheduler.stop();
    gate.open();
    scheduler.join();
}

#[test]
fn forward_commit_stops_reverse_playback() {
    let (_graph, scheduler, mut gate) = gated_scheduler();
    let scheduler = Arc::new(scheduler);
    let surface = ControlSurface::new(scheduler.clone());
    surface.load(ramp_source(6.0));
    surface.set_speed(-1.0).expect("speed");
    surface.commit_speed().expect("commit");
    gate.wait_paused();

    surface.set_speed(1.25).expect("speed");
    match surface.commit_speed().expect("commit") {
        CommitOutcome::Forward { position, rate } => {
            assert_eq!(rate, 1.25);
            assert!((0.0..=3.0).contains(&position));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!surface.is_reverse());
    assert_eq!(scheduler.state(), PlaybackState::Paused);

    gate.open();
    scheduler.join();
}

struct ReentrantCommit {
    surface: OnceLock<Weak<ControlSurface>>,
    outcomes: Mutex<Vec<CommitOutcome>>,
}

impl PlaybackObserver for ReentrantCommit {
    fn parameters_resolved(&self, _params: &PlaybackParameters) {
        let Some(surface) = self.surface.get().and_then(Weak::upgrade) else {
            return;
        };
        if let Ok(outcome) = surface.commit_speed() {
            self.outcomes.lock().push(outcome);
        }
    }
}

#[test]
fn commit_is_not_reentrant() {
    let (_graph, scheduler) = offline_scheduler();
    let observer = Arc::new(ReentrantCommit {
        surface: OnceLock::new(),
        outcomes: Mutex::new(Vec::new()),
    });
    let scheduler = Arc::new(scheduler.with_observer(observer.clone()));
    let surface = Arc::new(ControlSurface::new(scheduler.clone()));
    observer
        .surface
        .set(Arc::downgrade(&surface))
        .expect("observer wiring");

    surface.load(ramp_source(3.0));
    surface.set_speed(-1.0).expect("speed");
    assert_eq!(surface.commit_speed().expect("commit"), CommitOutcome::Started);
    assert_eq!(observer.outcomes.lock().first(), Some(&CommitOutcome::Busy));

    scheduler.join();
}

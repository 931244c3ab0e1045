mod common;

use common::{gated_scheduler, offline_scheduler, ramp_source};
use retrograde_engine::{ParameterUpdate, PlaybackState};

fn update(start: f64) -> ParameterUpdate {
    ParameterUpdate::new()
        .with_segment_duration(1.0)
        .with_overlap(0.0)
        .with_speed(1.0)
        .with_start_position(start)
}

#[test]
fn stop_disposes_active_segments_and_blocks_further_submissions() {
    let (graph, scheduler, mut gate) = gated_scheduler();
    scheduler.start(ramp_source(6.0), &update(5.0)).expect("start");
    gate.wait_paused();
    assert_eq!(scheduler.active_segment_count(), 1);

    let generation = scheduler.generation();
    assert!(scheduler.stop());
    assert_eq!(scheduler.generation(), generation + 1);
    assert_eq!(scheduler.active_segment_count(), 0);
    assert_eq!(graph.playing_count(), 0);
    assert!(graph.records()[0].stopped_early);

    gate.open();
    scheduler.join();
    assert_eq!(graph.submitted_count(), 1);
    assert_eq!(scheduler.state(), PlaybackState::Paused);

    let resume = scheduler.resume_position().expect("resume point");
    assert!((0.0..=5.0).contains(&resume), "{resume}");
}

#[test]
fn stop_is_idempotent() {
    let (_graph, scheduler, mut gate) = gated_scheduler();
    scheduler.start(ramp_source(6.0), &update(5.0)).expect("start");
    gate.wait_paused();

    assert!(scheduler.stop());
    let generation = scheduler.generation();
    let resume = scheduler.resume_position();
    assert!(!scheduler.stop());
    assert!(!scheduler.stop());
    assert_eq!(scheduler.generation(), generation);
    assert_eq!(scheduler.resume_position(), resume);

    gate.open();
    scheduler.join();
}

#[test]
fn restart_cancels_the_previous_generation() {
    let (graph, scheduler, mut gate) = gated_scheduler();
    scheduler.start(ramp_source(6.0), &update(5.0)).expect("start");
    gate.wait_paused();

    scheduler.start(ramp_source(6.0), &update(2.0)).expect("restart");
    gate.open();
    scheduler.join();

    let starts: Vec<f64> = graph.records().iter().map(|r| r.source_start).collect();
    assert_eq!(starts.len(), 3, "{starts:?}");
    assert!((starts[0] - 4.0).abs() < 1e-9);
    assert!((starts[1] - 1.0).abs() < 1e-9);
    assert!(starts[2].abs() < 1e-9);
    assert!(graph.records()[0].stopped_early);
    assert_eq!(scheduler.state(), PlaybackState::Finished);
}

#[test]
fn resume_continues_from_the_stop_point() {
    let (graph, scheduler, mut gate) = gated_scheduler();
    scheduler.start(ramp_source(6.0), &update(5.0)).expect("start");
    gate.wait_paused();
    scheduler.stop();
    let resume = scheduler.resume_position().expect("resume point");

    gate.open();
    scheduler.join();
    scheduler.resume().expect("resume");
    scheduler.join();

    let records = graph.records();
    assert!(records.len() > 1);
    let restarted = &records[1];
    assert!((restarted.source_start + restarted.duration - resume).abs() < 1e-6);
    assert_eq!(scheduler.state(), PlaybackState::Finished);
}

#[test]
fn resume_while_running_is_a_no_op() {
    let (graph, scheduler, mut gate) = gated_scheduler();
    scheduler.start(ramp_source(6.0), &update(5.0)).expect("start");
    gate.wait_paused();
    let generation = scheduler.generation();
    scheduler.resume().expect("resume");
    assert_eq!(scheduler.generation(), generation);
    assert_eq!(graph.submitted_count(), 1);

    scheduler.stop();
    gate.open();
    scheduler.join();
}

#[test]
fn resume_without_a_source_fails() {
    let (_graph, scheduler) = offline_scheduler();
    assert!(scheduler.resume().is_err());
}

#[test]
fn dropping_the_scheduler_cancels_its_run() {
    let (graph, scheduler, mut gate) = gated_scheduler();
    scheduler.start(ramp_source(6.0), &update(5.0)).expect("start");
    gate.wait_paused();
    drop(scheduler);
    gate.open();
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(graph.submitted_count(), 1);
}

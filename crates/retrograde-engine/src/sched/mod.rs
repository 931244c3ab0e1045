//! Segmented reverse-playback scheduler.
//!
//! A run walks a cursor from its start position towards zero. Each iteration
//! takes the window of `segment_duration` seconds ending at the cursor, plays
//! it forward through the [`OutputGraph`] with a crossfade envelope, waits
//! one `period` on the output clock and moves the cursor back by `step`.
//!
//! Runs are identified by a generation counter. Starting or stopping bumps
//! the counter under the run lock, and the loop only submits after checking
//! its generation under that same lock, so a cancelled run can never emit
//! another segment.

mod plan;
mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

pub use plan::{PlannedSegment, SegmentPlan, SegmentPlanner};
pub use state::PlaybackState;

use state::{ActiveSegments, RunState};

use crate::graph::{OutputGraph, Pacer, SegmentHandle, SegmentRequest};
use crate::observer::{NullObserver, PlaybackObserver};
use crate::progress::{ProgressAnchor, ProgressReporter, ProgressTracker};
use crate::{EngineConfig, EngineError, ParameterUpdate, PlaybackParameters, SourceBuffer};

/// Where a staged update ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateDisposition {
    /// Merged into the resolved parameters right away (no run in progress).
    Applied,
    /// Parked until the running loop reaches its next iteration boundary.
    Deferred,
}

enum Notice {
    Parameters(PlaybackParameters),
    Playing(bool),
    Position { position: f64, duration: f64 },
}

struct Inner {
    graph: Arc<dyn OutputGraph>,
    pacer: Arc<dyn Pacer>,
    config: EngineConfig,
    generation: AtomicU64,
    run: Mutex<RunState>,
    active: Mutex<ActiveSegments>,
    progress: ProgressTracker,
    parameters: ArcSwapOption<PlaybackParameters>,
    observer: RwLock<Arc<dyn PlaybackObserver>>,
}

pub struct ReverseScheduler {
    inner: Arc<Inner>,
}

impl ReverseScheduler {
    pub fn new(graph: Arc<dyn OutputGraph>, pacer: Arc<dyn Pacer>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph,
                pacer,
                config,
                generation: AtomicU64::new(0),
                run: Mutex::new(RunState::default()),
                active: Mutex::new(ActiveSegments::default()),
                progress: ProgressTracker::default(),
                parameters: ArcSwapOption::empty(),
                observer: RwLock::new(Arc::new(NullObserver)),
            }),
        }
    }

    pub fn with_observer(self, observer: Arc<dyn PlaybackObserver>) -> Self {
        self.set_observer(observer);
        self
    }

    pub fn set_observer(&self, observer: Arc<dyn PlaybackObserver>) {
        *self.inner.observer.write() = observer;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn graph(&self) -> &Arc<dyn OutputGraph> {
        &self.inner.graph
    }

    /// Cancels any current run and starts a new one over `source`.
    ///
    /// The update is resolved against the last resolved parameters first; an
    /// invalid update is rejected before anything is cancelled.
    pub fn start(&self, source: SourceBuffer, update: &ParameterUpdate) -> Result<(), EngineError> {
        self.inner.start(source, update)
    }

    /// Cancels the current run and remembers where it was. Returns `false`
    /// when nothing was running.
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    /// Starts again from the remembered position with the last resolved
    /// parameters. A no-op while running.
    pub fn resume(&self) -> Result<(), EngineError> {
        let (source, position) = {
            let run = self.inner.run.lock();
            if run.state.is_running() {
                return Ok(());
            }
            let source = run.source.clone().ok_or(EngineError::NoSource)?;
            let position = run
                .resume_position
                .or_else(|| run.parameters.map(|params| params.start_position));
            (source, position)
        };
        let update = match position {
            Some(position) => ParameterUpdate::new().with_start_position(position),
            None => ParameterUpdate::new(),
        };
        self.start(source, &update)
    }

    /// Stops and returns to [`PlaybackState::Idle`], forgetting the resume
    /// point.
    pub fn reset(&self) {
        self.inner.stop();
        let mut run = self.inner.run.lock();
        if run.state.is_running() {
            return;
        }
        run.state = PlaybackState::Idle;
        run.resume_position = None;
        run.cursor = 0.0;
        self.inner.progress.clear_anchor();
        self.inner.progress.publish(0.0);
    }

    /// Immediate channel: the new speed takes effect at the top of the next
    /// iteration. Outside a run it is folded into the stored parameters.
    pub fn set_live_speed(&self, speed: f64) -> Result<(), EngineError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(EngineError::invalid("speed", speed));
        }
        let notice = {
            let mut run = self.inner.run.lock();
            if run.state.is_running() {
                run.live_speed = Some(speed);
                None
            } else if let Some(params) = run.parameters {
                let updated = params.with_speed(speed)?;
                run.parameters = Some(updated);
                self.inner.publish_parameters(&updated);
                Some(Notice::Parameters(updated))
            } else {
                None
            }
        };
        self.inner.notify(notice);
        Ok(())
    }

    /// Deferred channel: while running, the update replaces whatever was
    /// staged and is merged at the next iteration boundary.
    pub fn stage_update(&self, update: &ParameterUpdate) -> Result<UpdateDisposition, EngineError> {
        let (disposition, notice) = {
            let mut run = self.inner.run.lock();
            let duration = run.source.as_ref().map(SourceBuffer::duration);
            let resolved = PlaybackParameters::resolve(
                update,
                run.parameters.as_ref(),
                &self.inner.config.defaults,
                duration,
            )?;
            if run.state.is_running() {
                if run.staged.replace(*update).is_some() {
                    tracing::debug!("replaced pending staged update");
                }
                (UpdateDisposition::Deferred, None)
            } else {
                run.parameters = Some(resolved);
                self.inner.publish_parameters(&resolved);
                (UpdateDisposition::Applied, Some(Notice::Parameters(resolved)))
            }
        };
        self.inner.notify(notice);
        Ok(disposition)
    }

    /// Blocks until the loop thread of the latest run has exited.
    pub fn join(&self) {
        let worker = self.inner.run.lock().worker.take();
        if let Some(handle) = worker {
            if let Err(err) = handle.join() {
                tracing::error!(?err, "scheduler thread panicked");
            }
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.run.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn cursor(&self) -> f64 {
        self.inner.run.lock().cursor
    }

    pub fn resume_position(&self) -> Option<f64> {
        self.inner.run.lock().resume_position
    }

    pub fn generation(&self) -> u64 {
        self.inner.current_generation()
    }

    pub fn source(&self) -> Option<SourceBuffer> {
        self.inner.run.lock().source.clone()
    }

    /// Lock-free snapshot of the last resolved parameters.
    pub fn parameters(&self) -> Option<Arc<PlaybackParameters>> {
        self.inner.parameters.load_full()
    }

    pub fn active_segment_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Position last published by the progress reporter (or by a state
    /// change). Lock-free.
    pub fn position(&self) -> f64 {
        self.inner.progress.position()
    }

    /// Fresh position estimate: extrapolated from the output clock while
    /// running, the cursor otherwise.
    pub fn estimated_position(&self) -> f64 {
        let run = self.inner.run.lock();
        if run.state.is_running() {
            let duration = run.source_duration();
            self.inner
                .progress
                .estimate(self.inner.graph.now(), duration)
                .unwrap_or(run.cursor)
        } else {
            run.cursor
        }
    }
}

impl Drop for ReverseScheduler {
    fn drop(&mut self) {
        let mut run = self.inner.run.lock();
        if run.state.is_running() {
            self.inner.cancel_locked(&mut run);
            run.state = PlaybackState::Paused;
        }
    }
}

impl Inner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    fn publish_parameters(&self, params: &PlaybackParameters) {
        self.parameters.store(Some(Arc::new(*params)));
    }

    fn notify(&self, notices: impl IntoIterator<Item = Notice>) {
        let observer = Arc::clone(&*self.observer.read());
        for notice in notices {
            match notice {
                Notice::Parameters(params) => observer.parameters_resolved(&params),
                Notice::Playing(playing) => observer.playing_changed(playing),
                Notice::Position { position, duration } => {
                    observer.position_changed(position, duration)
                }
            }
        }
    }

    /// Last resolved parameters with any pending live speed and staged
    /// update folded in, so cancelling a run never loses a committed change.
    fn folded_parameters(&self, run: &RunState) -> Option<PlaybackParameters> {
        let mut params = run.parameters?;
        if let Some(speed) = run.live_speed {
            if let Ok(updated) = params.with_speed(speed) {
                params = updated;
            }
        }
        if let Some(update) = &run.staged {
            let duration = Some(run.source_duration());
            if let Ok(updated) =
                PlaybackParameters::resolve(update, Some(&params), &self.config.defaults, duration)
            {
                params = updated;
            }
        }
        Some(params)
    }

    /// Bumps the generation and releases everything the previous run owns.
    /// Must be called with the run lock held.
    fn cancel_locked(&self, run: &mut RunState) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        run.reporter = None;
        run.live_speed = None;
        run.staged = None;
        let drained = self.active.lock().drain();
        for (handle, submitted_by) in drained {
            tracing::debug!(%handle, submitted_by, "disposing segment");
            self.graph.stop(handle);
        }
        generation
    }

    fn start(self: &Arc<Self>, source: SourceBuffer, update: &ParameterUpdate) -> Result<(), EngineError> {
        let duration = source.duration();
        let mut notices = Vec::new();
        {
            let mut run = self.run.lock();
            let previous = self.folded_parameters(&run);
            let mut params = PlaybackParameters::resolve(
                update,
                previous.as_ref(),
                &self.config.defaults,
                Some(duration),
            )?;
            if params.start_position > duration {
                tracing::warn!(
                    requested = params.start_position,
                    duration,
                    "start position beyond end of source, clamping"
                );
                params.start_position = duration;
            }

            let was_running = run.state.is_running();
            let generation = self.cancel_locked(&mut run);
            let cursor = params.start_position;

            run.source = Some(source.clone());
            run.parameters = Some(params);
            run.cursor = cursor;
            run.resume_position = None;
            self.progress.clear_anchor();
            self.progress.publish(cursor);
            self.publish_parameters(&params);
            notices.push(Notice::Parameters(params));

            if cursor <= 0.0 {
                run.state = PlaybackState::Finished;
                tracing::info!(generation, "nothing before the start position, run finished");
                if was_running {
                    notices.push(Notice::Playing(false));
                }
                notices.push(Notice::Position {
                    position: 0.0,
                    duration,
                });
            } else {
                let inner = Arc::clone(self);
                let worker = thread::Builder::new()
                    .name(format!("retrograde-scheduler-{generation}"))
                    .spawn(move || inner.run_loop(source, generation));
                let worker = match worker {
                    Ok(worker) => worker,
                    Err(err) => {
                        run.state = PlaybackState::Idle;
                        return Err(EngineError::Spawn {
                            what: "scheduler",
                            source: err,
                        });
                    }
                };
                run.state = PlaybackState::Running;
                run.worker = Some(worker);
                run.reporter = self.spawn_reporter(generation, duration);
                tracing::info!(generation, cursor, %params, "reverse run started");
                if !was_running {
                    notices.push(Notice::Playing(true));
                }
            }
        }
        self.notify(notices);
        Ok(())
    }

    fn spawn_reporter(self: &Arc<Self>, generation: u64, duration: f64) -> Option<ProgressReporter> {
        let alive = Arc::downgrade(self);
        let sampler = Arc::downgrade(self);
        let reporter = ProgressReporter::spawn(
            self.config.progress_interval(),
            move || {
                alive.upgrade().is_some_and(|inner| {
                    inner.is_current(generation) && inner.run.lock().state.is_running()
                })
            },
            move || {
                if let Some(inner) = sampler.upgrade() {
                    inner.sample_progress(generation, duration);
                }
            },
        );
        match reporter {
            Ok(reporter) => Some(reporter),
            Err(err) => {
                tracing::warn!(%err, "progress reporter unavailable for this run");
                None
            }
        }
    }

    /// One reporter tick. Returns whether a position was published.
    fn sample_progress(&self, generation: u64, duration: f64) -> bool {
        let position = {
            // Checked under the run lock: stop and finish publish their
            // final position while holding it.
            let run = self.run.lock();
            if !self.is_current(generation) || !run.state.is_running() {
                return false;
            }
            let Some(position) = self.progress.estimate(self.graph.now(), duration) else {
                return false;
            };
            self.progress.publish(position);
            position
        };
        self.notify([Notice::Position { position, duration }]);
        true
    }

    fn stop(&self) -> bool {
        let notices = {
            let mut run = self.run.lock();
            if !run.state.is_running() {
                return false;
            }
            let folded = self.folded_parameters(&run);
            let generation = self.cancel_locked(&mut run);
            let duration = run.source_duration();
            let position = self
                .progress
                .estimate(self.graph.now(), duration)
                .unwrap_or(run.cursor)
                .clamp(0.0, duration);
            run.state = PlaybackState::Paused;
            run.cursor = position;
            run.resume_position = Some(position);
            let mut notices = vec![Notice::Playing(false)];
            if let Some(mut params) = folded {
                params.start_position = position;
                run.parameters = Some(params);
                self.publish_parameters(&params);
                notices.push(Notice::Parameters(params));
            }
            self.progress.publish(position);
            tracing::info!(generation, position, "reverse run stopped");
            notices.push(Notice::Position { position, duration });
            notices
        };
        self.notify(notices);
        true
    }

    fn run_loop(self: Arc<Self>, source: SourceBuffer, generation: u64) {
        let poll = self.config.poll_interval();
        let duration = source.duration();
        let mut pending = Vec::new();

        loop {
            let deadline = {
                let mut run = self.run.lock();
                if !self.is_current(generation) {
                    return;
                }
                if run.cursor <= 0.0 {
                    break;
                }
                let Some(mut params) = run.parameters else {
                    return;
                };

                if let Some(speed) = run.live_speed.take() {
                    match params.with_speed(speed) {
                        Ok(updated) => {
                            params = updated;
                            run.parameters = Some(updated);
                            self.publish_parameters(&updated);
                            pending.push(Notice::Parameters(updated));
                        }
                        Err(err) => tracing::warn!(%err, "ignoring live speed"),
                    }
                }

                let Some(planned) = SegmentPlanner::plan(run.cursor, &params) else {
                    run.cursor -= params.step;
                    continue;
                };
                let window = source.window(planned.segment_start, planned.actual_duration);
                if window.is_empty() {
                    run.cursor = planned.next_cursor;
                    continue;
                }

                let scheduled_time = self.graph.now() + self.config.lead_in;
                let request = SegmentRequest::new(
                    window,
                    planned.segment_start,
                    scheduled_time,
                    planned.envelope,
                );
                match self.graph.submit(request) {
                    Ok(handle) => {
                        tracing::debug!(
                            %handle,
                            segment_start = planned.segment_start,
                            duration = planned.actual_duration,
                            scheduled_time,
                            "segment scheduled"
                        );
                        self.track(handle, generation);
                    }
                    Err(err) => tracing::warn!(
                        %err,
                        segment_start = planned.segment_start,
                        "segment submission rejected"
                    ),
                }
                self.progress.set_anchor(ProgressAnchor {
                    scheduled_time,
                    segment_start: planned.segment_start,
                });
                run.cursor = planned.next_cursor;
                scheduled_time + params.period
            };
            self.notify(pending.drain(..));

            if !self.pace(deadline, generation, poll) {
                return;
            }

            let mut run = self.run.lock();
            if !self.is_current(generation) {
                return;
            }
            if let Some(update) = run.staged.take() {
                match PlaybackParameters::resolve(
                    &update,
                    run.parameters.as_ref(),
                    &self.config.defaults,
                    Some(duration),
                ) {
                    Ok(params) => {
                        tracing::debug!(%params, "staged update applied");
                        run.parameters = Some(params);
                        self.publish_parameters(&params);
                        pending.push(Notice::Parameters(params));
                    }
                    Err(err) => tracing::warn!(%err, "dropping staged update"),
                }
            }
        }

        self.finish(generation, duration, pending);
    }

    fn track(self: &Arc<Self>, handle: SegmentHandle, generation: u64) {
        self.active.lock().insert(handle, generation);
        let weak: Weak<Inner> = Arc::downgrade(self);
        self.graph.on_completion(
            handle,
            Box::new(move |handle| {
                if let Some(inner) = weak.upgrade() {
                    if inner.active.lock().remove(&handle) {
                        tracing::trace!(%handle, "segment ended");
                    }
                }
            }),
        );
    }

    /// Suspends until `deadline` on the output clock in pauses of at most
    /// `poll`. Returns `false` as soon as the run has been cancelled.
    fn pace(&self, deadline: f64, generation: u64, poll: Duration) -> bool {
        loop {
            if !self.is_current(generation) {
                return false;
            }
            let remaining = deadline - self.graph.now();
            if remaining <= 0.0 {
                return true;
            }
            let pause = Duration::try_from_secs_f64(remaining)
                .unwrap_or(poll)
                .min(poll);
            if pause.is_zero() {
                return true;
            }
            self.pacer.pause(pause);
        }
    }

    fn finish(&self, generation: u64, duration: f64, mut notices: Vec<Notice>) {
        {
            let mut run = self.run.lock();
            if !self.is_current(generation) {
                return;
            }
            if let Some(params) = self.folded_parameters(&run) {
                if run.parameters != Some(params) {
                    run.parameters = Some(params);
                    self.publish_parameters(&params);
                    notices.push(Notice::Parameters(params));
                }
            }
            run.cursor = 0.0;
            run.state = PlaybackState::Finished;
            run.resume_position = None;
            run.reporter = None;
            run.live_speed = None;
            run.staged = None;
            self.progress.publish(0.0);
        }
        tracing::info!(generation, "reverse run finished");
        notices.push(Notice::Playing(false));
        notices.push(Notice::Position {
            position: 0.0,
            duration,
        });
        self.notify(notices);
    }
}

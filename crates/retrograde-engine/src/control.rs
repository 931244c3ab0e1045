//! Transport controls in front of a [`ReverseScheduler`].
//!
//! The surface models a signed speed slider: negative values play the
//! recording backwards through the scheduler, non-negative values hand
//! playback to a forward player owned by the caller. Slider drags feed the
//! scheduler's live speed channel; releasing the slider commits the full
//! parameter set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF64;
use parking_lot::Mutex;
use serde::Serialize;

use crate::progress::format_timeline;
use crate::sched::{ReverseScheduler, UpdateDisposition};
use crate::{EngineError, ParameterUpdate, PlaybackParameters, SourceBuffer};

/// Forward playback never runs slower than this.
pub const MIN_FORWARD_RATE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CommitOutcome {
    /// A new reverse run was started.
    Started,
    /// A reverse run is in progress; the parameters apply at its next
    /// segment boundary.
    Staged,
    /// Another commit was already in progress.
    Busy,
    /// Reverse playback was stopped; the caller should play forward from
    /// `position` at `rate`.
    Forward { position: f64, rate: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ToggleOutcome {
    ReversePaused,
    ReverseResumed,
    Forward { playing: bool, position: f64 },
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    segment_duration: f64,
    overlap: f64,
    step: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward { playing: bool },
    Reverse,
}

struct CommitGuard<'a>(&'a AtomicBool);

impl<'a> CommitGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CommitGuard(flag))
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ControlSurface {
    scheduler: Arc<ReverseScheduler>,
    source: Mutex<Option<SourceBuffer>>,
    settings: Mutex<Settings>,
    direction: Mutex<Direction>,
    speed: AtomicF64,
    forward_position: AtomicF64,
    dragging: AtomicBool,
    committing: AtomicBool,
}

impl ControlSurface {
    pub fn new(scheduler: Arc<ReverseScheduler>) -> Self {
        let defaults = scheduler.config().defaults.clone();
        Self {
            scheduler,
            source: Mutex::new(None),
            settings: Mutex::new(Settings {
                segment_duration: defaults.segment_duration,
                overlap: defaults.overlap,
                step: None,
            }),
            direction: Mutex::new(Direction::Forward { playing: false }),
            speed: AtomicF64::new(defaults.speed),
            forward_position: AtomicF64::new(0.0),
            dragging: AtomicBool::new(false),
            committing: AtomicBool::new(false),
        }
    }

    pub fn scheduler(&self) -> &Arc<ReverseScheduler> {
        &self.scheduler
    }

    /// Installs a recording and parks the position in its middle.
    pub fn load(&self, source: SourceBuffer) {
        let middle = source.duration() / 2.0;
        self.scheduler.reset();
        *self.source.lock() = Some(source);
        *self.direction.lock() = Direction::Forward { playing: false };
        self.forward_position.store(middle, Ordering::Release);
    }

    pub fn duration(&self) -> f64 {
        self.source.lock().as_ref().map_or(0.0, SourceBuffer::duration)
    }

    pub fn speed(&self) -> f64 {
        self.speed.load(Ordering::Acquire)
    }

    /// `1.00x` or `Reverse 1.50x`.
    pub fn speed_label(&self) -> String {
        let speed = self.speed();
        if speed >= 0.0 {
            format!("{speed:.2}x")
        } else {
            format!("Reverse {:.2}x", speed.abs())
        }
    }

    pub fn is_reverse(&self) -> bool {
        matches!(*self.direction.lock(), Direction::Reverse)
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.load(Ordering::Acquire)
    }

    /// Moves the speed slider. While a reverse run is active the magnitude
    /// goes straight to the scheduler's live channel.
    pub fn set_speed(&self, speed: f64) -> Result<(), EngineError> {
        if !speed.is_finite() {
            return Err(EngineError::invalid("speed", speed));
        }
        self.speed.store(speed, Ordering::Release);
        if self.scheduler.is_running() && speed != 0.0 {
            self.scheduler.set_live_speed(speed.abs())?;
        }
        Ok(())
    }

    pub fn begin_drag(&self) {
        self.dragging.store(true, Ordering::Release);
    }

    pub fn update_drag(&self, speed: f64) -> Result<(), EngineError> {
        self.set_speed(speed)
    }

    /// Ends a slider drag and commits. Returns `None` when no drag was in
    /// progress.
    pub fn end_drag(&self) -> Result<Option<CommitOutcome>, EngineError> {
        if !self.dragging.swap(false, Ordering::AcqRel) {
            return Ok(None);
        }
        self.commit_speed().map(Some)
    }

    /// Applies the slider position together with the chunk settings.
    ///
    /// Re-entrant calls (from another thread or from an observer callback
    /// fired during the commit) return [`CommitOutcome::Busy`].
    pub fn commit_speed(&self) -> Result<CommitOutcome, EngineError> {
        let Some(_guard) = CommitGuard::acquire(&self.committing) else {
            tracing::debug!("speed commit already in progress");
            return Ok(CommitOutcome::Busy);
        };

        let speed = self.speed();
        if speed >= 0.0 {
            self.scheduler.stop();
            let position = self.position();
            let rate = speed.max(MIN_FORWARD_RATE);
            *self.direction.lock() = Direction::Forward { playing: true };
            self.forward_position.store(position, Ordering::Release);
            return Ok(CommitOutcome::Forward { position, rate });
        }

        let update = self.reverse_update(self.position(), speed.abs());
        if self.scheduler.is_running() {
            self.scheduler.stage_update(&update)?;
            return Ok(CommitOutcome::Staged);
        }
        let source = self.loaded_source()?;
        self.scheduler.start(source, &update)?;
        *self.direction.lock() = Direction::Reverse;
        Ok(CommitOutcome::Started)
    }

    pub fn set_segment_duration(&self, seconds: f64) -> Result<UpdateDisposition, EngineError> {
        let update = ParameterUpdate::new().with_segment_duration(seconds);
        let disposition = self.scheduler.stage_update(&update)?;
        self.settings.lock().segment_duration = seconds;
        Ok(disposition)
    }

    pub fn set_overlap(&self, seconds: f64) -> Result<UpdateDisposition, EngineError> {
        let update = ParameterUpdate::new().with_overlap(seconds);
        let disposition = self.scheduler.stage_update(&update)?;
        self.settings.lock().overlap = seconds;
        Ok(disposition)
    }

    /// Pins the step, or lets it follow the period again with `None`.
    pub fn set_step(&self, seconds: Option<f64>) -> Result<UpdateDisposition, EngineError> {
        let update = match seconds {
            Some(step) => ParameterUpdate::new().with_step(step),
            None => ParameterUpdate::new().clearing_step(),
        };
        let disposition = self.scheduler.stage_update(&update)?;
        self.settings.lock().step = seconds;
        Ok(disposition)
    }

    /// Moves the playhead. In reverse mode a run restarts from the new
    /// position when the slider is still in reverse.
    pub fn seek(&self, position: f64) -> Result<(), EngineError> {
        if !position.is_finite() {
            return Err(EngineError::invalid("start_position", position));
        }
        let position = position.clamp(0.0, self.duration());
        self.forward_position.store(position, Ordering::Release);
        if !self.is_reverse() {
            return Ok(());
        }
        self.scheduler.stop();
        let speed = self.speed();
        if speed < 0.0 {
            let source = self.loaded_source()?;
            let update = self.reverse_update(position, speed.abs());
            self.scheduler.start(source, &update)?;
        }
        Ok(())
    }

    /// Play/pause button.
    pub fn toggle(&self) -> Result<ToggleOutcome, EngineError> {
        self.loaded_source()?;
        let mut direction = self.direction.lock();
        match *direction {
            Direction::Reverse => {
                drop(direction);
                if self.scheduler.stop() {
                    Ok(ToggleOutcome::ReversePaused)
                } else {
                    self.scheduler.resume()?;
                    Ok(ToggleOutcome::ReverseResumed)
                }
            }
            Direction::Forward { playing } => {
                *direction = Direction::Forward { playing: !playing };
                Ok(ToggleOutcome::Forward {
                    playing: !playing,
                    position: self.forward_position.load(Ordering::Acquire),
                })
            }
        }
    }

    /// Reports the forward player's position while it owns playback.
    pub fn set_forward_position(&self, position: f64) {
        if !self.is_reverse() && position.is_finite() {
            self.forward_position
                .store(position.clamp(0.0, self.duration()), Ordering::Release);
        }
    }

    pub fn position(&self) -> f64 {
        if !self.is_reverse() {
            return self.forward_position.load(Ordering::Acquire);
        }
        if self.scheduler.is_running() {
            self.scheduler.position()
        } else {
            self.scheduler.estimated_position()
        }
    }

    /// `m:ss / m:ss`.
    pub fn time_display(&self) -> String {
        format_timeline(self.position(), self.duration())
    }

    /// Seek-bar fill in `0..=1`.
    pub fn progress_fraction(&self) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            0.0
        } else {
            (self.position() / duration).clamp(0.0, 1.0)
        }
    }

    pub fn parameters(&self) -> Option<Arc<PlaybackParameters>> {
        self.scheduler.parameters()
    }

    fn loaded_source(&self) -> Result<SourceBuffer, EngineError> {
        self.source.lock().clone().ok_or(EngineError::NoSource)
    }

    fn reverse_update(&self, position: f64, speed: f64) -> ParameterUpdate {
        let settings = *self.settings.lock();
        let update = ParameterUpdate::new()
            .with_start_position(position)
            .with_segment_duration(settings.segment_duration)
            .with_overlap(settings.overlap)
            .with_speed(speed);
        match settings.step {
            Some(step) => update.with_step(step),
            None => update.clearing_step(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OfflineGraph;
    use crate::EngineConfig;

    fn surface() -> ControlSurface {
        let graph = Arc::new(OfflineGraph::new(100, 1));
        let scheduler = ReverseScheduler::new(graph.clone(), graph, EngineConfig::default());
        let surface = ControlSurface::new(Arc::new(scheduler));
        surface.load(SourceBuffer::with_sample_rate(100.0, vec![vec![0.25; 1000]]));
        surface
    }

    #[test]
    fn loading_parks_in_the_middle() {
        let surface = surface();
        assert!((surface.position() - 5.0).abs() < 1e-12);
        assert_eq!(surface.time_display(), "0:05 / 0:10");
        assert!((surface.progress_fraction() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn speed_labels() {
        let surface = surface();
        surface.set_speed(1.0).expect("speed");
        assert_eq!(surface.speed_label(), "1.00x");
        surface.set_speed(-1.5).expect("speed");
        assert_eq!(surface.speed_label(), "Reverse 1.50x");
        assert!(surface.set_speed(f64::INFINITY).is_err());
    }

    #[test]
    fn forward_commit_floors_the_rate() {
        let surface = surface();
        surface.set_speed(0.0).expect("speed");
        let outcome = surface.commit_speed().expect("commit");
        assert_eq!(
            outcome,
            CommitOutcome::Forward {
                position: 5.0,
                rate: MIN_FORWARD_RATE
            }
        );
        assert!(!surface.is_reverse());
    }

    #[test]
    fn end_drag_without_drag_does_nothing() {
        let surface = surface();
        assert_eq!(surface.end_drag().expect("end"), None);
    }

    #[test]
    fn forward_toggle_flips_playing() {
        let surface = surface();
        let first = surface.toggle().expect("toggle");
        assert_eq!(
            first,
            ToggleOutcome::Forward {
                playing: true,
                position: 5.0
            }
        );
        let second = surface.toggle().expect("toggle");
        assert!(matches!(second, ToggleOutcome::Forward { playing: false, .. }));
    }

    #[test]
    fn seek_clamps_in_forward_mode() {
        let surface = surface();
        surface.seek(42.0).expect("seek");
        assert_eq!(surface.position(), 10.0);
        assert!(surface.seek(f64::NAN).is_err());
    }

    #[test]
    fn setters_reject_invalid_values() {
        let surface = surface();
        assert!(surface.set_segment_duration(0.0).is_err());
        assert!(surface.set_overlap(-0.5).is_err());
        assert!(surface.set_step(Some(-1.0)).is_err());
        assert_eq!(
            surface.set_segment_duration(2.0).expect("chunk"),
            UpdateDisposition::Applied
        );
    }

    #[test]
    fn commit_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = CommitGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(CommitGuard::acquire(&flag).is_none());
        drop(first);
        assert!(CommitGuard::acquire(&flag).is_some());
    }
}

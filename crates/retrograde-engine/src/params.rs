//! Playback parameter resolution.
//!
//! A [`ParameterUpdate`] carries any subset of fields. Resolving it against
//! the previously resolved [`PlaybackParameters`] (or the configured
//! defaults) yields a complete parameter set where `period` and `step` are
//! derived from chunk length, overlap and speed unless explicitly overridden.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ParameterDefaults;
use crate::EngineError;

/// Guards the period formula against zero and negative spans.
pub const EPSILON: f64 = 1e-6;

/// `period = max(segment_duration - overlap, ε) / max(speed, ε)`
pub fn derive_period(segment_duration: f64, overlap: f64, speed: f64) -> f64 {
    let effective = (segment_duration - overlap).max(EPSILON);
    effective / speed.abs().max(EPSILON)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterUpdate {
    pub start_position: Option<f64>,
    pub segment_duration: Option<f64>,
    pub step: Option<f64>,
    pub period: Option<f64>,
    pub overlap: Option<f64>,
    pub speed: Option<f64>,
    /// Drops a previously pinned step so it follows the period again.
    pub clear_step: bool,
}

impl ParameterUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_position(mut self, seconds: f64) -> Self {
        self.start_position = Some(seconds);
        self
    }

    pub fn with_segment_duration(mut self, seconds: f64) -> Self {
        self.segment_duration = Some(seconds);
        self
    }

    pub fn with_step(mut self, seconds: f64) -> Self {
        self.step = Some(seconds);
        self.clear_step = false;
        self
    }

    pub fn with_period(mut self, seconds: f64) -> Self {
        self.period = Some(seconds);
        self
    }

    pub fn with_overlap(mut self, seconds: f64) -> Self {
        self.overlap = Some(seconds);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn clearing_step(mut self) -> Self {
        self.step = None;
        self.clear_step = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn validate(&self) -> Result<(), EngineError> {
        check_optional("start_position", self.start_position, |v| v >= 0.0)?;
        check_optional("segment_duration", self.segment_duration, |v| v > 0.0)?;
        check_optional("step", self.step, |v| v > 0.0)?;
        check_optional("period", self.period, |v| v > 0.0)?;
        check_optional("overlap", self.overlap, |v| v >= 0.0)?;
        check_optional("speed", self.speed, |v| v > 0.0)?;
        Ok(())
    }
}

fn check_optional(
    name: &'static str,
    value: Option<f64>,
    valid: impl Fn(f64) -> bool,
) -> Result<(), EngineError> {
    match value {
        Some(v) if !v.is_finite() || !valid(v) => Err(EngineError::invalid(name, v)),
        _ => Ok(()),
    }
}

/// Fully resolved parameters for one reverse run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackParameters {
    pub start_position: f64,
    pub segment_duration: f64,
    pub step: f64,
    pub period: f64,
    pub overlap: f64,
    pub speed: f64,
    step_override: bool,
    period_override: bool,
}

impl PlaybackParameters {
    /// Resolves `update` with the precedence explicit value > previous
    /// resolved value > default. On error nothing is produced and the caller
    /// keeps its previous parameters.
    ///
    /// `source_duration` is only consulted when no start position is known
    /// at all; playback then starts in the middle of the recording.
    pub fn resolve(
        update: &ParameterUpdate,
        previous: Option<&PlaybackParameters>,
        defaults: &ParameterDefaults,
        source_duration: Option<f64>,
    ) -> Result<Self, EngineError> {
        update.validate()?;

        let segment_duration = update
            .segment_duration
            .or(previous.map(|p| p.segment_duration))
            .unwrap_or(defaults.segment_duration);
        let overlap = update
            .overlap
            .or(previous.map(|p| p.overlap))
            .unwrap_or(defaults.overlap);
        let speed = update
            .speed
            .or(previous.map(|p| p.speed))
            .unwrap_or(defaults.speed);
        let start_position = update
            .start_position
            .or(previous.map(|p| p.start_position))
            .or(defaults.start_position)
            .unwrap_or_else(|| source_duration.map_or(0.0, |d| (d / 2.0).max(0.0)));

        let inputs_changed = previous.map_or(true, |p| {
            p.segment_duration != segment_duration || p.overlap != overlap || p.speed != speed
        });

        let (period, period_override) = match (update.period, previous) {
            (Some(period), _) => (period, true),
            (None, Some(p)) if p.period_override && !inputs_changed => (p.period, true),
            _ => (derive_period(segment_duration, overlap, speed), false),
        };

        let (step, step_override) = match (update.step, previous) {
            (Some(step), _) => (step, true),
            _ if update.clear_step => (period, false),
            (None, Some(p)) if p.step_override => (p.step, true),
            _ => (period, false),
        };

        let resolved = Self {
            start_position,
            segment_duration,
            step,
            period,
            overlap,
            speed,
            step_override,
            period_override,
        };
        resolved.validate()?;
        Ok(resolved)
    }

    pub fn from_defaults(
        defaults: &ParameterDefaults,
        source_duration: Option<f64>,
    ) -> Result<Self, EngineError> {
        Self::resolve(&ParameterUpdate::new(), None, defaults, source_duration)
    }

    /// Re-derives pacing for a new speed, keeping everything else.
    pub fn with_speed(&self, speed: f64) -> Result<Self, EngineError> {
        Self::resolve(
            &ParameterUpdate::new().with_speed(speed),
            Some(self),
            &ParameterDefaults::default(),
            None,
        )
    }

    pub fn is_step_overridden(&self) -> bool {
        self.step_override
    }

    pub fn is_period_overridden(&self) -> bool {
        self.period_override
    }

    /// Overlap the envelope may use when none is requested explicitly.
    pub fn max_overlap(&self) -> f64 {
        (self.segment_duration - self.period).max(0.0)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let checks: [(&'static str, f64, bool); 6] = [
            ("start_position", self.start_position, self.start_position >= 0.0),
            ("segment_duration", self.segment_duration, self.segment_duration > 0.0),
            ("step", self.step, self.step > 0.0),
            ("period", self.period, self.period > 0.0),
            ("overlap", self.overlap, self.overlap >= 0.0),
            ("speed", self.speed, self.speed > 0.0),
        ];
        for (name, value, ok) in checks {
            if !value.is_finite() || !ok {
                return Err(EngineError::invalid(name, value));
            }
        }
        Ok(())
    }
}

impl From<&PlaybackParameters> for ParameterUpdate {
    fn from(params: &PlaybackParameters) -> Self {
        ParameterUpdate {
            start_position: Some(params.start_position),
            segment_duration: Some(params.segment_duration),
            step: params.step_override.then_some(params.step),
            period: params.period_override.then_some(params.period),
            overlap: Some(params.overlap),
            speed: Some(params.speed),
            clear_step: !params.step_override,
        }
    }
}

impl fmt::Display for PlaybackParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {:.2}s, step {:.2}s, period {:.2}s, overlap {:.2}s, speed {:.2}x",
            self.segment_duration, self.step, self.period, self.overlap, self.speed
        )
    }
}

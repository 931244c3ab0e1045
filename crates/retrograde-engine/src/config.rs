use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Fallback values used when neither an update nor a previous run supplies a
/// parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParameterDefaults {
    pub segment_duration: f64,
    pub overlap: f64,
    pub speed: f64,
    /// Start position in seconds. `None` starts in the middle of the source.
    pub start_position: Option<f64>,
}

impl Default for ParameterDefaults {
    fn default() -> Self {
        Self {
            segment_duration: 1.25,
            overlap: 0.25,
            speed: 1.0,
            start_position: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Safety margin in seconds between "now" on the output clock and the
    /// start of a freshly submitted segment.
    pub lead_in: f64,
    /// Granularity of the cancellable pacing wait.
    pub poll_interval_ms: u64,
    /// Rate at which the progress reporter refreshes the estimated position.
    pub progress_interval_ms: u64,
    pub defaults: ParameterDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lead_in: 0.02,
            poll_interval_ms: 40,
            progress_interval_ms: 30,
            defaults: ParameterDefaults::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(data: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            serde_json::from_str(data).map_err(|err| EngineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let data = fs::read_to_string(path.as_ref()).map_err(|err| {
            EngineError::Config(format!("{}: {err}", path.as_ref().display()))
        })?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.lead_in.is_finite() || self.lead_in < 0.0 {
            return Err(EngineError::Config(format!(
                "lead_in must be a non-negative number, got {}",
                self.lead_in
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.progress_interval_ms == 0 {
            return Err(EngineError::Config(
                "progress_interval_ms must be greater than zero".into(),
            ));
        }
        let defaults = &self.defaults;
        if !(defaults.segment_duration.is_finite() && defaults.segment_duration > 0.0) {
            return Err(EngineError::invalid(
                "segment_duration",
                defaults.segment_duration,
            ));
        }
        if !(defaults.overlap.is_finite() && defaults.overlap >= 0.0) {
            return Err(EngineError::invalid("overlap", defaults.overlap));
        }
        if !(defaults.speed.is_finite() && defaults.speed > 0.0) {
            return Err(EngineError::invalid("speed", defaults.speed));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

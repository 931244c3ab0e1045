use crate::PlaybackParameters;

/// Receives display-oriented notifications from the scheduler.
///
/// Callbacks run on scheduler or reporter threads with no engine locks held.
/// Every method has a no-op default.
pub trait PlaybackObserver: Send + Sync {
    fn parameters_resolved(&self, _params: &PlaybackParameters) {}

    fn position_changed(&self, _position: f64, _duration: f64) {}

    fn playing_changed(&self, _playing: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PlaybackObserver for NullObserver {}

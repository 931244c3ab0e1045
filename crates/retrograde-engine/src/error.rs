use thiserror::Error;

use crate::media::DecodeError;

/// Failures reported by an [`OutputGraph`](crate::graph::OutputGraph)
/// implementation.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no output device available")]
    NoDevice,
    #[error("output device error: {0}")]
    Device(String),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("segment window is empty")]
    EmptySegment,
    #[error("output graph has shut down")]
    Closed,
    #[error("too many segments queued for the output graph")]
    Saturated,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("invalid value {value} for parameter `{name}`")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("no source buffer has been loaded")]
    NoSource,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("invalid engine configuration: {0}")]
    Config(String),
    #[error("failed to spawn {what} thread")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn invalid(name: &'static str, value: f64) -> Self {
        EngineError::InvalidParameter { name, value }
    }
}

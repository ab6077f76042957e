use std::time::Duration;

use packetcomms_frame::TypeId;

/// Errors returned synchronously by muxer, demuxer and connection calls.
///
/// Failures on the background threads are never returned; they clear the
/// dispatcher's health flag instead.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] packetcomms_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] packetcomms_frame::FrameError),

    /// The type id is 0 or not present in the registry.
    #[error("type {0} is not registered")]
    UnknownType(TypeId),

    /// The type name is not present in the registry.
    #[error("type name '{0}' is not registered")]
    UnknownName(String),

    /// Control messages are generated internally and cannot be posted.
    #[error("type {0} is reserved for internal use")]
    ReservedType(TypeId),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The dispatcher has failed or shut down; nothing was queued.
    #[error("dispatcher closed")]
    Closed,

    /// The background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MuxError>;

/// Errors returned by [`Reassembler`](crate::Reassembler) reads.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    /// No data arrived within the idle bound while the demuxer was healthy.
    #[error("stream of type {type_id} stalled: no data for {idle:?}")]
    Stalled { type_id: TypeId, idle: Duration },
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Stalled { .. } => std::io::Error::new(std::io::ErrorKind::TimedOut, err),
        }
    }
}

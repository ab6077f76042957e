use crate::message::TypeId;

/// Errors that can occur while framing messages on a transport.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame carried the reserved invalid type id (corrupted stream).
    #[error("frame carries invalid type id 0")]
    InvalidType,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer hung up (zero-byte read or write).
    #[error("connection closed")]
    ConnectionClosed,

    /// The health flag was cleared while a frame was in flight.
    #[error("frame transfer aborted")]
    Aborted,

    /// A control message could not be interpreted.
    #[error("bad control message: {0}")]
    BadControl(String),

    /// A message of the wrong type was handed to a typed decoder.
    #[error("expected type {expected}, got {actual}")]
    UnexpectedType { expected: TypeId, actual: TypeId },
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors that can occur while preparing a transport.
///
/// Runtime read/write failures are reported as plain `std::io::Error` by
/// the [`Transport`](crate::Transport) methods; this type covers setup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to duplicate the underlying stream handle.
    #[error("failed to clone transport handle: {0}")]
    Clone(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream is not connected to a peer.
    #[error("transport not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, TransportError>;

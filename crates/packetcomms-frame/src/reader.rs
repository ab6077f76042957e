use std::io::ErrorKind;
use std::time::Duration;

use packetcomms_transport::Transport;

use crate::codec::{FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::health::HealthFlag;
use crate::message::{Message, MessageBuilder};

/// How long to wait for more bytes when a non-blocking read comes up short.
const DEFAULT_RESUME_WAIT: Duration = Duration::from_millis(100);

/// Reads complete frames from a [`Transport`].
///
/// Handles partial reads internally: callers always get whole messages.
/// A zero-byte read is a hang-up, and a frame carrying type id 0 is
/// rejected as a corrupted stream.
pub struct FrameReader<T> {
    inner: T,
    health: HealthFlag,
    max_payload_size: usize,
    resume_wait: Duration,
}

impl<T: Transport> FrameReader<T> {
    /// Create a reader with its own health flag and default limits.
    pub fn new(inner: T) -> Self {
        Self::with_health(inner, HealthFlag::new())
    }

    /// Create a reader that aborts mid-frame when `health` is cleared.
    pub fn with_health(inner: T, health: HealthFlag) -> Self {
        Self {
            inner,
            health,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            resume_wait: DEFAULT_RESUME_WAIT,
        }
    }

    /// Wait up to `timeout` for the transport to become readable.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        self.inner.ready_for_reading(timeout).map_err(FrameError::Io)
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the peer hangs up.
    pub fn read_frame(&mut self) -> Result<Message> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        self.read_exact(&mut header_bytes)?;
        let header = FrameHeader::decode(&header_bytes);

        if header.type_id.is_invalid() {
            return Err(FrameError::InvalidType);
        }
        if header.payload_len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: header.payload_len(),
                max: self.max_payload_size,
            });
        }

        let mut builder = MessageBuilder::with_len(header.type_id, header.payload_len());
        self.read_exact(builder.payload_mut())?;
        Ok(builder.freeze())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            if !self.health.is_ok() {
                return Err(FrameError::Aborted);
            }
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.inner
                        .ready_for_reading(self.resume_wait)
                        .map_err(FrameError::Io)?;
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Update the largest declared payload length accepted.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }

    /// Largest declared payload length accepted.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// The health flag this reader observes.
    pub fn health(&self) -> &HealthFlag {
        &self.health
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

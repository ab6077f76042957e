use std::io;
use std::time::Duration;

/// A connected duplex byte stream.
///
/// Mirrors the four operations the packet layer needs from a connection:
/// blocking-mode control, raw writes, raw reads, and a bounded wait for
/// readable data. Implementations must be movable to a background thread.
///
/// Result conventions:
/// - `read` returning `Ok(0)` for a non-empty buffer means the peer hung up.
/// - `ErrorKind::WouldBlock` and `ErrorKind::Interrupted` are retryable.
/// - Any other error is a transport failure.
pub trait Transport: Send {
    /// Switch the stream between blocking and non-blocking mode.
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;

    /// Write some bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Wait up to `timeout` for the stream to become readable.
    ///
    /// A hang-up counts as readable: the following `read` reports it.
    fn ready_for_reading(&self, timeout: Duration) -> io::Result<bool>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        (**self).set_blocking(blocking)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn ready_for_reading(&self, timeout: Duration) -> io::Result<bool> {
        (**self).ready_for_reading(timeout)
    }
}

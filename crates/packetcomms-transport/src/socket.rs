use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// A connected socket stream that [`SocketTransport`] can drive.
///
/// Implemented for `UnixStream` and `TcpStream`.
pub trait SocketStream: Read + Write + AsRawFd + Send + Sized {
    /// Duplicate the handle (both handles refer to the same connection).
    fn try_clone_stream(&self) -> io::Result<Self>;

    /// Human-readable description of the remote end.
    fn describe_peer(&self) -> io::Result<String>;
}

impl SocketStream for UnixStream {
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn describe_peer(&self) -> io::Result<String> {
        let addr = self.peer_addr()?;
        Ok(match addr.as_pathname() {
            Some(path) => format!("unix:{}", path.display()),
            None => "unix:(unnamed)".to_string(),
        })
    }
}

impl SocketStream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn describe_peer(&self) -> io::Result<String> {
        Ok(format!("tcp:{}", self.peer_addr()?))
    }
}

/// [`Transport`] over a connected Unix or TCP socket.
///
/// Blocking mode is toggled with `fcntl(O_NONBLOCK)` and readiness is
/// polled with `poll(2)`. Note that `O_NONBLOCK` belongs to the open file
/// description, so it is shared by every handle produced by [`split`].
///
/// [`split`]: SocketTransport::split
pub struct SocketTransport<S> {
    stream: S,
    peer: String,
}

impl<S: SocketStream> SocketTransport<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Result<Self> {
        let peer = stream
            .describe_peer()
            .map_err(|_| TransportError::NotConnected)?;
        debug!(%peer, "socket transport ready");
        Ok(Self { stream, peer })
    }

    /// Wrap a connected stream and return two handles onto it.
    ///
    /// The usual arrangement gives one handle to the sending side and the
    /// other to the receiving side of a connection.
    pub fn split(stream: S) -> Result<(Self, Self)> {
        let first = Self::new(stream)?;
        let second = first.try_clone()?;
        Ok((first, second))
    }

    /// Duplicate this transport (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let stream = self
            .stream
            .try_clone_stream()
            .map_err(TransportError::Clone)?;
        Ok(Self {
            stream,
            peer: self.peer.clone(),
        })
    }

    /// Description of the remote end captured at construction.
    pub fn peer_description(&self) -> &str {
        &self.peer
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Consume the transport and return the inner stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: SocketStream> Transport for SocketTransport<S> {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        set_nonblocking(self.stream.as_raw_fd(), !blocking)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut self.stream, buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.stream, buf)
    }

    fn ready_for_reading(&self, timeout: Duration) -> io::Result<bool> {
        poll_readable(self.stream.as_raw_fd(), timeout)
    }
}

impl<S> std::fmt::Debug for SocketTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("peer", &self.peer)
            .finish()
    }
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the stream for the
    // duration of this call; F_GETFL takes no pointer arguments.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let wanted = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if wanted == flags {
        return Ok(());
    }

    // SAFETY: as above; F_SETFL takes an integer flag argument.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, wanted) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    trace!(fd, nonblocking, "updated socket blocking mode");
    Ok(())
}

fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        // SAFETY: `pfd` is a valid, writable pollfd and we pass a count of 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(false);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        return Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0);
    }
}

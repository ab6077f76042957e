//! Duplex byte-stream transport capability.
//!
//! The packet layer never opens connections itself. It is handed any
//! connected stream that implements [`Transport`]: blocking-mode control,
//! raw reads and writes, and a bounded wait for readability.
//!
//! This is the lowest layer of packetcomms. [`SocketTransport`] adapts
//! `UnixStream` and `TcpStream` on Unix platforms.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod socket;

pub use error::{Result, TransportError};
pub use traits::Transport;

#[cfg(unix)]
pub use socket::{SocketStream, SocketTransport};

//! Multiplexed, typed message delivery over one duplex connection.
//!
//! - [`Muxer`] queues messages posted from any thread, one FIFO per type,
//!   and drains them onto the transport from a background thread, sending
//!   heartbeats while idle.
//! - [`Demuxer`] reads frames on a background thread and hands each one,
//!   synchronously, to every [`Subscription`] registered for its type.
//! - [`Reassembler`] turns a sequence of same-type messages back into a
//!   contiguous byte stream for a single pulling consumer.
//!
//! Neither side raises errors asynchronously: a failed transport flips the
//! dispatcher's `ok()` to false, permanently.

pub mod config;
#[cfg(unix)]
pub mod connection;
pub mod demuxer;
pub mod error;
pub mod muxer;
pub mod reassembler;
pub mod subscription;

#[cfg(test)]
mod test_support;

pub use config::{ConnectionConfig, DemuxerConfig, MuxerConfig, ReassemblerConfig};
#[cfg(unix)]
pub use connection::Connection;
pub use demuxer::{Demuxer, DemuxerStats};
pub use error::{MuxError, Result, StreamError};
pub use muxer::{Muxer, MuxerStats};
pub use reassembler::Reassembler;
pub use subscription::Subscription;

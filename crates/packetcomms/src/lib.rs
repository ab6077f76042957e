//! Typed message multiplexing over a single duplex connection.
//!
//! Many independent message types share one byte stream. Producers post
//! messages from any thread; consumers subscribe per type and receive
//! every message of that type in order, or pull a type back out as a
//! contiguous byte stream.
//!
//! # Crate Structure
//!
//! - [`transport`]: the byte-stream seam (`Transport` trait, socket implementation)
//! - [`frame`]: wire format, messages and the type registry
//! - [`mux`]: muxer, demuxer, subscriptions and stream reassembly
//!
//! # Example
//!
//! ```no_run
//! use std::os::unix::net::UnixStream;
//! use std::sync::Arc;
//!
//! use packetcomms::frame::TypeRegistry;
//! use packetcomms::mux::Connection;
//!
//! let registry = Arc::new(TypeRegistry::new(["Telemetry", "Command"]));
//! let stream = UnixStream::connect("/tmp/robot.sock").unwrap();
//! let conn = Connection::new(stream, registry).unwrap();
//!
//! let _sub = conn
//!     .demuxer()
//!     .subscribe_named("Telemetry", |msg| println!("{} bytes", msg.len()))
//!     .unwrap();
//! conn.muxer().post_named("Command", b"stop".to_vec()).unwrap();
//! ```

/// Re-export transport types.
pub mod transport {
    pub use packetcomms_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use packetcomms_frame::*;
}

/// Re-export multiplexing types.
pub mod mux {
    pub use packetcomms_mux::*;
}

//! Typed messages and their wire framing.
//!
//! Every message travels as one frame:
//! - A 4-byte big-endian type id
//! - A 4-byte big-endian payload length
//! - The payload bytes
//!
//! Type ids come from a [`TypeRegistry`] that both peers build from the same
//! ordered list of names. Id 0 is never valid on the wire and id 1 carries
//! [`ControlMessage`]s.

pub mod codec;
pub mod control;
pub mod error;
pub mod health;
pub mod message;
pub mod reader;
pub mod registry;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{decode_frame, encode_frame, FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use control::ControlMessage;
pub use error::{FrameError, Result};
pub use health::HealthFlag;
pub use message::{Message, MessageBuilder, TypeId};
pub use reader::FrameReader;
pub use registry::{TypeRegistry, CONTROL_NAME, INVALID_NAME};
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::PacketCodec;

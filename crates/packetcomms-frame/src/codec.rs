use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::{Message, TypeId};

/// Frame header: type id (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size accepted by readers: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// The fixed-size prefix of every frame.
///
/// Wire format:
/// ```text
/// ┌───────────────┬───────────────┬──────────────────┐
/// │ Type id       │ Length        │ Payload          │
/// │ (4B BE u32)   │ (4B BE u32)   │ (Length bytes)   │
/// └───────────────┴───────────────┴──────────────────┘
/// ```
/// No magic number, checksum or version field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub type_id: TypeId,
    pub length: u32,
}

impl FrameHeader {
    /// Header describing `message`.
    ///
    /// Fails if the payload length does not fit in a u32.
    pub fn for_message(message: &Message) -> Result<Self> {
        let length = u32::try_from(message.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: message.len(),
            max: u32::MAX as usize,
        })?;
        Ok(Self {
            type_id: message.type_id(),
            length,
        })
    }

    /// Serialise to network byte order.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.type_id.0.to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Parse from network byte order.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let [t0, t1, t2, t3, l0, l1, l2, l3] = *bytes;
        Self {
            type_id: TypeId(u32::from_be_bytes([t0, t1, t2, t3])),
            length: u32::from_be_bytes([l0, l1, l2, l3]),
        }
    }

    /// Payload length as a `usize`.
    pub fn payload_len(&self) -> usize {
        self.length as usize
    }
}

/// Encode a complete frame into `dst`.
pub fn encode_frame(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader::for_message(message)?;
    dst.reserve(HEADER_SIZE + message.len());
    dst.put_slice(&header.encode());
    dst.put_slice(message.payload());
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Message>> {
    let Some(raw) = src.get(..HEADER_SIZE) else {
        return Ok(None); // Need more data
    };
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(raw);
    let header = FrameHeader::decode(&header_bytes);

    if header.type_id.is_invalid() {
        return Err(FrameError::InvalidType);
    }
    if header.payload_len() > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: header.payload_len(),
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + header.payload_len();
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.payload_len()).freeze();

    Ok(Some(Message::new(header.type_id, payload)))
}

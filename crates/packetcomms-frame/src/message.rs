use std::fmt;

use bytes::{Bytes, BytesMut};

/// Compact numeric message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Reserved: "no message". Never valid on the wire.
    pub const INVALID: TypeId = TypeId(0);
    /// Reserved: internal control traffic (hello, heartbeat).
    pub const CONTROL: TypeId = TypeId(1);
    /// First id handed out to application type names.
    pub const FIRST_APPLICATION: TypeId = TypeId(2);

    /// Raw wire value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// True for the reserved invalid id.
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

/// The unit of transmission: a type id plus an immutable payload.
///
/// The payload is reference counted, so cloning a `Message` never copies
/// bytes. The sender thread and any code that kept a clone can read it
/// concurrently, and one received message is shared by every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    type_id: TypeId,
    payload: Bytes,
}

impl Message {
    /// Create a message that takes ownership of `payload` without copying.
    pub fn new(type_id: TypeId, payload: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            payload: payload.into(),
        }
    }

    /// Create a message by copying a raw buffer.
    pub fn from_slice(type_id: TypeId, payload: &[u8]) -> Self {
        Self::new(type_id, Bytes::copy_from_slice(payload))
    }

    /// The empty, invalid message.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Message type id.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Read-only view of the payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// True for a message with the reserved invalid type id.
    pub fn is_invalid(&self) -> bool {
        self.type_id.is_invalid()
    }

    /// Split the message into its parts.
    pub fn into_parts(self) -> (TypeId, Bytes) {
        (self.type_id, self.payload)
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

/// A message under construction with a pre-sized payload filled in place.
///
/// The buffer is zero-initialised. Call [`freeze`](Self::freeze) to obtain
/// an immutable [`Message`].
#[derive(Debug)]
pub struct MessageBuilder {
    type_id: TypeId,
    payload: BytesMut,
}

impl MessageBuilder {
    /// Allocate a payload of exactly `len` bytes.
    pub fn with_len(type_id: TypeId, len: usize) -> Self {
        Self {
            type_id,
            payload: BytesMut::zeroed(len),
        }
    }

    /// Type id the finished message will carry.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Mutable access to the payload for in-place fill.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Finish construction. The payload is read-only from here on.
    pub fn freeze(self) -> Message {
        Message::new(self.type_id, self.payload.freeze())
    }
}

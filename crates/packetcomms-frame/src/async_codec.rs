//! `tokio_util::codec` adapter for the packet wire format.
//!
//! Lets async consumers read and write the same frames as the threaded
//! muxer/demuxer, e.g. `Framed::new(stream, PacketCodec::default())`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::message::Message;

/// Codec producing and consuming [`Message`]s.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_payload_size: usize,
}

impl PacketCodec {
    /// Codec with an explicit payload limit.
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for PacketCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        decode_frame(src, self.max_payload_size)
    }
}

impl Encoder<Message> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TypeId;

    #[test]
    fn codec_decodes_across_partial_buffers() {
        let mut codec = PacketCodec::default();
        let mut wire = BytesMut::new();
        codec
            .encode(Message::from_slice(TypeId(2), b"split"), &mut wire)
            .unwrap();

        let mut src = BytesMut::from(&wire[..5]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&wire[5..]);
        let msg = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(msg.payload().as_ref(), b"split");
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = PacketCodec::new(2);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Message::from_slice(TypeId(2), b"abc"), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }
}

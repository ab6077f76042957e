use crate::error::{FrameError, Result};
use crate::message::{Message, TypeId};

/// Internal traffic between a muxer and its peer demuxer.
///
/// Carried on [`TypeId::CONTROL`] as a single-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlMessage {
    /// First frame a muxer ever sends.
    Hello = 0,
    /// Sent when the muxer has been idle for one heartbeat interval.
    HeartBeat = 1,
}

impl ControlMessage {
    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Interpret a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Hello),
            1 => Some(Self::HeartBeat),
            _ => None,
        }
    }

    /// Build the control message ready for posting.
    pub fn to_message(self) -> Message {
        Message::from_slice(TypeId::CONTROL, &[self.code()])
    }

    /// Decode a received control message.
    pub fn decode(message: &Message) -> Result<Self> {
        if message.type_id() != TypeId::CONTROL {
            return Err(FrameError::UnexpectedType {
                expected: TypeId::CONTROL,
                actual: message.type_id(),
            });
        }

        let code = *message
            .payload()
            .first()
            .ok_or_else(|| FrameError::BadControl("empty payload".to_string()))?;

        Self::from_code(code).ok_or_else(|| FrameError::BadControl(format!("unknown code {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_are_one_byte() {
        let hello = ControlMessage::Hello.to_message();
        assert_eq!(hello.type_id(), TypeId::CONTROL);
        assert_eq!(hello.payload().as_ref(), &[0u8]);

        let beat = ControlMessage::HeartBeat.to_message();
        assert_eq!(beat.payload().as_ref(), &[1u8]);
    }

    #[test]
    fn decode_accepts_known_codes() {
        let msg = Message::from_slice(TypeId::CONTROL, &[1]);
        assert_eq!(ControlMessage::decode(&msg).unwrap(), ControlMessage::HeartBeat);
    }

    #[test]
    fn decode_rejects_wrong_type() {
        let msg = Message::from_slice(TypeId(5), &[0]);
        let err = ControlMessage::decode(&msg).unwrap_err();
        assert!(matches!(err, FrameError::UnexpectedType { .. }));
    }

    #[test]
    fn decode_rejects_empty_and_unknown() {
        let empty = Message::new(TypeId::CONTROL, Vec::new());
        assert!(matches!(
            ControlMessage::decode(&empty),
            Err(FrameError::BadControl(_))
        ));

        let unknown = Message::from_slice(TypeId::CONTROL, &[9]);
        assert!(matches!(
            ControlMessage::decode(&unknown),
            Err(FrameError::BadControl(_))
        ));
    }
}

use std::io::ErrorKind;
use std::time::Duration;

use packetcomms_transport::Transport;

use crate::codec::FrameHeader;
use crate::error::{FrameError, Result};
use crate::health::HealthFlag;
use crate::message::Message;

/// Pause before retrying a write the transport refused with `WouldBlock`.
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_micros(200);

/// Writes complete frames to a [`Transport`].
///
/// Partial writes are retried until the whole frame is out, the transport
/// fails, or the shared [`HealthFlag`] is cleared.
pub struct FrameWriter<T> {
    inner: T,
    health: HealthFlag,
}

impl<T: Transport> FrameWriter<T> {
    /// Create a writer with its own health flag.
    pub fn new(inner: T) -> Self {
        Self::with_health(inner, HealthFlag::new())
    }

    /// Create a writer that aborts when `health` is cleared.
    pub fn with_health(inner: T, health: HealthFlag) -> Self {
        Self { inner, health }
    }

    /// Write one message as header followed by payload (blocking).
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        let header = FrameHeader::for_message(message)?;
        self.write_all(&header.encode())?;
        self.write_all(message.payload())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < buf.len() {
            if !self.health.is_ok() {
                return Err(FrameError::Aborted);
            }
            match self.inner.write(&buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(WOULD_BLOCK_BACKOFF);
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// The health flag this writer observes.
    pub fn health(&self) -> &HealthFlag {
        &self.health
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, HEADER_SIZE};
    use crate::message::TypeId;

    /// Accepts at most `chunk` bytes per write and records everything.
    struct RecordingTransport {
        data: Vec<u8>,
        chunk: usize,
        writes: usize,
    }

    impl RecordingTransport {
        fn new(chunk: usize) -> Self {
            Self {
                data: Vec::new(),
                chunk,
                writes: 0,
            }
        }
    }

    impl Transport for RecordingTransport {
        fn set_blocking(&mut self, _blocking: bool) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            let n = buf.len().min(self.chunk);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("write-only transport"))
        }

        fn ready_for_reading(&self, _timeout: Duration) -> io::Result<bool> {
            Ok(false)
        }
    }

    /// Fails every write with the configured error kinds in order, then succeeds.
    struct ScriptedWriteTransport {
        script: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Transport for ScriptedWriteTransport {
        fn set_blocking(&mut self, _blocking: bool) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.script.is_empty() {
                return Err(io::Error::from(self.script.remove(0)));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn ready_for_reading(&self, _timeout: Duration) -> io::Result<bool> {
            Ok(false)
        }
    }

    fn decode_all(data: &[u8]) -> Vec<Message> {
        let mut wire = BytesMut::from(data);
        let mut out = Vec::new();
        while let Some(msg) = decode_frame(&mut wire, usize::MAX).unwrap() {
            out.push(msg);
        }
        assert!(wire.is_empty());
        out
    }

    #[test]
    fn writes_header_then_payload() {
        let mut writer = FrameWriter::new(RecordingTransport::new(usize::MAX));
        writer
            .write_message(&Message::from_slice(TypeId(2), b"\x01\x02"))
            .unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.writes, 2);
        assert_eq!(inner.data, vec![0, 0, 0, 2, 0, 0, 0, 2, 1, 2]);
    }

    #[test]
    fn loops_on_partial_writes() {
        let mut writer = FrameWriter::new(RecordingTransport::new(3));
        let payload = vec![0xAB; 64];
        writer
            .write_message(&Message::new(TypeId(9), payload.clone()))
            .unwrap();

        let inner = writer.into_inner();
        assert!(inner.writes > 2);
        assert_eq!(inner.data.len(), HEADER_SIZE + payload.len());

        let frames = decode_all(&inner.data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload().as_ref(), payload.as_slice());
    }

    #[test]
    fn empty_payload_writes_only_header() {
        let mut writer = FrameWriter::new(RecordingTransport::new(usize::MAX));
        writer
            .write_message(&Message::new(TypeId::CONTROL, Vec::new()))
            .unwrap();
        assert_eq!(writer.get_ref().data.len(), HEADER_SIZE);
    }

    #[test]
    fn retries_interrupted_and_would_block() {
        let transport = ScriptedWriteTransport {
            script: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            data: Vec::new(),
        };
        let mut writer = FrameWriter::new(transport);
        writer
            .write_message(&Message::from_slice(TypeId(4), b"retry"))
            .unwrap();

        let frames = decode_all(&writer.get_ref().data);
        assert_eq!(frames[0].payload().as_ref(), b"retry");
    }

    #[test]
    fn hard_error_propagates() {
        let transport = ScriptedWriteTransport {
            script: vec![ErrorKind::BrokenPipe],
            data: Vec::new(),
        };
        let mut writer = FrameWriter::new(transport);
        let err = writer
            .write_message(&Message::from_slice(TypeId(4), b"x"))
            .unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn zero_byte_write_is_connection_closed() {
        let mut writer = FrameWriter::new(RecordingTransport::new(0));
        let err = writer
            .write_message(&Message::from_slice(TypeId(2), b"x"))
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn cleared_health_aborts() {
        let health = HealthFlag::new();
        let mut writer = FrameWriter::with_health(RecordingTransport::new(usize::MAX), health.clone());
        health.fail();

        let err = writer
            .write_message(&Message::from_slice(TypeId(2), b"x"))
            .unwrap_err();
        assert!(matches!(err, FrameError::Aborted));
        assert!(writer.get_ref().data.is_empty());
    }
}

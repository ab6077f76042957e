//! Transports and helpers shared by the unit tests in this crate.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use packetcomms_frame::{decode_frame, encode_frame, ControlMessage, Message, TypeRegistry, DEFAULT_MAX_PAYLOAD};
use packetcomms_transport::Transport;
use parking_lot::Mutex;

pub(crate) fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::new(["Telemetry", "Command", "AvData"]))
}

/// Poll `condition` until it holds or two seconds pass.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub(crate) fn encode_all(messages: &[Message]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for message in messages {
        encode_frame(message, &mut buf).unwrap();
    }
    buf.to_vec()
}

pub(crate) fn decode_all(bytes: &[u8]) -> Vec<Message> {
    let mut buf = BytesMut::from(bytes);
    let mut out = Vec::new();
    while let Some(message) = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap() {
        out.push(message);
    }
    assert!(buf.is_empty(), "trailing partial frame");
    out
}

pub(crate) fn hello() -> Message {
    ControlMessage::Hello.to_message()
}

/// Write side that appends everything to a shared buffer. An optional gate
/// blocks the first write until the test releases it.
pub(crate) struct RecordingTransport {
    pub(crate) written: Arc<Mutex<Vec<u8>>>,
    gate: Option<mpsc::Receiver<()>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                written: Arc::clone(&written),
                gate: None,
            },
            written,
        )
    }

    pub(crate) fn gated() -> (Self, Arc<Mutex<Vec<u8>>>, mpsc::Sender<()>) {
        let (mut transport, written) = Self::new();
        let (release, gate) = mpsc::channel();
        transport.gate = Some(gate);
        (transport, written, release)
    }
}

impl Transport for RecordingTransport {
    fn set_blocking(&mut self, _blocking: bool) -> io::Result<()> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        self.written.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn ready_for_reading(&self, timeout: Duration) -> io::Result<bool> {
        std::thread::sleep(timeout);
        Ok(false)
    }
}

/// Every operation fails; readiness is always reported so reads are attempted.
pub(crate) struct BrokenTransport;

impl Transport for BrokenTransport {
    fn set_blocking(&mut self, _blocking: bool) -> io::Result<()> {
        Ok(())
    }

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::BrokenPipe.into())
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::ErrorKind::ConnectionReset.into())
    }

    fn ready_for_reading(&self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

/// Serves a fixed byte script, then behaves like an idle open connection.
pub(crate) struct ScriptedTransport {
    data: Vec<u8>,
    pos: usize,
}

impl ScriptedTransport {
    pub(crate) fn new(messages: &[Message]) -> Self {
        Self {
            data: encode_all(messages),
            pos: 0,
        }
    }

    pub(crate) fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl Transport for ScriptedTransport {
    fn set_blocking(&mut self, _blocking: bool) -> io::Result<()> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.data.len() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn ready_for_reading(&self, timeout: Duration) -> io::Result<bool> {
        if self.pos < self.data.len() {
            return Ok(true);
        }
        std::thread::sleep(timeout);
        Ok(false)
    }
}

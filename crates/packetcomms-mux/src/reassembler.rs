use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use packetcomms_frame::{Message, TypeId};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::config::ReassemblerConfig;
use crate::demuxer::Demuxer;
use crate::error::{MuxError, Result, StreamError};
use crate::subscription::Subscription;

/// Messages handed over by the demuxer thread, waiting to be read.
#[derive(Default)]
struct Inbox {
    messages: Mutex<VecDeque<Message>>,
    arrived: Condvar,
    bytes_received: AtomicU64,
}

impl Inbox {
    fn push(&self, message: &Message) {
        self.bytes_received
            .fetch_add(message.len() as u64, Ordering::Relaxed);
        self.messages.lock().push_back(message.clone());
        self.arrived.notify_one();
    }
}

/// Reads every message of one type as a single contiguous byte stream.
///
/// Message boundaries are not preserved: a read may span several messages
/// and a message may be consumed over several reads. Intended for one
/// consumer at a time.
pub struct Reassembler {
    inbox: Arc<Inbox>,
    subscription: Subscription,
    config: ReassemblerConfig,
    // Bytes of the front message already consumed.
    offset: usize,
}

impl Reassembler {
    /// Subscribe to `type_id` on `demuxer` with default timing.
    ///
    /// Subscribes, so must not be called from inside a callback of the same
    /// demuxer.
    pub fn new(demuxer: &Demuxer, type_id: TypeId) -> Self {
        Self::with_config(demuxer, type_id, ReassemblerConfig::default())
    }

    pub fn with_config(demuxer: &Demuxer, type_id: TypeId, config: ReassemblerConfig) -> Self {
        let inbox = Arc::new(Inbox::default());
        let sink = Arc::clone(&inbox);
        let subscription = demuxer.subscribe(type_id, move |message| sink.push(message));
        debug!(type_id = %type_id, "stream reassembler attached");
        Self {
            inbox,
            subscription,
            config,
            offset: 0,
        }
    }

    /// Subscribe by type name.
    pub fn named(demuxer: &Demuxer, name: &str, config: ReassemblerConfig) -> Result<Self> {
        let type_id = demuxer.registry().to_id(name);
        if type_id.is_invalid() {
            return Err(MuxError::UnknownName(name.to_string()));
        }
        Ok(Self::with_config(demuxer, type_id, config))
    }

    /// Copy up to `buf.len()` bytes of the stream into `buf`.
    ///
    /// Blocks until at least one byte is available. Empty messages carry no
    /// bytes and are skipped. Returns `Ok(0)` only when `buf` is empty, or
    /// when nothing is queued and the demuxer has stopped.
    /// Returns [`StreamError::Stalled`] when the demuxer is healthy but no
    /// data arrived within the stall timeout.
    pub fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, StreamError> {
        self.read_stream(buf)
    }

    fn read_stream(&mut self, buf: &mut [u8]) -> std::result::Result<usize, StreamError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = Instant::now() + self.config.stall_timeout;
        let mut messages = self.inbox.messages.lock();
        loop {
            while messages.is_empty() && self.subscription.demuxer_ok() {
                self.inbox
                    .arrived
                    .wait_for(&mut messages, self.config.wait_interval);
                if messages.is_empty() && Instant::now() >= deadline {
                    warn!(
                        type_id = %self.subscription.type_id(),
                        idle_ms = self.config.stall_timeout.as_millis() as u64,
                        "stream stalled"
                    );
                    return Err(StreamError::Stalled {
                        type_id: self.subscription.type_id(),
                        idle: self.config.stall_timeout,
                    });
                }
            }

            let copied = copy_queued(&mut messages, &mut self.offset, buf);
            // Only empty messages were queued; zero means end of stream, so
            // keep waiting while the demuxer is up.
            if copied > 0 || !self.subscription.demuxer_ok() {
                return Ok(copied);
            }
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.subscription.type_id()
    }

    /// Payload bytes delivered by the demuxer so far, read or not.
    pub fn bytes_received(&self) -> u64 {
        self.inbox.bytes_received.load(Ordering::Relaxed)
    }

    /// Messages waiting to be read, including a partially consumed one.
    pub fn queued(&self) -> usize {
        self.inbox.messages.lock().len()
    }

    /// False once the underlying demuxer has stopped.
    pub fn demuxer_ok(&self) -> bool {
        self.subscription.demuxer_ok()
    }
}

/// Copy from the front of `messages` into `buf`, starting `offset` bytes
/// into the front message. Fully consumed messages are popped.
fn copy_queued(messages: &mut VecDeque<Message>, offset: &mut usize, buf: &mut [u8]) -> usize {
    let mut copied = 0usize;
    while copied < buf.len() {
        let Some(front) = messages.front() else {
            break;
        };
        let available = &front.payload()[*offset..];
        let n = available.len().min(buf.len() - copied);
        buf[copied..copied + n].copy_from_slice(&available[..n]);
        copied += n;

        if n == available.len() {
            messages.pop_front();
            *offset = 0;
        } else {
            *offset += n;
        }
    }
    copied
}

impl io::Read for Reassembler {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_stream(buf).map_err(io::Error::from)
    }
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler")
            .field("type_id", &self.type_id())
            .field("queued", &self.queued())
            .field("offset", &self.offset)
            .finish()
    }
}

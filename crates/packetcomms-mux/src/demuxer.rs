use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use packetcomms_frame::{ControlMessage, FrameError, FrameReader, HealthFlag, Message, TypeId, TypeRegistry};
use packetcomms_transport::{Transport, TransportError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::DemuxerConfig;
use crate::error::{MuxError, Result};
use crate::subscription::Subscription;

type Callback = Box<dyn FnMut(&Message) + Send>;

const HELLO_POLL: Duration = Duration::from_millis(2);

/// Counters describing demuxer activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxerStats {
    /// Frames read off the transport, control frames included.
    pub received: u64,
    /// Callback invocations.
    pub dispatched: u64,
    /// HeartBeat control frames seen.
    pub heartbeats: u64,
}

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct SubscriberTable {
    by_type: HashMap<TypeId, Vec<Subscriber>>,
    closed: bool,
}

/// State shared by the demuxer handle, its receive thread and every
/// subscription (the latter through a weak reference).
pub(crate) struct DemuxShared {
    subscribers: Mutex<SubscriberTable>,
    health: HealthFlag,
    next_subscriber: AtomicU64,
    received: AtomicU64,
    dispatched: AtomicU64,
    heartbeats: AtomicU64,
    last_heartbeat: Mutex<Option<Instant>>,
    hello_received: AtomicBool,
}

impl DemuxShared {
    pub(crate) fn is_ok(&self) -> bool {
        self.health.is_ok()
    }

    /// Remove a subscriber. Blocks while a dispatch is in progress, so no
    /// invocation of the callback is running or will start once this returns.
    pub(crate) fn remove(&self, type_id: TypeId, id: u64) -> bool {
        let mut table = self.subscribers.lock();
        let Some(entries) = table.by_type.get_mut(&type_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            table.by_type.remove(&type_id);
        }
        removed
    }

    pub(crate) fn contains(&self, type_id: TypeId, id: u64) -> bool {
        self.subscribers
            .lock()
            .by_type
            .get(&type_id)
            .is_some_and(|entries| entries.iter().any(|entry| entry.id == id))
    }

    fn insert(&self, type_id: TypeId, callback: Callback) -> Option<u64> {
        let mut table = self.subscribers.lock();
        if table.closed {
            return None;
        }
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        table
            .by_type
            .entry(type_id)
            .or_default()
            .push(Subscriber { id, callback });
        Some(id)
    }

    /// Invoke every subscriber of the message's type, in subscription order,
    /// with the table locked for the whole pass.
    fn dispatch(&self, message: &Message) {
        let mut table = self.subscribers.lock();
        let Some(entries) = table.by_type.get_mut(&message.type_id()) else {
            trace!(type_id = %message.type_id(), "no subscribers, dropping");
            return;
        };
        for entry in entries.iter_mut() {
            (entry.callback)(message);
            self.dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn handle_control(&self, message: &Message) {
        match ControlMessage::decode(message) {
            Ok(ControlMessage::Hello) => {
                self.hello_received.store(true, Ordering::Release);
                debug!("peer hello received");
            }
            Ok(ControlMessage::HeartBeat) => {
                self.heartbeats.fetch_add(1, Ordering::Relaxed);
                *self.last_heartbeat.lock() = Some(Instant::now());
                trace!("peer heartbeat");
            }
            Err(err) => warn!(error = %err, "ignoring malformed control message"),
        }
    }

    fn close(&self) {
        let removed = {
            let mut table = self.subscribers.lock();
            table.closed = true;
            std::mem::take(&mut table.by_type)
        };
        debug!(types = removed.len(), "subscribers cleared");
    }
}

/// Clears the health flag and releases subscribers when the receive thread
/// exits, whether by returning or by unwinding out of a callback.
struct ExitGuard(Arc<DemuxShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.health.fail();
        self.0.close();
        debug!("demuxer receive loop exited");
    }
}

/// Receive side of a connection.
///
/// A background thread reads frames and delivers each one to every
/// subscriber of its type, on that thread, in arrival order. Messages with
/// no subscriber are dropped. Control frames update heartbeat tracking and
/// are then delivered like any other type.
///
/// Any transport or protocol error stops the thread, makes
/// [`ok`](Self::ok) return false and releases all subscriber callbacks.
///
/// Callbacks run with the subscriber table locked. They must not block for
/// long, and must not touch the subscriber table of the same demuxer: no
/// subscribing (including [`Reassembler::new`](crate::Reassembler::new)),
/// no unsubscribing or dropping a [`Subscription`], and no
/// [`Subscription::is_subscribed`].
pub struct Demuxer {
    shared: Arc<DemuxShared>,
    registry: Arc<TypeRegistry>,
    receiver: Option<JoinHandle<()>>,
}

impl Demuxer {
    /// Start a demuxer with default configuration.
    pub fn new<T>(transport: T, registry: Arc<TypeRegistry>) -> Result<Self>
    where
        T: Transport + 'static,
    {
        Self::with_config(transport, registry, DemuxerConfig::default())
    }

    pub fn with_config<T>(mut transport: T, registry: Arc<TypeRegistry>, config: DemuxerConfig) -> Result<Self>
    where
        T: Transport + 'static,
    {
        transport
            .set_blocking(false)
            .map_err(|err| MuxError::Transport(TransportError::Io(err)))?;

        let shared = Arc::new(DemuxShared {
            subscribers: Mutex::new(SubscriberTable::default()),
            health: HealthFlag::new(),
            next_subscriber: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            last_heartbeat: Mutex::new(None),
            hello_received: AtomicBool::new(false),
        });

        let mut reader = FrameReader::with_health(transport, shared.health.clone());
        reader.set_max_payload_size(config.max_payload_size);
        let thread_shared = Arc::clone(&shared);
        let receiver = std::thread::Builder::new()
            .name("packetcomms-demux".to_string())
            .spawn(move || receive_loop(thread_shared, reader, config))
            .map_err(|source| MuxError::Spawn {
                name: "demuxer",
                source,
            })?;

        debug!(types = registry.len(), "demuxer started");

        Ok(Self {
            shared,
            registry,
            receiver: Some(receiver),
        })
    }

    /// Register `callback` for every future message of `type_id`.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed, or the demuxer stops. Subscribing after the
    /// demuxer has stopped yields an inactive subscription.
    pub fn subscribe<F>(&self, type_id: TypeId, callback: F) -> Subscription
    where
        F: FnMut(&Message) + Send + 'static,
    {
        match self.shared.insert(type_id, Box::new(callback)) {
            Some(id) => {
                trace!(type_id = %type_id, subscriber = id, "subscribed");
                Subscription::new(Arc::downgrade(&self.shared), type_id, id)
            }
            None => Subscription::inactive(type_id),
        }
    }

    /// Subscribe by type name.
    pub fn subscribe_named<F>(&self, name: &str, callback: F) -> Result<Subscription>
    where
        F: FnMut(&Message) + Send + 'static,
    {
        let type_id = self.registry.to_id(name);
        if type_id.is_invalid() {
            return Err(MuxError::UnknownName(name.to_string()));
        }
        Ok(self.subscribe(type_id, callback))
    }

    /// False once the transport has failed, the peer misbehaved or the
    /// demuxer is shutting down.
    pub fn ok(&self) -> bool {
        self.shared.is_ok()
    }

    /// True once the peer's Hello has been read.
    ///
    /// A peer sends Hello only after its own subscriptions are in place
    /// (see [`Connection::with_subscriptions`](crate::Connection::with_subscriptions)),
    /// so this doubles as a readiness signal.
    pub fn hello_received(&self) -> bool {
        self.shared.hello_received.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the peer's Hello. Returns false on timeout or
    /// if the demuxer stops first.
    pub fn wait_for_hello(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.hello_received() {
                return true;
            }
            if !self.ok() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(HELLO_POLL);
        }
    }

    /// When the peer's last heartbeat arrived, if any has.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self.shared.last_heartbeat.lock()
    }

    pub fn stats(&self) -> DemuxerStats {
        DemuxerStats {
            received: self.shared.received.load(Ordering::Relaxed),
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            heartbeats: self.shared.heartbeats.load(Ordering::Relaxed),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.shared.health.fail();
        if let Some(receiver) = self.receiver.take() {
            if receiver.join().is_err() {
                warn!("demuxer receive thread panicked");
            }
        }
        debug!(stats = ?self.stats(), "demuxer stopped");
    }
}

impl std::fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demuxer")
            .field("ok", &self.ok())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn receive_loop<T: Transport>(shared: Arc<DemuxShared>, mut reader: FrameReader<T>, config: DemuxerConfig) {
    let _guard = ExitGuard(Arc::clone(&shared));
    debug!("demuxer receive loop entered");
    let mut awaiting_hello = config.require_hello;

    while shared.health.is_ok() {
        match reader.wait_readable(config.poll_interval) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                warn!(error = %err, "demuxer wait failed, stopping");
                return;
            }
        }

        let message = match reader.read_frame() {
            Ok(message) => message,
            Err(FrameError::Aborted) => return,
            Err(FrameError::ConnectionClosed) => {
                debug!("peer closed connection");
                return;
            }
            Err(err) => {
                warn!(error = %err, "demuxer read failed, stopping");
                return;
            }
        };
        shared.received.fetch_add(1, Ordering::Relaxed);

        if awaiting_hello {
            if ControlMessage::decode(&message).ok() != Some(ControlMessage::Hello) {
                warn!(type_id = %message.type_id(), "first frame was not hello, stopping");
                return;
            }
            awaiting_hello = false;
        }

        if message.type_id() == TypeId::CONTROL {
            shared.handle_control(&message);
        }
        shared.dispatch(&message);
    }
}

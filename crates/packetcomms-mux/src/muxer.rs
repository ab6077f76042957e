use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use packetcomms_frame::{ControlMessage, FrameError, FrameWriter, HealthFlag, Message, TypeId, TypeRegistry};
use packetcomms_transport::{Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::config::MuxerConfig;
use crate::error::{MuxError, Result};

const FLUSH_POLL: Duration = Duration::from_millis(2);

/// Counters describing muxer activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxerStats {
    /// Messages queued, including Hello and heartbeats.
    pub posted: u64,
    /// Messages fully written to the transport.
    pub sent: u64,
    /// Heartbeats generated while idle.
    pub heartbeats: u64,
}

/// One FIFO per type id, keyed so iteration runs in ascending id order.
#[derive(Default)]
struct SendQueues {
    queues: BTreeMap<TypeId, VecDeque<Message>>,
    pending: usize,
}

impl SendQueues {
    fn push(&mut self, message: Message) {
        self.queues
            .entry(message.type_id())
            .or_default()
            .push_back(message);
        self.pending += 1;
    }

    /// Take the whole queue of the lowest non-empty type id above `after`.
    fn take_next(&mut self, after: Option<TypeId>) -> Option<(TypeId, VecDeque<Message>)> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let (type_id, queue) = self
            .queues
            .range_mut((lower, Bound::Unbounded))
            .find(|(_, queue)| !queue.is_empty())?;
        let batch = std::mem::take(queue);
        self.pending -= batch.len();
        Some((*type_id, batch))
    }
}

struct Shared {
    queues: Mutex<SendQueues>,
    work_posted: Condvar,
    health: HealthFlag,
    posted: AtomicU64,
    sent: AtomicU64,
    heartbeats: AtomicU64,
}

impl Shared {
    fn enqueue(&self, queues: &mut SendQueues, message: Message) {
        queues.push(message);
        self.posted.fetch_add(1, Ordering::AcqRel);
        self.work_posted.notify_one();
    }
}

/// Send side of a connection.
///
/// `post` may be called from any thread; a background thread writes the
/// queued messages. Control traffic drains first, then application types in
/// ascending id order, each type strictly FIFO. When nothing is posted for
/// one heartbeat interval a HeartBeat goes out.
///
/// Transport failures are not returned to posters: they stop the sender and
/// make [`ok`](Self::ok) return false. Dropping the muxer stops the thread
/// and abandons anything still queued; call [`flush`](Self::flush) first to
/// wait for delivery.
pub struct Muxer {
    shared: Arc<Shared>,
    registry: Arc<TypeRegistry>,
    config: MuxerConfig,
    sender: Option<JoinHandle<()>>,
}

impl Muxer {
    /// Start a muxer with default configuration.
    pub fn new<T>(transport: T, registry: Arc<TypeRegistry>) -> Result<Self>
    where
        T: Transport + 'static,
    {
        Self::with_config(transport, registry, MuxerConfig::default())
    }

    /// Start a muxer. A Hello is queued before the sender thread starts, so
    /// it is always the first frame on the wire.
    pub fn with_config<T>(mut transport: T, registry: Arc<TypeRegistry>, config: MuxerConfig) -> Result<Self>
    where
        T: Transport + 'static,
    {
        transport
            .set_blocking(false)
            .map_err(|err| MuxError::Transport(TransportError::Io(err)))?;

        let shared = Arc::new(Shared {
            queues: Mutex::new(SendQueues::default()),
            work_posted: Condvar::new(),
            health: HealthFlag::new(),
            posted: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
        });
        {
            let mut queues = shared.queues.lock();
            shared.enqueue(&mut queues, ControlMessage::Hello.to_message());
        }

        let writer = FrameWriter::with_health(transport, shared.health.clone());
        let thread_shared = Arc::clone(&shared);
        let heartbeat_interval = config.heartbeat_interval;
        let sender = std::thread::Builder::new()
            .name("packetcomms-mux".to_string())
            .spawn(move || send_loop(thread_shared, writer, heartbeat_interval))
            .map_err(|source| MuxError::Spawn {
                name: "muxer",
                source,
            })?;

        debug!(
            types = registry.len(),
            heartbeat_ms = config.heartbeat_interval.as_millis() as u64,
            "muxer started"
        );

        Ok(Self {
            shared,
            registry,
            config,
            sender: Some(sender),
        })
    }

    /// Queue a message of a registered application type.
    pub fn post(&self, type_id: TypeId, payload: impl Into<Bytes>) -> Result<()> {
        self.post_message(Message::new(type_id, payload))
    }

    /// Queue a message by type name.
    pub fn post_named(&self, name: &str, payload: impl Into<Bytes>) -> Result<()> {
        let type_id = self.registry.to_id(name);
        if type_id.is_invalid() {
            return Err(MuxError::UnknownName(name.to_string()));
        }
        self.post(type_id, payload)
    }

    /// Queue an already-built message. The payload is shared, not copied.
    pub fn post_message(&self, message: Message) -> Result<()> {
        let type_id = message.type_id();
        if type_id == TypeId::CONTROL {
            return Err(MuxError::ReservedType(type_id));
        }
        if !self.registry.contains(type_id) {
            return Err(MuxError::UnknownType(type_id));
        }
        if message.len() > self.config.max_payload_size {
            return Err(MuxError::PayloadTooLarge {
                size: message.len(),
                max: self.config.max_payload_size,
            });
        }

        let mut queues = self.shared.queues.lock();
        if !self.shared.health.is_ok() {
            return Err(MuxError::Closed);
        }
        trace!(type_id = %type_id, len = message.len(), "posted");
        self.shared.enqueue(&mut queues, message);
        Ok(())
    }

    /// False once the transport has failed or the muxer is shutting down.
    pub fn ok(&self) -> bool {
        self.shared.health.is_ok()
    }

    /// Wait until everything posted so far has been written.
    ///
    /// Returns false on timeout or if the muxer fails first.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let posted = self.shared.posted.load(Ordering::Acquire);
            if self.shared.sent.load(Ordering::Acquire) >= posted {
                return true;
            }
            if !self.ok() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(FLUSH_POLL);
        }
    }

    pub fn stats(&self) -> MuxerStats {
        MuxerStats {
            posted: self.shared.posted.load(Ordering::Acquire),
            sent: self.shared.sent.load(Ordering::Acquire),
            heartbeats: self.shared.heartbeats.load(Ordering::Acquire),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        {
            let _queues = self.shared.queues.lock();
            self.shared.health.fail();
            self.shared.work_posted.notify_all();
        }
        if let Some(sender) = self.sender.take() {
            if sender.join().is_err() {
                warn!("muxer sender thread panicked");
            }
        }
        debug!(stats = ?self.stats(), "muxer stopped");
    }
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("ok", &self.ok())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn send_loop<T: Transport>(shared: Arc<Shared>, mut writer: FrameWriter<T>, heartbeat_interval: Duration) {
    debug!("muxer send loop entered");
    while shared.health.is_ok() {
        {
            let mut queues = shared.queues.lock();
            if queues.pending == 0 && shared.health.is_ok() {
                let idle = shared
                    .work_posted
                    .wait_for(&mut queues, heartbeat_interval)
                    .timed_out();
                if idle && queues.pending == 0 && shared.health.is_ok() {
                    trace!("idle, queueing heartbeat");
                    shared.heartbeats.fetch_add(1, Ordering::AcqRel);
                    shared.enqueue(&mut queues, ControlMessage::HeartBeat.to_message());
                }
            }
        }
        drain(&shared, &mut writer);
    }
    debug!("muxer send loop exited");
}

/// Write every queue once, lowest type id first. Each queue is taken whole
/// under the lock and written with the lock released, so posters never wait
/// on the transport.
fn drain<T: Transport>(shared: &Shared, writer: &mut FrameWriter<T>) {
    let mut cursor = None;
    loop {
        let next = shared.queues.lock().take_next(cursor);
        let Some((type_id, batch)) = next else {
            return;
        };
        cursor = Some(type_id);

        for message in batch {
            match writer.write_message(&message) {
                Ok(()) => {
                    shared.sent.fetch_add(1, Ordering::AcqRel);
                }
                Err(FrameError::Aborted) => return,
                Err(err) => {
                    if shared.health.fail() {
                        warn!(type_id = %type_id, error = %err, "muxer write failed, stopping");
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use packetcomms_frame::FrameReader;
    use packetcomms_transport::SocketTransport;

    use super::*;
    use crate::test_support::{decode_all, hello, registry, wait_until, BrokenTransport, RecordingTransport};

    const TELEMETRY: TypeId = TypeId(2);
    const COMMAND: TypeId = TypeId(3);
    const AV_DATA: TypeId = TypeId(4);

    fn quiet() -> MuxerConfig {
        MuxerConfig {
            heartbeat_interval: Duration::from_secs(30),
            ..MuxerConfig::default()
        }
    }

    #[test]
    fn hello_is_the_first_frame() {
        let (left, right) = UnixStream::pair().unwrap();
        let muxer = Muxer::with_config(SocketTransport::new(left).unwrap(), registry(), quiet()).unwrap();
        muxer.post(TELEMETRY, vec![1u8]).unwrap();

        let mut reader = FrameReader::new(SocketTransport::new(right).unwrap());
        assert_eq!(reader.read_frame().unwrap(), hello());
        assert_eq!(reader.read_frame().unwrap(), Message::new(TELEMETRY, vec![1u8]));
    }

    #[test]
    fn posted_frames_reach_the_wire_in_order() {
        let (transport, written) = RecordingTransport::new();
        let muxer = Muxer::with_config(transport, registry(), quiet()).unwrap();

        muxer.post_named("Telemetry", vec![0x01, 0x02]).unwrap();
        muxer.post_named("Command", vec![0xFF]).unwrap();
        assert!(muxer.flush(Duration::from_secs(2)));

        let bytes = written.lock().clone();
        assert_eq!(
            bytes,
            vec![
                0, 0, 0, 1, 0, 0, 0, 1, 0x00, // Hello
                0, 0, 0, 2, 0, 0, 0, 2, 0x01, 0x02, // Telemetry
                0, 0, 0, 3, 0, 0, 0, 1, 0xFF, // Command
            ]
        );
        assert_eq!(
            muxer.stats(),
            MuxerStats {
                posted: 3,
                sent: 3,
                heartbeats: 0
            }
        );
    }

    #[test]
    fn lower_type_ids_drain_first() {
        let (transport, written, release) = RecordingTransport::gated();
        let muxer = Muxer::with_config(transport, registry(), quiet()).unwrap();

        // The sender is parked writing Hello, so these all queue up.
        muxer.post(AV_DATA, vec![4u8, 1]).unwrap();
        muxer.post(COMMAND, vec![3u8, 1]).unwrap();
        muxer.post(AV_DATA, vec![4u8, 2]).unwrap();
        muxer.post(TELEMETRY, vec![2u8, 1]).unwrap();
        muxer.post(COMMAND, vec![3u8, 2]).unwrap();
        release.send(()).unwrap();
        assert!(muxer.flush(Duration::from_secs(2)));

        let frames = decode_all(&written.lock());
        let payloads: Vec<Vec<u8>> = frames.iter().map(|m| m.payload().to_vec()).collect();
        assert_eq!(
            payloads,
            vec![vec![0u8], vec![2, 1], vec![3, 1], vec![3, 2], vec![4, 1], vec![4, 2]]
        );
    }

    #[test]
    fn heartbeat_is_sent_when_idle() {
        let (transport, written) = RecordingTransport::new();
        let muxer = Muxer::with_config(
            transport,
            registry(),
            MuxerConfig {
                heartbeat_interval: Duration::from_millis(20),
                ..MuxerConfig::default()
            },
        )
        .unwrap();

        assert!(wait_until(|| muxer.stats().heartbeats >= 2));
        assert!(muxer.flush(Duration::from_secs(2)));

        let frames = decode_all(&written.lock());
        assert_eq!(frames[0], hello());
        assert_eq!(frames[1], ControlMessage::HeartBeat.to_message());
        assert!(frames.iter().all(|m| m.type_id() == TypeId::CONTROL));
    }

    #[test]
    fn rejects_unregistered_reserved_and_oversized_posts() {
        let (transport, _written) = RecordingTransport::new();
        let muxer = Muxer::with_config(
            transport,
            registry(),
            MuxerConfig {
                max_payload_size: 4,
                ..quiet()
            },
        )
        .unwrap();

        assert!(matches!(
            muxer.post(TypeId::INVALID, vec![1u8]),
            Err(MuxError::UnknownType(TypeId::INVALID))
        ));
        assert!(matches!(
            muxer.post(TypeId(99), vec![1u8]),
            Err(MuxError::UnknownType(TypeId(99)))
        ));
        assert!(matches!(
            muxer.post(TypeId::CONTROL, vec![1u8]),
            Err(MuxError::ReservedType(_))
        ));
        assert!(matches!(muxer.post_named("Video", vec![1u8]), Err(MuxError::UnknownName(_))));
        assert!(matches!(
            muxer.post(TELEMETRY, vec![0u8; 5]),
            Err(MuxError::PayloadTooLarge { size: 5, max: 4 })
        ));
        muxer.post(TELEMETRY, vec![0u8; 4]).unwrap();
        muxer.post(TELEMETRY, Bytes::new()).unwrap();
    }

    #[test]
    fn write_failure_clears_ok_and_closes_posting() {
        let muxer = Muxer::with_config(BrokenTransport, registry(), quiet()).unwrap();

        assert!(wait_until(|| !muxer.ok()));
        assert!(matches!(muxer.post(TELEMETRY, vec![1u8]), Err(MuxError::Closed)));
        assert!(!muxer.flush(Duration::from_millis(50)));
        assert_eq!(muxer.stats().sent, 0);
    }

    #[test]
    fn peer_hang_up_clears_ok() {
        let (left, right) = UnixStream::pair().unwrap();
        let muxer = Muxer::with_config(SocketTransport::new(left).unwrap(), registry(), quiet()).unwrap();
        drop(right);

        assert!(wait_until(|| {
            let _ = muxer.post(TELEMETRY, vec![0u8; 1024]);
            !muxer.ok()
        }));
    }

    #[test]
    fn concurrent_posters_keep_per_type_order() {
        let (transport, written) = RecordingTransport::new();
        let muxer = Arc::new(Muxer::with_config(transport, registry(), quiet()).unwrap());

        let posters: Vec<_> = [TELEMETRY, COMMAND, AV_DATA]
            .into_iter()
            .map(|type_id| {
                let muxer = Arc::clone(&muxer);
                std::thread::spawn(move || {
                    for seq in 0u32..200 {
                        muxer.post(type_id, seq.to_be_bytes().to_vec()).unwrap();
                    }
                })
            })
            .collect();
        for poster in posters {
            poster.join().unwrap();
        }
        assert!(muxer.flush(Duration::from_secs(5)));

        let frames = decode_all(&written.lock());
        assert_eq!(frames.len(), 1 + 600);
        for type_id in [TELEMETRY, COMMAND, AV_DATA] {
            let seqs: Vec<u32> = frames
                .iter()
                .filter(|m| m.type_id() == type_id)
                .map(|m| u32::from_be_bytes(m.payload()[..4].try_into().unwrap()))
                .collect();
            assert_eq!(seqs, (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn drop_stops_an_idle_sender_promptly() {
        let (transport, _written) = RecordingTransport::new();
        let muxer = Muxer::with_config(transport, registry(), quiet()).unwrap();
        assert!(muxer.flush(Duration::from_secs(2)));

        let started = Instant::now();
        drop(muxer);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

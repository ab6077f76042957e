use std::time::Duration;

use packetcomms_frame::DEFAULT_MAX_PAYLOAD;

/// Send-side behaviour.
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Idle time after which a heartbeat is sent. Default: 1 s.
    pub heartbeat_interval: Duration,
    /// Largest payload accepted by `post`. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1000),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Receive-side behaviour.
#[derive(Debug, Clone)]
pub struct DemuxerConfig {
    /// Bound on each wait for readable data. Default: 1 s.
    pub poll_interval: Duration,
    /// Treat a first frame other than Control/Hello as a protocol error.
    pub require_hello: bool,
    /// Largest declared payload length accepted. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for DemuxerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            require_hello: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Stream reassembly behaviour.
#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    /// Bound on each wait for a queued message. Default: 1 s.
    pub wait_interval: Duration,
    /// Idle time after which a read reports a stall. Default: 1 s.
    pub stall_timeout: Duration,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            wait_interval: Duration::from_millis(1000),
            stall_timeout: Duration::from_millis(1000),
        }
    }
}

/// Both halves of one connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub muxer: MuxerConfig,
    pub demuxer: DemuxerConfig,
}

use std::sync::Arc;

use packetcomms_frame::TypeRegistry;
use packetcomms_transport::{SocketStream, SocketTransport};
use tracing::info;

use crate::config::ConnectionConfig;
use crate::demuxer::Demuxer;
use crate::error::Result;
use crate::muxer::Muxer;

/// A muxer and a demuxer sharing one connected socket.
///
/// Both sides must be built with the same type registry.
pub struct Connection {
    // Declared first so the sender stops before the receiver.
    muxer: Muxer,
    demuxer: Demuxer,
    registry: Arc<TypeRegistry>,
    peer: String,
}

impl Connection {
    pub fn new<S>(stream: S, registry: Arc<TypeRegistry>) -> Result<Self>
    where
        S: SocketStream + 'static,
    {
        Self::with_config(stream, registry, ConnectionConfig::default())
    }

    pub fn with_config<S>(stream: S, registry: Arc<TypeRegistry>, config: ConnectionConfig) -> Result<Self>
    where
        S: SocketStream + 'static,
    {
        Self::with_subscriptions(stream, registry, config, |_| ()).map(|(connection, ())| connection)
    }

    /// Build a connection, running `subscribe` after the demuxer starts and
    /// before the muxer sends Hello.
    ///
    /// A peer that waits for our Hello
    /// ([`Demuxer::wait_for_hello`]) before posting cannot race these
    /// subscriptions.
    pub fn with_subscriptions<S, F, R>(
        stream: S,
        registry: Arc<TypeRegistry>,
        config: ConnectionConfig,
        subscribe: F,
    ) -> Result<(Self, R)>
    where
        S: SocketStream + 'static,
        F: FnOnce(&Demuxer) -> R,
    {
        let (send_half, receive_half) = SocketTransport::split(stream)?;
        let peer = send_half.peer_description().to_string();

        let demuxer = Demuxer::with_config(receive_half, Arc::clone(&registry), config.demuxer)?;
        let subscribed = subscribe(&demuxer);
        let muxer = Muxer::with_config(send_half, Arc::clone(&registry), config.muxer)?;
        info!(peer = %peer, types = registry.len(), "connection established");

        Ok((
            Self {
                muxer,
                demuxer,
                registry,
                peer,
            },
            subscribed,
        ))
    }

    pub fn muxer(&self) -> &Muxer {
        &self.muxer
    }

    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Human-readable description of the remote end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// True while both directions are healthy.
    pub fn ok(&self) -> bool {
        self.muxer.ok() && self.demuxer.ok()
    }

    pub fn into_parts(self) -> (Muxer, Demuxer) {
        (self.muxer, self.demuxer)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("muxer", &self.muxer)
            .field("demuxer", &self.demuxer)
            .finish()
    }
}

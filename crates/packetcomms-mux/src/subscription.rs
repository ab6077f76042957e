use std::sync::Weak;

use packetcomms_frame::TypeId;
use tracing::trace;

use crate::demuxer::DemuxShared;

/// Handle for one registered callback.
///
/// Dropping the handle unsubscribes. Once [`unsubscribe`](Self::unsubscribe)
/// returns, the callback is not running and will never run again. The handle
/// does not keep the demuxer alive and is safe to drop after it is gone.
pub struct Subscription {
    demuxer: Weak<DemuxShared>,
    type_id: TypeId,
    id: u64,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(demuxer: Weak<DemuxShared>, type_id: TypeId, id: u64) -> Self {
        Self {
            demuxer,
            type_id,
            id,
            active: true,
        }
    }

    /// A subscription that was never registered.
    pub(crate) fn inactive(type_id: TypeId) -> Self {
        Self {
            demuxer: Weak::new(),
            type_id,
            id: 0,
            active: false,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// True while the callback is still registered with a live demuxer.
    ///
    /// Takes the subscriber table lock, so like
    /// [`unsubscribe`](Self::unsubscribe) it must not be called from inside a
    /// callback of the same demuxer.
    pub fn is_subscribed(&self) -> bool {
        self.active
            && self
                .demuxer
                .upgrade()
                .is_some_and(|demuxer| demuxer.contains(self.type_id, self.id))
    }

    /// Remove the callback. Idempotent.
    ///
    /// Blocks while the demuxer is dispatching, so it must not be called from
    /// inside a callback of the same demuxer.
    pub fn unsubscribe(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(demuxer) = self.demuxer.upgrade() {
            if demuxer.remove(self.type_id, self.id) {
                trace!(type_id = %self.type_id, subscriber = self.id, "unsubscribed");
            }
        }
    }

    /// Health of the demuxer this subscription belongs to. False once it has
    /// failed or been dropped.
    pub fn demuxer_ok(&self) -> bool {
        self.demuxer.upgrade().is_some_and(|demuxer| demuxer.is_ok())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("type_id", &self.type_id)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

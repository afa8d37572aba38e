//! Push notifications from a backend.
//!
//! Every backend kind that can push changes publishes [`BackendEvent`]s
//! through a [`tokio::sync::broadcast`] channel owned by an
//! [`EventStreamHandle`]. The D-Bus backend feeds it from service signals;
//! the simulated backend feeds it from its own writes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// ── Broadcast channel capacity ───────────────────────────────────────

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── BackendEvent ─────────────────────────────────────────────────────

/// A pushed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    /// The service (re)started; previously bound state may be stale.
    ServiceInitialized,

    /// A display was connected, disconnected, or woke up.
    ConnectedDisplaysChanged {
        edid: String,
        /// `0` means a non-structural change (e.g. DPMS wake).
        event_kind: i32,
        flags: i32,
    },

    /// Another client (or the monitor itself) changed a feature value.
    VcpValueChanged {
        display_number: i32,
        edid: String,
        code: u8,
        new_value: u16,
        source_name: String,
        source_context: String,
        flags: i32,
    },
}

// ── EventStreamHandle ────────────────────────────────────────────────

/// Handle to a backend's event stream.
///
/// Clones share the same channel and cancellation token.
#[derive(Clone)]
pub struct EventStreamHandle {
    event_tx: broadcast::Sender<Arc<BackendEvent>>,
    cancel: CancellationToken,
}

impl EventStreamHandle {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { event_tx, cancel }
    }

    /// A handle whose stream never yields anything (used by backends that
    /// cannot push, such as the command-line tool).
    pub fn silent() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Get a new receiver. Slow consumers observe
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BackendEvent>> {
        self.event_tx.subscribe()
    }

    pub(crate) fn publish(&self, event: BackendEvent) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.event_tx.send(Arc::new(event));
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop any background listener feeding this stream.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for EventStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamHandle")
            .field("receivers", &self.event_tx.receiver_count())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_every_subscriber() {
        let handle = EventStreamHandle::silent();
        let mut a = handle.subscribe();
        let mut b = handle.subscribe();

        handle.publish(BackendEvent::ServiceInitialized);

        assert_eq!(*a.recv().await.unwrap(), BackendEvent::ServiceInitialized);
        assert_eq!(*b.recv().await.unwrap(), BackendEvent::ServiceInitialized);
    }

    #[test]
    fn shutdown_cancels_shared_token() {
        let handle = EventStreamHandle::silent();
        let clone = handle.clone();
        handle.shutdown();
        assert!(clone.cancel_token().is_cancelled());
    }
}

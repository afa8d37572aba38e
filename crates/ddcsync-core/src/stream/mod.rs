// ── Reactive monitor stream ──
//
// Subscription type for consuming monitor-list changes from the store.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::MonitorState;

/// Ordered monitor list as observers see it.
pub type MonitorSnapshot = Arc<Vec<Arc<MonitorState>>>;

/// A subscription to the monitor list.
///
/// The list changes only when monitors come or go or a descriptor is
/// replaced. Feature values change in place inside each `MonitorState`;
/// watch `StoreEvent::FeatureChanged` for those.
pub struct MonitorStream {
    current: MonitorSnapshot,
    receiver: watch::Receiver<MonitorSnapshot>,
}

impl MonitorStream {
    pub(crate) fn new(receiver: watch::Receiver<MonitorSnapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation, or at the last `changed()`.
    pub fn current(&self) -> &MonitorSnapshot {
        &self.current
    }

    pub fn latest(&self) -> MonitorSnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the engine is gone.
    pub async fn changed(&mut self) -> Option<MonitorSnapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    pub fn into_stream(self) -> MonitorWatchStream {
        MonitorWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding a snapshot per change (the first item is the
/// snapshot at conversion time).
pub struct MonitorWatchStream {
    inner: WatchStream<MonitorSnapshot>,
}

impl Stream for MonitorWatchStream {
    type Item = MonitorSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures_util::StreamExt;

    use super::*;
    use crate::model::{Edid, MonitorDescriptor};

    fn state(edid: &str) -> Arc<MonitorState> {
        Arc::new(MonitorState::new(MonitorDescriptor {
            display_number: 1,
            edid: Edid::new(edid),
            manufacturer: None,
            model: None,
            serial: None,
            bus: None,
            address: None,
            attributes: BTreeMap::new(),
        }))
    }

    #[tokio::test]
    async fn changed_updates_current() {
        let (tx, rx) = watch::channel::<MonitorSnapshot>(Arc::new(Vec::new()));
        let mut stream = MonitorStream::new(rx);
        assert!(stream.current().is_empty());

        tx.send_replace(Arc::new(vec![state("a")]));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.current()[0].edid().as_str(), "a");
    }

    #[tokio::test]
    async fn stream_ends_when_sender_drops() {
        let (tx, rx) = watch::channel::<MonitorSnapshot>(Arc::new(Vec::new()));
        let mut stream = MonitorStream::new(rx).into_stream();
        assert!(stream.next().await.is_some());
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}

// ── Monitor state store ──
//
// Authoritative in-memory model of every monitor and feature value.
// Only the engine loop mutates it (`&mut self`); observers read through a
// cloneable `StoreHandle` and never block the loop.

mod refresh;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::model::{Edid, FeatureValue, MonitorState};
use crate::stream::{MonitorSnapshot, MonitorStream};

pub use refresh::{DetectionOutcome, RefreshKind};
pub(crate) use refresh::{fetch_detection, fetch_values};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notification for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// The monitor list or a descriptor changed. Sent once per batch.
    MonitorsChanged,
    /// One feature value changed.
    FeatureChanged {
        display_number: i32,
        edid: Edid,
        code: u8,
    },
    /// A backend call failed; existing state was left alone.
    Error { message: String },
}

pub struct StateStore {
    monitors: IndexMap<Edid, Arc<MonitorState>>,
    snapshot: watch::Sender<MonitorSnapshot>,
    event_tx: broadcast::Sender<StoreEvent>,
    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (last_full_refresh, _) = watch::channel(None);
        Self {
            monitors: IndexMap::new(),
            snapshot,
            event_tx,
            last_full_refresh,
        }
    }

    /// Read-only handle for observers.
    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            monitors: self.snapshot.subscribe(),
            event_tx: self.event_tx.clone(),
            last_full_refresh: self.last_full_refresh.subscribe(),
        }
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn monitor(&self, edid: &str) -> Option<Arc<MonitorState>> {
        self.monitors.get(edid).cloned()
    }

    pub fn monitors(&self) -> impl Iterator<Item = &Arc<MonitorState>> {
        self.monitors.values()
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn contains(&self, edid: &str) -> bool {
        self.monitors.contains_key(edid)
    }

    pub fn current_value(&self, edid: &str, code: u8) -> Option<FeatureValue> {
        self.monitors.get(edid)?.value(code)
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    // ── Notification ─────────────────────────────────────────────────

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn emit_error(&self, message: impl Into<String>) {
        self.emit(StoreEvent::Error {
            message: message.into(),
        });
    }

    fn publish_snapshot(&self) {
        let snap: Vec<_> = self.monitors.values().cloned().collect();
        self.snapshot.send_replace(Arc::new(snap));
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("monitors", &self.monitors.len())
            .field("last_full_refresh", &self.last_full_refresh())
            .finish_non_exhaustive()
    }
}

// ── StoreHandle ──────────────────────────────────────────────────────

/// Cloneable, read-only view of the store.
#[derive(Clone)]
pub struct StoreHandle {
    monitors: watch::Receiver<MonitorSnapshot>,
    event_tx: broadcast::Sender<StoreEvent>,
    last_full_refresh: watch::Receiver<Option<DateTime<Utc>>>,
}

impl StoreHandle {
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.monitors.borrow().clone()
    }

    pub fn monitor(&self, edid: &str) -> Option<Arc<MonitorState>> {
        self.monitors
            .borrow()
            .iter()
            .find(|m| m.edid().as_str() == edid)
            .cloned()
    }

    pub fn subscribe_monitors(&self) -> MonitorStream {
        MonitorStream::new(self.monitors.clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    /// Wait until a full refresh has completed at least once.
    pub async fn wait_for_first_refresh(&mut self) -> Option<DateTime<Utc>> {
        let stamp = self
            .last_full_refresh
            .wait_for(Option::is_some)
            .await
            .ok()?;
        *stamp
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("monitors", &self.monitors.borrow().len())
            .finish_non_exhaustive()
    }
}

// ── Reconciliation ──
//
// Backend I/O is split from state mutation. `fetch_*` functions talk to
// the connector and run on the engine's worker; `apply_*` methods take
// their results and mutate the store on the engine loop. The async
// `full_refresh`/`light_refresh`/`refresh_values` methods chain the two
// for callers that own both.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, info, trace, warn};

use ddcsync_api::Reading;

use super::{StateStore, StoreEvent};
use crate::catalog;
use crate::connector::ServiceConnector;
use crate::error::CoreError;
use crate::model::{Edid, FeatureDefinition, FeatureValue, MonitorDescriptor, MonitorState};

/// Which reconciliation a connectivity event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RefreshKind {
    Light,
    Full,
}

impl RefreshKind {
    /// Event kind 0 is a listing change; anything else is a hotplug.
    pub fn for_event(event_kind: i32) -> Self {
        if event_kind == 0 { Self::Light } else { Self::Full }
    }
}

/// Everything fetched for a monitor seen for the first time, or retried
/// after its capability fetch failed.
#[derive(Debug, Default)]
pub(crate) struct FreshMonitor {
    capabilities: BTreeMap<u8, FeatureDefinition>,
    values: BTreeMap<u8, Reading>,
    capability_error: Option<String>,
    value_error: Option<String>,
}

/// Result of a detection pass, ready to apply.
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    detected: Vec<MonitorDescriptor>,
    fresh: HashMap<Edid, FreshMonitor>,
}

impl DetectionOutcome {
    pub fn detected(&self) -> &[MonitorDescriptor] {
        &self.detected
    }
}

// ── Fetching (worker side) ───────────────────────────────────────────

/// Detect, then fetch capabilities and values for edids not in `settled`.
pub(crate) async fn fetch_detection(
    connector: &ServiceConnector,
    settled: &HashSet<Edid>,
) -> Result<DetectionOutcome, CoreError> {
    let detected = connector.detect().await?;
    let mut fresh = HashMap::new();
    for descriptor in &detected {
        if settled.contains(&descriptor.edid) || fresh.contains_key(&descriptor.edid) {
            continue;
        }
        let monitor = fetch_monitor(connector, descriptor).await;
        fresh.insert(descriptor.edid.clone(), monitor);
    }
    Ok(DetectionOutcome { detected, fresh })
}

async fn fetch_monitor(connector: &ServiceConnector, descriptor: &MonitorDescriptor) -> FreshMonitor {
    let capabilities = match connector.get_capabilities(descriptor).await {
        Ok(caps) => caps,
        Err(e) => {
            warn!(edid = %descriptor.edid, error = %e, "capability fetch failed");
            return FreshMonitor {
                capability_error: Some(e.to_string()),
                ..FreshMonitor::default()
            };
        }
    };

    let codes: Vec<u8> = capabilities.keys().copied().collect();
    let (values, value_error) = match connector.get_values(descriptor, &codes).await {
        Ok(values) => (values, None),
        Err(e) => {
            warn!(edid = %descriptor.edid, error = %e, "initial value read failed");
            (BTreeMap::new(), Some(e.to_string()))
        }
    };
    FreshMonitor {
        capabilities,
        values,
        capability_error: None,
        value_error,
    }
}

pub(crate) async fn fetch_values(
    connector: &ServiceConnector,
    descriptor: &MonitorDescriptor,
    codes: &[u8],
) -> Result<BTreeMap<u8, Reading>, CoreError> {
    connector.get_values(descriptor, codes).await
}

// ── Applying (loop side) ─────────────────────────────────────────────

impl StateStore {
    /// Known monitors whose capabilities were fetched successfully. The
    /// rest get another capability fetch on the next detection.
    pub(crate) fn settled_edids(&self) -> HashSet<Edid> {
        self.monitors
            .iter()
            .filter(|(_, state)| state.capability_error().is_none())
            .map(|(edid, _)| edid.clone())
            .collect()
    }

    /// Apply a detection pass.
    ///
    /// Known monitors keep their `MonitorState` (only the descriptor is
    /// replaced, plus capabilities when a failed fetch was retried), new
    /// ones are created from the fetched data, unreported ones are dropped. Emits exactly one `MonitorsChanged`. On error the
    /// state is untouched and an `Error` is emitted instead.
    pub(crate) fn apply_full_refresh(&mut self, result: Result<DetectionOutcome, CoreError>) -> bool {
        let DetectionOutcome {
            detected,
            mut fresh,
        } = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "full refresh failed");
                self.emit_error(format!("Detection failed: {e}"));
                return false;
            }
        };

        let mut next: IndexMap<Edid, Arc<MonitorState>> = IndexMap::with_capacity(detected.len());
        let mut errors = Vec::new();
        for descriptor in detected {
            let edid = descriptor.edid.clone();
            if next.contains_key(&edid) {
                debug!(edid = %edid, "duplicate edid in detection, keeping first");
                continue;
            }
            let label = descriptor.label();
            let retried = fresh.remove(&edid);
            if let Some(monitor) = &retried {
                if let Some(e) = &monitor.capability_error {
                    errors.push(format!("Capabilities for {label}: {e}"));
                }
                if let Some(e) = &monitor.value_error {
                    errors.push(format!("Reading values for {label}: {e}"));
                }
            }
            let state = if let Some(existing) = self.monitors.get(&edid) {
                existing.replace_descriptor(descriptor);
                if let Some(monitor) = retried {
                    if monitor.capability_error.is_none() {
                        info!(edid = %edid, monitor = %label, "capabilities recovered");
                    }
                    populate(existing, monitor);
                }
                Arc::clone(existing)
            } else {
                let state = MonitorState::new(descriptor);
                if let Some(monitor) = retried {
                    populate(&state, monitor);
                }
                info!(edid = %edid, monitor = %label, "monitor added");
                Arc::new(state)
            };
            next.insert(edid, state);
        }

        for edid in self.monitors.keys().filter(|e| !next.contains_key(*e)) {
            info!(edid = %edid, "monitor removed");
        }
        self.monitors = next;
        self.publish_snapshot();
        self.last_full_refresh.send_replace(Some(Utc::now()));
        self.emit(StoreEvent::MonitorsChanged);
        for message in errors {
            self.emit_error(message);
        }
        true
    }

    /// Update descriptors of known monitors. Never adds or removes.
    pub(crate) fn apply_light_refresh(
        &mut self,
        result: Result<Vec<MonitorDescriptor>, CoreError>,
    ) -> bool {
        let listed = match result {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "light refresh failed");
                self.emit_error(format!("Listing failed: {e}"));
                return false;
            }
        };

        let mut changed = false;
        for descriptor in listed {
            match self.monitors.get(&descriptor.edid) {
                Some(state) if *state.descriptor() != descriptor => {
                    changed |= state.replace_descriptor(descriptor);
                }
                Some(_) => {}
                None => debug!(edid = %descriptor.edid, "listing reported an unknown monitor"),
            }
        }
        if changed {
            self.publish_snapshot();
            self.emit(StoreEvent::MonitorsChanged);
        }
        changed
    }

    /// Apply a push notification. Unknown monitors are ignored.
    pub fn apply_pushed_value(
        &mut self,
        edid: &str,
        code: u8,
        new_value: u16,
        source_context: &str,
    ) -> bool {
        let Some(state) = self.monitors.get(edid) else {
            trace!(edid, code, "push for unknown monitor ignored");
            return false;
        };
        trace!(edid, code, new_value, source_context, "applying pushed value");
        upsert_value(state, code, new_value);
        self.emit(StoreEvent::FeatureChanged {
            display_number: state.display_number(),
            edid: state.edid().clone(),
            code,
        });
        true
    }

    /// Optimistic local update after a write was issued.
    pub(crate) fn set_local_value(&mut self, edid: &str, code: u8, value: u16) -> Option<FeatureValue> {
        let state = self.monitors.get(edid)?;
        let (stored, changed) = upsert_value(state, code, value);
        if changed {
            self.emit(StoreEvent::FeatureChanged {
                display_number: state.display_number(),
                edid: state.edid().clone(),
                code,
            });
        }
        Some(stored)
    }

    /// Apply freshly read values for one monitor. Returns how many changed.
    pub(crate) fn apply_values(
        &mut self,
        edid: &str,
        result: Result<BTreeMap<u8, Reading>, CoreError>,
    ) -> usize {
        let readings = match result {
            Ok(readings) => readings,
            Err(e) => {
                warn!(edid, error = %e, "value refresh failed");
                self.emit_error(format!("Reading values for {edid}: {e}"));
                return 0;
            }
        };
        let Some(state) = self.monitors.get(edid) else {
            return 0;
        };

        let mut changed = Vec::new();
        for (code, reading) in readings {
            if put_reading(state, code, reading) {
                changed.push(code);
            }
        }
        let count = changed.len();
        for code in changed {
            self.emit(StoreEvent::FeatureChanged {
                display_number: state.display_number(),
                edid: state.edid().clone(),
                code,
            });
        }
        count
    }

    // ── Direct reconciliation ────────────────────────────────────────

    pub async fn full_refresh(&mut self, connector: &ServiceConnector) -> bool {
        let settled = self.settled_edids();
        let result = fetch_detection(connector, &settled).await;
        self.apply_full_refresh(result)
    }

    pub async fn light_refresh(&mut self, connector: &ServiceConnector) -> bool {
        let result = connector.list_detected().await;
        self.apply_light_refresh(result)
    }

    /// Re-read every capability value of one monitor.
    pub async fn refresh_values(&mut self, connector: &ServiceConnector, edid: &str) -> usize {
        let Some(state) = self.monitor(edid) else {
            return 0;
        };
        let result = fetch_values(connector, &state.descriptor(), &state.capability_codes()).await;
        self.apply_values(edid, result)
    }

    /// React to a hotplug/listing notification.
    pub async fn apply_connectivity_event(
        &mut self,
        connector: &ServiceConnector,
        edid: &str,
        event_kind: i32,
        flags: i32,
    ) -> RefreshKind {
        let kind = RefreshKind::for_event(event_kind);
        debug!(edid, event_kind, flags, refresh = %kind, "connectivity event");
        match kind {
            RefreshKind::Light => self.light_refresh(connector).await,
            RefreshKind::Full => self.full_refresh(connector).await,
        };
        kind
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn populate(state: &MonitorState, monitor: FreshMonitor) {
    for definition in monitor.capabilities.into_values() {
        state.insert_capability(definition);
    }
    for (code, reading) in monitor.values {
        put_reading(state, code, reading);
    }
    state.set_capability_error(monitor.capability_error);
}

/// Store a backend reading. A reported maximum below the current value is
/// raised to it.
fn put_reading(state: &MonitorState, code: u8, reading: Reading) -> bool {
    let Some(definition) = state.capability(code) else {
        trace!(edid = %state.edid(), code, "reading for a code without capability dropped");
        return false;
    };
    let maximum = reading
        .maximum
        .or_else(|| state.value(code).map(|v| v.maximum))
        .or(definition.maximum)
        .unwrap_or(reading.current)
        .max(reading.current);
    state.put_value(FeatureValue::new(code, reading.current, maximum, Some(definition)))
}

/// Write `value` into a monitor, creating a catalog (or generic) capability
/// when the code was never reported.
fn upsert_value(state: &MonitorState, code: u8, value: u16) -> (FeatureValue, bool) {
    let definition = state.capability(code).unwrap_or_else(|| {
        state.insert_capability(
            catalog::definition_for(code)
                .cloned()
                .unwrap_or_else(|| FeatureDefinition::generic(code)),
        )
    });
    let existing = state.value(code);
    let maximum = provisional_maximum(existing.as_ref(), &definition, value);
    let stored = FeatureValue::new(code, value, maximum, Some(definition));
    let changed = state.put_value(stored.clone());
    (stored, changed)
}

/// Known maximum, else capability metadata, else the catalog, else the
/// value itself.
fn provisional_maximum(existing: Option<&FeatureValue>, definition: &FeatureDefinition, value: u16) -> u16 {
    existing
        .map(|v| v.maximum)
        .or(definition.maximum)
        .or_else(|| catalog::definition_for(definition.code).and_then(|d| d.maximum))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ddcsync_api::SimulatedBackend;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::config::EngineConfig;

    fn setup() -> (Arc<SimulatedBackend>, ServiceConnector) {
        let sim = Arc::new(SimulatedBackend::new());
        let connector = ServiceConnector::simulated(Arc::clone(&sim), &EngineConfig::default());
        (sim, connector)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
    }

    #[test]
    fn event_kind_zero_is_light() {
        assert_eq!(RefreshKind::for_event(0), RefreshKind::Light);
        assert_eq!(RefreshKind::for_event(1), RefreshKind::Full);
        assert_eq!(RefreshKind::for_event(-1), RefreshKind::Full);
    }

    #[tokio::test]
    async fn full_refresh_populates_monitors_in_detection_order() {
        let (_sim, connector) = setup();
        let mut store = StateStore::new();
        let mut rx = store.handle().subscribe_events();

        assert!(store.full_refresh(&connector).await);
        let edids: Vec<_> = store.monitors().map(|m| m.edid().to_string()).collect();
        assert_eq!(edids, ["MOCK-MockView-01", "MOCK-ColorPro-02", "MOCK-UltraWide-03"]);

        let first = store.monitor("MOCK-MockView-01").unwrap();
        let brightness = first.value(0x10).unwrap();
        assert_eq!((brightness.current, brightness.maximum), (40, 100));
        assert_eq!(brightness.default_value, Some(50));
        assert!(store.last_full_refresh().is_some());
        assert_eq!(drain(&mut rx), [StoreEvent::MonitorsChanged]);
    }

    #[tokio::test]
    async fn full_refresh_preserves_identity_and_replaces_descriptor() {
        let (sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;
        let before = store.monitor("MOCK-ColorPro-02").unwrap();

        sim.update_record("MOCK-ColorPro-02", |r| r.display_number = 7);
        store.full_refresh(&connector).await;
        let after = store.monitor("MOCK-ColorPro-02").unwrap();

        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(before.display_number(), 7);
    }

    #[tokio::test]
    async fn full_refresh_drops_unreported_monitors() {
        let (sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;
        let handle = store.handle();

        sim.detach("MOCK-MockView-01");
        store.full_refresh(&connector).await;
        assert_eq!(store.len(), 2);
        assert!(!store.contains("MOCK-MockView-01"));
        assert_eq!(handle.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn failed_detection_leaves_state_untouched() {
        let (_sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;
        let mut rx = store.handle().subscribe_events();

        let applied = store.apply_full_refresh(Err(CoreError::BackendUnavailable {
            reason: "gone".into(),
        }));
        assert!(!applied);
        assert_eq!(store.len(), 3);
        assert!(matches!(drain(&mut rx).as_slice(), [StoreEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn rescan_retries_failed_capability_fetch_in_place() {
        let (_sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;
        let before = store.monitor("MOCK-ColorPro-02").unwrap();
        before.set_capability_error(Some("timed out".into()));
        assert!(!store.settled_edids().contains(&Edid::new("MOCK-ColorPro-02")));
        let mut rx = store.handle().subscribe_events();

        assert!(store.full_refresh(&connector).await);
        let after = store.monitor("MOCK-ColorPro-02").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.capability_error().is_none());
        assert_eq!(after.capability_codes().len(), 5);
        assert_eq!(drain(&mut rx), [StoreEvent::MonitorsChanged]);
    }

    #[tokio::test]
    async fn light_refresh_never_adds_or_removes() {
        let (sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;

        let extra = sim.detach("MOCK-UltraWide-03").unwrap();
        sim.update_record("MOCK-MockView-01", |r| r.model = Some("Renamed".into()));
        assert!(store.light_refresh(&connector).await);
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.monitor("MOCK-MockView-01").unwrap().descriptor().model.as_deref(),
            Some("Renamed")
        );

        let mut renamed = extra;
        renamed.record.edid = "MOCK-New-09".into();
        sim.attach(renamed);
        store.light_refresh(&connector).await;
        assert!(!store.contains("MOCK-New-09"));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn push_for_unknown_monitor_is_a_no_op() {
        let (_sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;
        let mut rx = store.handle().subscribe_events();

        assert!(!store.apply_pushed_value("nobody", 0x10, 5, "other"));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn push_updates_only_current_and_emits_once() {
        let (_sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;
        let mut rx = store.handle().subscribe_events();

        assert!(store.apply_pushed_value("MOCK-MockView-01", 0x12, 65, "other"));
        let value = store.current_value("MOCK-MockView-01", 0x12).unwrap();
        assert_eq!((value.current, value.maximum), (65, 100));
        assert_eq!(
            drain(&mut rx),
            [StoreEvent::FeatureChanged {
                display_number: 1,
                edid: Edid::new("MOCK-MockView-01"),
                code: 0x12,
            }]
        );
    }

    #[tokio::test]
    async fn push_for_unreported_code_uses_catalog_maximum() {
        let (_sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;

        store.apply_pushed_value("MOCK-MockView-01", 0x16, 300, "other");
        let value = store.current_value("MOCK-MockView-01", 0x16).unwrap();
        assert_eq!((value.current, value.maximum), (255, 255));

        store.apply_pushed_value("MOCK-MockView-01", 0xF3, 9, "other");
        let value = store.current_value("MOCK-MockView-01", 0xF3).unwrap();
        assert_eq!((value.current, value.maximum), (9, 9));
        assert!(store.monitor("MOCK-MockView-01").unwrap().capability(0xF3).is_some());
    }

    #[tokio::test]
    async fn refresh_values_picks_up_external_changes() {
        let (sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;

        let display = sim.detect()[2].address();
        sim.write_value(&display, 0x62, 80, "elsewhere").unwrap();
        assert_eq!(store.refresh_values(&connector, "MOCK-UltraWide-03").await, 1);
        assert_eq!(store.current_value("MOCK-UltraWide-03", 0x62).unwrap().current, 80);
    }

    #[tokio::test]
    async fn connectivity_event_dispatches_by_kind() {
        let (sim, connector) = setup();
        let mut store = StateStore::new();
        store.full_refresh(&connector).await;
        sim.detach("MOCK-ColorPro-02");

        let kind = store.apply_connectivity_event(&connector, "MOCK-ColorPro-02", 0, 0).await;
        assert_eq!(kind, RefreshKind::Light);
        assert_eq!(store.len(), 3);

        let kind = store.apply_connectivity_event(&connector, "MOCK-ColorPro-02", 1, 0).await;
        assert_eq!(kind, RefreshKind::Full);
        assert_eq!(store.len(), 2);
    }
}

// ── Monitor domain types ──

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::feature::{FeatureDefinition, FeatureValue};
use super::identity::Edid;

/// Identity and descriptive fields of a detected monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorDescriptor {
    /// Backend-assigned, changes between detections.
    pub display_number: i32,
    pub edid: Edid,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub bus: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl MonitorDescriptor {
    /// Human-friendly label: model, plus serial when known.
    pub fn label(&self) -> String {
        let mut label = self.model.clone().unwrap_or_else(|| "Display".into());
        if let Some(serial) = &self.serial {
            label.push_str(" · ");
            label.push_str(serial);
        }
        label
    }
}

/// Live state of one monitor.
///
/// Shared with observers as `Arc<MonitorState>`. The engine mutates the
/// maps in place, so a handle stays valid for as long as the monitor is
/// reported. The EDID never changes after creation.
pub struct MonitorState {
    edid: Edid,
    descriptor: ArcSwap<MonitorDescriptor>,
    capabilities: DashMap<u8, Arc<FeatureDefinition>>,
    values: DashMap<u8, FeatureValue>,
    capability_error: ArcSwapOption<String>,
}

impl MonitorState {
    pub(crate) fn new(descriptor: MonitorDescriptor) -> Self {
        Self {
            edid: descriptor.edid.clone(),
            descriptor: ArcSwap::from_pointee(descriptor),
            capabilities: DashMap::new(),
            values: DashMap::new(),
            capability_error: ArcSwapOption::empty(),
        }
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn edid(&self) -> &Edid {
        &self.edid
    }

    pub fn descriptor(&self) -> Arc<MonitorDescriptor> {
        self.descriptor.load_full()
    }

    pub fn display_number(&self) -> i32 {
        self.descriptor.load().display_number
    }

    pub fn capability(&self, code: u8) -> Option<Arc<FeatureDefinition>> {
        self.capabilities.get(&code).map(|r| Arc::clone(r.value()))
    }

    /// All capabilities, ordered by code.
    pub fn capabilities(&self) -> Vec<Arc<FeatureDefinition>> {
        let mut caps: Vec<_> = self
            .capabilities
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        caps.sort_by_key(|d| d.code);
        caps
    }

    pub fn capability_codes(&self) -> Vec<u8> {
        let mut codes: Vec<u8> = self.capabilities.iter().map(|r| *r.key()).collect();
        codes.sort_unstable();
        codes
    }

    pub fn value(&self, code: u8) -> Option<FeatureValue> {
        self.values.get(&code).map(|r| r.value().clone())
    }

    /// All values, ordered by code.
    pub fn values(&self) -> Vec<FeatureValue> {
        let mut values: Vec<_> = self.values.iter().map(|r| r.value().clone()).collect();
        values.sort_by_key(|v| v.code);
        values
    }

    /// Set when fetching capabilities failed; the UI shows it inline.
    pub fn capability_error(&self) -> Option<Arc<String>> {
        self.capability_error.load_full()
    }

    /// Whether "reset to default" can produce a target value.
    pub fn can_reset(&self, code: u8) -> bool {
        let definition = self.capability(code);
        let writable = definition.as_ref().is_none_or(|d| d.writable);
        let has_target = definition
            .as_ref()
            .is_some_and(|d| d.default_value.is_some() || d.maximum.is_some())
            || self.values.contains_key(&code);
        writable && has_target
    }

    // ── Mutators (engine only) ───────────────────────────────────────

    /// Swap in a newer descriptor for the same monitor.
    pub(crate) fn replace_descriptor(&self, descriptor: MonitorDescriptor) -> bool {
        if descriptor.edid != self.edid {
            tracing::warn!(
                expected = %self.edid,
                got = %descriptor.edid,
                "refusing descriptor for a different monitor"
            );
            return false;
        }
        self.descriptor.store(Arc::new(descriptor));
        true
    }

    pub(crate) fn insert_capability(&self, definition: FeatureDefinition) -> Arc<FeatureDefinition> {
        let definition = Arc::new(definition);
        self.capabilities
            .insert(definition.code, Arc::clone(&definition));
        definition
    }

    /// Store a value. The capability must already exist.
    pub(crate) fn put_value(&self, value: FeatureValue) -> bool {
        if !self.capabilities.contains_key(&value.code) {
            return false;
        }
        let changed = self
            .values
            .get(&value.code)
            .is_none_or(|old| old.current != value.current || old.maximum != value.maximum);
        self.values.insert(value.code, value);
        changed
    }

    pub(crate) fn set_capability_error(&self, error: Option<String>) {
        self.capability_error.store(error.map(Arc::new));
    }
}

impl std::fmt::Debug for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorState")
            .field("edid", &self.edid)
            .field("display_number", &self.display_number())
            .field("capabilities", &self.capabilities.len())
            .field("values", &self.values.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(edid: &str, model: &str) -> MonitorDescriptor {
        MonitorDescriptor {
            display_number: 1,
            edid: Edid::new(edid),
            manufacturer: None,
            model: Some(model.into()),
            serial: None,
            bus: None,
            address: None,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn values_require_a_capability() {
        let state = MonitorState::new(descriptor("e1", "A"));
        assert!(!state.put_value(FeatureValue::new(0x10, 5, 100, None)));
        assert!(state.value(0x10).is_none());

        let def = state.insert_capability(FeatureDefinition::generic(0x10));
        assert!(state.put_value(FeatureValue::new(0x10, 5, 100, Some(def))));
        assert_eq!(state.value(0x10).map(|v| v.current), Some(5));
    }

    #[test]
    fn descriptor_for_other_edid_is_refused() {
        let state = MonitorState::new(descriptor("e1", "A"));
        assert!(!state.replace_descriptor(descriptor("e2", "B")));
        assert!(state.replace_descriptor(descriptor("e1", "B")));
        assert_eq!(state.descriptor().model.as_deref(), Some("B"));
        assert_eq!(state.edid().as_str(), "e1");
    }

    #[test]
    fn unchanged_value_reports_no_change() {
        let state = MonitorState::new(descriptor("e1", "A"));
        let def = state.insert_capability(FeatureDefinition::generic(0x12));
        assert!(state.put_value(FeatureValue::new(0x12, 5, 100, Some(Arc::clone(&def)))));
        assert!(!state.put_value(FeatureValue::new(0x12, 5, 100, Some(def))));
    }

    #[test]
    fn label_includes_serial() {
        let mut d = descriptor("e1", "U2720Q");
        assert_eq!(d.label(), "U2720Q");
        d.serial = Some("SN1".into());
        assert_eq!(d.label(), "U2720Q · SN1");
    }
}

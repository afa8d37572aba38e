// ── Write coordination ──
//
// Debounces user-driven writes per (monitor, feature). Holds no timers of
// its own: the engine loop sleeps until `next_deadline()` and collects
// whatever `take_due()` returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::CoreError;
use crate::model::{Edid, FeatureKind, MonitorState, midpoint};
use crate::store::StateStore;

#[derive(Debug, Clone, Copy)]
struct Pending {
    value: u16,
    deadline: Instant,
}

/// A settled write, ready to go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueWrite {
    pub edid: Edid,
    pub code: u8,
    pub value: u16,
}

#[derive(Debug)]
pub struct WriteCoordinator {
    debounce: Duration,
    pending: HashMap<(Edid, u8), Pending>,
}

impl WriteCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashMap::new(),
        }
    }

    /// Record a request. Replaces any pending value for the same pair and
    /// restarts its settling window. Returns the new deadline.
    pub fn request(&mut self, edid: Edid, code: u8, value: u16, now: Instant) -> Instant {
        let deadline = now + self.debounce;
        self.pending.insert((edid, code), Pending { value, deadline });
        deadline
    }

    /// Drop a pending write. Returns the value it would have written.
    pub fn cancel(&mut self, edid: &Edid, code: u8) -> Option<u16> {
        self.pending.remove(&(edid.clone(), code)).map(|p| p.value)
    }

    pub fn pending_value(&self, edid: &Edid, code: u8) -> Option<u16> {
        self.pending.get(&(edid.clone(), code)).map(|p| p.value)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every entry whose window has elapsed, oldest
    /// deadline first.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueWrite> {
        let mut due: Vec<((Edid, u8), Pending)> = Vec::new();
        self.pending.retain(|key, pending| {
            if pending.deadline <= now {
                due.push((key.clone(), *pending));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(_, p)| p.deadline);
        due.into_iter()
            .map(|((edid, code), p)| DueWrite {
                edid,
                code,
                value: p.value,
            })
            .collect()
    }
}

// ── Validation against the store ─────────────────────────────────────

/// Check a write request can be accepted at all.
pub fn validate_request(
    store: &StateStore,
    edid: &str,
    code: u8,
) -> Result<Arc<MonitorState>, CoreError> {
    let state = store.monitor(edid).ok_or_else(|| CoreError::UnknownMonitor {
        identifier: edid.to_owned(),
    })?;
    match state.capability(code) {
        Some(definition) if !definition.writable => Err(CoreError::ReadOnly { code }),
        _ => Ok(state),
    }
}

/// Bring a requested value into the feature's bounds.
///
/// Range values are clamped into `[minimum, maximum]`, so the value sent
/// is the value the store shows. A choice feature only accepts values it
/// lists.
pub fn accept_value(state: &MonitorState, code: u8, value: u16) -> Result<u16, CoreError> {
    let Some(definition) = state.capability(code) else {
        return Ok(value);
    };
    if definition.kind == FeatureKind::Choice && !definition.choices.is_empty() {
        if definition.choices.contains_key(&value) {
            return Ok(value);
        }
        let listed: Vec<String> = definition.choices.keys().map(|v| format!("0x{v:02X}")).collect();
        return Err(CoreError::InvalidValue {
            code,
            value,
            reason: format!("expected one of {}", listed.join(", ")),
        });
    }

    let minimum = definition.minimum;
    let Some(maximum) = state
        .value(code)
        .map(|v| v.maximum)
        .or(definition.maximum)
    else {
        return Ok(value.max(minimum));
    };
    Ok(value.clamp(minimum, maximum.max(minimum)))
}

/// The value "reset to default" writes: the reported default, else the
/// midpoint of the known range.
pub fn reset_target(store: &StateStore, edid: &str, code: u8) -> Result<u16, CoreError> {
    let state = validate_request(store, edid, code)?;
    let definition = state.capability(code);
    let value = state.value(code);

    let default_value = definition
        .as_ref()
        .and_then(|d| d.default_value)
        .or_else(|| value.as_ref().and_then(|v| v.default_value));
    if let Some(default_value) = default_value {
        return Ok(default_value);
    }

    let minimum = definition.as_ref().map_or(0, |d| d.minimum);
    let maximum = value
        .as_ref()
        .map(|v| v.maximum)
        .or_else(|| definition.as_ref().and_then(|d| d.maximum))
        .ok_or(CoreError::NoDefault { code })?;
    Ok(midpoint(minimum, maximum))
}

/// A settled write is skipped when the store already holds its value.
pub fn needs_write(store: &StateStore, write: &DueWrite) -> bool {
    store
        .current_value(write.edid.as_str(), write.code)
        .is_none_or(|v| v.current != write.value)
}

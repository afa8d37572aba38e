// ── Wire-level data types ──
//
// Shapes shared by every backend. These mirror what the backends report,
// not the domain model; `ddcsync-core` converts them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One detected display as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayRecord {
    pub display_number: i32,
    /// Opaque identity string, stable per physical monitor.
    pub edid: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub bus: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Every field the backend reported, including the ones above.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl DisplayRecord {
    /// The addressing triple needed for per-display calls.
    pub fn address(&self) -> DisplayAddress {
        DisplayAddress {
            display_number: self.display_number,
            edid: self.edid.clone(),
            bus: self.bus.clone(),
        }
    }
}

/// What a backend needs to route a per-display call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayAddress {
    pub display_number: i32,
    pub edid: String,
    /// I2C bus number, when known (used by the command-line backend).
    pub bus: Option<String>,
}

/// A decoded `(current, maximum?)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub current: u16,
    pub maximum: Option<u16>,
}

impl Reading {
    pub fn new(current: u16, maximum: Option<u16>) -> Self {
        Self { current, maximum }
    }
}

/// A feature code reported by capability listing, with any metadata the
/// backend attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFeature {
    pub code: u8,
    #[serde(default)]
    pub metadata: Option<FeatureMetadata>,
}

impl WireFeature {
    pub fn bare(code: u8) -> Self {
        Self {
            code,
            metadata: None,
        }
    }
}

/// Backend-supplied feature metadata. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub complex: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub write_only: bool,
    #[serde(default)]
    pub minimum: Option<u16>,
    #[serde(default)]
    pub maximum: Option<u16>,
    #[serde(default)]
    pub default_value: Option<u16>,
    #[serde(default)]
    pub choices: BTreeMap<u16, String>,
}

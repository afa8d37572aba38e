// ── Feature domain types ──

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// How a feature's value is interpreted and edited.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeatureKind {
    /// Continuous value between minimum and maximum.
    Range,
    /// One of an enumerated set of values.
    Choice,
    /// On/off.
    Flag,
    /// Opaque number with no known interpretation.
    RawValue,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FeatureCategory {
    Luminance,
    Color,
    Picture,
    Audio,
    Power,
    Other,
}

/// Static or backend-reported description of one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    pub code: u8,
    pub name: String,
    pub description: String,
    pub category: FeatureCategory,
    pub kind: FeatureKind,
    pub minimum: u16,
    pub maximum: Option<u16>,
    pub writable: bool,
    /// Non-empty only for [`FeatureKind::Choice`].
    pub choices: BTreeMap<u16, String>,
    pub default_value: Option<u16>,
}

impl FeatureDefinition {
    /// A definition for a code nothing is known about.
    pub fn generic(code: u8) -> Self {
        Self {
            code,
            name: format!("VCP 0x{code:02X}"),
            description: String::new(),
            category: FeatureCategory::Other,
            kind: FeatureKind::RawValue,
            minimum: 0,
            maximum: None,
            writable: true,
            choices: BTreeMap::new(),
            default_value: None,
        }
    }
}

/// The last known value of one feature on one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureValue {
    pub code: u8,
    pub current: u16,
    /// Authoritative upper bound.
    pub maximum: u16,
    #[serde(skip)]
    pub definition: Option<Arc<FeatureDefinition>>,
    pub default_value: Option<u16>,
}

impl FeatureValue {
    /// Build a value, clamping `current` into `[definition.minimum, maximum]`.
    pub fn new(
        code: u8,
        current: u16,
        maximum: u16,
        definition: Option<Arc<FeatureDefinition>>,
    ) -> Self {
        let minimum = definition.as_ref().map_or(0, |d| d.minimum);
        let maximum = maximum.max(minimum);
        let default_value = definition.as_ref().and_then(|d| d.default_value);
        Self {
            code,
            current: current.clamp(minimum, maximum),
            maximum,
            definition,
            default_value,
        }
    }

    pub fn minimum(&self) -> u16 {
        self.definition.as_ref().map_or(0, |d| d.minimum)
    }
}

pub(crate) fn midpoint(minimum: u16, maximum: u16) -> u16 {
    let mid = (u32::from(minimum) + u32::from(maximum)) / 2;
    u16::try_from(mid).unwrap_or(maximum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranged(minimum: u16) -> Arc<FeatureDefinition> {
        Arc::new(FeatureDefinition {
            minimum,
            kind: FeatureKind::Range,
            ..FeatureDefinition::generic(0x10)
        })
    }

    #[test]
    fn current_is_clamped_into_range() {
        let v = FeatureValue::new(0x10, 250, 100, None);
        assert_eq!(v.current, 100);
        let v = FeatureValue::new(0x10, 2, 100, Some(ranged(10)));
        assert_eq!(v.current, 10);
    }

    #[test]
    fn maximum_never_drops_below_minimum() {
        let v = FeatureValue::new(0x10, 0, 5, Some(ranged(10)));
        assert_eq!((v.current, v.maximum), (10, 10));
    }

    #[test]
    fn default_is_carried_from_definition() {
        let mut def = (*ranged(0)).clone();
        def.default_value = Some(70);
        let v = FeatureValue::new(0x10, 0, 100, Some(Arc::new(def)));
        assert_eq!(v.default_value, Some(70));
    }

    #[test]
    fn midpoint_does_not_overflow() {
        assert_eq!(midpoint(20, 100), 60);
        assert_eq!(midpoint(u16::MAX - 1, u16::MAX), u16::MAX - 1);
    }

    #[test]
    fn kinds_parse_from_snake_case() {
        assert_eq!("raw_value".parse::<FeatureKind>().unwrap(), FeatureKind::RawValue);
        assert_eq!("Color".parse::<FeatureCategory>().unwrap(), FeatureCategory::Color);
    }
}

// ── Wire-to-domain conversions ──
//
// Bridges ddcsync-api wire types into canonical domain types. Backend
// metadata is layered over the catalog entry for the same code, so a
// feature the backend only names still gets catalog bounds and choices.
// Reported choices replace the catalog's; they are monitor-specific.

use ddcsync_api::{DisplayAddress, DisplayRecord, WireFeature};

use crate::catalog;
use crate::model::{Edid, FeatureDefinition, FeatureKind, MonitorDescriptor};

impl From<DisplayRecord> for MonitorDescriptor {
    fn from(r: DisplayRecord) -> Self {
        Self {
            display_number: r.display_number,
            edid: Edid::from(r.edid),
            manufacturer: r.manufacturer,
            model: r.model,
            serial: r.serial,
            bus: r.bus,
            address: r.address,
            attributes: r.attributes,
        }
    }
}

impl From<&MonitorDescriptor> for DisplayAddress {
    fn from(d: &MonitorDescriptor) -> Self {
        Self {
            display_number: d.display_number,
            edid: d.edid.as_str().to_owned(),
            bus: d.bus.clone(),
        }
    }
}

impl From<WireFeature> for FeatureDefinition {
    fn from(wire: WireFeature) -> Self {
        let mut def = catalog::definition_for(wire.code)
            .cloned()
            .unwrap_or_else(|| FeatureDefinition::generic(wire.code));
        let Some(meta) = wire.metadata else {
            return def;
        };

        if let Some(name) = meta.name.filter(|n| !n.is_empty()) {
            def.name = name;
        }
        if let Some(description) = meta.description.filter(|d| !d.is_empty()) {
            def.description = description;
        }
        if !meta.choices.is_empty() {
            def.kind = FeatureKind::Choice;
            def.choices = meta.choices;
        } else if meta.continuous {
            def.kind = FeatureKind::Range;
        }
        if def.kind != FeatureKind::Choice {
            def.choices.clear();
        }

        def.writable = !meta.read_only;
        if let Some(minimum) = meta.minimum {
            def.minimum = minimum;
        }
        if meta.maximum.is_some() {
            def.maximum = meta.maximum;
        }
        if meta.default_value.is_some() {
            def.default_value = meta.default_value;
        }
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddcsync_api::FeatureMetadata;
    use std::collections::BTreeMap;

    #[test]
    fn bare_code_uses_catalog() {
        let def = FeatureDefinition::from(WireFeature::bare(0x10));
        assert_eq!(def.name, "Brightness");
        assert_eq!(def.maximum, Some(100));
    }

    #[test]
    fn unknown_bare_code_is_generic_raw() {
        let def = FeatureDefinition::from(WireFeature::bare(0xF0));
        assert_eq!(def.kind, FeatureKind::RawValue);
        assert_eq!(def.name, "VCP 0xF0");
    }

    #[test]
    fn metadata_overrides_catalog() {
        let def = FeatureDefinition::from(WireFeature {
            code: 0x10,
            metadata: Some(FeatureMetadata {
                name: Some("Luminance".into()),
                read_only: true,
                maximum: Some(400),
                default_value: Some(200),
                ..FeatureMetadata::default()
            }),
        });
        assert_eq!(def.name, "Luminance");
        assert!(!def.writable);
        assert_eq!(def.maximum, Some(400));
        assert_eq!(def.default_value, Some(200));
        assert_eq!(def.description, "Overall backlight intensity.");
    }

    #[test]
    fn reported_choices_make_a_choice_feature() {
        let def = FeatureDefinition::from(WireFeature {
            code: 0x14,
            metadata: Some(FeatureMetadata {
                choices: BTreeMap::from([(1, "sRGB".to_owned())]),
                ..FeatureMetadata::default()
            }),
        });
        assert_eq!(def.kind, FeatureKind::Choice);
        assert_eq!(def.choices.len(), 1);
    }

    #[test]
    fn reported_choices_replace_catalog_choices() {
        let def = FeatureDefinition::from(WireFeature {
            code: 0x60,
            metadata: Some(FeatureMetadata {
                choices: BTreeMap::from([(0x0F, "DP-1".to_owned()), (0x11, "HDMI-1".to_owned())]),
                ..FeatureMetadata::default()
            }),
        });
        let labels: Vec<_> = def.choices.values().map(String::as_str).collect();
        assert_eq!(labels, ["DP-1", "HDMI-1"]);
        assert!(!def.choices.contains_key(&0x01), "catalog VGA entry must not leak in");
    }

    #[test]
    fn catalog_choices_survive_when_backend_reports_none() {
        let def = FeatureDefinition::from(WireFeature {
            code: 0x60,
            metadata: Some(FeatureMetadata {
                name: Some("Input".into()),
                ..FeatureMetadata::default()
            }),
        });
        assert_eq!(def.kind, FeatureKind::Choice);
        assert_eq!(def.choices.get(&0x1B).map(String::as_str), Some("USB-C"));
    }

    #[test]
    fn record_converts_to_descriptor() {
        let record = DisplayRecord {
            display_number: 2,
            edid: "abc".into(),
            manufacturer: None,
            model: Some("M".into()),
            serial: None,
            bus: Some("6".into()),
            address: None,
            attributes: BTreeMap::new(),
        };
        let descriptor = MonitorDescriptor::from(record);
        assert_eq!(descriptor.edid.as_str(), "abc");
        let address = DisplayAddress::from(&descriptor);
        assert_eq!(address.bus.as_deref(), Some("6"));
    }
}

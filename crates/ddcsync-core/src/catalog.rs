// ── Feature catalog ──
//
// Read-only table of well-known VCP features. Used to label features the
// backend reports without metadata and to bound pushed values.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::model::{FeatureCategory, FeatureDefinition, FeatureKind};

static CATALOG: LazyLock<BTreeMap<u8, FeatureDefinition>> = LazyLock::new(|| {
    use FeatureCategory::{Audio, Color, Luminance, Picture, Power};

    [
        range(0x10, "Brightness", "Overall backlight intensity.", Luminance, 100),
        range(0x12, "Contrast", "Difference between light and dark.", Luminance, 100),
        range(0x14, "Black level", "Adjusts black level or backlight bias.", Picture, 100),
        range(0x16, "Red gain", "Red channel gain for color temperature fine tuning.", Color, 255),
        range(0x18, "Green gain", "Green channel gain for color temperature fine tuning.", Color, 255),
        range(0x1A, "Blue gain", "Blue channel gain for color temperature fine tuning.", Color, 255),
        flag(0x1C, "Auto color setup", "Trigger automatic color calibration.", Color),
        choice(
            0x60,
            "Input source",
            "Choose the active video input.",
            Picture,
            &[
                (0x01, "VGA 1"),
                (0x03, "DVI 1"),
                (0x04, "DVI 2"),
                (0x0F, "DisplayPort 1"),
                (0x10, "DisplayPort 2"),
                (0x11, "HDMI 1"),
                (0x12, "HDMI 2"),
                (0x1B, "USB-C"),
            ],
        ),
        range(0x62, "Audio speaker volume", "Speaker or headphone output volume.", Audio, 100),
        choice(
            0x68,
            "Power mode",
            "Low power, standby and on states.",
            Power,
            &[(0x01, "On"), (0x02, "Standby"), (0x03, "Suspend"), (0x04, "Off")],
        ),
        choice(
            0xDC,
            "Preset mode",
            "Built-in picture preset.",
            Picture,
            &[
                (0x01, "Standard"),
                (0x02, "Movie"),
                (0x03, "Game"),
                (0x04, "Text"),
                (0x05, "sRGB"),
                (0x06, "Adobe RGB"),
                (0x0B, "Custom"),
            ],
        ),
        flag(0xE0, "Power LED", "Toggle the status LED.", Power),
        range(0xE1, "Uniformity compensation", "Backlight uniformity level.", Picture, 100),
    ]
    .into_iter()
    .map(|d| (d.code, d))
    .collect()
});

fn range(
    code: u8,
    name: &str,
    description: &str,
    category: FeatureCategory,
    maximum: u16,
) -> FeatureDefinition {
    FeatureDefinition {
        code,
        name: name.into(),
        description: description.into(),
        category,
        kind: FeatureKind::Range,
        minimum: 0,
        maximum: Some(maximum),
        writable: true,
        choices: BTreeMap::new(),
        default_value: None,
    }
}

fn choice(
    code: u8,
    name: &str,
    description: &str,
    category: FeatureCategory,
    choices: &[(u16, &str)],
) -> FeatureDefinition {
    FeatureDefinition {
        kind: FeatureKind::Choice,
        maximum: None,
        choices: choices.iter().map(|(v, l)| (*v, (*l).to_owned())).collect(),
        ..range(code, name, description, category, 0)
    }
}

fn flag(code: u8, name: &str, description: &str, category: FeatureCategory) -> FeatureDefinition {
    FeatureDefinition {
        kind: FeatureKind::Flag,
        maximum: Some(1),
        ..range(code, name, description, category, 1)
    }
}

/// Look up a well-known feature.
pub fn definition_for(code: u8) -> Option<&'static FeatureDefinition> {
    CATALOG.get(&code)
}

/// Every catalog entry, ordered by code.
pub fn iter() -> impl Iterator<Item = &'static FeatureDefinition> {
    CATALOG.values()
}

pub fn features_by_category(
    category: FeatureCategory,
) -> impl Iterator<Item = &'static FeatureDefinition> {
    iter().filter(move |d| d.category == category)
}

/// Render a value for display: the choice label, `On`/`Off` for flags,
/// the number otherwise.
pub fn format_value(definition: Option<&FeatureDefinition>, value: u16) -> String {
    match definition {
        Some(d) if d.kind == FeatureKind::Choice => d
            .choices
            .get(&value)
            .cloned()
            .unwrap_or_else(|| format!("0x{value:02X}")),
        Some(d) if d.kind == FeatureKind::Flag => {
            if value == 0 { "Off" } else { "On" }.to_owned()
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_entries_are_present() {
        for code in [0x10, 0x12, 0x14, 0x16, 0x18, 0x1A, 0x1C, 0x60, 0x62, 0x68, 0xDC, 0xE0, 0xE1] {
            assert!(definition_for(code).is_some(), "missing 0x{code:02X}");
        }
        assert!(definition_for(0x99).is_none());
    }

    #[test]
    fn gains_go_to_255() {
        for code in [0x16, 0x18, 0x1A] {
            assert_eq!(definition_for(code).and_then(|d| d.maximum), Some(255));
        }
    }

    #[test]
    fn only_choice_features_have_choices() {
        for def in iter() {
            assert_eq!(def.kind == FeatureKind::Choice, !def.choices.is_empty(), "0x{:02X}", def.code);
        }
    }

    #[test]
    fn category_filter() {
        let color: Vec<u8> = features_by_category(FeatureCategory::Color).map(|d| d.code).collect();
        assert_eq!(color, [0x16, 0x18, 0x1A, 0x1C]);
    }

    #[test]
    fn values_format_by_kind() {
        assert_eq!(format_value(definition_for(0x60), 0x11), "HDMI 1");
        assert_eq!(format_value(definition_for(0x60), 0x77), "0x77");
        assert_eq!(format_value(definition_for(0xE0), 0), "Off");
        assert_eq!(format_value(definition_for(0xE0), 1), "On");
        assert_eq!(format_value(definition_for(0x10), 42), "42");
        assert_eq!(format_value(None, 7), "7");
    }
}

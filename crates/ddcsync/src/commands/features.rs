//! `ddcsync features`, `get`, `capabilities` and `describe`: read-only
//! feature views.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use ddcsync_core::{
    Engine, FeatureCategory, FeatureDefinition, FeatureKind, MonitorState, catalog,
};

use crate::cli::{FeaturesArgs, GetArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util::{self, Settings};

// ── Views ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct FeatureView {
    pub edid: String,
    pub code: u8,
    pub name: String,
    pub category: FeatureCategory,
    pub kind: FeatureKind,
    pub writable: bool,
    pub current: Option<u16>,
    pub maximum: Option<u16>,
    pub default_value: Option<u16>,
    /// `current` rendered as a label, or the raw number with `--raw`.
    pub display: Option<String>,
}

impl FeatureView {
    pub fn build(monitor: &MonitorState, code: u8, raw: bool) -> Self {
        let value = monitor.value(code);
        let definition: Arc<FeatureDefinition> = monitor
            .capability(code)
            .or_else(|| value.as_ref().and_then(|v| v.definition.clone()))
            .unwrap_or_else(|| {
                Arc::new(
                    catalog::definition_for(code)
                        .cloned()
                        .unwrap_or_else(|| FeatureDefinition::generic(code)),
                )
            });

        Self {
            edid: monitor.edid().to_string(),
            code,
            name: definition.name.clone(),
            category: definition.category,
            kind: definition.kind,
            writable: definition.writable,
            current: value.as_ref().map(|v| v.current),
            maximum: value.as_ref().map(|v| v.maximum).or(definition.maximum),
            default_value: value
                .as_ref()
                .and_then(|v| v.default_value)
                .or(definition.default_value),
            display: value
                .as_ref()
                .map(|v| util::display_value(Some(&definition), v.current, raw)),
        }
    }
}

#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Max")]
    maximum: String,
    #[tabled(rename = "RW")]
    access: &'static str,
}

impl From<&FeatureView> for FeatureRow {
    fn from(v: &FeatureView) -> Self {
        Self {
            code: format!("0x{:02X}", v.code),
            name: v.name.clone(),
            kind: v.kind.to_string(),
            value: v.display.clone().unwrap_or_else(|| "-".into()),
            maximum: v.maximum.map_or_else(|| "-".into(), |m| m.to_string()),
            access: if v.writable { "rw" } else { "ro" },
        }
    }
}

fn detail(v: &FeatureView) -> String {
    let or_dash = |n: Option<u16>| n.map_or_else(|| "-".into(), |n| n.to_string());
    [
        format!("Monitor:  {}", v.edid),
        format!("Feature:  0x{:02X} {}", v.code, v.name),
        format!("Kind:     {} ({})", v.kind, v.category),
        format!("Value:    {}", v.display.as_deref().unwrap_or("-")),
        format!("Maximum:  {}", or_dash(v.maximum)),
        format!("Default:  {}", or_dash(v.default_value)),
        format!("Access:   {}", if v.writable { "read/write" } else { "read-only" }),
    ]
    .join("\n")
}

#[derive(Debug, Serialize)]
struct CapabilitiesView {
    edid: String,
    capabilities: String,
}

/// A feature as the backend describes it.
#[derive(Debug, Serialize)]
struct DescribeView {
    edid: String,
    #[serde(flatten)]
    definition: FeatureDefinition,
}

fn describe_detail(v: &DescribeView) -> String {
    let d = &v.definition;
    let mut lines = vec![
        format!("Monitor:      {}", v.edid),
        format!("Feature:      0x{:02X} {}", d.code, d.name),
        format!("Kind:         {} ({})", d.kind, d.category),
        format!(
            "Range:        {}..{}",
            d.minimum,
            d.maximum.map_or_else(|| "?".into(), |m| m.to_string())
        ),
        format!("Access:       {}", if d.writable { "read/write" } else { "read-only" }),
    ];
    if !d.description.is_empty() {
        lines.push(format!("Description:  {}", d.description));
    }
    if let Some(default_value) = d.default_value {
        lines.push(format!("Default:      {default_value}"));
    }
    for (value, label) in &d.choices {
        lines.push(format!("  0x{value:02X}  {label}"));
    }
    lines.join("\n")
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle_list(
    args: FeaturesArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let snapshot = Engine::oneshot(settings.engine.clone(), |engine| async move {
        Ok(engine.snapshot())
    })
    .await?;
    let monitor = util::resolve_monitor(&snapshot, &args.monitor)?;

    if let Some(err) = monitor.capability_error() {
        tracing::warn!(edid = %monitor.edid(), error = %err, "capabilities unavailable");
    }

    let mut codes = monitor.capability_codes();
    codes.extend(monitor.values().iter().map(|v| v.code));
    codes.sort_unstable();
    codes.dedup();

    let raw = settings.engine.raw_values;
    let views: Vec<FeatureView> = codes
        .into_iter()
        .map(|code| FeatureView::build(&monitor, code, raw))
        .collect();

    let out = output::render_list(
        settings.output,
        &views,
        |v| FeatureRow::from(v),
        |v| format!("0x{:02X}", v.code),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle_get(
    args: GetArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let snapshot = Engine::oneshot(settings.engine.clone(), |engine| async move {
        Ok(engine.snapshot())
    })
    .await?;
    let monitor = util::resolve_monitor(&snapshot, &args.monitor)?;
    let code = util::resolve_feature(Some(&monitor), &args.feature)?;

    if monitor.value(code).is_none() {
        return Err(CliError::NotFound {
            resource_type: "Feature".into(),
            identifier: format!("0x{code:02X}"),
            list_command: format!("features {}", monitor.edid()),
        });
    }

    let view = FeatureView::build(&monitor, code, settings.engine.raw_values);
    let out = output::render_single(settings.output, &view, detail, |v| {
        v.current.map(|c| c.to_string()).unwrap_or_default()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle_capabilities(
    args: FeaturesArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let view = util::with_engine(settings.engine.clone(), |engine| async move {
        let monitor = util::resolve_monitor(&engine.snapshot(), &args.monitor)?;
        let capabilities = engine.capabilities_string(monitor.edid()).await?;
        Ok(CapabilitiesView {
            edid: monitor.edid().to_string(),
            capabilities,
        })
    })
    .await?;

    let out = output::render_single(
        settings.output,
        &view,
        |v| v.capabilities.clone(),
        |v| v.capabilities.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle_describe(
    args: GetArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let view = util::with_engine(settings.engine.clone(), |engine| async move {
        let monitor = util::resolve_monitor(&engine.snapshot(), &args.monitor)?;
        let code = util::resolve_feature(Some(&monitor), &args.feature)?;
        let definition = engine.feature_metadata(monitor.edid(), code).await?;
        Ok(DescribeView {
            edid: monitor.edid().to_string(),
            definition,
        })
    })
    .await?;

    let out = output::render_single(settings.output, &view, describe_detail, |v| {
        v.definition.name.clone()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

//! Shared helpers for command handlers.

use std::future::Future;
use std::sync::Arc;

use clap::ValueEnum;

use ddcsync_config::{self as config, Config};
use ddcsync_core::{
    Engine, EngineConfig, FeatureDefinition, FeatureKind, MonitorSnapshot, MonitorState, catalog,
};

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;

// ── Settings ────────────────────────────────────────────────────────

/// Config file + environment + command-line overrides, resolved once.
#[derive(Debug)]
pub struct Settings {
    pub engine: EngineConfig,
    pub output: OutputFormat,
    pub color: ColorMode,
}

pub fn load_file_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let cfg = match &global.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    Ok(cfg)
}

pub fn load_settings(global: &GlobalOpts) -> Result<Settings, CliError> {
    let mut cfg = load_file_config(global)?;

    if let Some(preference) = global.backend {
        cfg.backend.preference = preference;
    }
    if global.raw {
        cfg.sync.raw_values = true;
    }
    if global.no_verify {
        cfg.sync.skip_verify = true;
    }

    let engine = config::to_engine_config(&cfg)?;
    Ok(Settings {
        output: output_format(global, &cfg),
        color: color_mode(global, &cfg),
        engine,
    })
}

pub fn output_format(global: &GlobalOpts, cfg: &Config) -> OutputFormat {
    global
        .output
        .or_else(|| OutputFormat::from_str(&cfg.defaults.output, true).ok())
        .unwrap_or(OutputFormat::Table)
}

pub fn color_mode(global: &GlobalOpts, cfg: &Config) -> ColorMode {
    global
        .color
        .or_else(|| ColorMode::from_str(&cfg.defaults.color, true).ok())
        .unwrap_or(ColorMode::Auto)
}

// ── Engine lifetime ─────────────────────────────────────────────────

/// Start an engine without periodic refresh, run `f`, always shut down.
pub async fn with_engine<F, Fut, T>(config: EngineConfig, f: F) -> Result<T, CliError>
where
    F: FnOnce(Engine) -> Fut,
    Fut: Future<Output = Result<T, CliError>>,
{
    let mut config = config;
    config.refresh_interval_secs = 0;

    let engine = Engine::start(config).await?;
    tracing::debug!(backend = %engine.connector().describe(), "engine ready");
    let result = f(engine.clone()).await;
    engine.shutdown().await;
    result
}

// ── Lookups ─────────────────────────────────────────────────────────

/// Resolve a monitor by exact EDID, display number, unique EDID prefix,
/// or unique model name.
pub fn resolve_monitor(
    snapshot: &MonitorSnapshot,
    identifier: &str,
) -> Result<Arc<MonitorState>, CliError> {
    if let Some(m) = snapshot.iter().find(|m| m.edid().as_str() == identifier) {
        return Ok(Arc::clone(m));
    }

    if let Ok(number) = identifier.parse::<i32>() {
        if let Some(m) = snapshot.iter().find(|m| m.display_number() == number) {
            return Ok(Arc::clone(m));
        }
    }

    let needle = identifier.to_lowercase();
    let by_prefix: Vec<_> = snapshot
        .iter()
        .filter(|m| m.edid().as_str().to_lowercase().starts_with(&needle))
        .collect();
    let by_model: Vec<_> = snapshot
        .iter()
        .filter(|m| {
            m.descriptor()
                .model
                .as_deref()
                .is_some_and(|model| model.to_lowercase() == needle)
        })
        .collect();

    for matches in [by_prefix, by_model] {
        match matches.as_slice() {
            [] => {}
            [one] => return Ok(Arc::clone(one)),
            many => {
                return Err(CliError::Ambiguous {
                    identifier: identifier.into(),
                    candidates: many
                        .iter()
                        .map(|m| m.edid().as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }
    }

    Err(CliError::NotFound {
        resource_type: "Monitor".into(),
        identifier: identifier.into(),
        list_command: "detect".into(),
    })
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a feature code: `0xNN`, decimal, or a feature name. Names are
/// matched against the monitor's own capabilities first, then the catalog.
pub fn resolve_feature(monitor: Option<&MonitorState>, input: &str) -> Result<u8, CliError> {
    let trimmed = input.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u8::from_str_radix(hex, 16).map_err(|_| CliError::Validation {
            field: "feature".into(),
            reason: format!("'{input}' is not a code between 0x00 and 0xFF"),
        });
    }
    if let Ok(code) = trimmed.parse::<u8>() {
        return Ok(code);
    }

    let wanted = normalize_name(trimmed);
    let from_monitor = monitor.and_then(|m| {
        m.capabilities()
            .into_iter()
            .find(|d| normalize_name(&d.name) == wanted)
            .map(|d| d.code)
    });
    from_monitor
        .or_else(|| {
            catalog::iter()
                .find(|d| normalize_name(&d.name) == wanted)
                .map(|d| d.code)
        })
        .ok_or_else(|| CliError::NotFound {
            resource_type: "Feature".into(),
            identifier: input.into(),
            list_command: "catalog".into(),
        })
}

/// Parse a value to write. Choice labels and on/off are only accepted
/// when values are interpreted (`raw == false`).
pub fn parse_value(
    definition: Option<&FeatureDefinition>,
    input: &str,
    raw: bool,
) -> Result<u16, CliError> {
    let trimmed = input.trim();
    let invalid = |reason: String| CliError::Validation {
        field: "value".into(),
        reason,
    };

    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u16::from_str_radix(hex, 16)
            .map_err(|_| invalid(format!("'{input}' is not a hex number between 0x0 and 0xFFFF")));
    }
    if let Ok(value) = trimmed.parse::<u16>() {
        return Ok(value);
    }
    if raw {
        return Err(invalid(format!("'{input}' is not a number (--raw is set)")));
    }

    let lowered = trimmed.to_lowercase();
    if definition.is_none_or(|d| d.kind == FeatureKind::Flag) {
        match lowered.as_str() {
            "on" | "true" | "yes" => return Ok(1),
            "off" | "false" | "no" => return Ok(0),
            _ => {}
        }
    }

    let wanted = normalize_name(trimmed);
    definition
        .and_then(|d| {
            d.choices
                .iter()
                .find(|(_, label)| normalize_name(label) == wanted)
                .map(|(value, _)| *value)
        })
        .ok_or_else(|| {
            let hint = definition
                .filter(|d| !d.choices.is_empty())
                .map(|d| {
                    let labels: Vec<_> = d.choices.values().map(String::as_str).collect();
                    format!(" (choices: {})", labels.join(", "))
                })
                .unwrap_or_default();
            invalid(format!("'{input}' is not a number or known label{hint}"))
        })
}

/// Render a value the way `--raw` asks for.
pub fn display_value(definition: Option<&FeatureDefinition>, value: u16, raw: bool) -> String {
    if raw {
        value.to_string()
    } else {
        catalog::format_value(definition, value)
    }
}

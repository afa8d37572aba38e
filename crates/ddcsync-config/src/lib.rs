//! Configuration for the ddcsync CLI and other front ends.
//!
//! A TOML file in the platform config directory, layered with `DDCSYNC_*`
//! environment variables, translated into `ddcsync_core::EngineConfig`.
//! Nested keys use a double underscore in the environment:
//! `DDCSYNC_SYNC__DEBOUNCE_MS=250`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ddcsync_core::config::default_client_context;
use ddcsync_core::{BackendPreference, BusConfig, BusKind, CliConfig, EngineConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub defaults: Defaults,
}

/// Which backend to bind and how to reach it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendSection {
    /// `auto`, `bus`, `cli` or `simulated`.
    pub preference: BackendPreference,
    /// `system` or `session`.
    pub bus: BusKind,
    /// Bus names tried in order.
    pub service_candidates: Vec<String>,
    pub object_path: String,
    pub interface: String,
    pub call_timeout_ms: u64,
    /// The `ddcutil` executable.
    pub ddcutil_program: String,
    pub ddcutil_timeout_ms: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        let bus = BusConfig::default();
        let cli = CliConfig::default();
        Self {
            preference: BackendPreference::Auto,
            bus: bus.bus,
            service_candidates: bus.service_candidates,
            object_path: bus.object_path,
            interface: bus.interface,
            call_timeout_ms: millis(bus.call_timeout),
            ddcutil_program: cli.program,
            ddcutil_timeout_ms: millis(cli.timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncSection {
    pub debounce_ms: u64,
    /// 0 disables periodic full refreshes.
    pub refresh_interval_secs: u64,
    pub raw_values: bool,
    pub skip_verify: bool,
    pub revert_failed_writes: bool,
    /// Defaults to `ddcsync-<pid>`.
    pub client_context: Option<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            debounce_ms: millis(engine.debounce),
            refresh_interval_secs: engine.refresh_interval_secs,
            raw_values: engine.raw_values,
            skip_verify: engine.skip_verify,
            revert_failed_writes: engine.revert_failed_writes,
            client_context: None,
        }
    }
}

/// CLI presentation defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "ddcsync", "ddcsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ddcsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DDCSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build an `EngineConfig`, validating values the engine cannot use.
pub fn to_engine_config(cfg: &Config) -> Result<EngineConfig, ConfigError> {
    let backend = &cfg.backend;
    let sync = &cfg.sync;

    if backend.service_candidates.iter().all(|s| s.trim().is_empty()) {
        return Err(ConfigError::Validation {
            field: "backend.service_candidates".into(),
            reason: "at least one bus name is required".into(),
        });
    }
    if backend.call_timeout_ms == 0 || backend.ddcutil_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            field: "backend timeouts".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if backend.ddcutil_program.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "backend.ddcutil_program".into(),
            reason: "must not be empty".into(),
        });
    }

    Ok(EngineConfig {
        backend: backend.preference,
        bus: BusConfig {
            bus: backend.bus,
            service_candidates: backend
                .service_candidates
                .iter()
                .filter(|s| !s.trim().is_empty())
                .cloned()
                .collect(),
            object_path: backend.object_path.clone(),
            interface: backend.interface.clone(),
            call_timeout: Duration::from_millis(backend.call_timeout_ms),
        },
        cli: CliConfig {
            program: backend.ddcutil_program.clone(),
            timeout: Duration::from_millis(backend.ddcutil_timeout_ms),
        },
        debounce: Duration::from_millis(sync.debounce_ms),
        refresh_interval_secs: sync.refresh_interval_secs,
        raw_values: sync.raw_values,
        skip_verify: sync.skip_verify,
        client_context: sync
            .client_context
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(default_client_context),
        revert_failed_writes: sync.revert_failed_writes,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.sync.debounce_ms, 150);
        assert_eq!(cfg.backend.service_candidates.len(), 6);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[backend]
preference = "simulated"
bus = "session"

[sync]
debounce_ms = 300
client_context = "desk"
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.backend.preference, BackendPreference::Simulated);
        assert_eq!(cfg.backend.ddcutil_program, "ddcutil");

        let engine = to_engine_config(&cfg).unwrap();
        assert_eq!(engine.backend, BackendPreference::Simulated);
        assert_eq!(engine.bus.bus, BusKind::Session);
        assert_eq!(engine.debounce, Duration::from_millis(300));
        assert_eq!(engine.client_context, "desk");
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.sync.refresh_interval_secs = 0;
        cfg.defaults.output = "json".into();

        save_config_to(&cfg, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn bad_preference_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[backend]\npreference = \"carrier-pigeon\"\n").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Figment(_))));
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        let mut cfg = Config::default();
        cfg.backend.service_candidates = vec![String::new()];
        assert!(matches!(
            to_engine_config(&cfg),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn default_context_is_per_process() {
        let engine = to_engine_config(&Config::default()).unwrap();
        assert_eq!(engine.client_context, format!("ddcsync-{}", std::process::id()));
    }
}

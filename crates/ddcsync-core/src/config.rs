// ── Runtime engine configuration ──
//
// These types describe *how* the engine talks to backends and paces
// writes. They never touch disk; the CLI (via ddcsync-config) constructs
// an `EngineConfig` and hands it in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ddcsync_api::{BusConfig, CliConfig};

/// Which backend kind to bind.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendPreference {
    /// D-Bus service, then the command line, then simulation.
    #[default]
    Auto,
    Bus,
    Cli,
    Simulated,
}

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: BackendPreference,
    pub bus: BusConfig,
    pub cli: CliConfig,
    /// Settling window for coalescing writes to the same feature.
    pub debounce: Duration,
    /// How often to perform a full refresh (seconds). 0 = never.
    pub refresh_interval_secs: u64,
    pub raw_values: bool,
    pub skip_verify: bool,
    /// Attached to writes; pushes carrying it are our own echoes.
    pub client_context: String,
    /// Re-read a feature after its optimistic write failed.
    pub revert_failed_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            bus: BusConfig::default(),
            cli: CliConfig::default(),
            debounce: Duration::from_millis(150),
            refresh_interval_secs: 60,
            raw_values: false,
            skip_verify: false,
            client_context: default_client_context(),
            revert_failed_writes: false,
        }
    }
}

pub fn default_client_context() -> String {
    format!("ddcsync-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, BackendPreference::Auto);
        assert_eq!(config.debounce, Duration::from_millis(150));
        assert_eq!(config.refresh_interval_secs, 60);
        assert_eq!(config.cli.program, "ddcutil");
        assert!(config.client_context.starts_with("ddcsync-"));
    }

    #[test]
    fn preference_parses_lowercase() {
        assert_eq!("cli".parse::<BackendPreference>().unwrap(), BackendPreference::Cli);
        assert_eq!(BackendPreference::Simulated.to_string(), "simulated");
    }
}

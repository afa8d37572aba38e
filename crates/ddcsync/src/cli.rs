//! Clap derive structures for the `ddcsync` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use ddcsync_core::{BackendPreference, FeatureCategory};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ddcsync -- read and adjust monitor settings over DDC/CI
#[derive(Debug, Parser)]
#[command(
    name = "ddcsync",
    version,
    about = "Read and adjust monitor settings over DDC/CI",
    long_about = "Talks to the ddcutil D-Bus service when it is running, falls back to\n\
        the ddcutil command line, and finally to a simulated set of monitors.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend to use (overrides the config file)
    #[arg(long, short = 'b', global = true, value_parser = parse_backend)]
    pub backend: Option<BackendPreference>,

    /// Config file to read instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Show and accept raw values instead of interpreted ones
    #[arg(long, global = true)]
    pub raw: bool,

    /// Skip read-back verification after writes
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

fn parse_backend(s: &str) -> Result<BackendPreference, String> {
    s.parse()
        .map_err(|_| format!("unknown backend '{s}' (expected auto, bus, cli or simulated)"))
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List connected monitors
    #[command(alias = "ls")]
    Detect,

    /// Show the features and current values of one monitor
    #[command(alias = "f")]
    Features(FeaturesArgs),

    /// Read one feature
    Get(GetArgs),

    /// Write one feature
    Set(SetArgs),

    /// Write a feature's default value (or the midpoint of its range)
    Reset(GetArgs),

    /// Print a monitor's raw MCCS capabilities string
    #[command(alias = "caps")]
    Capabilities(FeaturesArgs),

    /// Show what the backend reports about one feature
    Describe(GetArgs),

    /// Show or change a monitor's DDC/CI sleep multiplier
    SleepMultiplier(SleepMultiplierArgs),

    /// Inspect or restart the backend service
    Service(ServiceArgs),

    /// Stream change notifications until interrupted
    Watch(WatchArgs),

    /// List the built-in feature catalog
    Catalog(CatalogArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Monitor commands ─────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct FeaturesArgs {
    /// Monitor: EDID (or a unique prefix), display number, or model
    pub monitor: String,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Monitor: EDID (or a unique prefix), display number, or model
    pub monitor: String,

    /// Feature: 0xNN, decimal code, or catalog name (e.g. brightness)
    pub feature: String,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Monitor: EDID (or a unique prefix), display number, or model
    pub monitor: String,

    /// Feature: 0xNN, decimal code, or catalog name (e.g. brightness)
    pub feature: String,

    /// Value: number, 0xNN, on/off for flags, or a choice label
    pub value: String,
}

#[derive(Debug, Args)]
pub struct SleepMultiplierArgs {
    /// Monitor: EDID (or a unique prefix), display number, or model
    pub monitor: String,

    /// New multiplier between 0.0 and 10.0 (0.0 lets ddcutil decide).
    /// Omit to print the current one.
    pub value: Option<f64>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only report changes for this monitor
    #[arg(long, short = 'm')]
    pub monitor: Option<String>,
}

// ── Catalog ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Only show one category
    #[arg(long, short = 'c', value_parser = parse_category)]
    pub category: Option<FeatureCategory>,
}

fn parse_category(s: &str) -> Result<FeatureCategory, String> {
    s.parse().map_err(|_| {
        format!("unknown category '{s}' (expected luminance, color, picture, audio, power or other)")
    })
}

// ── Service ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServiceArgs {
    #[command(subcommand)]
    pub command: ServiceCommand,
}

#[derive(Debug, Subcommand)]
pub enum ServiceCommand {
    /// Show the bound backend, resolved methods and service properties
    Info,

    /// Restart the service's DDC library with new options
    Restart {
        /// Options passed to libddcutil, e.g. "--disable-dynamic-sleep"
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        options: String,

        /// Syslog level for the restarted library
        #[arg(long, default_value_t = 0)]
        syslog_level: u32,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the resolved configuration (file + environment)
    Show,

    /// Print the config file location
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

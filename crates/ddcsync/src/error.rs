//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use ddcsync_config::ConfigError;
use ddcsync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Backend ──────────────────────────────────────────────────────
    #[error("No usable backend: {reason}")]
    #[diagnostic(
        code(ddcsync::backend_unavailable),
        help(
            "Start ddcutil-service, install ddcutil, or try the simulated monitors:\n\
             ddcsync --backend simulated detect"
        )
    )]
    BackendUnavailable { reason: String },

    #[error("Monitor rejected the request: {message}")]
    #[diagnostic(
        code(ddcsync::rejected),
        help("Some monitors only accept DDC/CI while their OSD menu is closed.")
    )]
    Rejected { message: String },

    #[error("Unexpected reply from the backend: {message}")]
    #[diagnostic(code(ddcsync::protocol))]
    Protocol { message: String },

    #[error("Backend call timed out after {seconds}s")]
    #[diagnostic(
        code(ddcsync::timeout),
        help("Raise backend.call_timeout_ms or backend.ddcutil_timeout_ms in the config file.")
    )]
    Timeout { seconds: u64 },

    // ── Lookups ──────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(ddcsync::not_found),
        help("Run: ddcsync {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("'{identifier}' matches more than one monitor: {candidates}")]
    #[diagnostic(
        code(ddcsync::ambiguous),
        help("Use the full EDID or the display number.")
    )]
    Ambiguous {
        identifier: String,
        candidates: String,
    },

    // ── Operations ───────────────────────────────────────────────────
    #[error("Feature 0x{code:02X} is read-only")]
    #[diagnostic(code(ddcsync::read_only))]
    ReadOnly { code: u8 },

    #[error("Feature 0x{code:02X} has no known default value")]
    #[diagnostic(
        code(ddcsync::no_default),
        help("Write an explicit value with: ddcsync set <MONITOR> 0x{code:02X} <VALUE>")
    )]
    NoDefault { code: u8 },

    #[error("The {backend} backend does not support {operation}")]
    #[diagnostic(
        code(ddcsync::unsupported),
        help("This needs ddcutil-service; check with: ddcsync service info")
    )]
    Unsupported { backend: String, operation: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ddcsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(ddcsync::config),
        help("Check the config file shown by: ddcsync config path")
    )]
    Config(#[from] ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(code(ddcsync::config_exists), help("Pass --force to overwrite it."))]
    ConfigExists { path: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(ddcsync::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render TOML: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BackendUnavailable { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ReadOnly { .. } => exit_code::PERMISSION,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } | Self::Ambiguous { .. } | Self::Config(_) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::BackendUnavailable { reason } => CliError::BackendUnavailable { reason },

            CoreError::ProtocolMismatch { message } => CliError::Protocol { message },

            CoreError::RemoteRejected { status, message } => CliError::Rejected {
                message: format!("{message} (status {status})"),
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::UnknownMonitor { identifier } => CliError::NotFound {
                resource_type: "Monitor".into(),
                identifier,
                list_command: "detect".into(),
            },

            CoreError::UnknownFeature { edid, code } => CliError::NotFound {
                resource_type: "Feature".into(),
                identifier: format!("0x{code:02X}"),
                list_command: if edid.is_empty() {
                    "features <MONITOR>".into()
                } else {
                    format!("features {edid}")
                },
            },

            CoreError::ReadOnly { code } => CliError::ReadOnly { code },

            CoreError::NoDefault { code } => CliError::NoDefault { code },

            CoreError::InvalidValue { code, value, reason } => CliError::Validation {
                field: format!("0x{code:02X}"),
                reason: format!("{value}: {reason}"),
            },

            CoreError::InvalidSleepMultiplier { value } => CliError::Validation {
                field: "sleep multiplier".into(),
                reason: format!("{value} is outside 0.0..=10.0"),
            },

            CoreError::Unsupported { backend, operation } => {
                CliError::Unsupported { backend, operation }
            }

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::EngineStopped => CliError::Internal("engine stopped unexpectedly".into()),

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

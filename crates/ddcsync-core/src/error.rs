// ── Core error types ──
//
// User-facing errors from ddcsync-core. Consumers never see raw bus
// errors or reply-decoding failures directly; the `From<ddcsync_api::Error>`
// impl translates wire-level errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
///
/// Cloneable so one backend failure can be reported to every waiter.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Backend errors ───────────────────────────────────────────────
    /// No candidate answered (discovery, or every method candidate for a verb).
    #[error("Backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    /// The backend answered, but in a shape we cannot decode.
    #[error("Protocol mismatch: {message}")]
    ProtocolMismatch { message: String },

    /// The backend answered with a nonzero status.
    #[error("Backend rejected request (status {status}): {message}")]
    RemoteRejected { status: i32, message: String },

    #[error("Backend call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Monitor not found: {identifier}")]
    UnknownMonitor { identifier: String },

    #[error("Feature 0x{code:02X} not supported by monitor {edid}")]
    UnknownFeature { edid: String, code: u8 },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Feature 0x{code:02X} is read-only")]
    ReadOnly { code: u8 },

    #[error("Feature 0x{code:02X} has no known default value")]
    NoDefault { code: u8 },

    #[error("Value {value} is not valid for feature 0x{code:02X}: {reason}")]
    InvalidValue { code: u8, value: u16, reason: String },

    #[error("Sleep multiplier {value} is outside 0.0..=10.0")]
    InvalidSleepMultiplier { value: f64 },

    /// The bound backend kind cannot perform this operation at all.
    #[error("The {backend} backend does not support {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("Engine is not running")]
    EngineStopped,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<ddcsync_api::Error> for CoreError {
    fn from(err: ddcsync_api::Error) -> Self {
        use ddcsync_api::Error as Api;
        match err {
            Api::Remote { status, message } => CoreError::RemoteRejected { status, message },
            Api::ReplyShape(message) => CoreError::ProtocolMismatch { message },
            Api::Deserialization { message, body: _ } => CoreError::ProtocolMismatch { message },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::UnknownDisplay(identifier) => CoreError::UnknownMonitor { identifier },
            Api::UnsupportedFeature(code) => CoreError::UnknownFeature {
                edid: String::new(),
                code,
            },
            Api::InvalidAddress(message) => CoreError::Config { message },
            Api::Command { command, message } => CoreError::RemoteRejected {
                status: -1,
                message: format!("{command}: {message}"),
            },
            e @ (Api::Bus(_)
            | Api::BusDaemon(_)
            | Api::NameNotOwned { .. }
            | Api::Spawn { .. }
            | Api::UnsupportedOperation(_)) => CoreError::BackendUnavailable {
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_status_survives_conversion() {
        let err = CoreError::from(ddcsync_api::Error::Remote {
            status: 7,
            message: "busy".into(),
        });
        assert!(matches!(err, CoreError::RemoteRejected { status: 7, .. }));
    }

    #[test]
    fn shape_errors_become_protocol_mismatch() {
        let err = CoreError::from(ddcsync_api::Error::ReplyShape("x".into()));
        assert!(matches!(err, CoreError::ProtocolMismatch { .. }));
    }

    #[test]
    fn missing_peer_is_backend_unavailable() {
        let err = CoreError::from(ddcsync_api::Error::NameNotOwned {
            name: "com.ddcutil.DdcutilService".into(),
        });
        assert!(matches!(err, CoreError::BackendUnavailable { .. }));
    }
}

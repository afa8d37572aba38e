use thiserror::Error;

/// Top-level error type for the `ddcsync-api` crate.
///
/// Covers every failure mode across all backend surfaces:
/// D-Bus transport, reply decoding, the `ddcutil` command line, and the
/// simulated backend. `ddcsync-core` maps these into domain diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── D-Bus transport ─────────────────────────────────────────────
    /// Connection-level or method-call failure reported by zbus.
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    /// Error reply from the bus daemon itself (`org.freedesktop.DBus.*`).
    #[error("D-Bus daemon error: {0}")]
    BusDaemon(#[from] zbus::fdo::Error),

    /// No process currently owns the requested bus name.
    #[error("No owner for bus name {name}")]
    NameNotOwned { name: String },

    /// Invalid bus name, object path, or interface name in configuration.
    #[error("Invalid D-Bus address component: {0}")]
    InvalidAddress(String),

    // ── Backend replies ─────────────────────────────────────────────
    /// The backend answered with a nonzero status.
    #[error("Backend rejected request (status {status}): {message}")]
    Remote { status: i32, message: String },

    /// The reply did not match any accepted shape.
    #[error("Unrecognized reply shape: {0}")]
    ReplyShape(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Command line ────────────────────────────────────────────────
    /// The helper process could not be started.
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The helper process exited unsuccessfully.
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    /// A call or helper process exceeded its deadline.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Addressing ──────────────────────────────────────────────────
    /// The referenced display is not known to the backend.
    #[error("Unknown display: {0}")]
    UnknownDisplay(String),

    /// The referenced feature is not supported by the display.
    #[error("Feature 0x{0:02X} is not supported by this display")]
    UnsupportedFeature(u8),

    /// Operation not supported by this backend kind.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl Error {
    /// Returns `true` if the failure means the method (or the peer) was not
    /// there to answer, as opposed to an answer we did not like.
    ///
    /// Method probing moves on to the next candidate only for these.
    pub fn is_unanswered(&self) -> bool {
        match self {
            Self::Bus(zbus::Error::MethodError(name, _, _)) => matches!(
                name.as_str(),
                "org.freedesktop.DBus.Error.UnknownMethod"
                    | "org.freedesktop.DBus.Error.UnknownInterface"
                    | "org.freedesktop.DBus.Error.UnknownObject"
                    | "org.freedesktop.DBus.Error.InvalidArgs"
                    | "org.freedesktop.DBus.Error.ServiceUnknown"
                    | "org.freedesktop.DBus.Error.NameHasNoOwner"
            ),
            Self::Bus(_)
            | Self::BusDaemon(_)
            | Self::NameNotOwned { .. }
            | Self::Spawn { .. }
            | Self::Timeout { .. }
            | Self::UnsupportedOperation(_) => true,
            _ => false,
        }
    }
}

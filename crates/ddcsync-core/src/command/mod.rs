// ── Command API ──
//
// Everything a consumer asks of the engine flows through `Command`. The
// engine loop answers each one over the envelope's oneshot channel.

use crate::connector::ServiceInfo;
use crate::error::CoreError;
use crate::model::{Edid, FeatureDefinition};

pub(crate) type Responder = tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>;

/// A command plus the channel its result goes back on.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: Responder,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Writes ───────────────────────────────────────────────────────
    /// Debounced write. Answered as soon as the request is queued.
    RequestValue { edid: Edid, code: u8, value: u16 },
    /// Immediate write, cancelling any pending one for the same feature.
    /// Answered once the backend acknowledged it.
    WriteValue { edid: Edid, code: u8, value: u16 },
    /// Write the default (or midpoint) immediately. Answered with the
    /// value written.
    ResetFeature { edid: Edid, code: u8 },

    // ── Reconciliation ───────────────────────────────────────────────
    /// Full detection. Concurrent requests share one follow-up run.
    Rescan,
    /// Descriptor-only listing.
    LightRefresh,
    /// Re-read every value of one monitor.
    RefreshValues { edid: Edid },

    // ── Queries ──────────────────────────────────────────────────────
    /// The unparsed MCCS capabilities string.
    CapabilitiesString { edid: Edid },
    /// Backend metadata for one code.
    FeatureMetadata { edid: Edid, code: u8 },
    SleepMultiplier { edid: Edid },
    SetSleepMultiplier { edid: Edid, multiplier: f64 },

    // ── Service ──────────────────────────────────────────────────────
    /// Answered once the restart was requested; a rescan follows when the
    /// service reports it is ready.
    RestartService { options: String, syslog_level: u32 },
    ServiceInfo,

    // ── Session ──────────────────────────────────────────────────────
    SetOptions { raw_values: bool, skip_verify: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Ok,
    Value(u16),
    Text(String),
    Multiplier(f64),
    Definition(Box<FeatureDefinition>),
    Service(Box<ServiceInfo>),
}

impl CommandResult {
    pub fn value(&self) -> Option<u16> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }
}

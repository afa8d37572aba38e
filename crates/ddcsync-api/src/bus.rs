//! ddcutil-service client over D-Bus.
//!
//! Binds to the first candidate bus name that currently has an owner and
//! exposes one async method per service call. Method names for the
//! per-display verbs are chosen by the caller (see [`crate::methods`]);
//! this client only knows how to lay out arguments for each verb.
//!
//! # Example
//!
//! ```rust,ignore
//! use ddcsync_api::bus::{BusClient, BusConfig};
//! use ddcsync_api::CallFlags;
//!
//! let client = BusClient::connect(&BusConfig::default()).await?;
//! for display in client.detect(CallFlags::empty()).await? {
//!     println!("{} {}", display.display_number, display.edid);
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zbus::zvariant::{DynamicType, Structure, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use crate::error::Error;
use crate::events::{BackendEvent, EventStreamHandle};
use crate::flags::CallFlags;
use crate::methods::{ListMethod, MethodCandidate, ReadMethod, WriteMethod};
use crate::reply::{self, Reply};
use crate::types::{DisplayAddress, DisplayRecord, FeatureMetadata, Reading, WireFeature};

// ── Defaults ─────────────────────────────────────────────────────────

/// Bus names tried during discovery, in priority order.
pub const DEFAULT_SERVICE_CANDIDATES: [&str; 6] = [
    "com.ddcutil.DdcutilService",
    "io.github.ddcutil.Service",
    "io.github.ddcutil1.Service",
    "io.github.ddcutil1",
    "io.github.ddcutil",
    "org.ddcutilservice.DdcutilService",
];

pub const DEFAULT_OBJECT_PATH: &str = "/com/ddcutil/DdcutilObject";
pub const DEFAULT_INTERFACE: &str = "com.ddcutil.DdcutilInterface";

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

// ── Configuration ────────────────────────────────────────────────────

/// Which message bus to connect to.
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
pub enum BusKind {
    #[default]
    System,
    Session,
}

/// Connection parameters for [`BusClient::connect`].
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub bus: BusKind,
    pub service_candidates: Vec<String>,
    pub object_path: String,
    pub interface: String,
    pub call_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::System,
            service_candidates: DEFAULT_SERVICE_CANDIDATES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            object_path: DEFAULT_OBJECT_PATH.into(),
            interface: DEFAULT_INTERFACE.into(),
            call_timeout: Duration::from_secs(5),
        }
    }
}

// ── BusClient ────────────────────────────────────────────────────────

/// A connection bound to one service name for its lifetime.
#[derive(Debug, Clone)]
pub struct BusClient {
    connection: Connection,
    service: String,
    object_path: String,
    interface: String,
    call_timeout: Duration,
}

impl BusClient {
    /// Connect to the configured bus and bind the first owned candidate.
    pub async fn connect(config: &BusConfig) -> Result<Self, Error> {
        let connection = match config.bus {
            BusKind::System => Connection::system().await?,
            BusKind::Session => Connection::session().await?,
        };
        let service = discover(&connection, &config.service_candidates).await?;
        tracing::info!(service = %service, bus = %config.bus, "bound ddcutil service");

        Ok(Self {
            connection,
            service,
            object_path: config.object_path.clone(),
            interface: config.interface.clone(),
            call_timeout: config.call_timeout,
        })
    }

    /// The bus name this client is bound to.
    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Invoke `method` with `body` and lower the reply.
    pub async fn call<B>(&self, method: &str, body: &B) -> Result<Reply, Error>
    where
        B: Serialize + DynamicType,
    {
        self.call_interface(&self.interface, method, body).await
    }

    async fn call_interface<B>(
        &self,
        interface: &str,
        method: &str,
        body: &B,
    ) -> Result<Reply, Error>
    where
        B: Serialize + DynamicType,
    {
        tracing::trace!(method, interface, service = %self.service, "bus call");
        let call = self.connection.call_method(
            Some(self.service.as_str()),
            self.object_path.as_str(),
            Some(interface),
            method,
            body,
        );
        let message = tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: self.call_timeout.as_secs(),
            })??;
        lower_body(&message)
    }

    // ── Detection ────────────────────────────────────────────────────

    pub async fn detect(&self, flags: CallFlags) -> Result<Vec<DisplayRecord>, Error> {
        reply::decode_displays(self.call("Detect", &(flags.bits(),)).await?)
    }

    /// Cheap listing of already-detected displays.
    pub async fn list_detected(&self, flags: CallFlags) -> Result<Vec<DisplayRecord>, Error> {
        reply::decode_displays(self.call("ListDetected", &(flags.bits(),)).await?)
    }

    // ── Per-display verbs ────────────────────────────────────────────

    pub async fn read_value(
        &self,
        method: ReadMethod,
        display: &DisplayAddress,
        code: u8,
        flags: CallFlags,
    ) -> Result<Reading, Error> {
        let body = (display.display_number, display.edid.as_str(), code, flags.bits());
        reply::decode_reading(self.call(method.method_name(), &body).await?)
    }

    pub async fn write_value(
        &self,
        method: WriteMethod,
        display: &DisplayAddress,
        code: u8,
        value: u16,
        context: &str,
        flags: CallFlags,
    ) -> Result<(), Error> {
        let edid = display.edid.as_str();
        let reply = if method.takes_context() {
            let body = (display.display_number, edid, code, value, context, flags.bits());
            self.call(method.method_name(), &body).await?
        } else {
            let body = (display.display_number, edid, code, value, flags.bits());
            self.call(method.method_name(), &body).await?
        };
        reply::decode_ack(reply)
    }

    pub async fn list_features(
        &self,
        method: ListMethod,
        display: &DisplayAddress,
        flags: CallFlags,
    ) -> Result<Vec<WireFeature>, Error> {
        let body = (display.display_number, display.edid.as_str(), flags.bits());
        reply::decode_capabilities(self.call(method.method_name(), &body).await?)
    }

    /// Bulk read via `GetMultipleVcp`.
    pub async fn read_values(
        &self,
        display: &DisplayAddress,
        codes: &[u8],
        flags: CallFlags,
    ) -> Result<BTreeMap<u8, Reading>, Error> {
        let body = (
            display.display_number,
            display.edid.as_str(),
            codes.to_vec(),
            flags.bits(),
        );
        reply::decode_readings(self.call("GetMultipleVcp", &body).await?)
    }

    /// The unparsed MCCS capabilities string.
    pub async fn capabilities_string(
        &self,
        display: &DisplayAddress,
        flags: CallFlags,
    ) -> Result<String, Error> {
        let body = (display.display_number, display.edid.as_str(), flags.bits());
        reply::decode_text(self.call("GetCapabilitiesString", &body).await?)
    }

    pub async fn feature_metadata(
        &self,
        display: &DisplayAddress,
        code: u8,
        flags: CallFlags,
    ) -> Result<FeatureMetadata, Error> {
        let body = (display.display_number, display.edid.as_str(), code, flags.bits());
        reply::decode_feature_metadata(self.call("GetVcpMetadata", &body).await?)
    }

    pub async fn sleep_multiplier(
        &self,
        display: &DisplayAddress,
        flags: CallFlags,
    ) -> Result<f64, Error> {
        let body = (display.display_number, display.edid.as_str(), flags.bits());
        reply::decode_multiplier(self.call("GetSleepMultiplier", &body).await?)
    }

    pub async fn set_sleep_multiplier(
        &self,
        display: &DisplayAddress,
        multiplier: f64,
        flags: CallFlags,
    ) -> Result<(), Error> {
        let body = (display.display_number, display.edid.as_str(), multiplier, flags.bits());
        reply::decode_ack(self.call("SetSleepMultiplier", &body).await?)
    }

    // ── Service ──────────────────────────────────────────────────────

    /// Ask the service to restart its DDC library with new options.
    ///
    /// The service answers before it restarts; a `ServiceInitialized`
    /// signal follows once it is ready again.
    pub async fn restart(
        &self,
        options: &str,
        syslog_level: u32,
        flags: CallFlags,
    ) -> Result<(), Error> {
        reply::decode_ack(self.call("Restart", &(options, syslog_level, flags.bits())).await?)
    }

    /// All properties the service exposes on its interface.
    pub async fn properties(&self) -> Result<BTreeMap<String, serde_json::Value>, Error> {
        let body = (self.interface.as_str(),);
        let reply = self
            .call_interface(PROPERTIES_INTERFACE, "GetAll", &body)
            .await?;
        reply::decode_properties(reply)
    }

    // ── Signals ──────────────────────────────────────────────────────

    /// Subscribe to the service's signals and spawn the forwarding loop.
    ///
    /// The loop runs until `cancel` fires or the bus connection drops.
    pub async fn subscribe(&self, cancel: CancellationToken) -> Result<EventStreamHandle, Error> {
        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(self.interface.as_str())?
            .path(self.object_path.as_str())?
            .build();
        let stream = MessageStream::for_match_rule(
            rule,
            &self.connection,
            Some(SIGNAL_CHANNEL_CAPACITY),
        )
        .await?;

        let handle = EventStreamHandle::new(cancel);
        let task_handle = handle.clone();
        tokio::spawn(async move {
            signal_loop(stream, task_handle).await;
        });
        Ok(handle)
    }
}

// ── Discovery ────────────────────────────────────────────────────────

/// Return the first candidate whose name currently has an owner.
async fn discover(connection: &Connection, candidates: &[String]) -> Result<String, Error> {
    let daemon = zbus::fdo::DBusProxy::new(connection).await?;
    for name in candidates {
        let bus_name = zbus::names::BusName::try_from(name.as_str())
            .map_err(|e| Error::InvalidAddress(format!("{name}: {e}")))?;
        match daemon.get_name_owner(bus_name).await {
            Ok(owner) => {
                tracing::debug!(candidate = %name, owner = %owner, "bus name has an owner");
                return Ok(name.clone());
            }
            Err(e) => tracing::debug!(candidate = %name, error = %e, "bus name not owned"),
        }
    }
    Err(Error::NameNotOwned {
        name: candidates.join(", "),
    })
}

// ── Signal loop ──────────────────────────────────────────────────────

async fn signal_loop(mut stream: MessageStream, handle: EventStreamHandle) {
    let cancel = handle.cancel_token().clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(message)) => {
                    let header = message.header();
                    let Some(member) = header.member() else { continue };
                    match lower_body(&message) {
                        Ok(body) => {
                            if let Some(event) = event_from_signal(member.as_str(), body) {
                                tracing::debug!(?event, "backend signal");
                                handle.publish(event);
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, signal = %member, "undecodable signal"),
                    }
                }
                Some(Err(e)) => tracing::warn!(error = %e, "signal stream error"),
                None => {
                    tracing::info!("signal stream ended");
                    break;
                }
            }
        }
    }
    tracing::debug!("signal loop exiting");
}

/// Map a service signal onto a [`BackendEvent`]. Unknown signals and
/// malformed payloads yield `None`.
pub(crate) fn event_from_signal(member: &str, body: Reply) -> Option<BackendEvent> {
    let fields = match body {
        Reply::Tuple(fields) => fields,
        Reply::Unit => Vec::new(),
        other => vec![other],
    };
    let int = |i: usize| fields.get(i).and_then(Reply::as_int);
    let text = |i: usize| {
        fields
            .get(i)
            .and_then(Reply::as_str)
            .map(str::to_owned)
            .unwrap_or_default()
    };

    match member {
        "ServiceInitialized" => Some(BackendEvent::ServiceInitialized),
        "ConnectedDisplaysChanged" => Some(BackendEvent::ConnectedDisplaysChanged {
            edid: fields.first()?.as_str()?.to_owned(),
            event_kind: i32::try_from(int(1)?).ok()?,
            flags: int(2).and_then(|f| i32::try_from(f).ok()).unwrap_or(0),
        }),
        "VcpValueChanged" => Some(BackendEvent::VcpValueChanged {
            display_number: i32::try_from(int(0)?).ok()?,
            edid: fields.get(1)?.as_str()?.to_owned(),
            code: u8::try_from(int(2)?).ok()?,
            new_value: u16::try_from(int(3)?).ok()?,
            source_name: text(4),
            source_context: text(5),
            flags: int(6).and_then(|f| i32::try_from(f).ok()).unwrap_or(0),
        }),
        _ => None,
    }
}

// ── Body lowering ────────────────────────────────────────────────────

fn lower_body(message: &Message) -> Result<Reply, Error> {
    let body = message.body();
    let empty = body.signature().is_none_or(|s| s.as_str().is_empty());
    if empty {
        return Ok(Reply::Unit);
    }
    let structure: Structure<'_> = body.deserialize().map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.signature().map(|s| s.to_string()).unwrap_or_default(),
    })?;
    Ok(Reply::Tuple(structure.fields().iter().map(lower).collect()))
}

fn lower(value: &Value<'_>) -> Reply {
    match value {
        Value::U8(v) => Reply::Int(i64::from(*v)),
        Value::Bool(b) => Reply::Bool(*b),
        Value::I16(v) => Reply::Int(i64::from(*v)),
        Value::U16(v) => Reply::Int(i64::from(*v)),
        Value::I32(v) => Reply::Int(i64::from(*v)),
        Value::U32(v) => Reply::Int(i64::from(*v)),
        Value::I64(v) => Reply::Int(*v),
        Value::U64(v) => i64::try_from(*v).map_or(Reply::Unit, Reply::Int),
        Value::F64(f) => Reply::Float(*f),
        Value::Str(s) => Reply::Str(s.as_str().to_owned()),
        Value::Signature(s) => Reply::Str(s.to_string()),
        Value::ObjectPath(p) => Reply::Str(p.to_string()),
        Value::Value(inner) => lower(inner),
        Value::Array(items) => Reply::List(items.iter().map(lower).collect()),
        Value::Dict(dict) => Reply::Record(
            dict.iter()
                .map(|(k, v)| (record_key(k), lower(v)))
                .collect(),
        ),
        Value::Structure(s) => Reply::Tuple(s.fields().iter().map(lower).collect()),
        #[allow(unreachable_patterns)]
        _ => Reply::Unit,
    }
}

fn record_key(key: &Value<'_>) -> String {
    match lower(key) {
        Reply::Str(s) => s,
        Reply::Int(v) => v.to_string(),
        other => format!("{other:?}"),
    }
}

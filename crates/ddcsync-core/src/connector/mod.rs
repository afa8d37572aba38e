// ── Service connector ──
//
// Binds exactly one backend for the life of the process and exposes the
// per-monitor verbs in domain types. Discovery order under `auto` is the
// D-Bus service, then the `ddcutil` command, then the simulated backend.

mod probe;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ddcsync_api::{
    BackendEvent, BusClient, CallFlags, CliClient, DisplayAddress, EventStreamHandle, ListMethod,
    Reading, ReadMethod, SimulatedBackend, WireFeature, WriteMethod,
};

use crate::config::{BackendPreference, EngineConfig};
use crate::error::CoreError;
use crate::model::{FeatureDefinition, MonitorDescriptor};

use self::probe::MethodResolver;

/// The kind of backend a connector ended up bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    Bus,
    Cli,
    Simulated,
}

enum Backend {
    Bus(BusClient),
    Cli(CliClient),
    Simulated(Arc<SimulatedBackend>),
}

pub struct ServiceConnector {
    backend: Backend,
    read: MethodResolver<ReadMethod>,
    write: MethodResolver<WriteMethod>,
    list: MethodResolver<ListMethod>,
    /// `None` until the first bulk read tells us whether `GetMultipleVcp` exists.
    bulk_read: OnceLock<bool>,
    raw_values: AtomicBool,
    skip_verify: AtomicBool,
    events: EventStreamHandle,
}

impl ServiceConnector {
    /// Discover and bind a backend according to `config.backend`.
    ///
    /// Under [`BackendPreference::Auto`] discovery falls back to simulation
    /// exactly once. A forced preference that fails to bind is an error.
    pub async fn connect(
        config: &EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let connector = match config.backend {
            BackendPreference::Bus => Self::connect_bus(config, cancel).await?,
            BackendPreference::Cli => Self::connect_cli(config).await?,
            BackendPreference::Simulated => {
                Self::simulated(Arc::new(SimulatedBackend::new()), config)
            }
            BackendPreference::Auto => match Self::connect_bus(config, cancel).await {
                Ok(connector) => connector,
                Err(bus_err) => {
                    debug!(error = %bus_err, "no D-Bus service, trying ddcutil command");
                    match Self::connect_cli(config).await {
                        Ok(connector) => connector,
                        Err(cli_err) => {
                            warn!(
                                bus_error = %bus_err,
                                cli_error = %cli_err,
                                "no monitor control backend found, using simulated monitors"
                            );
                            Self::simulated(Arc::new(SimulatedBackend::new()), config)
                        }
                    }
                }
            },
        };
        info!(backend = %connector.kind(), target = %connector.describe(), "backend bound");
        Ok(connector)
    }

    async fn connect_bus(
        config: &EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let client = BusClient::connect(&config.bus)
            .await
            .map_err(|e| CoreError::BackendUnavailable {
                reason: e.to_string(),
            })?;
        let events = match client.subscribe(cancel.child_token()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "signal subscription failed, pushes disabled");
                EventStreamHandle::silent()
            }
        };
        Ok(Self::with_backend(Backend::Bus(client), events, config))
    }

    async fn connect_cli(config: &EngineConfig) -> Result<Self, CoreError> {
        let client = CliClient::new(&config.cli);
        let version = client
            .probe()
            .await
            .map_err(|e| CoreError::BackendUnavailable {
                reason: e.to_string(),
            })?;
        debug!(version = %version, "ddcutil command available");
        Ok(Self::with_backend(
            Backend::Cli(client),
            EventStreamHandle::silent(),
            config,
        ))
    }

    /// Bind an existing simulated backend (tests and `--backend simulated`).
    pub fn simulated(backend: Arc<SimulatedBackend>, config: &EngineConfig) -> Self {
        let events = backend.events();
        Self::with_backend(Backend::Simulated(backend), events, config)
    }

    fn with_backend(backend: Backend, events: EventStreamHandle, config: &EngineConfig) -> Self {
        Self {
            backend,
            read: MethodResolver::new(),
            write: MethodResolver::new(),
            list: MethodResolver::new(),
            bulk_read: OnceLock::new(),
            raw_values: AtomicBool::new(config.raw_values),
            skip_verify: AtomicBool::new(config.skip_verify),
            events,
        }
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn kind(&self) -> BackendKind {
        match self.backend {
            Backend::Bus(_) => BackendKind::Bus,
            Backend::Cli(_) => BackendKind::Cli,
            Backend::Simulated(_) => BackendKind::Simulated,
        }
    }

    /// Bus name, command or `simulated`.
    pub fn describe(&self) -> String {
        match &self.backend {
            Backend::Bus(client) => client.service_name().to_owned(),
            Backend::Cli(_) => "ddcutil".to_owned(),
            Backend::Simulated(_) => "simulated".to_owned(),
        }
    }

    /// Names of the methods resolved so far, per verb.
    pub fn resolved_methods(&self) -> BTreeMap<&'static str, &'static str> {
        use ddcsync_api::MethodCandidate;

        let mut out = BTreeMap::new();
        if let Some(m) = self.read.resolved() {
            out.insert(ReadMethod::VERB, m.method_name());
        }
        if let Some(m) = self.write.resolved() {
            out.insert(WriteMethod::VERB, m.method_name());
        }
        if let Some(m) = self.list.resolved() {
            out.insert(ListMethod::VERB, m.method_name());
        }
        out
    }

    // ── Session options ──────────────────────────────────────────────

    pub fn set_options(&self, raw_values: bool, skip_verify: bool) {
        self.raw_values.store(raw_values, Ordering::Relaxed);
        self.skip_verify.store(skip_verify, Ordering::Relaxed);
    }

    pub fn call_flags(&self) -> CallFlags {
        CallFlags::compose(
            0,
            self.raw_values.load(Ordering::Relaxed),
            self.skip_verify.load(Ordering::Relaxed),
        )
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BackendEvent>> {
        self.events.subscribe()
    }

    /// Stop the signal listener, if any.
    pub fn shutdown(&self) {
        self.events.shutdown();
    }

    // ── Verbs ────────────────────────────────────────────────────────

    /// Full detection.
    pub async fn detect(&self) -> Result<Vec<MonitorDescriptor>, CoreError> {
        let flags = self.call_flags();
        let records = match &self.backend {
            Backend::Bus(client) => client.detect(flags).await?,
            Backend::Cli(client) => client.detect().await?,
            Backend::Simulated(sim) => sim.detect(),
        };
        Ok(records.into_iter().map(MonitorDescriptor::from).collect())
    }

    /// Listing of already-detected monitors without re-probing hardware.
    ///
    /// The command line has no cheap listing; it runs a detection.
    pub async fn list_detected(&self) -> Result<Vec<MonitorDescriptor>, CoreError> {
        let flags = self.call_flags();
        let records = match &self.backend {
            Backend::Bus(client) => client.list_detected(flags).await?,
            Backend::Cli(client) => client.detect().await?,
            Backend::Simulated(sim) => sim.detect(),
        };
        Ok(records.into_iter().map(MonitorDescriptor::from).collect())
    }

    pub async fn get_capabilities(
        &self,
        descriptor: &MonitorDescriptor,
    ) -> Result<BTreeMap<u8, FeatureDefinition>, CoreError> {
        let address = DisplayAddress::from(descriptor);
        let flags = self.call_flags();
        let features: Vec<WireFeature> = match &self.backend {
            Backend::Bus(client) => {
                let address = &address;
                self.list
                    .call(move |m| client.list_features(m, address, flags))
                    .await?
            }
            Backend::Cli(client) => client
                .list_features(&address)
                .await
                .map_err(|e| with_edid(e, descriptor))?,
            Backend::Simulated(sim) => sim
                .capabilities(&address)
                .map_err(|e| with_edid(e, descriptor))?,
        };
        Ok(features
            .into_iter()
            .map(|wire| (wire.code, FeatureDefinition::from(wire)))
            .collect())
    }

    pub async fn get_value(
        &self,
        descriptor: &MonitorDescriptor,
        code: u8,
    ) -> Result<Reading, CoreError> {
        let address = DisplayAddress::from(descriptor);
        let flags = self.call_flags();
        match &self.backend {
            Backend::Bus(client) => {
                let address = &address;
                self.read
                    .call(move |m| client.read_value(m, address, code, flags))
                    .await
            }
            Backend::Cli(client) => client
                .read_value(&address, code)
                .await
                .map_err(|e| with_edid(e, descriptor)),
            Backend::Simulated(sim) => sim
                .read_value(&address, code)
                .map_err(|e| with_edid(e, descriptor)),
        }
    }

    /// Read several features. Uses the bulk call when the backend has one;
    /// otherwise reads one code at a time and skips codes that fail, unless
    /// every code fails.
    pub async fn get_values(
        &self,
        descriptor: &MonitorDescriptor,
        codes: &[u8],
    ) -> Result<BTreeMap<u8, Reading>, CoreError> {
        if codes.is_empty() {
            return Ok(BTreeMap::new());
        }
        let address = DisplayAddress::from(descriptor);
        match &self.backend {
            Backend::Simulated(sim) => {
                return sim
                    .read_values(&address, codes)
                    .map_err(|e| with_edid(e, descriptor));
            }
            Backend::Bus(client) if self.bulk_read.get() != Some(&false) => {
                match client.read_values(&address, codes, self.call_flags()).await {
                    Ok(readings) => {
                        let _ = self.bulk_read.set(true);
                        return Ok(readings);
                    }
                    Err(e) if e.is_unanswered() => {
                        debug!(error = %e, "no bulk read, falling back to per-feature reads");
                        let _ = self.bulk_read.set(false);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ => {}
        }

        let mut readings = BTreeMap::new();
        let mut last_error = None;
        for &code in codes {
            match self.get_value(descriptor, code).await {
                Ok(reading) => {
                    readings.insert(code, reading);
                }
                Err(e) => {
                    debug!(edid = %descriptor.edid, code, error = %e, "feature read failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if readings.is_empty() => Err(e),
            _ => Ok(readings),
        }
    }

    /// Write one value. `context` travels with the write so the echoed push
    /// can be recognized.
    pub async fn set_value(
        &self,
        descriptor: &MonitorDescriptor,
        code: u8,
        value: u16,
        context: &str,
    ) -> Result<(), CoreError> {
        let address = DisplayAddress::from(descriptor);
        let flags = self.call_flags();
        match &self.backend {
            Backend::Bus(client) => {
                let address = &address;
                self.write
                    .call(move |m| client.write_value(m, address, code, value, context, flags))
                    .await
            }
            Backend::Cli(client) => client
                .write_value(&address, code, value, flags)
                .await
                .map_err(|e| with_edid(e, descriptor)),
            Backend::Simulated(sim) => sim
                .write_value(&address, code, value, context)
                .map_err(|e| with_edid(e, descriptor)),
        }
    }
}

// ── Service-level verbs ──────────────────────────────────────────────

/// Largest sleep multiplier the service accepts.
pub const MAX_SLEEP_MULTIPLIER: f64 = 10.0;

/// What the bound backend reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub kind: BackendKind,
    pub target: String,
    /// Method names resolved so far, per verb.
    pub methods: BTreeMap<String, String>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl ServiceConnector {
    /// The monitor's unparsed MCCS capabilities string.
    pub async fn capabilities_string(
        &self,
        descriptor: &MonitorDescriptor,
    ) -> Result<String, CoreError> {
        let address = DisplayAddress::from(descriptor);
        let result = match &self.backend {
            Backend::Bus(client) => client.capabilities_string(&address, self.call_flags()).await,
            Backend::Cli(client) => client.capabilities_string(&address).await,
            Backend::Simulated(sim) => sim.capabilities_string(&address),
        };
        result.map_err(|e| with_edid(e, descriptor))
    }

    /// Metadata for one code as the monitor reports it, layered over the
    /// catalog entry.
    pub async fn feature_metadata(
        &self,
        descriptor: &MonitorDescriptor,
        code: u8,
    ) -> Result<FeatureDefinition, CoreError> {
        let address = DisplayAddress::from(descriptor);
        let result = match &self.backend {
            Backend::Bus(client) => {
                client
                    .feature_metadata(&address, code, self.call_flags())
                    .await
            }
            Backend::Cli(client) => client.feature_metadata(&address, code).await,
            Backend::Simulated(sim) => sim.feature_metadata(&address, code),
        };
        let metadata = result.map_err(|e| with_edid(e, descriptor))?;
        Ok(FeatureDefinition::from(WireFeature {
            code,
            metadata: Some(metadata),
        }))
    }

    pub async fn sleep_multiplier(&self, descriptor: &MonitorDescriptor) -> Result<f64, CoreError> {
        let address = DisplayAddress::from(descriptor);
        let result = match &self.backend {
            Backend::Bus(client) => client.sleep_multiplier(&address, self.call_flags()).await,
            Backend::Cli(_) => return Err(self.unsupported("sleep multipliers")),
            Backend::Simulated(sim) => sim.sleep_multiplier(&address),
        };
        result.map_err(|e| with_edid(e, descriptor))
    }

    /// Scale the DDC/CI sleep times for one monitor. `0.0` lets the
    /// library choose.
    pub async fn set_sleep_multiplier(
        &self,
        descriptor: &MonitorDescriptor,
        multiplier: f64,
    ) -> Result<(), CoreError> {
        if !(0.0..=MAX_SLEEP_MULTIPLIER).contains(&multiplier) {
            return Err(CoreError::InvalidSleepMultiplier { value: multiplier });
        }
        let address = DisplayAddress::from(descriptor);
        let result = match &self.backend {
            Backend::Bus(client) => {
                client
                    .set_sleep_multiplier(&address, multiplier, self.call_flags())
                    .await
            }
            Backend::Cli(_) => return Err(self.unsupported("sleep multipliers")),
            Backend::Simulated(sim) => sim.set_sleep_multiplier(&address, multiplier),
        };
        result.map_err(|e| with_edid(e, descriptor))
    }

    /// Restart the backend service with new library options.
    ///
    /// Readiness is announced later through [`BackendEvent::ServiceInitialized`].
    pub async fn restart(&self, options: &str, syslog_level: u32) -> Result<(), CoreError> {
        info!(options, syslog_level, "restarting backend service");
        match &self.backend {
            Backend::Bus(client) => Ok(client
                .restart(options, syslog_level, self.call_flags())
                .await?),
            Backend::Cli(_) => Err(self.unsupported("service restarts")),
            Backend::Simulated(sim) => {
                sim.restart(options);
                Ok(())
            }
        }
    }

    pub async fn service_info(&self) -> Result<ServiceInfo, CoreError> {
        let properties = match &self.backend {
            Backend::Bus(client) => client.properties().await?,
            Backend::Cli(client) => client.properties().await?,
            Backend::Simulated(sim) => sim.properties(),
        };
        Ok(ServiceInfo {
            kind: self.kind(),
            target: self.describe(),
            methods: self
                .resolved_methods()
                .into_iter()
                .map(|(verb, method)| (verb.to_owned(), method.to_owned()))
                .collect(),
            properties,
        })
    }

    fn unsupported(&self, operation: &str) -> CoreError {
        CoreError::Unsupported {
            backend: self.kind().to_string(),
            operation: operation.to_owned(),
        }
    }
}

impl std::fmt::Debug for ServiceConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConnector")
            .field("kind", &self.kind())
            .field("target", &self.describe())
            .field("flags", &self.call_flags())
            .finish_non_exhaustive()
    }
}

/// Attach the monitor identity to addressing errors.
fn with_edid(err: ddcsync_api::Error, descriptor: &MonitorDescriptor) -> CoreError {
    match err {
        ddcsync_api::Error::UnsupportedFeature(code) => CoreError::UnknownFeature {
            edid: descriptor.edid.to_string(),
            code,
        },
        ddcsync_api::Error::UnknownDisplay(_) => CoreError::UnknownMonitor {
            identifier: descriptor.edid.to_string(),
        },
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated() -> (Arc<SimulatedBackend>, ServiceConnector) {
        let sim = Arc::new(SimulatedBackend::new());
        let connector = ServiceConnector::simulated(Arc::clone(&sim), &EngineConfig::default());
        (sim, connector)
    }

    #[tokio::test]
    async fn forced_simulated_preference_binds_three_monitors() {
        let config = EngineConfig {
            backend: BackendPreference::Simulated,
            ..EngineConfig::default()
        };
        let connector = ServiceConnector::connect(&config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(connector.kind(), BackendKind::Simulated);
        assert_eq!(connector.detect().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn forced_cli_with_missing_program_is_an_error() {
        let mut config = EngineConfig {
            backend: BackendPreference::Cli,
            ..EngineConfig::default()
        };
        config.cli.program = "/nonexistent/ddcutil-for-tests".into();
        let err = ServiceConnector::connect(&config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_sim, connector) = simulated();
        let monitors = connector.detect().await.unwrap();
        let first = &monitors[0];

        connector.set_value(first, 0x10, 77, "ctx").await.unwrap();
        let reading = connector.get_value(first, 0x10).await.unwrap();
        assert_eq!(reading.current, 77);
        assert_eq!(reading.maximum, Some(100));
    }

    #[tokio::test]
    async fn capabilities_are_layered_over_the_catalog() {
        let (_sim, connector) = simulated();
        let monitors = connector.detect().await.unwrap();
        let caps = connector.get_capabilities(&monitors[0]).await.unwrap();
        assert_eq!(caps[&0x10].name, "Brightness");
        assert_eq!(caps[&0x10].maximum, Some(100));
        assert!(!caps[&0x60].choices.is_empty());
    }

    #[tokio::test]
    async fn unsupported_code_maps_to_unknown_feature() {
        let (_sim, connector) = simulated();
        let monitors = connector.detect().await.unwrap();
        let err = connector.get_value(&monitors[0], 0xF5).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownFeature { code: 0xF5, .. }));
    }

    #[tokio::test]
    async fn sleep_multiplier_is_range_checked() {
        let (_sim, connector) = simulated();
        let monitors = connector.detect().await.unwrap();
        let first = &monitors[0];

        connector.set_sleep_multiplier(first, 1.5).await.unwrap();
        let current = connector.sleep_multiplier(first).await.unwrap();
        assert!((current - 1.5).abs() < f64::EPSILON);

        for bad in [-0.5, 10.5, f64::NAN] {
            let err = connector.set_sleep_multiplier(first, bad).await.unwrap_err();
            assert!(matches!(err, CoreError::InvalidSleepMultiplier { .. }), "{err:?}");
        }
    }

    #[tokio::test]
    async fn metadata_is_layered_over_the_catalog() {
        let (_sim, connector) = simulated();
        let monitors = connector.detect().await.unwrap();
        let def = connector.feature_metadata(&monitors[0], 0x60).await.unwrap();
        assert_eq!(def.kind, crate::model::FeatureKind::Choice);
        assert_eq!(def.choices.len(), 3);

        let err = connector.feature_metadata(&monitors[0], 0xF5).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownFeature { code: 0xF5, .. }));
    }

    #[tokio::test]
    async fn service_info_reports_kind_and_properties() {
        let (sim, connector) = simulated();
        let info = connector.service_info().await.unwrap();
        assert_eq!(info.kind, BackendKind::Simulated);
        assert_eq!(info.properties["DdcutilVersion"], serde_json::json!("simulated"));

        connector.restart("", 0).await.unwrap();
        assert_eq!(sim.restarts().len(), 1);
    }

    #[test]
    fn options_feed_call_flags() {
        let (_sim, connector) = simulated();
        assert_eq!(connector.call_flags().bits(), 0);
        connector.set_options(true, true);
        assert_eq!(connector.call_flags().bits(), 6);
        connector.set_options(false, true);
        assert_eq!(connector.call_flags().bits(), 4);
    }
}

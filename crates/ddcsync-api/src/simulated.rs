//! In-memory backend used when no real backend is reachable.
//!
//! Fabricates three monitors with a handful of features each. Writes are
//! applied synchronously and echoed as [`BackendEvent::VcpValueChanged`],
//! the way the real service reports changes to its other clients.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;

use crate::error::Error;
use crate::events::{BackendEvent, EventStreamHandle};
use crate::types::{DisplayAddress, DisplayRecord, FeatureMetadata, Reading, WireFeature};

/// Source name attached to echoed write events.
pub const SIMULATED_SOURCE: &str = "ddcsync-simulated";

// ── Fixtures ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedFeature {
    pub current: u16,
    pub maximum: u16,
    pub metadata: FeatureMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedMonitor {
    pub record: DisplayRecord,
    pub features: BTreeMap<u8, SimulatedFeature>,
}

/// One write observed by the simulated backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub edid: String,
    pub code: u8,
    pub value: u16,
    pub context: String,
}

fn continuous(name: &str, current: u16, default_value: u16) -> SimulatedFeature {
    SimulatedFeature {
        current,
        maximum: 100,
        metadata: FeatureMetadata {
            name: Some(name.into()),
            continuous: true,
            minimum: Some(0),
            maximum: Some(100),
            default_value: Some(default_value),
            ..FeatureMetadata::default()
        },
    }
}

fn choice(name: &str, current: u16, maximum: u16, choices: &[(u16, &str)]) -> SimulatedFeature {
    SimulatedFeature {
        current,
        maximum,
        metadata: FeatureMetadata {
            name: Some(name.into()),
            complex: true,
            choices: choices.iter().map(|(v, l)| (*v, (*l).to_owned())).collect(),
            ..FeatureMetadata::default()
        },
    }
}

fn fabricate(index: i32, name: &str) -> SimulatedMonitor {
    let edid = format!("MOCK-{name}-{index:02}");
    let bus = (8 + index).to_string();
    let model = format!("{name} {index}");
    let attributes = BTreeMap::from([
        ("bus".to_owned(), serde_json::json!(format!("i2c-{bus}"))),
        ("address".to_owned(), serde_json::json!("0x37")),
        ("mccs_version".to_owned(), serde_json::json!("2.2")),
    ]);

    let features = BTreeMap::from([
        (0x10, continuous("Brightness", 40, 50)),
        (0x12, continuous("Contrast", 50, 50)),
        (
            0x14,
            choice("Select Color Preset", 0x01, 0x0B, &[(0x01, "sRGB"), (0x05, "6500 K"), (0x08, "9300 K")]),
        ),
        (
            0x60,
            choice("Input Source", 0x0F, 0xFF, &[(0x0F, "DisplayPort-1"), (0x11, "HDMI-1"), (0x12, "HDMI-2")]),
        ),
        (0x62, continuous("Audio speaker volume", 20, 30)),
    ]);

    SimulatedMonitor {
        record: DisplayRecord {
            display_number: index,
            edid,
            manufacturer: Some("MCK".into()),
            model: Some(model),
            serial: Some(format!("SIM{index:04}")),
            bus: Some(bus),
            address: Some("0x37".into()),
            attributes,
        },
        features,
    }
}

// ── SimulatedBackend ─────────────────────────────────────────────────

pub struct SimulatedBackend {
    monitors: DashMap<String, SimulatedMonitor>,
    order: Mutex<Vec<String>>,
    writes: Mutex<Vec<WriteRecord>>,
    sleep_multipliers: DashMap<String, f64>,
    restarts: Mutex<Vec<String>>,
    events: EventStreamHandle,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::with_monitors(
            ["MockView", "ColorPro", "UltraWide"]
                .iter()
                .zip(1..)
                .map(|(name, index)| fabricate(index, name))
                .collect(),
        )
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_monitors(monitors: Vec<SimulatedMonitor>) -> Self {
        let order = monitors.iter().map(|m| m.record.edid.clone()).collect();
        Self {
            monitors: monitors
                .into_iter()
                .map(|m| (m.record.edid.clone(), m))
                .collect(),
            order: Mutex::new(order),
            writes: Mutex::new(Vec::new()),
            sleep_multipliers: DashMap::new(),
            restarts: Mutex::new(Vec::new()),
            events: EventStreamHandle::silent(),
        }
    }

    pub fn events(&self) -> EventStreamHandle {
        self.events.clone()
    }

    /// Publish an event as if the backend had pushed it.
    pub fn inject(&self, event: BackendEvent) {
        self.events.publish(event);
    }

    // ── Fixture mutation ─────────────────────────────────────────────

    /// Unplug a monitor. Returns it so it can be re-attached.
    pub fn detach(&self, edid: &str) -> Option<SimulatedMonitor> {
        let removed = self.monitors.remove(edid).map(|(_, m)| m);
        if removed.is_some() {
            self.order_mut().retain(|e| e != edid);
        }
        removed
    }

    /// Plug a monitor in (appended to detection order).
    pub fn attach(&self, monitor: SimulatedMonitor) {
        let edid = monitor.record.edid.clone();
        if self.monitors.insert(edid.clone(), monitor).is_none() {
            self.order_mut().push(edid);
        }
    }

    /// Change descriptive fields of an attached monitor.
    pub fn update_record(&self, edid: &str, f: impl FnOnce(&mut DisplayRecord)) -> bool {
        self.monitors.get_mut(edid).is_some_and(|mut m| {
            f(&mut m.record);
            true
        })
    }

    /// Every write seen so far, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Option strings of every restart requested so far.
    pub fn restarts(&self) -> Vec<String> {
        self.restarts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn order_mut(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Backend verbs ────────────────────────────────────────────────

    pub fn detect(&self) -> Vec<DisplayRecord> {
        self.order_mut()
            .iter()
            .filter_map(|edid| self.monitors.get(edid).map(|m| m.record.clone()))
            .collect()
    }

    pub fn capabilities(&self, display: &DisplayAddress) -> Result<Vec<WireFeature>, Error> {
        let monitor = self.monitor(display)?;
        Ok(monitor
            .features
            .iter()
            .map(|(code, feature)| {
                let mut metadata = feature.metadata.clone();
                metadata.maximum = metadata.maximum.or(Some(feature.maximum));
                WireFeature {
                    code: *code,
                    metadata: Some(metadata),
                }
            })
            .collect())
    }

    pub fn read_value(&self, display: &DisplayAddress, code: u8) -> Result<Reading, Error> {
        let monitor = self.monitor(display)?;
        let feature = monitor
            .features
            .get(&code)
            .ok_or(Error::UnsupportedFeature(code))?;
        Ok(Reading::new(feature.current, Some(feature.maximum)))
    }

    pub fn read_values(
        &self,
        display: &DisplayAddress,
        codes: &[u8],
    ) -> Result<BTreeMap<u8, Reading>, Error> {
        let monitor = self.monitor(display)?;
        Ok(codes
            .iter()
            .filter_map(|code| {
                let f = monitor.features.get(code)?;
                Some((*code, Reading::new(f.current, Some(f.maximum))))
            })
            .collect())
    }

    pub fn write_value(
        &self,
        display: &DisplayAddress,
        code: u8,
        value: u16,
        context: &str,
    ) -> Result<(), Error> {
        let display_number = {
            let mut monitor = self
                .monitors
                .get_mut(&display.edid)
                .ok_or_else(|| Error::UnknownDisplay(display.edid.clone()))?;
            let feature = monitor
                .features
                .get_mut(&code)
                .ok_or(Error::UnsupportedFeature(code))?;
            feature.current = value.min(feature.maximum);
            monitor.record.display_number
        };

        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WriteRecord {
                edid: display.edid.clone(),
                code,
                value,
                context: context.to_owned(),
            });
        self.events.publish(BackendEvent::VcpValueChanged {
            display_number,
            edid: display.edid.clone(),
            code,
            new_value: value,
            source_name: SIMULATED_SOURCE.into(),
            source_context: context.to_owned(),
            flags: 0,
        });
        Ok(())
    }

    /// Synthesize an MCCS capabilities string from the fixture.
    pub fn capabilities_string(&self, display: &DisplayAddress) -> Result<String, Error> {
        let monitor = self.monitor(display)?;
        let vcp = monitor
            .features
            .iter()
            .map(|(code, feature)| {
                if feature.metadata.choices.is_empty() {
                    format!("{code:02X}")
                } else {
                    let values: Vec<_> = feature
                        .metadata
                        .choices
                        .keys()
                        .map(|v| format!("{v:02X}"))
                        .collect();
                    format!("{code:02X}({})", values.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        let model = monitor.record.model.as_deref().unwrap_or_default();
        Ok(format!(
            "(prot(monitor)type(LCD)model({model})cmds(01 02 03 0C E3 F3)vcp({vcp})mccs_ver(2.2))"
        ))
    }

    pub fn feature_metadata(
        &self,
        display: &DisplayAddress,
        code: u8,
    ) -> Result<FeatureMetadata, Error> {
        let monitor = self.monitor(display)?;
        monitor
            .features
            .get(&code)
            .map(|f| f.metadata.clone())
            .ok_or(Error::UnsupportedFeature(code))
    }

    pub fn sleep_multiplier(&self, display: &DisplayAddress) -> Result<f64, Error> {
        self.monitor(display)?;
        Ok(self.sleep_multipliers.get(&display.edid).map_or(1.0, |m| *m))
    }

    pub fn set_sleep_multiplier(
        &self,
        display: &DisplayAddress,
        multiplier: f64,
    ) -> Result<(), Error> {
        self.monitor(display)?;
        self.sleep_multipliers.insert(display.edid.clone(), multiplier);
        Ok(())
    }

    /// Record the restart and announce readiness the way the service does.
    pub fn restart(&self, options: &str) {
        self.restarts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(options.to_owned());
        self.events.publish(BackendEvent::ServiceInitialized);
    }

    pub fn properties(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("ServiceInterfaceVersion".to_owned(), serde_json::json!("1.0.0")),
            ("DdcutilVersion".to_owned(), serde_json::json!("simulated")),
            ("ServiceParametersLocked".to_owned(), serde_json::json!(false)),
            ("ServiceInfoLogging".to_owned(), serde_json::json!(false)),
            ("ServiceEmitConnectivitySignals".to_owned(), serde_json::json!(true)),
            ("DdcutilDynamicSleep".to_owned(), serde_json::json!(true)),
            ("DdcutilOutputLevel".to_owned(), serde_json::json!(8)),
            ("ServicePollInterval".to_owned(), serde_json::json!(30)),
            ("ServicePollCascadeInterval".to_owned(), serde_json::json!(0.5)),
        ])
    }

    fn monitor(
        &self,
        display: &DisplayAddress,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, SimulatedMonitor>, Error> {
        self.monitors
            .get(&display.edid)
            .ok_or_else(|| Error::UnknownDisplay(display.edid.clone()))
    }
}

impl std::fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("monitors", &self.monitors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(backend: &SimulatedBackend) -> DisplayAddress {
        backend.detect()[0].address()
    }

    #[test]
    fn fabricates_three_monitors_in_order() {
        let backend = SimulatedBackend::new();
        let numbers: Vec<_> = backend.detect().iter().map(|d| d.display_number).collect();
        assert_eq!(numbers, [1, 2, 3]);
    }

    #[test]
    fn set_then_get_round_trips() {
        let backend = SimulatedBackend::new();
        let display = first(&backend);
        backend.write_value(&display, 0x10, 73, "ctx").unwrap();
        assert_eq!(
            backend.read_value(&display, 0x10).unwrap(),
            Reading::new(73, Some(100))
        );
        assert_eq!(backend.writes().len(), 1);
    }

    #[tokio::test]
    async fn writes_are_echoed_as_events() {
        let backend = SimulatedBackend::new();
        let mut rx = backend.events().subscribe();
        let display = first(&backend);
        backend.write_value(&display, 0x12, 10, "me").unwrap();

        match &*rx.recv().await.unwrap() {
            BackendEvent::VcpValueChanged {
                code,
                new_value,
                source_context,
                ..
            } => {
                assert_eq!((*code, *new_value), (0x12, 10));
                assert_eq!(source_context, "me");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_feature_is_rejected() {
        let backend = SimulatedBackend::new();
        let display = first(&backend);
        assert!(matches!(
            backend.read_value(&display, 0xEE),
            Err(Error::UnsupportedFeature(0xEE))
        ));
    }

    #[test]
    fn capabilities_string_lists_features_and_choices() {
        let backend = SimulatedBackend::new();
        let caps = backend.capabilities_string(&first(&backend)).unwrap();
        assert!(caps.starts_with("(prot(monitor)"), "{caps}");
        assert!(caps.contains("model(MockView 1)"), "{caps}");
        assert!(caps.contains("vcp(10 12 14(01 05 08) 60(0F 11 12) 62)"), "{caps}");
    }

    #[test]
    fn sleep_multiplier_is_per_monitor() {
        let backend = SimulatedBackend::new();
        let displays: Vec<_> = backend.detect().iter().map(DisplayRecord::address).collect();
        backend.set_sleep_multiplier(&displays[0], 2.5).unwrap();
        assert!((backend.sleep_multiplier(&displays[0]).unwrap() - 2.5).abs() < f64::EPSILON);
        assert!((backend.sleep_multiplier(&displays[1]).unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn restart_announces_initialization() {
        let backend = SimulatedBackend::new();
        let mut rx = backend.events().subscribe();
        backend.restart("--disable-dynamic-sleep");
        assert_eq!(*rx.recv().await.unwrap(), BackendEvent::ServiceInitialized);
        assert_eq!(backend.restarts(), ["--disable-dynamic-sleep"]);
    }

    #[test]
    fn detach_and_attach_change_detection() {
        let backend = SimulatedBackend::new();
        let edid = backend.detect()[1].edid.clone();
        let monitor = backend.detach(&edid).unwrap();
        assert_eq!(backend.detect().len(), 2);
        backend.attach(monitor);
        assert_eq!(backend.detect().last().map(|d| d.edid.clone()), Some(edid));
    }
}

//! `ddcsync detect`: list connected monitors.

use serde::Serialize;
use tabled::Tabled;

use ddcsync_core::{Engine, MonitorDescriptor, MonitorState};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::util::Settings;

#[derive(Debug, Serialize)]
struct MonitorView {
    #[serde(flatten)]
    descriptor: MonitorDescriptor,
    feature_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    capability_error: Option<String>,
}

impl From<&MonitorState> for MonitorView {
    fn from(m: &MonitorState) -> Self {
        Self {
            descriptor: (*m.descriptor()).clone(),
            feature_count: m.capability_codes().len(),
            capability_error: m.capability_error().map(|e| (*e).clone()),
        }
    }
}

#[derive(Tabled)]
struct MonitorRow {
    #[tabled(rename = "#")]
    display: i32,
    #[tabled(rename = "EDID")]
    edid: String,
    #[tabled(rename = "Mfr")]
    manufacturer: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "Bus")]
    bus: String,
    #[tabled(rename = "Features")]
    features: String,
}

impl From<&MonitorView> for MonitorRow {
    fn from(v: &MonitorView) -> Self {
        let d = &v.descriptor;
        Self {
            display: d.display_number,
            edid: d.edid.short().to_owned(),
            manufacturer: d.manufacturer.clone().unwrap_or_default(),
            model: d.model.clone().unwrap_or_default(),
            serial: d.serial.clone().unwrap_or_default(),
            bus: d.bus.clone().unwrap_or_default(),
            features: match &v.capability_error {
                Some(_) => "error".into(),
                None => v.feature_count.to_string(),
            },
        }
    }
}

pub async fn handle(settings: &Settings, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = Engine::oneshot(settings.engine.clone(), |engine| async move {
        tracing::info!(backend = %engine.backend_kind(), "detected monitors");
        Ok(engine.snapshot())
    })
    .await?;

    let views: Vec<MonitorView> = snapshot.iter().map(|m| MonitorView::from(&**m)).collect();
    let out = output::render_list(
        settings.output,
        &views,
        |v| MonitorRow::from(v),
        |v| v.descriptor.edid.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

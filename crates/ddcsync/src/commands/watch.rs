//! `ddcsync watch`: stream change notifications until Ctrl-C.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use ddcsync_core::{Edid, Engine, StoreEvent};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output::{self, Painter};

use super::util::{self, Settings};

#[derive(Debug, Serialize)]
struct WatchLine<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a StoreEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<String>,
}

pub async fn handle(args: WatchArgs, settings: &Settings, global: &GlobalOpts) -> Result<(), CliError> {
    let engine = Engine::start(settings.engine.clone()).await?;
    let result = watch_loop(&engine, args, settings, global).await;
    engine.shutdown().await;
    result
}

async fn watch_loop(
    engine: &Engine,
    args: WatchArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let filter: Option<Edid> = match &args.monitor {
        Some(identifier) => {
            Some(util::resolve_monitor(&engine.snapshot(), identifier)?.edid().clone())
        }
        None => None,
    };
    let painter = Painter::new(settings.color);
    let raw = settings.engine.raw_values;

    tracing::info!(
        backend = %engine.connector().describe(),
        monitors = engine.snapshot().len(),
        "watching for changes"
    );

    let mut events = engine.events();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if !matches_filter(&event, filter.as_ref()) {
                        continue;
                    }
                    let line = render_event(engine, &event, settings.output, painter, raw);
                    output::print_output(&line, global.quiet);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch fell behind; some changes were not shown");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn matches_filter(event: &StoreEvent, filter: Option<&Edid>) -> bool {
    match (event, filter) {
        (StoreEvent::FeatureChanged { edid, .. }, Some(wanted)) => edid == wanted,
        _ => true,
    }
}

fn render_event(
    engine: &Engine,
    event: &StoreEvent,
    format: OutputFormat,
    painter: Painter,
    raw: bool,
) -> String {
    let at = Utc::now();
    let reading = match event {
        StoreEvent::FeatureChanged { edid, code, .. } => engine
            .monitor(edid.as_str())
            .and_then(|m| m.value(*code))
            .map(|v| {
                let display = util::display_value(v.definition.as_deref(), v.current, raw);
                (v.current, display)
            }),
        _ => None,
    };

    let line = WatchLine {
        at,
        event,
        value: reading.as_ref().map(|(v, _)| *v),
        display: reading.map(|(_, d)| d),
    };

    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            serde_json::to_string(&line).unwrap_or_default()
        }
        OutputFormat::Yaml => {
            let mut doc = String::from("---\n");
            doc.push_str(&serde_yaml::to_string(&line).unwrap_or_default());
            doc
        }
        OutputFormat::Table | OutputFormat::Plain => text_line(&line, painter, engine.snapshot().len()),
    }
}

fn text_line(line: &WatchLine<'_>, painter: Painter, monitor_count: usize) -> String {
    let stamp = painter.dim(&line.at.format("%H:%M:%S%.3f").to_string());
    match line.event {
        StoreEvent::MonitorsChanged => {
            format!("{stamp} monitors changed ({monitor_count} connected)")
        }
        StoreEvent::FeatureChanged {
            display_number,
            edid,
            code,
        } => format!(
            "{stamp} #{display_number} {} 0x{code:02X} = {}",
            painter.accent(edid.short()),
            line.display.as_deref().unwrap_or("?"),
        ),
        StoreEvent::Error { message } => format!("{stamp} {}", painter.error(message)),
    }
}

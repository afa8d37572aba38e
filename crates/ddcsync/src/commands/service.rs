//! `ddcsync sleep-multiplier` and `ddcsync service`.

use serde::Serialize;

use ddcsync_core::ServiceInfo;

use crate::cli::{GlobalOpts, ServiceArgs, ServiceCommand, SleepMultiplierArgs};
use crate::error::CliError;
use crate::output;

use super::util::{self, Settings};

#[derive(Debug, Serialize)]
struct MultiplierView {
    edid: String,
    sleep_multiplier: f64,
}

fn info_detail(info: &ServiceInfo) -> String {
    let mut lines = vec![
        format!("Backend:  {}", info.kind),
        format!("Target:   {}", info.target),
    ];
    if !info.methods.is_empty() {
        lines.push("Methods:".into());
        lines.extend(
            info.methods
                .iter()
                .map(|(verb, method)| format!("  {verb:<14} {method}")),
        );
    }
    if !info.properties.is_empty() {
        lines.push("Properties:".into());
        lines.extend(info.properties.iter().map(|(key, value)| {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_owned);
            format!("  {key:<32} {value}")
        }));
    }
    lines.join("\n")
}

pub async fn handle_sleep(
    args: SleepMultiplierArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let view = util::with_engine(settings.engine.clone(), |engine| async move {
        let monitor = util::resolve_monitor(&engine.snapshot(), &args.monitor)?;
        if let Some(value) = args.value {
            tracing::debug!(edid = %monitor.edid(), value, "setting sleep multiplier");
            engine.set_sleep_multiplier(monitor.edid(), value).await?;
        }
        let sleep_multiplier = engine.sleep_multiplier(monitor.edid()).await?;
        Ok(MultiplierView {
            edid: monitor.edid().to_string(),
            sleep_multiplier,
        })
    })
    .await?;

    let out = output::render_single(
        settings.output,
        &view,
        |v| format!("{}: sleep multiplier {}", v.edid, v.sleep_multiplier),
        |v| v.sleep_multiplier.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle(
    args: ServiceArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ServiceCommand::Info => {
            let info = util::with_engine(settings.engine.clone(), |engine| async move {
                Ok(engine.service_info().await?)
            })
            .await?;
            let out = output::render_single(settings.output, &info, info_detail, |i| {
                i.target.clone()
            });
            output::print_output(&out, global.quiet);
        }
        ServiceCommand::Restart {
            options,
            syslog_level,
        } => {
            util::with_engine(settings.engine.clone(), |engine| async move {
                Ok(engine.restart_service(&options, syslog_level).await?)
            })
            .await?;
            output::print_output("Restart requested", global.quiet);
        }
    }
    Ok(())
}

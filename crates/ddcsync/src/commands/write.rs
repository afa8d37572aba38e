//! `ddcsync set` and `ddcsync reset`.

use std::sync::Arc;

use ddcsync_core::catalog;

use crate::cli::{GetArgs, GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

use super::features::FeatureView;
use super::util::{self, Settings};

fn print_written(view: &FeatureView, settings: &Settings, global: &GlobalOpts) {
    let out = output::render_single(
        settings.output,
        view,
        |v| {
            format!(
                "0x{:02X} {} on {} = {}",
                v.code,
                v.name,
                v.edid,
                v.display.as_deref().unwrap_or("-")
            )
        },
        |v| v.current.map(|c| c.to_string()).unwrap_or_default(),
    );
    output::print_output(&out, global.quiet);
}

pub async fn handle_set(
    args: SetArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let raw = settings.engine.raw_values;

    let view = util::with_engine(settings.engine.clone(), |engine| async move {
        let snapshot = engine.snapshot();
        let monitor = util::resolve_monitor(&snapshot, &args.monitor)?;
        let code = util::resolve_feature(Some(&monitor), &args.feature)?;

        let definition = monitor
            .capability(code)
            .or_else(|| catalog::definition_for(code).cloned().map(Arc::new));
        let value = util::parse_value(definition.as_deref(), &args.value, raw)?;

        tracing::debug!(edid = %monitor.edid(), code, value, "writing");
        engine.write_value(monitor.edid(), code, value).await?;
        Ok(FeatureView::build(&monitor, code, raw))
    })
    .await?;

    print_written(&view, settings, global);
    Ok(())
}

pub async fn handle_reset(
    args: GetArgs,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let raw = settings.engine.raw_values;

    let view = util::with_engine(settings.engine.clone(), |engine| async move {
        let snapshot = engine.snapshot();
        let monitor = util::resolve_monitor(&snapshot, &args.monitor)?;
        let code = util::resolve_feature(Some(&monitor), &args.feature)?;

        let written = engine.reset_feature(monitor.edid(), code).await?;
        tracing::debug!(edid = %monitor.edid(), code, written, "reset");
        Ok(FeatureView::build(&monitor, code, raw))
    })
    .await?;

    print_written(&view, settings, global);
    Ok(())
}

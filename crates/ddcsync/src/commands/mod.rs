//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod catalog;
pub mod config_cmd;
pub mod detect;
pub mod features;
pub mod service;
pub mod util;
pub mod watch;
pub mod write;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

use util::Settings;

/// Dispatch a backend-bound command to its handler.
pub async fn dispatch(
    cmd: Command,
    settings: &Settings,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Detect => detect::handle(settings, global).await,
        Command::Features(args) => features::handle_list(args, settings, global).await,
        Command::Get(args) => features::handle_get(args, settings, global).await,
        Command::Set(args) => write::handle_set(args, settings, global).await,
        Command::Reset(args) => write::handle_reset(args, settings, global).await,
        Command::Capabilities(args) => features::handle_capabilities(args, settings, global).await,
        Command::Describe(args) => features::handle_describe(args, settings, global).await,
        Command::SleepMultiplier(args) => service::handle_sleep(args, settings, global).await,
        Command::Service(args) => service::handle(args, settings, global).await,
        Command::Watch(args) => watch::handle(args, settings, global).await,
        // Handled before dispatch
        Command::Catalog(_) | Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}

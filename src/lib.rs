pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::resolve_workspace_root;
use application::commands::{
    add_entry_impl, copy_now_impl, edit_entry_impl, history_impl, note_impl, remove_entry_impl,
    reset_impl, set_slot_impl, set_status_impl, settings_impl, show_impl, today_impl, watch_impl,
    AppState,
};
use clap::Parser;
use cli::{Cli, Command};
use infrastructure::error::InfraError;
use serde::Serialize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn to_json<T: Serialize>(value: &T) -> Result<String, InfraError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn dispatch(state: &AppState, command: Command) -> Result<String, InfraError> {
    match command {
        Command::Today => to_json(&today_impl(state)?),
        Command::Add {
            hour,
            segment,
            content,
        } => to_json(&add_entry_impl(state, hour, segment, content)?),
        Command::Edit {
            hour,
            segment,
            index,
            content,
        } => to_json(&edit_entry_impl(state, hour, segment, index, content)?),
        Command::Remove {
            hour,
            segment,
            index,
        } => to_json(&remove_entry_impl(state, hour, segment, index)?),
        Command::Status {
            hour,
            segment,
            index,
            status,
        } => to_json(&set_status_impl(state, hour, segment, index, status)?),
        Command::SetSlot {
            hour,
            segment,
            text,
        } => to_json(&set_slot_impl(state, hour, segment, text)?),
        Command::Note { text } => to_json(&note_impl(state, text)?),
        Command::CopyNow { content } => to_json(&copy_now_impl(state, content)?),
        Command::Reset => to_json(&reset_impl(state)?),
        Command::History => to_json(&history_impl(state)?),
        Command::Show { date } => to_json(&show_impl(state, date)?),
        Command::Settings {
            start,
            end,
            segments,
            timezone,
        } => to_json(&settings_impl(state, start, end, segments, timezone)?),
        Command::Watch => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let summary = runtime.block_on(watch_impl(state, async {
                if let Err(error) = tokio::signal::ctrl_c().await {
                    tracing::warn!(%error, "failed to listen for Ctrl-C");
                }
            }))?;
            to_json(&summary)
        }
    }
}

pub fn run() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let state = match resolve_workspace_root(cli.root.clone()).and_then(AppState::new) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("ERROR: {error}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.name();
    match dispatch(&state, cli.command) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("ERROR: {}", state.command_error(command, &error));
            ExitCode::FAILURE
        }
    }
}

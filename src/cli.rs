use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Daily time-slot tracker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Workspace directory (defaults to $EFFICIENCY_TRACKER_HOME or ~/.efficiency-tracker)
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show today's grid, regridded to the current settings
    Today,
    /// Add a task to a slot
    ///
    /// Example: efficiency-tracker add 2 0 "Standup"
    Add {
        hour: usize,
        segment: usize,
        content: String,
    },
    /// Rename a task inside a slot
    ///
    /// Example: efficiency-tracker edit 2 0 0 "Standup with design"
    Edit {
        hour: usize,
        segment: usize,
        index: usize,
        content: String,
    },
    /// Remove a task from a slot
    Remove {
        hour: usize,
        segment: usize,
        index: usize,
    },
    /// Set a task's status; repeating the current status resets it to initial
    ///
    /// Example: efficiency-tracker status 2 0 0 completed
    Status {
        hour: usize,
        segment: usize,
        index: usize,
        status: String,
    },
    /// Replace the raw text of a slot
    SetSlot {
        hour: usize,
        segment: usize,
        text: String,
    },
    /// Replace today's free-form note
    Note { text: String },
    /// Copy a task into the slot covering the current time
    CopyNow { content: String },
    /// Clear today's grid, note and copied-task log
    Reset,
    /// List recorded days, newest first
    History,
    /// Show a day by date or URL hint, e.g. "?date=2026-02-14"
    Show { date: Option<String> },
    /// Show or change the grid settings
    Settings {
        #[arg(long)]
        start: Option<u32>,
        #[arg(long)]
        end: Option<u32>,
        #[arg(long)]
        segments: Option<u32>,
        /// IANA zone used for "today", e.g. Europe/Berlin
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Keep today's record rolling over at local midnight until Ctrl-C
    Watch,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Add { .. } => "add",
            Self::Edit { .. } => "edit",
            Self::Remove { .. } => "remove",
            Self::Status { .. } => "status",
            Self::SetSlot { .. } => "set-slot",
            Self::Note { .. } => "note",
            Self::CopyNow { .. } => "copy-now",
            Self::Reset => "reset",
            Self::History => "history",
            Self::Show { .. } => "show",
            Self::Settings { .. } => "settings",
            Self::Watch => "watch",
        }
    }
}

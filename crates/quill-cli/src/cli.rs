use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quill_core::EntryKind;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Offline-first journaling from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the entries API
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Bearer token sent to the entries API
    #[arg(long, global = true, value_name = "TOKEN")]
    pub access_token: Option<String>,

    /// Signed-in user that owns the journal
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,

    /// Path to a JSON sync configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a new entry
    #[command(alias = "add")]
    New {
        /// Entry kind
        #[arg(short, long, default_value = "freeform")]
        kind: EntryKind,
        /// Journal day (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Entry text; blank lines separate paragraphs
        text: Vec<String>,
    },
    /// Edit an existing entry
    Edit {
        /// Entry ID or unique ID prefix; defaults to the last viewed entry
        id: Option<String>,
        /// Replacement text; opens $EDITOR when omitted
        #[arg(last = true)]
        text: Vec<String>,
    },
    /// Delete an entry
    Delete {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// List entries, newest day first
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only entries for this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show changes waiting to be pushed
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pull remote changes and push queued local changes
    Sync {
        /// Ignore backoff and retry failed changes immediately
        #[arg(long)]
        now: bool,
    },
}

//! Quill CLI - offline-first journaling from the terminal
//!
//! Every write lands in the local database first; `quill sync` pushes the
//! queued changes once a server is reachable.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::Settings;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::new::run_new;
use crate::commands::queue::run_queue;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quill=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(&cli)?;

    match cli.command {
        Commands::New { kind, date, text } => run_new(kind, date, &text, &settings)?,
        Commands::Edit { id, text } => run_edit(id.as_deref(), &text, &settings)?,
        Commands::Delete { id } => run_delete(&id, &settings)?,
        Commands::List { limit, date, json } => run_list(limit, date, json, &settings)?,
        Commands::Queue { json } => run_queue(json, &settings)?,
        Commands::Sync { now } => run_sync(now, &settings).await?,
    }

    Ok(())
}

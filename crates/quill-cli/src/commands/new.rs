use chrono::{Local, NaiveDate};
use quill_core::{EntryKind, EventBus};

use crate::commands::common::{now_ms, open_manager, resolve_entry_text, text_to_blocks, Settings};
use crate::error::CliError;

pub fn run_new(
    kind: EntryKind,
    date: Option<NaiveDate>,
    text_parts: &[String],
    settings: &Settings,
) -> Result<(), CliError> {
    let owner = settings.require_user()?;
    let text = resolve_entry_text(text_parts)?;
    let manager = open_manager(settings, EventBus::default())?;

    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let entry = manager.create_entry(owner, date, kind)?;
    let entry = manager
        .update_entry(&entry.id, text_to_blocks(&text, &[], now_ms()))?
        .unwrap_or(entry);
    manager.mark_viewed(&entry.id)?;

    println!("{}", entry.id);
    Ok(())
}

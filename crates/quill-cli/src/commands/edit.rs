use quill_core::EventBus;

use crate::commands::common::{
    capture_editor_input_with_initial, entry_text, normalize_content, normalize_entry_identifier,
    now_ms, open_manager, resolve_entry, text_to_blocks, Settings,
};
use crate::error::CliError;

pub fn run_edit(id: Option<&str>, text_parts: &[String], settings: &Settings) -> Result<(), CliError> {
    let owner = settings.require_user()?;
    let manager = open_manager(settings, EventBus::default())?;

    let entry = match id {
        Some(id) => resolve_entry(&normalize_entry_identifier(id)?, owner, &manager)?,
        None => manager
            .most_recently_viewed(owner)?
            .ok_or(CliError::NothingViewed)?,
    };

    let current = entry_text(&entry);
    let edited = match normalize_content(&text_parts.join(" ")) {
        Some(text) => text,
        None => capture_editor_input_with_initial(&current)?.ok_or(CliError::EmptyContent)?,
    };

    manager.mark_viewed(&entry.id)?;
    if edited == current {
        println!("{}", entry.id);
        return Ok(());
    }

    let updated = manager
        .update_entry(&entry.id, text_to_blocks(&edited, &entry.blocks, now_ms()))?
        .ok_or_else(|| CliError::EntryNotFound(entry.id.to_string()))?;
    println!("{}", updated.id);
    Ok(())
}

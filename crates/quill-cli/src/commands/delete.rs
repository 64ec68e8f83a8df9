use quill_core::EventBus;

use crate::commands::common::{normalize_entry_identifier, open_manager, resolve_entry, Settings};
use crate::error::CliError;

pub fn run_delete(id: &str, settings: &Settings) -> Result<(), CliError> {
    let owner = settings.require_user()?;
    let normalized_id = normalize_entry_identifier(id)?;
    let manager = open_manager(settings, EventBus::default())?;
    let entry = resolve_entry(&normalized_id, owner, &manager)?;

    manager.delete_entry(&entry.id)?;
    println!("{}", entry.id);
    Ok(())
}

use std::collections::HashSet;

use chrono::NaiveDate;
use quill_core::EventBus;

use crate::commands::common::{
    entry_to_list_item, format_entry_lines, now_ms, open_manager, EntryListItem, Settings,
};
use crate::error::CliError;

pub fn run_list(
    limit: usize,
    date: Option<NaiveDate>,
    as_json: bool,
    settings: &Settings,
) -> Result<(), CliError> {
    let owner = settings.require_user()?;
    let manager = open_manager(settings, EventBus::default())?;

    let queued = manager
        .pending_tasks()?
        .into_iter()
        .map(|task| task.entry_id)
        .collect::<HashSet<_>>();
    let listed = match date {
        Some(date) => manager.entries_for_date(owner, date)?,
        None => manager.list_entries(owner)?,
    };
    let entries = listed
        .into_iter()
        .take(limit)
        .map(|entry| {
            let unsynced = entry.id.is_temporary() || queued.contains(&entry.id);
            (entry, unsynced)
        })
        .collect::<Vec<_>>();
    let now = now_ms();

    if as_json {
        let json_items = entries
            .iter()
            .map(|(entry, unsynced)| entry_to_list_item(entry, *unsynced, now))
            .collect::<Vec<EntryListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_entry_lines(&entries, now) {
            println!("{line}");
        }
    }

    Ok(())
}

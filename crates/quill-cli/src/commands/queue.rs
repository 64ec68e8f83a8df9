use quill_core::EventBus;

use crate::commands::common::{format_queue_lines, open_manager, task_to_queue_item, QueueItem, Settings};
use crate::error::CliError;

pub fn run_queue(as_json: bool, settings: &Settings) -> Result<(), CliError> {
    let manager = open_manager(settings, EventBus::default())?;
    let tasks = manager.pending_tasks()?;

    if as_json {
        let json_items = tasks.iter().map(task_to_queue_item).collect::<Vec<QueueItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("Nothing waiting to sync.");
        return Ok(());
    }

    for line in format_queue_lines(&tasks) {
        println!("{line}");
    }
    Ok(())
}

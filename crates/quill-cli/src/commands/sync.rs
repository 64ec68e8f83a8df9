use quill_core::{AppEvent, EventBus, SyncEvent, SyncReport};
use tokio::sync::broadcast::Receiver;

use crate::commands::common::{open_manager, Settings};
use crate::error::CliError;

pub async fn run_sync(now: bool, settings: &Settings) -> Result<(), CliError> {
    let owner = settings.require_user()?;
    if settings.api_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }

    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let manager = open_manager(settings, bus)?;

    let report = if now {
        manager.retry_now(owner).await?
    } else {
        manager.sync(owner).await?
    };

    report_events(&mut events);
    println!("{}", summarize(&report));
    Ok(())
}

fn report_events(events: &mut Receiver<AppEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            AppEvent::Sync(SyncEvent::EntryRemapped { old, new }) => {
                println!("{old} -> {new}");
            }
            AppEvent::Sync(SyncEvent::ReauthRequired { owner_id }) => {
                eprintln!("The server rejected the session for '{owner_id}'; sign in again.");
            }
            AppEvent::Sync(SyncEvent::TaskFailed { entry_id, reason }) => {
                eprintln!("{entry_id}: {reason}");
            }
            _ => {}
        }
    }
}

pub fn summarize(report: &SyncReport) -> String {
    format!(
        "Pulled {}, pushed {}, failed {} ({})",
        report.pulled, report.pushed, report.failed, report.state
    )
}

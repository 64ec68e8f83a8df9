//! Application event bus.
//!
//! Owned by the application root and handed to the entry manager and the
//! visibility trigger. Subscribing returns a receiver; dropping it
//! unsubscribes.

use tokio::sync::broadcast;

use crate::models::EntryId;
use crate::state::SyncState;

const DEFAULT_CAPACITY: usize = 64;

/// Something the sync layer reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StatusChanged(SyncState),
    /// A temporary id was replaced by the remote's permanent id
    EntryRemapped { old: EntryId, new: EntryId },
    /// The remote rejected the session; sync for this owner is paused
    ReauthRequired { owner_id: String },
    /// A remote write failed and stays queued
    TaskFailed { entry_id: EntryId, reason: String },
}

/// Everything that travels over the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// `true` when the application is in the foreground
    Visibility(bool),
    /// `true` when the network is reachable
    Connectivity(bool),
    /// The signed-in user changed (`None` after sign-out)
    SessionChanged(Option<String>),
    Sync(SyncEvent),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; returns how many subscribers received it
    pub fn publish(&self, event: AppEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn publish_sync(&self, event: SyncEvent) -> usize {
        self.publish(AppEvent::Sync(event))
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

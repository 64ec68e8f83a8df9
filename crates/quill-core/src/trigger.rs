//! Visibility and reconnection trigger.
//!
//! Watches the foreground and online signals and asks the manager to retry
//! when the app comes back after a real absence or the network returns.
//! Repeated triggers inside the debounce window collapse into one. A missed
//! trigger is harmless: the periodic poll catches up.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::events::{AppEvent, EventBus};
use crate::manager::EntryManager;
use crate::remote::RemoteEntryStore;
use crate::store::KeyValueStore;

#[derive(Debug, Clone)]
pub struct VisibilityTrigger {
    foreground: bool,
    online: bool,
    backgrounded_at: Option<Instant>,
    last_fired: Option<Instant>,
    min_background_dwell: Duration,
    debounce_window: Duration,
}

impl VisibilityTrigger {
    /// Start in the foreground and online
    #[must_use]
    pub const fn new(min_background_dwell: Duration, debounce_window: Duration) -> Self {
        Self {
            foreground: true,
            online: true,
            backgrounded_at: None,
            last_fired: None,
            min_background_dwell,
            debounce_window,
        }
    }

    #[must_use]
    pub const fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.min_background_dwell(), config.debounce_window())
    }

    pub const fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Feed a visibility change; `true` means sync now
    pub fn on_visibility(&mut self, foreground: bool, now: Instant) -> bool {
        if foreground == self.foreground {
            return false;
        }
        self.foreground = foreground;

        if !foreground {
            self.backgrounded_at = Some(now);
            return false;
        }

        let dwelled = self
            .backgrounded_at
            .take()
            .is_some_and(|since| now.saturating_duration_since(since) > self.min_background_dwell);
        dwelled && self.fire(now)
    }

    /// Feed a connectivity change; `true` means sync now
    pub fn on_connectivity(&mut self, online: bool, now: Instant) -> bool {
        if online == self.online {
            return false;
        }
        self.online = online;
        online && self.fire(now)
    }

    fn fire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_fired {
            if now.saturating_duration_since(last) < self.debounce_window {
                tracing::debug!("Sync trigger debounced");
                return false;
            }
        }
        self.last_fired = Some(now);
        true
    }

    /// Consume visibility and connectivity events until the bus closes,
    /// calling [`EntryManager::retry_now`] for the signed-in user on every
    /// trigger.
    pub async fn run<S, R>(mut self, bus: &EventBus, manager: &EntryManager<S, R>)
    where
        S: KeyValueStore + 'static,
        R: RemoteEntryStore + 'static,
    {
        let mut events = bus.subscribe();
        loop {
            let fire = match events.recv().await {
                Ok(AppEvent::Visibility(foreground)) => {
                    self.on_visibility(foreground, Instant::now())
                }
                Ok(AppEvent::Connectivity(online)) => self.on_connectivity(online, Instant::now()),
                Ok(_) => false,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Visibility trigger missed {} bus event(s)", skipped);
                    false
                }
                Err(RecvError::Closed) => break,
            };
            if !fire {
                continue;
            }

            let Some(owner_id) = manager.current_user_id() else {
                tracing::debug!("Trigger fired with nobody signed in");
                continue;
            };
            tracing::info!("Foreground or reconnect trigger; syncing {}", owner_id);
            if let Err(error) = manager.retry_now(&owner_id).await {
                tracing::error!("Triggered sync failed: {}", error);
            }
        }
    }
}

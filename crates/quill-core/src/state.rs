//! Observable sync status.

use tokio::sync::watch;

/// Global sync indicator.
///
/// `Error` means edits are safe locally but not yet backed up; it never means
/// data was lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Nobody is signed in
    #[default]
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Publisher side of the status channel
#[derive(Debug)]
pub struct StatusCell {
    sender: watch::Sender<SyncState>,
}

impl Default for StatusCell {
    fn default() -> Self {
        let (sender, _) = watch::channel(SyncState::default());
        Self { sender }
    }
}

impl StatusCell {
    pub fn get(&self) -> SyncState {
        *self.sender.borrow()
    }

    /// Store `state`; returns `true` when it differs from the previous value
    pub fn set(&self, state: SyncState) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.sender.subscribe()
    }
}

//! Session capability consumed by the sync layer.
//!
//! Authentication itself happens elsewhere. The entry manager only needs to
//! know who is signed in right now; `None` means local reads and writes keep
//! working but nothing is synced.

use std::fmt;
use std::sync::{Arc, RwLock};

/// Source of the currently signed-in user
pub trait SessionProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

#[derive(Clone, PartialEq, Eq, Default)]
struct SessionState {
    user_id: Option<String>,
    access_token: Option<String>,
}

/// Session set explicitly by the host application.
///
/// Clones share state, so the host can switch users on one handle while the
/// manager reads through another.
#[derive(Clone, Default)]
pub struct StaticSession {
    state: Arc<RwLock<SessionState>>,
}

impl fmt::Debug for StaticSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        formatter
            .debug_struct("StaticSession")
            .field("user_id", &state.user_id)
            .field("access_token", &state.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl StaticSession {
    /// A session with nobody signed in
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signed_in(user_id: impl Into<String>, access_token: Option<String>) -> Self {
        let session = Self::default();
        session.sign_in(user_id, access_token);
        session
    }

    pub fn sign_in(&self, user_id: impl Into<String>, access_token: Option<String>) {
        self.replace(SessionState {
            user_id: non_blank(Some(user_id.into())),
            access_token: non_blank(access_token),
        });
    }

    pub fn sign_out(&self) {
        self.replace(SessionState::default());
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.snapshot().access_token
    }

    fn snapshot(&self) -> SessionState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, next: SessionState) {
        match self.state.write() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

impl SessionProvider for StaticSession {
    fn current_user_id(&self) -> Option<String> {
        self.snapshot().user_id
    }
}

/// Trimmed credential text; blank values count as absent
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

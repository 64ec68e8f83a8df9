//! Pull, reconcile and drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;

use super::EntryManager;
use crate::error::{Error, Result};
use crate::events::{AppEvent, EventBus, SyncEvent};
use crate::local::LocalStore;
use crate::models::{EntryId, JournalEntry, SyncOp, SyncTask};
use crate::queue::{CreateAck, SyncQueue};
use crate::remote::{RemoteEntryStore, RemoteError, RemoteResult, RetryClass};
use crate::state::SyncState;
use crate::store::KeyValueStore;

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Another pass was already running; this call did nothing
    pub coalesced: bool,
    /// Remote entries applied locally
    pub pulled: usize,
    /// Queued tasks the remote accepted
    pub pushed: usize,
    /// Queued tasks that failed and stay queued
    pub failed: usize,
    pub state: SyncState,
}

impl SyncReport {
    const fn skipped(state: SyncState) -> Self {
        Self {
            coalesced: false,
            pulled: 0,
            pushed: 0,
            failed: 0,
            state,
        }
    }
}

/// Clears the in-progress flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct DrainStats {
    pushed: usize,
    failed: usize,
}

impl<S, R> EntryManager<S, R>
where
    S: KeyValueStore + 'static,
    R: RemoteEntryStore + 'static,
{
    /// Pull remote changes, reconcile them, then push the owner's queue.
    ///
    /// A call made while another pass is running returns at once with
    /// `coalesced` set. Remote failures only show up in the report, the
    /// status channel and the event bus; `Err` means the local store failed.
    pub async fn sync(&self, owner_id: &str) -> Result<SyncReport> {
        self.run_pass(owner_id, true).await
    }

    /// Open every backoff gate, then [`sync`](Self::sync)
    pub async fn retry_now(&self, owner_id: &str) -> Result<SyncReport> {
        let released = self.lock_queue()?.release_backoff(self.now())?;
        if released > 0 {
            tracing::debug!("Released backoff on {} task(s)", released);
        }
        self.sync(owner_id).await
    }

    /// Background loop.
    ///
    /// Pushes queued work as soon as it is enqueued, runs a full sync on the
    /// poll interval and after session changes, and wakes when the earliest
    /// backoff gate opens. Returns when the bus closes.
    pub async fn run(&self, bus: &EventBus) {
        let mut events = bus.subscribe();
        let mut poll = tokio::time::interval(self.inner.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Entry manager background loop started");

        loop {
            let gate = self.next_gate_delay();
            let full = tokio::select! {
                () = self.inner.work.notified() => false,
                _ = poll.tick() => true,
                () = sleep_for(gate) => false,
                event = events.recv() => match event {
                    Ok(AppEvent::SessionChanged(user)) => {
                        if let Err(error) = self.session_changed(user.as_deref()) {
                            tracing::error!("Failed to apply session change: {}", error);
                        }
                        true
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Entry manager missed {} bus event(s)", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let Some(owner_id) = self.current_user_id() else {
                self.set_status(SyncState::Offline);
                continue;
            };
            match self.run_pass(&owner_id, full).await {
                Ok(report) => tracing::debug!("Background pass finished: {:?}", report),
                Err(error) => tracing::error!("Background sync failed: {}", error),
            }
        }

        tracing::info!("Event bus closed; entry manager background loop stopped");
    }

    async fn run_pass(&self, owner_id: &str, pull: bool) -> Result<SyncReport> {
        let Some(user) = self.current_user_id() else {
            self.set_status(SyncState::Offline);
            return Ok(SyncReport::skipped(SyncState::Offline));
        };
        if user != owner_id {
            tracing::debug!("Not syncing {} while {} is signed in", owner_id, user);
            return Ok(SyncReport::skipped(self.status()));
        }
        if self.is_paused(owner_id) {
            self.set_status(SyncState::Error);
            return Ok(SyncReport::skipped(SyncState::Error));
        }

        let Some(_guard) = PassGuard::acquire(&self.inner.syncing) else {
            tracing::debug!("Sync already running; coalescing");
            return Ok(SyncReport {
                coalesced: true,
                ..SyncReport::skipped(self.status())
            });
        };

        self.set_status(SyncState::Syncing);
        let result = self.pass(owner_id, pull).await;
        let state = match &result {
            Ok(report) => report.state,
            Err(_) => SyncState::Error,
        };
        self.set_status(state);
        result
    }

    async fn pass(&self, owner_id: &str, pull: bool) -> Result<SyncReport> {
        let mut report = SyncReport::skipped(SyncState::Synced);
        let mut healthy = true;

        if pull {
            tracing::info!("Sync pass started for {}", owner_id);
            match self.pull(owner_id).await? {
                Ok(applied) => report.pulled = applied,
                Err(error) => {
                    healthy = false;
                    self.note_failure(owner_id, None, &error);
                }
            }
        }

        if !self.is_paused(owner_id) {
            let stats = self.drain(owner_id).await;
            report.pushed = stats.pushed;
            report.failed = stats.failed;
        }

        let pending = self.lock_queue()?.has_pending_for(owner_id);
        report.state = if healthy && !pending && !self.is_paused(owner_id) {
            SyncState::Synced
        } else {
            SyncState::Error
        };
        if pull {
            tracing::info!(
                "Sync pass for {} finished: pulled {}, pushed {}, failed {}",
                owner_id,
                report.pulled,
                report.pushed,
                report.failed
            );
        }
        Ok(report)
    }

    async fn pull(&self, owner_id: &str) -> Result<RemoteResult<usize>> {
        let cursor = self.inner.local.cursor(owner_id)?;
        let listed = self
            .with_timeout(self.inner.remote.list_since(owner_id, cursor))
            .await;
        match listed {
            Ok(entries) => self.reconcile(owner_id, cursor, entries).map(Ok),
            Err(error) => Ok(Err(error)),
        }
    }

    /// Apply pulled entries by last-write-wins on `updated_at`.
    ///
    /// Local copies win ties. Entries with a queued delete are left alone;
    /// the delete will be pushed. A winning remote copy replaces the queued
    /// update it made obsolete. The cursor advances to the newest
    /// `updated_at` seen.
    fn reconcile(
        &self,
        owner_id: &str,
        cursor: Option<i64>,
        entries: Vec<JournalEntry>,
    ) -> Result<usize> {
        let mut queue = self.lock_queue()?;
        let mut applied = 0;
        let mut next_cursor = cursor;

        for remote in entries {
            next_cursor = Some(next_cursor.map_or(remote.updated_at, |c| c.max(remote.updated_at)));
            if remote.owner_id != owner_id || remote.id.is_temporary() {
                tracing::warn!("Ignoring foreign or malformed remote entry {}", remote.id);
                continue;
            }
            match self.apply_remote(&mut queue, remote) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(Error::InvalidData(reason)) => {
                    tracing::warn!("Skipping invalid remote entry: {}", reason);
                }
                Err(error) => return Err(error),
            }
        }

        if next_cursor != cursor {
            if let Some(next) = next_cursor {
                self.inner
                    .local
                    .commit(vec![LocalStore::<S>::cursor_op(owner_id, next)])?;
            }
        }
        Ok(applied)
    }

    fn apply_remote(&self, queue: &mut SyncQueue<S>, remote: JournalEntry) -> Result<bool> {
        if queue.get(&remote.id).map(|task| task.op) == Some(SyncOp::Delete) {
            tracing::debug!("Entry {} has a pending local delete; ignoring remote copy", remote.id);
            return Ok(false);
        }

        let local = match self.inner.local.get(&remote.id) {
            Ok(local) => local,
            Err(Error::Serialization(_) | Error::InvalidData(_)) => None,
            Err(error) => return Err(error),
        };
        if let Some(local) = local.as_ref() {
            if remote.updated_at <= local.updated_at {
                return Ok(false);
            }
        }

        let mut ops = if remote.is_deleted {
            if local.is_none() {
                return Ok(false);
            }
            self.inner.local.remove_ops(&remote.id)?.1
        } else {
            self.inner.local.put_ops(&remote)?
        };

        let staged = queue.stage_discard(&remote.id)?;
        if let Some((staged, dropped)) = staged {
            tracing::debug!(
                "Remote copy of {} is newer; dropping queued {:?}",
                dropped.entry_id,
                dropped.op
            );
            ops.push(staged.store_op());
            self.inner.local.commit(ops)?;
            queue.apply(staged);
        } else {
            self.inner.local.commit(ops)?;
        }
        Ok(true)
    }

    /// Push the owner's ready tasks, at most `max_concurrency` at a time.
    ///
    /// Stops handing out work once a result cannot be recorded locally.
    async fn drain(&self, owner_id: &str) -> DrainStats {
        let limit = self.inner.config.max_concurrency;
        let mut running = FuturesUnordered::new();
        let mut stats = DrainStats::default();
        let mut local_failed = false;

        loop {
            while running.len() < limit && !local_failed && !self.is_paused(owner_id) {
                let Some(task) = self.next_ready(owner_id) else {
                    break;
                };
                tracing::debug!("Pushing {:?} for {}", task.op, task.entry_id);
                running.push(self.execute(task));
            }

            let Some((task, outcome)) = running.next().await else {
                break;
            };
            let entry_id = task.entry_id.clone();
            match self.complete(task, outcome) {
                Ok(true) => stats.pushed += 1,
                Ok(false) => stats.failed += 1,
                Err(error) => {
                    tracing::error!("Failed to record sync result for {}: {}", entry_id, error);
                    self.release(&entry_id);
                    local_failed = true;
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    fn next_ready(&self, owner_id: &str) -> Option<SyncTask> {
        let now = self.now();
        match self.lock_queue() {
            Ok(mut queue) => queue.dequeue_ready_for(owner_id, now),
            Err(error) => {
                tracing::error!("Cannot read sync queue: {}", error);
                None
            }
        }
    }

    fn release(&self, id: &EntryId) {
        if let Ok(mut queue) = self.lock_queue() {
            queue.release(id);
        }
    }

    async fn execute(&self, task: SyncTask) -> (SyncTask, RemoteResult<Option<EntryId>>) {
        let remote = &self.inner.remote;
        let outcome = match task.op {
            SyncOp::Create => self.with_timeout(remote.create(&task.payload)).await.map(Some),
            SyncOp::Update => self
                .with_timeout(remote.update(&task.entry_id, &task.payload))
                .await
                .map(|()| None),
            SyncOp::Delete => self
                .with_timeout(remote.delete(&task.entry_id))
                .await
                .map(|()| None),
        };
        (task, outcome)
    }

    /// Record a remote outcome; `Ok(true)` when the task is done
    fn complete(&self, task: SyncTask, outcome: RemoteResult<Option<EntryId>>) -> Result<bool> {
        let now = self.now();
        match outcome {
            Ok(Some(permanent)) => {
                self.acknowledge_create(&task, &permanent)?;
                Ok(true)
            }
            Ok(None) => {
                self.lock_queue()?.mark_succeeded(&task)?;
                Ok(true)
            }
            Err(error)
                if error.retry_class() == RetryClass::Contextual && task.op != SyncOp::Create =>
            {
                let mut queue = self.lock_queue()?;
                let current = match task.op {
                    SyncOp::Update => self.inner.local.get(&task.entry_id)?,
                    _ => None,
                };
                queue.resolve_not_found(&task, current, now)?;
                Ok(task.op == SyncOp::Delete)
            }
            Err(error) => {
                if !self.lock_queue()?.mark_failed(&task, &error, now)? {
                    return Ok(true);
                }
                self.note_failure(&task.payload.owner_id, Some(&task.entry_id), &error);
                Ok(false)
            }
        }
    }

    /// Repoint the entry to its permanent id and settle the queue, atomically
    fn acknowledge_create(&self, task: &SyncTask, permanent: &EntryId) -> Result<()> {
        let (remapped, ack) = {
            let mut queue = self.lock_queue()?;
            let (staged, ack) = queue.stage_acknowledge_create(task, permanent)?;
            let remapped = self
                .inner
                .local
                .remap_id(&task.entry_id, permanent, vec![staged.store_op()])?;
            queue.apply(staged);
            (remapped, ack)
        };

        if remapped.is_some() {
            tracing::info!("Entry {} acknowledged as {}", task.entry_id, permanent);
        } else {
            tracing::debug!(
                "Entry {} was removed locally before {} was acknowledged",
                task.entry_id,
                permanent
            );
        }
        if ack != CreateAck::Completed {
            tracing::debug!("Follow-up {:?} queued for {}", ack, permanent);
        }

        self.inner.bus.publish_sync(SyncEvent::EntryRemapped {
            old: task.entry_id.clone(),
            new: permanent.clone(),
        });
        Ok(())
    }

    fn note_failure(&self, owner_id: &str, entry_id: Option<&EntryId>, error: &RemoteError) {
        match error {
            RemoteError::Unauthorized => {
                match self.lock_paused() {
                    Ok(mut paused) => {
                        paused.insert(owner_id.to_string());
                    }
                    Err(lock_error) => tracing::error!("{}", lock_error),
                }
                tracing::warn!("Remote rejected the session for {}; sync paused", owner_id);
                self.inner.bus.publish_sync(SyncEvent::ReauthRequired {
                    owner_id: owner_id.to_string(),
                });
            }
            _ => {
                tracing::warn!(
                    "Remote call failed for {}: {}",
                    entry_id.map_or("pull", EntryId::as_str),
                    error
                );
                if let Some(entry_id) = entry_id {
                    self.inner.bus.publish_sync(SyncEvent::TaskFailed {
                        entry_id: entry_id.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        let limit = self.inner.config.request_timeout();
        tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(RemoteError::transient(format!(
                "request timed out after {} ms",
                limit.as_millis()
            )))
        })
    }

    fn next_gate_delay(&self) -> Option<Duration> {
        let owner_id = self.current_user_id()?;
        if self.is_paused(&owner_id) {
            return None;
        }
        let now = self.now();
        let gate = self.lock_queue().ok()?.next_gate_for(&owner_id, now)?;
        u64::try_from(gate - now).ok().map(Duration::from_millis)
    }
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

//! Durable sync queue.
//!
//! Holds at most one pending [`SyncTask`] per entry id, persisted as a JSON
//! array under [`QUEUE_KEY`] so unsynced work survives a restart. Which tasks
//! are currently executing is tracked in memory only; after a restart every
//! task is simply eligible again.
//!
//! Mutations come in two flavours. The plain methods (`enqueue`, `discard`,
//! ...) persist immediately. The `stage_*` methods return a [`StagedQueue`]
//! whose [`StoreOp`] the caller folds into a larger atomic batch, then hands
//! back through [`SyncQueue::apply`] once that batch has committed.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::BackoffPolicy;
use crate::error::Result;
use crate::models::{EntryId, FailureKind, JournalEntry, SyncOp, SyncTask};
use crate::remote::{RemoteError, RetryClass};
use crate::store::{KeyValueStore, StoreOp};

/// Key the queue is persisted under
pub const QUEUE_KEY: &str = "sync_queue";

/// A queue state computed but not yet committed
#[derive(Debug, Clone)]
#[must_use = "a staged queue change does nothing until it is committed and applied"]
pub struct StagedQueue {
    tasks: Vec<SyncTask>,
    op: StoreOp,
    release: Option<EntryId>,
}

impl StagedQueue {
    /// Op persisting the staged state
    pub fn store_op(&self) -> StoreOp {
        self.op.clone()
    }
}

/// What happened to a task after its remote create was acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateAck {
    /// Nothing newer was queued; the task is gone
    Completed,
    /// Newer content arrived in flight; an update for the new id stays queued
    FollowUpUpdate,
    /// The entry was deleted in flight; a delete for the new id stays queued
    FollowUpDelete,
}

pub struct SyncQueue<S> {
    store: Arc<S>,
    tasks: Vec<SyncTask>,
    in_flight: HashSet<EntryId>,
    backoff: BackoffPolicy,
}

impl<S: KeyValueStore> SyncQueue<S> {
    /// Load the persisted queue.
    ///
    /// Unreadable tasks are dropped with a warning; duplicate ids keep the
    /// last occurrence.
    pub fn load(store: Arc<S>, backoff: BackoffPolicy) -> Result<Self> {
        let tasks = match store.get(QUEUE_KEY)? {
            Some(raw) => decode_tasks(&raw),
            None => Vec::new(),
        };
        tracing::debug!("Loaded sync queue with {} task(s)", tasks.len());
        Ok(Self {
            store,
            tasks,
            in_flight: HashSet::new(),
            backoff,
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of every queued task, oldest first
    pub fn pending(&self) -> Vec<SyncTask> {
        self.tasks.clone()
    }

    /// Queued task for an entry
    pub fn get(&self, id: &EntryId) -> Option<&SyncTask> {
        self.tasks.iter().find(|task| &task.entry_id == id)
    }

    pub fn is_in_flight(&self, id: &EntryId) -> bool {
        self.in_flight.contains(id)
    }

    /// Whether `owner_id` has queued work
    pub fn has_pending_for(&self, owner_id: &str) -> bool {
        self.tasks
            .iter()
            .any(|task| task.payload.owner_id == owner_id)
    }

    /// Earliest backoff gate after `now` among an owner's idle tasks
    pub fn next_gate_for(&self, owner_id: &str, now: i64) -> Option<i64> {
        self.tasks
            .iter()
            .filter(|task| task.payload.owner_id == owner_id)
            .filter(|task| !self.in_flight.contains(&task.entry_id))
            .map(|task| task.next_eligible_at)
            .filter(|gate| *gate > now)
            .min()
    }

    /// Queue a mutation, merging it into any task already queued for the id
    pub fn enqueue(&mut self, task: SyncTask) -> Result<()> {
        let staged = self.stage_enqueue(task)?;
        self.commit(staged)
    }

    /// Staged form of [`enqueue`](Self::enqueue).
    ///
    /// Merge rules for an id that already has a task:
    /// - create + update: stays a create, carrying the newer payload
    /// - create + delete: dropped outright, unless the create is in flight,
    ///   in which case it becomes a delete
    /// - update + update: newer payload wins
    /// - anything + delete: becomes a delete
    ///
    /// A delete for a temporary id with nothing queued is dropped; that entry
    /// never reached the remote.
    pub fn stage_enqueue(&self, task: SyncTask) -> Result<StagedQueue> {
        let mut tasks = self.tasks.clone();
        let in_flight = self.in_flight.contains(&task.entry_id);

        match tasks.iter().position(|queued| queued.entry_id == task.entry_id) {
            None => {
                if task.op == SyncOp::Delete && task.entry_id.is_temporary() {
                    tracing::debug!("Dropping delete for never-synced entry {}", task.entry_id);
                } else {
                    tasks.push(task);
                }
            }
            Some(index) => {
                match (tasks[index].op, task.op) {
                    (SyncOp::Create, SyncOp::Delete) if !in_flight => {
                        tracing::debug!(
                            "Entry {} deleted before its create was sent; dropping task",
                            task.entry_id
                        );
                        tasks.remove(index);
                    }
                    (SyncOp::Delete, _) => {
                        tracing::warn!(
                            "Ignoring {:?} for entry {} already queued for deletion",
                            task.op,
                            task.entry_id
                        );
                    }
                    (_, SyncOp::Delete) => {
                        let queued = &mut tasks[index];
                        queued.op = SyncOp::Delete;
                        queued.payload = task.payload;
                        queued.revision += 1;
                    }
                    (_, SyncOp::Create | SyncOp::Update) => {
                        let queued = &mut tasks[index];
                        queued.payload = task.payload;
                        queued.revision += 1;
                    }
                }
            }
        }

        self.stage(tasks, None)
    }

    /// Hand out the oldest idle task whose backoff gate has passed
    pub fn dequeue_ready(&mut self, now: i64) -> Option<SyncTask> {
        self.dequeue_where(now, |_| true)
    }

    /// Like [`dequeue_ready`](Self::dequeue_ready), restricted to one owner
    pub fn dequeue_ready_for(&mut self, owner_id: &str, now: i64) -> Option<SyncTask> {
        self.dequeue_where(now, |task| task.payload.owner_id == owner_id)
    }

    fn dequeue_where(
        &mut self,
        now: i64,
        filter: impl Fn(&SyncTask) -> bool,
    ) -> Option<SyncTask> {
        let task = self
            .tasks
            .iter()
            .filter(|task| !self.in_flight.contains(&task.entry_id))
            .filter(|task| task.next_eligible_at <= now)
            .filter(|task| filter(task))
            .min_by_key(|task| task.enqueued_at)?
            .clone();
        self.in_flight.insert(task.entry_id.clone());
        Some(task)
    }

    /// Forget that a task is executing without touching the queue
    pub fn release(&mut self, id: &EntryId) {
        self.in_flight.remove(id);
    }

    /// Remove a task after its remote call succeeded.
    ///
    /// A task superseded while in flight stays queued with its newer payload.
    /// Returns whether the task was removed.
    pub fn mark_succeeded(&mut self, task: &SyncTask) -> Result<bool> {
        self.in_flight.remove(&task.entry_id);
        let Some(index) = self.position(&task.entry_id) else {
            return Ok(false);
        };
        if self.tasks[index].revision != task.revision {
            tracing::debug!(
                "Task for {} was superseded in flight; keeping newer revision",
                task.entry_id
            );
            let mut tasks = self.tasks.clone();
            reset_attempts(&mut tasks[index]);
            let staged = self.stage(tasks, None)?;
            self.commit(staged)?;
            return Ok(false);
        }

        let mut tasks = self.tasks.clone();
        tasks.remove(index);
        let staged = self.stage(tasks, None)?;
        self.commit(staged)?;
        Ok(true)
    }

    /// Record a failed remote call.
    ///
    /// `Unauthorized` parks the task: it is kept with the error recorded and
    /// its attempt count untouched, and waits for a new session. Every other
    /// failure counts as an attempt and pushes the backoff gate out.
    ///
    /// A create that fails after its entry was deleted locally leaves a delete
    /// for an id the remote never acknowledged; that task is dropped. Returns
    /// whether the task is still queued.
    pub fn mark_failed(&mut self, task: &SyncTask, error: &RemoteError, now: i64) -> Result<bool> {
        self.in_flight.remove(&task.entry_id);
        let Some(index) = self.position(&task.entry_id) else {
            return Ok(false);
        };

        let mut tasks = self.tasks.clone();
        if is_unsendable(&tasks[index]) {
            tracing::debug!(
                "Create for {} failed after a local delete; dropping task",
                task.entry_id
            );
            tasks.remove(index);
            let staged = self.stage(tasks, None)?;
            self.commit(staged)?;
            return Ok(false);
        }

        let queued = &mut tasks[index];
        queued.last_attempt_at = Some(now);
        queued.last_error = Some(error.kind());
        match error.retry_class() {
            RetryClass::ReauthRequired => {
                tracing::debug!("Task for {} parked until a new session", queued.entry_id);
            }
            RetryClass::Retryable | RetryClass::Contextual => {
                queued.attempts = queued.attempts.saturating_add(1);
                let delay =
                    i64::try_from(self.backoff.delay_ms(queued.attempts)).unwrap_or(i64::MAX);
                queued.next_eligible_at = now.saturating_add(delay);
                tracing::debug!(
                    "Task for {} failed (attempt {}); next try at {}",
                    queued.entry_id,
                    queued.attempts,
                    queued.next_eligible_at
                );
            }
        }

        let staged = self.stage(tasks, None)?;
        self.commit(staged)?;
        Ok(true)
    }

    /// Stage the queue side of an acknowledged create.
    ///
    /// The caller commits [`StagedQueue::store_op`] together with the local
    /// id remap, then calls [`apply`](Self::apply).
    pub fn stage_acknowledge_create(
        &self,
        task: &SyncTask,
        permanent: &EntryId,
    ) -> Result<(StagedQueue, CreateAck)> {
        let mut tasks = self.tasks.clone();
        let ack = match tasks.iter().position(|queued| queued.entry_id == task.entry_id) {
            None => CreateAck::Completed,
            Some(index) if tasks[index].revision == task.revision => {
                tasks.remove(index);
                CreateAck::Completed
            }
            Some(index) => {
                let queued = &mut tasks[index];
                queued.entry_id = permanent.clone();
                queued.payload.id = permanent.clone();
                reset_attempts(queued);
                if queued.op == SyncOp::Delete {
                    CreateAck::FollowUpDelete
                } else {
                    queued.op = SyncOp::Update;
                    CreateAck::FollowUpUpdate
                }
            }
        };
        let staged = self.stage(tasks, Some(task.entry_id.clone()))?;
        Ok((staged, ack))
    }

    /// Resolve a `NotFound` answer.
    ///
    /// A delete is done. An update whose entry still exists locally turns
    /// into a create carrying the current local content; without a local
    /// entry there is nothing left to push.
    pub fn resolve_not_found(
        &mut self,
        task: &SyncTask,
        current: Option<JournalEntry>,
        now: i64,
    ) -> Result<()> {
        self.in_flight.remove(&task.entry_id);
        let Some(index) = self.position(&task.entry_id) else {
            return Ok(());
        };

        let mut tasks = self.tasks.clone();
        match (tasks[index].op, current) {
            (SyncOp::Update | SyncOp::Create, Some(entry)) => {
                tracing::info!("Entry {} missing remotely; recreating it", task.entry_id);
                let queued = &mut tasks[index];
                queued.op = SyncOp::Create;
                queued.payload = entry;
                queued.revision += 1;
                reset_attempts(queued);
                queued.next_eligible_at = now;
            }
            _ => {
                tasks.remove(index);
            }
        }

        let staged = self.stage(tasks, None)?;
        self.commit(staged)
    }

    /// Drop the task for `id` unless it is executing
    pub fn discard(&mut self, id: &EntryId) -> Result<Option<SyncTask>> {
        let Some((staged, removed)) = self.stage_discard(id)? else {
            return Ok(None);
        };
        self.commit(staged)?;
        Ok(Some(removed))
    }

    /// Staged form of [`discard`](Self::discard)
    pub fn stage_discard(&self, id: &EntryId) -> Result<Option<(StagedQueue, SyncTask)>> {
        if self.in_flight.contains(id) {
            return Ok(None);
        }
        let Some(index) = self.position(id) else {
            return Ok(None);
        };
        let mut tasks = self.tasks.clone();
        let removed = tasks.remove(index);
        Ok(Some((self.stage(tasks, None)?, removed)))
    }

    /// Make every task with an expired-in-the-future gate eligible at `now`
    pub fn release_backoff(&mut self, now: i64) -> Result<usize> {
        let mut tasks = self.tasks.clone();
        let mut released = 0;
        for task in &mut tasks {
            if task.next_eligible_at > now {
                task.next_eligible_at = now;
                released += 1;
            }
        }
        if released > 0 {
            let staged = self.stage(tasks, None)?;
            self.commit(staged)?;
        }
        Ok(released)
    }

    /// Clear parked `Unauthorized` markers once a new session exists
    pub fn clear_auth_failures(&mut self) -> Result<usize> {
        let mut tasks = self.tasks.clone();
        let mut cleared = 0;
        for task in &mut tasks {
            if task.last_error == Some(FailureKind::Unauthorized) {
                task.last_error = None;
                cleared += 1;
            }
        }
        if cleared > 0 {
            let staged = self.stage(tasks, None)?;
            self.commit(staged)?;
        }
        Ok(cleared)
    }

    /// Adopt a staged state whose op has been committed
    pub fn apply(&mut self, staged: StagedQueue) {
        if let Some(id) = staged.release.as_ref() {
            self.in_flight.remove(id);
        }
        self.tasks = staged.tasks;
    }

    fn commit(&mut self, staged: StagedQueue) -> Result<()> {
        self.store.write_batch(vec![staged.store_op()])?;
        self.apply(staged);
        Ok(())
    }

    fn stage(&self, tasks: Vec<SyncTask>, release: Option<EntryId>) -> Result<StagedQueue> {
        let op = if tasks.is_empty() {
            StoreOp::remove(QUEUE_KEY)
        } else {
            StoreOp::set(QUEUE_KEY, serde_json::to_string(&tasks)?)
        };
        Ok(StagedQueue { tasks, op, release })
    }

    fn position(&self, id: &EntryId) -> Option<usize> {
        self.tasks.iter().position(|task| &task.entry_id == id)
    }
}

/// A delete for a temporary id has nothing to delete remotely
fn is_unsendable(task: &SyncTask) -> bool {
    task.op == SyncOp::Delete && task.entry_id.is_temporary()
}

fn reset_attempts(task: &mut SyncTask) {
    task.attempts = 0;
    task.last_error = None;
}

fn decode_tasks(raw: &str) -> Vec<SyncTask> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(raw) {
        Ok(values) => values,
        Err(error) => {
            tracing::warn!("Sync queue is unreadable, starting empty: {}", error);
            return Vec::new();
        }
    };

    let mut tasks: Vec<SyncTask> = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<SyncTask>(value) {
            Ok(task) if is_unsendable(&task) => {
                tracing::debug!("Dropping delete for unacknowledged entry {}", task.entry_id);
            }
            Ok(task) => {
                tasks.retain(|existing| existing.entry_id != task.entry_id);
                tasks.push(task);
            }
            Err(error) => tracing::warn!("Dropping unreadable sync task: {}", error),
        }
    }
    tasks
}

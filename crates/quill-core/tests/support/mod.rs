//! Shared helpers for integration tests: a scripted in-memory remote and a
//! manager factory over a shared memory store.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use quill_core::{
    EntryId, EntryManager, EventBus, JournalEntry, ManualClock, MemoryStore, RemoteEntryStore,
    RemoteError, RemoteResult, StaticSession, SyncConfig,
};
use tokio::sync::Semaphore;

pub const OWNER: &str = "user-1";
pub const START_MS: i64 = 1_700_000_000_000;

/// One call the remote saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(EntryId),
    Update(EntryId),
    Delete(EntryId),
    List(Option<i64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Online,
    Offline,
    Unauthorized,
}

struct RemoteState {
    mode: Mode,
    entries: BTreeMap<String, JournalEntry>,
    calls: Vec<Call>,
    next_ids: VecDeque<String>,
    fail_next: VecDeque<RemoteError>,
    minted: usize,
    hold: Option<Arc<Semaphore>>,
}

/// In-memory stand-in for the entries API
#[derive(Clone)]
pub struct ScriptedRemote {
    state: Arc<Mutex<RemoteState>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedRemote {
    pub fn online() -> Self {
        Self::with_mode(Mode::Online)
    }

    pub fn offline() -> Self {
        Self::with_mode(Mode::Offline)
    }

    pub fn with_mode(mode: Mode) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                mode,
                entries: BTreeMap::new(),
                calls: Vec::new(),
                next_ids: VecDeque::new(),
                fail_next: VecDeque::new(),
                minted: 0,
                hold: None,
            })),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        self.lock().mode = mode;
    }

    /// Ids handed out by upcoming creates, in order
    pub fn queue_ids(&self, ids: &[&str]) {
        self.lock()
            .next_ids
            .extend(ids.iter().map(ToString::to_string));
    }

    /// Fail the next mutation (create, update or delete) with `error`
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().fail_next.push_back(error);
    }

    /// Make mutations wait until [`release`](Self::release) grants permits
    pub fn hold(&self) {
        self.lock().hold = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, permits: usize) {
        if let Some(hold) = self.lock().hold.as_ref() {
            hold.add_permits(permits);
        }
    }

    pub fn seed(&self, entry: JournalEntry) {
        self.lock().entries.insert(entry.id.to_string(), entry);
    }

    pub fn forget(&self, id: &str) {
        self.lock().entries.remove(id);
    }

    pub fn entry(&self, id: &str) -> Option<JournalEntry> {
        self.lock().entries.get(id).cloned()
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls other than list
    pub fn mutation_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::List(_)))
            .collect()
    }

    /// Mutations currently waiting inside the remote
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous mutations observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    fn check_mode(&self) -> RemoteResult<()> {
        match self.lock().mode {
            Mode::Online => Ok(()),
            Mode::Offline => Err(RemoteError::transient("network unreachable")),
            Mode::Unauthorized => Err(RemoteError::Unauthorized),
        }
    }

    async fn begin_mutation(&self, call: Call) -> RemoteResult<()> {
        self.lock().calls.push(call);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        let hold = self.lock().hold.clone();
        if let Some(hold) = hold {
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.lock().fail_next.pop_front() {
            return Err(error);
        }
        self.check_mode()
    }

    fn mint_id(&self) -> EntryId {
        let mut state = self.lock();
        let raw = match state.next_ids.pop_front() {
            Some(raw) => raw,
            None => {
                state.minted += 1;
                format!("srv-{}", state.minted)
            }
        };
        EntryId::permanent(raw).unwrap()
    }
}

impl RemoteEntryStore for ScriptedRemote {
    async fn create(&self, entry: &JournalEntry) -> RemoteResult<EntryId> {
        self.begin_mutation(Call::Create(entry.id.clone())).await?;
        let id = self.mint_id();
        let mut stored = entry.clone();
        stored.id = id.clone();
        self.lock().entries.insert(id.to_string(), stored);
        Ok(id)
    }

    async fn update(&self, id: &EntryId, entry: &JournalEntry) -> RemoteResult<()> {
        self.begin_mutation(Call::Update(id.clone())).await?;
        let mut state = self.lock();
        if !state.entries.contains_key(id.as_str()) {
            return Err(RemoteError::NotFound);
        }
        state.entries.insert(id.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, id: &EntryId) -> RemoteResult<()> {
        self.begin_mutation(Call::Delete(id.clone())).await?;
        match self.lock().entries.remove(id.as_str()) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound),
        }
    }

    async fn list_since(
        &self,
        owner_id: &str,
        cursor: Option<i64>,
    ) -> RemoteResult<Vec<JournalEntry>> {
        self.lock().calls.push(Call::List(cursor));
        self.check_mode()?;
        Ok(self
            .lock()
            .entries
            .values()
            .filter(|entry| entry.owner_id == owner_id)
            .filter(|entry| cursor.map_or(true, |cursor| entry.updated_at > cursor))
            .cloned()
            .collect())
    }
}

/// Everything a test needs to drive a manager
pub struct Harness {
    pub store: MemoryStore,
    pub remote: ScriptedRemote,
    pub clock: ManualClock,
    pub session: StaticSession,
    pub bus: EventBus,
    pub manager: EntryManager<MemoryStore, ScriptedRemote>,
}

impl Harness {
    pub fn new(remote: ScriptedRemote) -> Self {
        Self::with_config(remote, SyncConfig::default())
    }

    pub fn with_config(remote: ScriptedRemote, config: SyncConfig) -> Self {
        let store = MemoryStore::new();
        let clock = ManualClock::new(START_MS);
        let session = StaticSession::signed_in(OWNER, Some("token".to_string()));
        let bus = EventBus::default();
        let manager = build_manager(&store, &remote, &clock, &session, &bus, config);
        Self {
            store,
            remote,
            clock,
            session,
            bus,
            manager,
        }
    }

    /// Drop the manager and build a new one over the same storage
    pub fn restart(&mut self) {
        self.manager = build_manager(
            &self.store,
            &self.remote,
            &self.clock,
            &self.session,
            &self.bus,
            self.manager.config().clone(),
        );
    }
}

fn build_manager(
    store: &MemoryStore,
    remote: &ScriptedRemote,
    clock: &ManualClock,
    session: &StaticSession,
    bus: &EventBus,
    config: SyncConfig,
) -> EntryManager<MemoryStore, ScriptedRemote> {
    EntryManager::builder(Arc::new(store.clone()), remote.clone())
        .session(session.clone())
        .clock(clock.clone())
        .bus(bus.clone())
        .config(config)
        .build()
        .unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
}

/// Yield until `condition` holds, giving spawned tasks a chance to run
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

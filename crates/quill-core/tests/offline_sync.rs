mod support;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use quill_core::events::{AppEvent, SyncEvent};
use quill_core::models::FailureKind;
use quill_core::{
    Block, EntryId, EntryKind, EntryManager, RemoteError, SqliteStore, SyncConfig, SyncOp,
    SyncState, VisibilityTrigger,
};
use support::{day, wait_until, Call, Harness, Mode, ScriptedRemote, OWNER, START_MS};

fn paragraph(text: &str) -> Vec<Block> {
    vec![Block::paragraph(text, START_MS)]
}

fn texts(blocks: &[Block]) -> Vec<&str> {
    blocks.iter().map(Block::text).collect()
}

fn drain_events(receiver: &mut tokio::sync::broadcast::Receiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn offline_edits_converge_after_reconnect() {
    let h = Harness::new(ScriptedRemote::offline());

    let entry = h
        .manager
        .create_entry(OWNER, day(1), EntryKind::Freeform)
        .unwrap();
    h.manager.update_entry(&entry.id, paragraph("a")).unwrap();

    let listed = h.manager.list_entries(OWNER).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].id.is_temporary());
    assert_eq!(texts(&listed[0].blocks), vec!["a"]);

    let offline = h.manager.sync(OWNER).await.unwrap();
    assert_eq!(offline.state, SyncState::Error);
    assert_eq!(h.manager.status(), SyncState::Error);
    assert_eq!(h.manager.pending_tasks().unwrap().len(), 1);

    h.remote.set_mode(Mode::Online);
    h.remote.queue_ids(&["p1"]);
    h.clock.advance(1_000);
    let online = h.manager.sync(OWNER).await.unwrap();

    assert_eq!(online.state, SyncState::Synced);
    let listed = h.manager.list_entries(OWNER).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id.as_str(), "p1");
    assert_eq!(texts(&listed[0].blocks), vec!["a"]);
    assert!(h.manager.pending_tasks().unwrap().is_empty());
    assert_eq!(h.manager.status(), SyncState::Synced);
}

#[test]
fn unsynced_work_survives_restart() {
    let mut h = Harness::new(ScriptedRemote::offline());

    let a = h
        .manager
        .create_entry(OWNER, day(1), EntryKind::Morning)
        .unwrap();
    h.manager.update_entry(&a.id, paragraph("first")).unwrap();
    h.manager.update_entry(&a.id, paragraph("second")).unwrap();
    let b = h
        .manager
        .create_entry(OWNER, day(2), EntryKind::Evening)
        .unwrap();

    h.restart();

    let restored_a = h.manager.get_entry(&a.id).unwrap().unwrap();
    assert!(restored_a.id.is_temporary());
    assert_eq!(texts(&restored_a.blocks), vec!["second"]);
    assert!(h.manager.get_entry(&b.id).unwrap().is_some());

    let pending = h.manager.pending_tasks().unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|task| task.op == SyncOp::Create));
    let task_a = pending.iter().find(|task| task.entry_id == a.id).unwrap();
    assert_eq!(texts(&task_a.payload.blocks), vec!["second"]);
    assert_eq!(h.manager.status(), SyncState::Error);
}

#[test]
fn sqlite_backed_work_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quill.db");
    let remote = ScriptedRemote::offline();

    let id = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let manager = EntryManager::builder(store, remote.clone()).build().unwrap();
        let entry = manager
            .create_entry(OWNER, day(3), EntryKind::Reflection)
            .unwrap();
        manager.update_entry(&entry.id, paragraph("kept")).unwrap();
        entry.id
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let manager = EntryManager::builder(store, remote).build().unwrap();
    let entry = manager.get_entry(&id).unwrap().unwrap();
    assert_eq!(texts(&entry.blocks), vec!["kept"]);
    assert_eq!(manager.pending_tasks().unwrap()[0].entry_id, id);
}

#[tokio::test]
async fn acknowledged_create_remaps_every_reference() {
    let h = Harness::new(ScriptedRemote::online());
    let mut events = h.bus.subscribe();
    h.remote.queue_ids(&["p1"]);

    let entry = h
        .manager
        .create_entry(OWNER, day(4), EntryKind::Freeform)
        .unwrap();
    let updated = h
        .manager
        .update_entry(&entry.id, paragraph("remap me"))
        .unwrap()
        .unwrap();
    h.manager.mark_viewed(&entry.id).unwrap();

    h.manager.sync(OWNER).await.unwrap();

    let permanent = EntryId::permanent("p1").unwrap();
    assert_eq!(h.manager.get_entry(&entry.id).unwrap(), None);
    let remapped = h.manager.get_entry(&permanent).unwrap().unwrap();
    assert_eq!(remapped.blocks, updated.blocks);
    assert_eq!(remapped.created_at, updated.created_at);
    assert!(h
        .manager
        .pending_tasks()
        .unwrap()
        .iter()
        .all(|task| task.entry_id != entry.id));
    assert_eq!(
        h.manager
            .most_recently_viewed(OWNER)
            .unwrap()
            .map(|entry| entry.id),
        Some(permanent.clone())
    );

    let events = drain_events(&mut events);
    assert!(events.contains(&AppEvent::Sync(SyncEvent::EntryRemapped {
        old: entry.id,
        new: permanent,
    })));
}

#[tokio::test]
async fn failed_remap_keeps_temporary_id_and_task() {
    let h = Harness::new(ScriptedRemote::online());
    let entry = h
        .manager
        .create_entry(OWNER, day(4), EntryKind::Freeform)
        .unwrap();

    h.store.set_read_only(true);
    let report = h.manager.sync(OWNER).await.unwrap();
    h.store.set_read_only(false);

    assert_eq!(report.state, SyncState::Error);
    assert!(h.manager.get_entry(&entry.id).unwrap().is_some());
    let pending = h.manager.pending_tasks().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entry_id, entry.id);
    assert_eq!(h.remote.mutation_calls().len(), 1);
}

#[tokio::test]
async fn update_of_missing_entry_is_a_noop() {
    let h = Harness::new(ScriptedRemote::online());
    let ghost = EntryId::temporary();

    let result = h.manager.update_entry(&ghost, paragraph("boo")).unwrap();
    assert_eq!(result, None);
    assert!(h.store.is_empty());
    assert!(h.manager.pending_tasks().unwrap().is_empty());

    h.manager.sync(OWNER).await.unwrap();
    assert!(h.remote.mutation_calls().is_empty());
}

#[tokio::test]
async fn deleting_unsynced_entry_makes_no_remote_call() {
    let h = Harness::new(ScriptedRemote::online());
    let entry = h
        .manager
        .create_entry(OWNER, day(5), EntryKind::Freeform)
        .unwrap();
    assert!(h.manager.delete_entry(&entry.id).unwrap());

    assert!(h.manager.pending_tasks().unwrap().is_empty());
    assert!(h.manager.list_entries(OWNER).unwrap().is_empty());

    let report = h.manager.sync(OWNER).await.unwrap();
    assert_eq!(report.state, SyncState::Synced);
    assert!(h.remote.mutation_calls().is_empty());
}

#[tokio::test]
async fn deleting_synced_entry_deletes_remotely() {
    let h = Harness::new(ScriptedRemote::online());
    h.remote.queue_ids(&["p7"]);
    let entry = h
        .manager
        .create_entry(OWNER, day(5), EntryKind::Freeform)
        .unwrap();
    h.manager.sync(OWNER).await.unwrap();

    let permanent = EntryId::permanent("p7").unwrap();
    assert!(h.manager.delete_entry(&permanent).unwrap());
    assert!(h.manager.get_entry(&permanent).unwrap().is_none());
    h.manager.sync(OWNER).await.unwrap();

    assert_eq!(
        h.remote.mutation_calls(),
        vec![Call::Create(entry.id), Call::Delete(permanent)]
    );
    assert_eq!(h.remote.entry_count(), 0);
    assert!(h.manager.pending_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn transient_failures_wait_for_backoff_gate() {
    let h = Harness::new(ScriptedRemote::offline());
    h.manager
        .create_entry(OWNER, day(6), EntryKind::Freeform)
        .unwrap();

    h.manager.sync(OWNER).await.unwrap();
    h.manager.sync(OWNER).await.unwrap();
    assert_eq!(h.remote.mutation_calls().len(), 1);

    let task = &h.manager.pending_tasks().unwrap()[0];
    assert_eq!(task.attempts, 1);
    assert_eq!(task.next_eligible_at, START_MS + 1_000);
    assert_eq!(task.last_error, Some(FailureKind::Transient));

    h.manager.retry_now(OWNER).await.unwrap();
    assert_eq!(h.remote.mutation_calls().len(), 2);
    assert_eq!(h.manager.pending_tasks().unwrap()[0].attempts, 2);
}

#[tokio::test]
async fn edit_during_inflight_create_is_pushed_as_update() {
    let h = Harness::new(ScriptedRemote::online());
    h.remote.queue_ids(&["p1"]);
    h.remote.hold();
    let entry = h
        .manager
        .create_entry(OWNER, day(7), EntryKind::Freeform)
        .unwrap();
    h.manager.update_entry(&entry.id, paragraph("a")).unwrap();

    let manager = h.manager.clone();
    let running = tokio::spawn(async move { manager.sync(OWNER).await });
    wait_until(|| h.remote.active() == 1).await;

    h.clock.advance(10);
    h.manager.update_entry(&entry.id, paragraph("b")).unwrap();
    h.remote.release(10);

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.state, SyncState::Synced);

    let permanent = EntryId::permanent("p1").unwrap();
    assert_eq!(
        h.remote.mutation_calls(),
        vec![Call::Create(entry.id.clone()), Call::Update(permanent.clone())]
    );
    assert_eq!(texts(&h.remote.entry("p1").unwrap().blocks), vec!["b"]);
    let local = h.manager.get_entry(&permanent).unwrap().unwrap();
    assert_eq!(texts(&local.blocks), vec!["b"]);
    assert!(h.manager.get_entry(&entry.id).unwrap().is_none());
    assert!(h.manager.pending_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn delete_during_inflight_create_deletes_new_id() {
    let h = Harness::new(ScriptedRemote::online());
    h.remote.queue_ids(&["p1"]);
    h.remote.hold();
    let entry = h
        .manager
        .create_entry(OWNER, day(8), EntryKind::Freeform)
        .unwrap();

    let manager = h.manager.clone();
    let running = tokio::spawn(async move { manager.sync(OWNER).await });
    wait_until(|| h.remote.active() == 1).await;

    assert!(h.manager.delete_entry(&entry.id).unwrap());
    h.remote.release(10);
    running.await.unwrap().unwrap();

    let permanent = EntryId::permanent("p1").unwrap();
    assert_eq!(
        h.remote.mutation_calls(),
        vec![Call::Create(entry.id.clone()), Call::Delete(permanent.clone())]
    );
    assert_eq!(h.remote.entry_count(), 0);
    assert!(h.manager.get_entry(&permanent).unwrap().is_none());
    assert!(h.manager.list_entries(OWNER).unwrap().is_empty());
    assert!(h.manager.pending_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn delete_during_failed_create_never_reaches_remote() {
    let h = Harness::new(ScriptedRemote::online());
    h.remote.hold();
    h.remote.fail_next(RemoteError::transient("connection reset"));
    let entry = h
        .manager
        .create_entry(OWNER, day(8), EntryKind::Freeform)
        .unwrap();

    let manager = h.manager.clone();
    let running = tokio::spawn(async move { manager.sync(OWNER).await });
    wait_until(|| h.remote.active() == 1).await;

    assert!(h.manager.delete_entry(&entry.id).unwrap());
    h.remote.release(10);
    running.await.unwrap().unwrap();

    assert!(h.manager.pending_tasks().unwrap().is_empty());

    h.manager.retry_now(OWNER).await.unwrap();
    assert_eq!(h.remote.mutation_calls(), vec![Call::Create(entry.id.clone())]);
    assert_eq!(h.remote.entry_count(), 0);
    assert!(h.manager.list_entries(OWNER).unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_sync_calls_coalesce() {
    let h = Harness::new(ScriptedRemote::online());
    h.remote.hold();
    h.manager
        .create_entry(OWNER, day(9), EntryKind::Freeform)
        .unwrap();

    let manager = h.manager.clone();
    let running = tokio::spawn(async move { manager.sync(OWNER).await });
    wait_until(|| h.remote.active() == 1).await;

    let second = h.manager.sync(OWNER).await.unwrap();
    assert!(second.coalesced);
    assert_eq!(second.pushed, 0);

    h.remote.release(1);
    let first = running.await.unwrap().unwrap();
    assert!(!first.coalesced);
    assert_eq!(first.pushed, 1);
    assert_eq!(h.remote.mutation_calls().len(), 1);
}

#[tokio::test]
async fn drain_respects_concurrency_limit() {
    let config = SyncConfig::default().with_max_concurrency(2);
    let h = Harness::with_config(ScriptedRemote::online(), config);
    for d in 1..=5 {
        h.manager
            .create_entry(OWNER, day(d), EntryKind::Freeform)
            .unwrap();
    }
    h.remote.hold();

    let manager = h.manager.clone();
    let running = tokio::spawn(async move { manager.sync(OWNER).await });
    wait_until(|| h.remote.active() == 2).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.remote.active(), 2);

    h.remote.release(100);
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.pushed, 5);
    assert_eq!(h.remote.peak(), 2);
    assert_eq!(h.remote.entry_count(), 5);
}

#[tokio::test]
async fn rejected_session_pauses_until_session_changes() {
    let h = Harness::new(ScriptedRemote::with_mode(Mode::Unauthorized));
    let mut events = h.bus.subscribe();
    h.manager
        .create_entry(OWNER, day(10), EntryKind::Freeform)
        .unwrap();

    let report = h.manager.sync(OWNER).await.unwrap();
    assert_eq!(report.state, SyncState::Error);
    assert!(drain_events(&mut events).contains(&AppEvent::Sync(SyncEvent::ReauthRequired {
        owner_id: OWNER.to_string(),
    })));
    assert_eq!(h.manager.pending_tasks().unwrap().len(), 1);

    h.remote.set_mode(Mode::Online);
    let calls_before = h.remote.calls().len();
    let paused = h.manager.sync(OWNER).await.unwrap();
    assert_eq!(paused.state, SyncState::Error);
    assert_eq!(h.remote.calls().len(), calls_before);

    h.manager.session_changed(Some(OWNER)).unwrap();
    let resumed = h.manager.sync(OWNER).await.unwrap();
    assert_eq!(resumed.state, SyncState::Synced);
    assert!(h.manager.pending_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn unauthorized_task_is_parked_not_dropped() {
    let h = Harness::new(ScriptedRemote::online());
    h.remote.fail_next(RemoteError::Unauthorized);
    let entry = h
        .manager
        .create_entry(OWNER, day(11), EntryKind::Freeform)
        .unwrap();

    h.manager.sync(OWNER).await.unwrap();

    let pending = h.manager.pending_tasks().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entry_id, entry.id);
    assert_eq!(pending[0].attempts, 0);
    assert_eq!(pending[0].last_error, Some(FailureKind::Unauthorized));
    assert!(h.manager.get_entry(&entry.id).unwrap().is_some());
}

#[tokio::test]
async fn update_missing_remotely_recreates_entry() {
    let h = Harness::new(ScriptedRemote::online());
    let mut seeded = quill_core::JournalEntry::new(OWNER, day(12), EntryKind::Freeform, START_MS - 50);
    seeded.id = EntryId::permanent("p9").unwrap();
    seeded.blocks = paragraph("old");
    h.remote.seed(seeded);

    h.manager.sync(OWNER).await.unwrap();
    let p9 = EntryId::permanent("p9").unwrap();
    assert!(h.manager.get_entry(&p9).unwrap().is_some());

    h.remote.forget("p9");
    h.remote.queue_ids(&["p10"]);
    h.clock.advance(5);
    h.manager.update_entry(&p9, paragraph("fresh")).unwrap();
    let report = h.manager.sync(OWNER).await.unwrap();

    assert_eq!(report.state, SyncState::Synced);
    let p10 = EntryId::permanent("p10").unwrap();
    assert_eq!(
        h.remote.mutation_calls(),
        vec![Call::Update(p9.clone()), Call::Create(p9.clone())]
    );
    assert!(h.manager.get_entry(&p9).unwrap().is_none());
    let local = h.manager.get_entry(&p10).unwrap().unwrap();
    assert_eq!(texts(&local.blocks), vec!["fresh"]);
    assert_eq!(texts(&h.remote.entry("p10").unwrap().blocks), vec!["fresh"]);
}

#[tokio::test]
async fn signed_out_sync_is_offline_and_local_writes_continue() {
    let h = Harness::new(ScriptedRemote::online());
    h.session.sign_out();

    let entry = h
        .manager
        .create_entry(OWNER, day(13), EntryKind::Freeform)
        .unwrap();
    let report = h.manager.sync(OWNER).await.unwrap();

    assert_eq!(report.state, SyncState::Offline);
    assert!(h.remote.calls().is_empty());
    assert!(h.manager.get_entry(&entry.id).unwrap().is_some());
}

#[tokio::test]
async fn status_channel_reports_sync_progress() {
    let h = Harness::new(ScriptedRemote::online());
    let mut status = h.manager.subscribe_status();
    h.manager
        .create_entry(OWNER, day(14), EntryKind::Freeform)
        .unwrap();

    h.manager.sync(OWNER).await.unwrap();
    assert!(status.has_changed().unwrap());
    assert_eq!(*status.borrow_and_update(), SyncState::Synced);
}

#[tokio::test]
async fn reconnect_trigger_pushes_queued_work() {
    let h = Harness::new(ScriptedRemote::offline());
    h.manager
        .create_entry(OWNER, day(15), EntryKind::Freeform)
        .unwrap();
    h.manager.sync(OWNER).await.unwrap();
    assert_eq!(h.remote.entry_count(), 0);

    let trigger = VisibilityTrigger::from_config(h.manager.config());
    let bus = h.bus.clone();
    let manager = h.manager.clone();
    let task = tokio::spawn(async move { trigger.run(&bus, &manager).await });
    wait_until(|| h.bus.subscriber_count() == 1).await;

    h.remote.set_mode(Mode::Online);
    h.bus.publish(AppEvent::Connectivity(false));
    h.bus.publish(AppEvent::Connectivity(true));
    wait_until(|| h.remote.entry_count() == 1).await;

    assert!(h.manager.pending_tasks().unwrap().is_empty());
    task.abort();
}

#[tokio::test]
async fn background_loop_pushes_new_entries() {
    let h = Harness::new(ScriptedRemote::online());
    let bus = h.bus.clone();
    let manager = h.manager.clone();
    let task = tokio::spawn(async move { manager.run(&bus).await });
    wait_until(|| h.bus.subscriber_count() == 1).await;

    h.manager
        .create_entry(OWNER, day(16), EntryKind::Freeform)
        .unwrap();
    wait_until(|| h.remote.entry_count() == 1).await;
    wait_until(|| h.manager.pending_tasks().unwrap().is_empty()).await;

    task.abort();
}

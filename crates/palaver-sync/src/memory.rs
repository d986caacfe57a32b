//! In-memory synchronization service for tests and demos.
//!
//! Implements every collaborator contract against process-local state:
//! named threads with per-subscriber history windows, content-addressed
//! records with annotation merging, chunked blob streaming with
//! injectable failures, and scriptable peer-sync attempts. Several
//! clients created from one hub observe each other's records, which is
//! enough to exercise the controllers end to end.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use palaver_shared::constants::BLOB_CHUNK_SIZE;
use palaver_shared::{ItemId, UserKey};

use crate::blob::{BlobReader, BlobTransfer, BlobWriter, FileSource, StatsFn, TransferStats};
use crate::error::SyncError;
use crate::peer::{BlobHook, BlobHookFn, PeerSync, SyncAttempt, SyncAttempts};
use crate::record::{Annotations, Record, RecordFields};
use crate::services::{IdentityProvider, Services};
use crate::store::RecordStore;
use crate::thread::{
    ChangeEvent, FetchParams, Subscription, ThreadDefaults, ThreadOpener, ThreadView,
};

type ThreadKey = (String, Option<ItemId>);

struct SubEntry {
    id: u64,
    thread: ThreadKey,
    tx: mpsc::UnboundedSender<ChangeEvent>,
    /// Items already streamed into this subscriber's view.
    delivered: HashSet<ItemId>,
}

/// A license grant issued through the hub.
#[derive(Debug, Clone)]
pub struct Grant {
    pub target: ItemId,
    pub targets: Vec<UserKey>,
    pub issuer: UserKey,
}

struct RemoteBlob {
    data: Bytes,
    /// Sync attempts that fail before one succeeds.
    failures_before_success: u32,
}

#[derive(Default)]
struct HubState {
    next_seq: u64,
    next_sub: u64,
    next_hook: u64,
    records: HashMap<ItemId, Record>,
    item_thread: HashMap<ItemId, ThreadKey>,
    threads: HashMap<ThreadKey, Vec<ItemId>>,
    subs: Vec<SubEntry>,
    blobs: HashMap<ItemId, Bytes>,
    remote_blobs: HashMap<ItemId, RemoteBlob>,
    hooks: HashMap<ItemId, Vec<(u64, BlobHookFn)>>,
    read_failures: HashMap<ItemId, u32>,
    write_failures: HashMap<ItemId, u32>,
    grants: Vec<Grant>,
}

/// Process-local synchronization hub shared by one or more clients.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    /// A client bound to one identity, implementing all service traits.
    pub fn client(&self, key: UserKey) -> Arc<MemoryClient> {
        Arc::new(MemoryClient {
            state: self.state.clone(),
            key,
        })
    }

    /// Make a blob available locally and fire pending availability hooks.
    pub fn put_blob(&self, id: &ItemId, data: impl Into<Bytes>) {
        let hooks = {
            let mut state = self.state.lock().expect("hub lock");
            state.blobs.insert(*id, data.into());
            take_hooks(&mut state, id)
        };
        for hook in hooks {
            hook();
        }
    }

    pub fn blob(&self, id: &ItemId) -> Option<Bytes> {
        self.state.lock().expect("hub lock").blobs.get(id).cloned()
    }

    /// Script a blob as fetchable from peers: `failures_before_success`
    /// attempts error out before one succeeds.
    pub fn seed_remote_blob(&self, id: &ItemId, data: impl Into<Bytes>, failures_before_success: u32) {
        let mut state = self.state.lock().expect("hub lock");
        state.remote_blobs.insert(
            *id,
            RemoteBlob {
                data: data.into(),
                failures_before_success,
            },
        );
    }

    /// The next `n` reads of this blob fail with a transfer error.
    pub fn fail_reads(&self, id: &ItemId, n: u32) {
        self.state.lock().expect("hub lock").read_failures.insert(*id, n);
    }

    /// The next `n` writes of this blob fail with a transfer error.
    pub fn fail_writes(&self, id: &ItemId, n: u32) {
        self.state.lock().expect("hub lock").write_failures.insert(*id, n);
    }

    /// All grants issued for a record.
    pub fn grants_for(&self, id: &ItemId) -> Vec<Grant> {
        self.state
            .lock()
            .expect("hub lock")
            .grants
            .iter()
            .filter(|g| &g.target == id)
            .cloned()
            .collect()
    }

    /// Number of records currently stored in a thread scope.
    pub fn record_count(&self, thread: &str, parent: Option<ItemId>) -> usize {
        self.state
            .lock()
            .expect("hub lock")
            .threads
            .get(&(thread.to_string(), parent))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One identity's handle onto the hub.
pub struct MemoryClient {
    state: Arc<Mutex<HubState>>,
    key: UserKey,
}

impl MemoryClient {
    /// Service bundle wired entirely to this client.
    pub fn services(self: &Arc<Self>) -> Services {
        Services {
            identity: self.clone(),
            threads: self.clone(),
            store: self.clone(),
            blobs: self.clone(),
            peers: self.clone(),
        }
    }
}

impl IdentityProvider for MemoryClient {
    fn public_key(&self) -> UserKey {
        self.key
    }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

struct HubView {
    state: Arc<Mutex<HubState>>,
    sub_id: u64,
    thread: ThreadKey,
}

impl ThreadView for HubView {
    fn record(&self, id: &ItemId) -> Option<Record> {
        self.state.lock().expect("hub lock").records.get(id).cloned()
    }

    fn ordered(&self) -> Vec<ItemId> {
        let state = self.state.lock().expect("hub lock");
        let Some(sub) = state.subs.iter().find(|s| s.id == self.sub_id) else {
            return Vec::new();
        };
        state
            .threads
            .get(&self.thread)
            .map(|items| {
                items
                    .iter()
                    .filter(|id| sub.delivered.contains(id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn update_stream(&self, fetch: &FetchParams) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("hub lock");
        let window: Vec<ItemId> = state
            .threads
            .get(&self.thread)
            .map(|items| tail(items, fetch.history_limit))
            .unwrap_or_default();

        let sub = state
            .subs
            .iter_mut()
            .find(|s| s.id == self.sub_id)
            .ok_or(SyncError::Stopped)?;

        let fresh: Vec<ItemId> = window
            .into_iter()
            .filter(|id| !sub.delivered.contains(id))
            .collect();
        if !fresh.is_empty() {
            sub.delivered.extend(fresh.iter().copied());
            let _ = sub.tx.send(ChangeEvent::added(fresh));
        }
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock().expect("hub lock");
        state.subs.retain(|s| s.id != self.sub_id);
    }
}

impl ThreadOpener for MemoryClient {
    fn subscribe(
        &self,
        thread: &str,
        defaults: &ThreadDefaults,
        fetch: &FetchParams,
    ) -> Result<Subscription, SyncError> {
        let key = (thread.to_string(), defaults.parent);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock().expect("hub lock");
        let sub_id = state.next_sub;
        state.next_sub += 1;

        let replay: Vec<ItemId> = state
            .threads
            .get(&key)
            .map(|items| tail(items, fetch.history_limit))
            .unwrap_or_default();

        let mut entry = SubEntry {
            id: sub_id,
            thread: key.clone(),
            tx,
            delivered: HashSet::new(),
        };
        if !replay.is_empty() {
            entry.delivered.extend(replay.iter().copied());
            let _ = entry.tx.send(ChangeEvent::added(replay));
        }
        state.subs.push(entry);

        debug!(thread, sub_id, "Opened thread subscription");

        Ok(Subscription {
            events: rx,
            view: Arc::new(HubView {
                state: self.state.clone(),
                sub_id,
                thread: key,
            }),
        })
    }
}

/// Last `n` items of a thread, oldest first.
fn tail(items: &[ItemId], n: usize) -> Vec<ItemId> {
    items[items.len().saturating_sub(n)..].to_vec()
}

fn take_hooks(state: &mut HubState, id: &ItemId) -> Vec<BlobHookFn> {
    state
        .hooks
        .remove(id)
        .map(|hooks| hooks.into_iter().map(|(_, hook)| hook).collect())
        .unwrap_or_default()
}

fn broadcast(state: &mut HubState, thread: &ThreadKey, event: &ChangeEvent) {
    for sub in state.subs.iter_mut().filter(|s| &s.thread == thread) {
        let mut scoped = event.clone();
        // Adds become part of the subscriber's window; deletes only reach
        // subscribers that had the item.
        scoped.deleted.retain(|id| sub.delivered.remove(id));
        scoped.updated.retain(|id| sub.delivered.contains(id));
        for id in &scoped.added {
            sub.delivered.insert(*id);
        }
        if !scoped.added.is_empty() || !scoped.updated.is_empty() || !scoped.deleted.is_empty() {
            let _ = sub.tx.send(scoped);
        }
    }
}

// ---------------------------------------------------------------------------
// Record store
// ---------------------------------------------------------------------------

impl MemoryClient {
    fn make_record(&self, state: &mut HubState, thread: &str, fields: &RecordFields) -> Record {
        let seq = state.next_seq;
        state.next_seq += 1;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.key.0);
        hasher.update(thread.as_bytes());
        hasher.update(&fields.data);
        hasher.update(&seq.to_le_bytes());
        let id = ItemId(*hasher.finalize().as_bytes());

        Record {
            id,
            owner: self.key,
            parent: fields.parent,
            prev: fields.prev,
            reference: fields.reference,
            created_at: Utc::now(),
            data: fields.data.clone(),
            has_blob: fields.blob_hash.is_some(),
            blob_length: fields.blob_length,
            blob_hash: fields.blob_hash,
            licensed: true,
            min_license_distance: 0,
            annotations: None,
        }
    }

    /// Rewrite a target's annotation state and notify its thread.
    fn merge_annotations(
        &self,
        target: &Record,
        mutate: impl FnOnce(&mut Annotations),
    ) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("hub lock");
        let thread = state
            .item_thread
            .get(&target.id)
            .cloned()
            .ok_or_else(|| SyncError::Store("unknown annotation target".into()))?;

        let record = state
            .records
            .get_mut(&target.id)
            .ok_or_else(|| SyncError::Store("unknown annotation target".into()))?;
        let mut annotations = record
            .annotations
            .as_ref()
            .and_then(|raw| serde_json::from_slice(raw).ok())
            .unwrap_or_default();
        mutate(&mut annotations);
        record.annotations = Some(annotations.to_bytes());

        broadcast(&mut state, &thread, &ChangeEvent::updated(vec![target.id]));
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryClient {
    async fn post(&self, thread: &str, fields: RecordFields) -> Result<Vec<Record>, SyncError> {
        let mut state = self.state.lock().expect("hub lock");
        let record = self.make_record(&mut state, thread, &fields);
        let key = (thread.to_string(), fields.parent);

        state.records.insert(record.id, record.clone());
        state.item_thread.insert(record.id, key.clone());
        state.threads.entry(key.clone()).or_default().push(record.id);

        broadcast(&mut state, &key, &ChangeEvent::added(vec![record.id]));
        debug!(thread, id = %record.id.short(), "Posted record");
        Ok(vec![record])
    }

    async fn post_edit(&self, target: &Record, text: &str) -> Result<Vec<Record>, SyncError> {
        self.merge_annotations(target, |ann| {
            ann.edited_text = Some(text.to_string());
        })?;

        let mut state = self.state.lock().expect("hub lock");
        let fields = RecordFields {
            data: Bytes::copy_from_slice(text.as_bytes()),
            parent: Some(target.id),
            ..RecordFields::default()
        };
        let mut edit = self.make_record(&mut state, "edit", &fields);
        edit.licensed = target.licensed;
        Ok(vec![edit])
    }

    async fn post_reaction(
        &self,
        target: &Record,
        reaction: &str,
        negate: bool,
    ) -> Result<Vec<Record>, SyncError> {
        let key = self.key;
        self.merge_annotations(target, |ann| {
            ann.reactions
                .get_or_insert_with(Default::default)
                .apply(reaction, &key, negate);
        })?;

        let mut state = self.state.lock().expect("hub lock");
        let fields = RecordFields {
            data: Bytes::copy_from_slice(reaction.as_bytes()),
            parent: Some(target.id),
            ..RecordFields::default()
        };
        let mut vote = self.make_record(&mut state, "reaction", &fields);
        vote.licensed = target.licensed;
        Ok(vec![vote])
    }

    async fn post_license(
        &self,
        target: &Record,
        targets: &[UserKey],
    ) -> Result<Vec<Record>, SyncError> {
        let mut state = self.state.lock().expect("hub lock");
        state.grants.push(Grant {
            target: target.id,
            targets: targets.to_vec(),
            issuer: self.key,
        });

        let fields = RecordFields {
            parent: Some(target.id),
            ..RecordFields::default()
        };
        let mut grant = self.make_record(&mut state, "license", &fields);
        grant.licensed = false;
        Ok(vec![grant])
    }

    async fn delete(&self, target: &Record) -> Result<Vec<Record>, SyncError> {
        let mut state = self.state.lock().expect("hub lock");
        let thread = state
            .item_thread
            .remove(&target.id)
            .ok_or_else(|| SyncError::Store("unknown record".into()))?;
        state.records.remove(&target.id);
        if let Some(items) = state.threads.get_mut(&thread) {
            items.retain(|id| id != &target.id);
        }
        broadcast(&mut state, &thread, &ChangeEvent::deleted(vec![target.id]));

        let fields = RecordFields {
            parent: Some(target.id),
            ..RecordFields::default()
        };
        let mut tombstone = self.make_record(&mut state, "tombstone", &fields);
        tombstone.licensed = target.licensed;
        tombstone.min_license_distance = if target.licensed { 1 } else { 0 };
        Ok(vec![tombstone])
    }
}

// ---------------------------------------------------------------------------
// Blob transfer
// ---------------------------------------------------------------------------

struct HubReader {
    data: Option<Bytes>,
    pos: usize,
    fail: bool,
    closed: bool,
    started: Instant,
    stats: Option<StatsFn>,
}

impl HubReader {
    fn emit_stats(&mut self) {
        let size = self.data.as_ref().map(|d| d.len() as u64).unwrap_or(0);
        let pos = self.pos as u64;
        let elapsed_ms = self.started.elapsed().as_millis().max(1) as u64;
        let stats = TransferStats {
            pos,
            size,
            throughput: pos * 1000 / elapsed_ms,
            is_paused: false,
            finished: pos >= size,
            written: 0,
        };
        if let Some(cb) = self.stats.as_mut() {
            cb(stats);
        }
    }
}

#[async_trait]
impl BlobReader for HubReader {
    fn on_stats(&mut self, cb: StatsFn) {
        self.stats = Some(cb);
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SyncError> {
        if self.fail {
            self.fail = false;
            self.closed = true;
            return Err(SyncError::Transfer("simulated read failure".into()));
        }
        let Some(data) = self.data.as_ref() else {
            self.closed = true;
            return Err(SyncError::BlobNotAvailable);
        };
        if self.pos >= data.len() {
            self.closed = true;
            self.emit_stats();
            return Ok(None);
        }
        let end = (self.pos + BLOB_CHUNK_SIZE).min(data.len());
        let chunk = data.slice(self.pos..end);
        self.pos = end;
        self.emit_stats();
        Ok(Some(chunk))
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct HubWriter {
    state: Arc<Mutex<HubState>>,
    id: ItemId,
    source: FileSource,
    fail: bool,
    closed: bool,
    stats: Option<StatsFn>,
}

#[async_trait]
impl BlobWriter for HubWriter {
    fn on_stats(&mut self, cb: StatsFn) {
        self.stats = Some(cb);
    }

    async fn run(&mut self) -> Result<(), SyncError> {
        self.closed = true;
        if self.fail {
            return Err(SyncError::Transfer("simulated write failure".into()));
        }

        let size = self.source.len();
        let mut written = 0u64;
        let started = Instant::now();
        loop {
            written = (written + BLOB_CHUNK_SIZE as u64).min(size);
            if let Some(cb) = self.stats.as_mut() {
                let elapsed_ms = started.elapsed().as_millis().max(1) as u64;
                cb(TransferStats {
                    pos: written,
                    size,
                    throughput: written * 1000 / elapsed_ms,
                    is_paused: false,
                    finished: written >= size,
                    written,
                });
            }
            if written >= size {
                break;
            }
            tokio::task::yield_now().await;
        }

        let hooks = {
            let mut state = self.state.lock().expect("hub lock");
            state.blobs.insert(self.id, self.source.data.clone());
            take_hooks(&mut state, &self.id)
        };
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl BlobTransfer for MemoryClient {
    fn open_reader(&self, id: &ItemId) -> Result<Box<dyn BlobReader>, SyncError> {
        let mut state = self.state.lock().expect("hub lock");
        let fail = match state.read_failures.get_mut(id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        };
        Ok(Box::new(HubReader {
            data: state.blobs.get(id).cloned(),
            pos: 0,
            fail,
            closed: false,
            started: Instant::now(),
            stats: None,
        }))
    }

    fn open_writer(&self, id: &ItemId, source: FileSource) -> Result<Box<dyn BlobWriter>, SyncError> {
        let mut state = self.state.lock().expect("hub lock");
        let fail = match state.write_failures.get_mut(id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        };
        Ok(Box::new(HubWriter {
            state: self.state.clone(),
            id: *id,
            source,
            fail,
            closed: false,
            stats: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Peer sync
// ---------------------------------------------------------------------------

/// A peer-sync writer: either fails outright or lands the remote bytes
/// into local blob storage and fires availability hooks.
struct PeerWriter {
    state: Arc<Mutex<HubState>>,
    id: ItemId,
    data: Option<Bytes>,
    closed: bool,
    stats: Option<StatsFn>,
}

#[async_trait]
impl BlobWriter for PeerWriter {
    fn on_stats(&mut self, cb: StatsFn) {
        self.stats = Some(cb);
    }

    async fn run(&mut self) -> Result<(), SyncError> {
        self.closed = true;
        let Some(data) = self.data.take() else {
            return Err(SyncError::Transfer("peer had no data".into()));
        };
        if let Some(cb) = self.stats.as_mut() {
            cb(TransferStats {
                pos: data.len() as u64,
                size: data.len() as u64,
                throughput: 0,
                is_paused: false,
                finished: true,
                written: data.len() as u64,
            });
        }
        let hooks = {
            let mut state = self.state.lock().expect("hub lock");
            state.blobs.insert(self.id, data);
            take_hooks(&mut state, &self.id)
        };
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct HubAttempts {
    state: Arc<Mutex<HubState>>,
    id: ItemId,
    remaining_failures: u32,
    success_pending: bool,
}

#[async_trait]
impl SyncAttempts for HubAttempts {
    async fn next(&mut self) -> Option<SyncAttempt> {
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return Some(SyncAttempt {
                writer: Box::new(PeerWriter {
                    state: self.state.clone(),
                    id: self.id,
                    data: None,
                    closed: false,
                    stats: None,
                }),
            });
        }
        if self.success_pending {
            self.success_pending = false;
            let data = {
                let state = self.state.lock().expect("hub lock");
                state.remote_blobs.get(&self.id).map(|r| r.data.clone())
            }?;
            return Some(SyncAttempt {
                writer: Box::new(PeerWriter {
                    state: self.state.clone(),
                    id: self.id,
                    data: Some(data),
                    closed: false,
                    stats: None,
                }),
            });
        }
        None
    }
}

impl PeerSync for MemoryClient {
    fn on_blob(&self, id: &ItemId, hook: BlobHookFn) -> BlobHook {
        let mut state = self.state.lock().expect("hub lock");
        let hook_id = state.next_hook;
        state.next_hook += 1;
        state.hooks.entry(*id).or_default().push((hook_id, hook));

        let hub_state = self.state.clone();
        let id = *id;
        BlobHook::new(move || {
            let mut state = hub_state.lock().expect("hub lock");
            if let Some(hooks) = state.hooks.get_mut(&id) {
                hooks.retain(|(h, _)| *h != hook_id);
            }
        })
    }

    fn sync_blob(&self, id: &ItemId) -> Box<dyn SyncAttempts> {
        let state = self.state.lock().expect("hub lock");
        let (failures, available) = state
            .remote_blobs
            .get(id)
            .map(|r| (r.failures_before_success, true))
            .unwrap_or((0, false));
        Box::new(HubAttempts {
            state: self.state.clone(),
            id: *id,
            remaining_failures: failures,
            success_pending: available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> UserKey {
        UserKey([n; 32])
    }

    #[tokio::test]
    async fn test_post_reaches_subscribers() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let bob = hub.client(key(2));

        let mut sub = bob
            .subscribe("channels", &ThreadDefaults::default(), &FetchParams::default())
            .unwrap();

        let records = alice
            .post("channels", RecordFields::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.added, vec![records[0].id]);
        assert_eq!(sub.view.ordered(), vec![records[0].id]);
    }

    #[tokio::test]
    async fn test_history_window_and_widening() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));

        let mut ids = Vec::new();
        for i in 0..5u8 {
            let records = alice
                .post(
                    "channel",
                    RecordFields {
                        data: Bytes::copy_from_slice(&[i]),
                        ..RecordFields::default()
                    },
                )
                .await
                .unwrap();
            ids.push(records[0].id);
        }

        let fetch = FetchParams {
            history_limit: 2,
            include_licenses: true,
        };
        let mut sub = alice
            .subscribe("channel", &ThreadDefaults::default(), &fetch)
            .unwrap();

        let replay = sub.events.recv().await.unwrap();
        assert_eq!(replay.added, ids[3..].to_vec());

        sub.view
            .update_stream(&FetchParams {
                history_limit: 5,
                include_licenses: true,
            })
            .unwrap();
        let older = sub.events.recv().await.unwrap();
        assert_eq!(older.added, ids[..3].to_vec());
        assert_eq!(sub.view.ordered(), ids);
    }

    #[tokio::test]
    async fn test_edit_merges_and_notifies() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));

        let record = alice
            .post("channel", RecordFields::default())
            .await
            .unwrap()
            .remove(0);

        let mut sub = alice
            .subscribe("channel", &ThreadDefaults::default(), &FetchParams::default())
            .unwrap();
        sub.events.recv().await.unwrap(); // initial replay

        alice.post_edit(&record, "new text").await.unwrap();
        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.updated, vec![record.id]);

        let merged = sub.view.record(&record.id).unwrap().annotations().unwrap();
        assert_eq!(merged.edited_text.as_deref(), Some("new text"));
    }

    #[tokio::test]
    async fn test_stop_closes_event_channel() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let mut sub = alice
            .subscribe("presence", &ThreadDefaults::default(), &FetchParams::default())
            .unwrap();
        sub.view.stop();
        assert!(sub.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_peer_sync_script_runs_out() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let id = ItemId([9; 32]);

        // Nothing seeded: immediately exhausted.
        let mut attempts = alice.sync_blob(&id);
        assert!(attempts.next().await.is_none());

        hub.seed_remote_blob(&id, &b"payload"[..], 1);
        let mut attempts = alice.sync_blob(&id);

        let mut first = attempts.next().await.unwrap();
        assert!(first.writer.run().await.is_err());

        let mut second = attempts.next().await.unwrap();
        second.writer.run().await.unwrap();
        assert_eq!(hub.blob(&id).unwrap(), Bytes::from_static(b"payload"));

        assert!(attempts.next().await.is_none());
    }

    #[tokio::test]
    async fn test_blob_hook_fires_once_and_cancels() {
        let hub = MemoryHub::new();
        let alice = hub.client(key(1));
        let id = ItemId([4; 32]);

        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let _hook = alice.on_blob(
            &id,
            Box::new(move || {
                fired_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );

        hub.put_blob(&id, &b"x"[..]);
        hub.put_blob(&id, &b"y"[..]);
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);

        let never = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let never_clone = never.clone();
        let hook = alice.on_blob(
            &id,
            Box::new(move || {
                never_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
        hook.cancel();
        hub.put_blob(&id, &b"z"[..]);
        assert_eq!(never.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}

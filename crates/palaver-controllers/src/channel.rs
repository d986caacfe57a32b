//! Message timeline of a single channel.
//!
//! The controller reconciles the channel's record stream into an ordered
//! timeline of [`Message`] view models, manages attachment transfers in
//! both directions, and evicts idle media on a purge timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use palaver_shared::constants::{
    DELETE_EDIT_GRACE, HISTORY_PAGE, MAX_BLOB_SIZE, PURGE_INTERVAL, PURGE_MAX_AGE,
};
use palaver_shared::{ItemId, UserKey};
use palaver_sync::{
    ChangeEvent, FetchParams, FileSource, Record, RecordFields, Services, ThreadDefaults,
    ThreadView,
};

use crate::binding::{require_thread_name, Reconciler, StreamBinding};
use crate::error::ControllerError;
use crate::objects::{ObjectStore, ObjectUrl};
use crate::signal::Signal;
use crate::transfer::{format_transfer_stats, is_image, mime_for_filename, read_to_buffer};

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub thread_name: String,
    pub max_blob_size: u64,
    pub purge_interval: Duration,
    /// Media untouched for this long is evicted by the purge timer.
    pub purge_max_age: Duration,
    /// Extra records pulled per "load older history" step.
    pub history_page: usize,
    /// Delay between the hiding edit and the actual delete.
    pub delete_grace: Duration,
    pub fetch: FetchParams,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            thread_name: "channel".to_string(),
            max_blob_size: MAX_BLOB_SIZE,
            purge_interval: PURGE_INTERVAL,
            purge_max_age: PURGE_MAX_AGE,
            history_page: HISTORY_PAGE,
            delete_grace: DELETE_EDIT_GRACE,
            fetch: FetchParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Download,
    Upload,
}

/// Download presentation state. Exactly one of the optional fields is
/// usually set; `throughput` carries live progress text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadInfo {
    /// "Click to download" text for non-image attachments.
    pub link_text: Option<String>,
    pub error: Option<String>,
    pub throughput: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadInfo {
    pub text: Option<String>,
    pub error: Option<String>,
    pub throughput: Option<String>,
    /// Retained on failure so the user can retry without re-picking.
    pub file: Option<FileSource>,
}

/// One timeline entry as presented to the UI.
#[derive(Clone)]
pub struct Message {
    pub id: ItemId,
    pub owner: UserKey,
    pub created_at: DateTime<Utc>,
    /// Original record text; the filename for attachment messages.
    pub text: Option<String>,
    pub edited_text: Option<String>,
    pub reactions: Option<palaver_sync::Reactions>,
    pub has_blob: bool,
    pub blob_length: Option<u64>,
    /// Display reference for materialized image bytes.
    pub img_src: Option<String>,
    /// Display reference for materialized non-image bytes.
    pub att_src: Option<String>,
    pub object_url: Option<ObjectUrl>,
    pub download: Option<DownloadInfo>,
    pub upload: Option<UploadInfo>,
    pub transfer: Option<TransferKind>,
    pub download_cancelled: bool,
    pub last_activity: Instant,
}

impl Message {
    fn from_record(record: &Record, now: Instant) -> Self {
        Self {
            id: record.id,
            owner: record.owner,
            created_at: record.created_at,
            text: record.text(),
            edited_text: None,
            reactions: None,
            has_blob: record.has_blob,
            blob_length: record.blob_length,
            img_src: None,
            att_src: None,
            object_url: None,
            download: None,
            upload: None,
            transfer: None,
            download_cancelled: false,
            last_activity: now,
        }
    }
}

#[derive(Default)]
struct TimelineState {
    order: Vec<ItemId>,
    messages: HashMap<ItemId, Message>,
}

struct ChannelInner {
    weak: Weak<ChannelInner>,
    config: ChannelConfig,
    services: Services,
    objects: Arc<ObjectStore>,
    channel: Record,
    /// Grant recipients derived from the channel record.
    targets: Vec<UserKey>,
    view: Arc<dyn ThreadView>,
    state: Mutex<TimelineState>,
    update_signal: Signal<()>,
    notification_signal: Signal<()>,
    binding: OnceLock<Weak<StreamBinding>>,
    history_limit: AtomicUsize,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

pub struct ChannelController {
    inner: Arc<ChannelInner>,
    binding: Arc<StreamBinding>,
}

impl ChannelController {
    pub fn new(
        services: &Services,
        objects: Arc<ObjectStore>,
        channel: Record,
        config: ChannelConfig,
    ) -> Result<Self, ControllerError> {
        require_thread_name(&config.thread_name)?;

        let mut targets = Vec::new();
        if let Some(reference) = channel.reference {
            targets.push(channel.owner);
            if reference != channel.owner {
                targets.push(reference);
            }
        }

        let defaults = ThreadDefaults {
            parent: Some(channel.id),
        };
        let subscription = services
            .threads
            .subscribe(&config.thread_name, &defaults, &config.fetch)?;

        let history_limit = AtomicUsize::new(config.fetch.history_limit);
        let inner = Arc::new_cyclic(|weak| ChannelInner {
            weak: weak.clone(),
            services: services.clone(),
            objects,
            channel,
            targets,
            view: subscription.view.clone(),
            state: Mutex::new(TimelineState::default()),
            update_signal: Signal::new(),
            notification_signal: Signal::new(),
            binding: OnceLock::new(),
            history_limit,
            timers: Mutex::new(Vec::new()),
            config,
        });

        let binding = StreamBinding::bind(
            &inner.config.thread_name,
            subscription,
            inner.clone() as Arc<dyn Reconciler>,
        );
        let _ = inner.binding.set(Arc::downgrade(&binding));

        let purge_inner = inner.clone();
        let purge = tokio::spawn(async move {
            loop {
                tokio::time::sleep(purge_inner.config.purge_interval).await;
                if purge_inner.is_closed() {
                    break;
                }
                purge_inner.purge(purge_inner.config.purge_max_age);
            }
        });
        inner.timers.lock().expect("channel timers lock").push(purge);

        Ok(Self { inner, binding })
    }

    /// The channel record this timeline belongs to.
    pub fn id(&self) -> ItemId {
        self.inner.channel.id
    }

    pub fn targets(&self) -> &[UserKey] {
        &self.inner.targets
    }

    /// Timeline snapshot in display order.
    pub fn messages(&self) -> Vec<Message> {
        let state = self.inner.state.lock().expect("timeline lock");
        state
            .order
            .iter()
            .filter_map(|id| state.messages.get(id).cloned())
            .collect()
    }

    pub fn message(&self, id: &ItemId) -> Option<Message> {
        self.inner
            .state
            .lock()
            .expect("timeline lock")
            .messages
            .get(id)
            .cloned()
    }

    pub fn on_update(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.inner.update_signal.connect(listener);
    }

    /// Fires when a record from another party arrives.
    pub fn on_notification(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.inner.notification_signal.connect(listener);
    }

    pub fn on_close(&self, listener: impl Fn(()) + Send + Sync + 'static) {
        self.binding.on_close(listener);
    }

    /// Posts a message. With a file attached, the record carries the
    /// filename as text plus the blob metadata, and the upload starts in
    /// the background after the record lands.
    pub async fn submit_message(
        &self,
        text: &str,
        file: Option<FileSource>,
    ) -> Result<ItemId, ControllerError> {
        if self.binding.is_closed() {
            return Err(ControllerError::Closed);
        }
        if let Some(file) = &file {
            if file.len() > self.inner.config.max_blob_size {
                return Err(ControllerError::AttachmentTooLarge {
                    size: file.len(),
                    max: self.inner.config.max_blob_size,
                });
            }
        }

        let prev = {
            let state = self.inner.state.lock().expect("timeline lock");
            state.order.last().copied()
        };
        let fields = match &file {
            Some(file) => RecordFields {
                data: Bytes::copy_from_slice(file.name.as_bytes()),
                parent: Some(self.inner.channel.id),
                prev,
                blob_hash: Some(file.content_hash()),
                blob_length: Some(file.len()),
                ..RecordFields::default()
            },
            None => RecordFields {
                data: Bytes::copy_from_slice(text.as_bytes()),
                parent: Some(self.inner.channel.id),
                prev,
                ..RecordFields::default()
            },
        };

        let records = self
            .inner
            .services
            .store
            .post(&self.inner.config.thread_name, fields)
            .await?;
        let record = records
            .into_iter()
            .next()
            .ok_or(ControllerError::RecordCreation)?;

        if let Some(file) = file {
            // Register the pending upload before yielding so the
            // reconciler never mistakes our own attachment for a
            // downloadable incoming one.
            {
                let mut guard = self.inner.state.lock().expect("timeline lock");
                let state = &mut *guard;
                let now = Instant::now();
                let msg = state
                    .messages
                    .entry(record.id)
                    .or_insert_with(|| Message::from_record(&record, now));
                msg.upload = Some(UploadInfo::default());
                insert_ordered(&mut state.order, &state.messages, record.id);
            }
            self.start_upload(record.id, file);
        }

        self.inner.license(std::slice::from_ref(&record)).await?;
        Ok(record.id)
    }

    pub async fn edit_message(&self, id: ItemId, text: &str) -> Result<(), ControllerError> {
        let record = self
            .inner
            .view
            .record(&id)
            .ok_or(ControllerError::UnknownItem(id))?;
        let edits = self.inner.services.store.post_edit(&record, text).await?;
        self.inner.license(&edits).await
    }

    /// Adds the local user's reaction, or retracts it when the aggregate
    /// already carries it.
    pub async fn toggle_reaction(&self, id: ItemId, reaction: &str) -> Result<(), ControllerError> {
        let record = self
            .inner
            .view
            .record(&id)
            .ok_or(ControllerError::UnknownItem(id))?;
        let own = self.inner.services.identity.public_key();
        let negate = record
            .annotations()
            .and_then(|a| a.reactions)
            .map(|r| r.has_reacted(reaction, &own))
            .unwrap_or(false);
        let votes = self
            .inner
            .services
            .store
            .post_reaction(&record, reaction, negate)
            .await?;
        self.inner.license(&votes).await
    }

    /// Deletes a message in two steps: an empty edit hides the content
    /// right away, the actual delete follows after a grace period so the
    /// edit can propagate to peers that receive the tombstone late.
    pub async fn delete_message(&self, id: ItemId) -> Result<(), ControllerError> {
        let record = self
            .inner
            .view
            .record(&id)
            .ok_or(ControllerError::UnknownItem(id))?;

        let edits = self.inner.services.store.post_edit(&record, "").await?;
        self.inner.license(&edits).await?;

        tokio::time::sleep(self.inner.config.delete_grace).await;

        let tombstones = self.inner.services.store.delete(&record).await?;
        for tombstone in &tombstones {
            if tombstone.licensed && tombstone.min_license_distance > 0 {
                self.inner
                    .services
                    .store
                    .post_license(tombstone, &self.inner.targets)
                    .await?;
            }
        }
        Ok(())
    }

    /// Starts (or retries) downloading an attachment. Progress and
    /// failure are reported through the message's download info.
    pub fn download(&self, id: ItemId) {
        tokio::spawn(self.inner.clone().run_download(id, true));
    }

    /// Flags an in-flight download so its failure path stops retrying.
    pub fn cancel_download(&self, id: ItemId) {
        let mut state = self.inner.state.lock().expect("timeline lock");
        if let Some(msg) = state.messages.get_mut(&id) {
            msg.download_cancelled = true;
        }
    }

    /// Starts uploading the attachment bytes for an already posted record.
    pub fn start_upload(&self, id: ItemId, file: FileSource) {
        tokio::spawn(self.inner.clone().run_upload(id, file));
    }

    /// Re-seeds an attachment from a locally picked file. The file must
    /// match the original record exactly; nothing is mutated on mismatch.
    pub fn reupload(&self, id: ItemId, file: FileSource) -> Result<(), ControllerError> {
        let record = self
            .inner
            .view
            .record(&id)
            .ok_or(ControllerError::UnknownItem(id))?;
        let expected_name = record.text().unwrap_or_default();
        if file.name != expected_name {
            return Err(ControllerError::Validation(format!(
                "file name does not match the original attachment ({expected_name})"
            )));
        }
        if Some(file.len()) != record.blob_length {
            return Err(ControllerError::Validation(
                "file size does not match the original attachment".to_string(),
            ));
        }
        if Some(file.content_hash()) != record.blob_hash {
            return Err(ControllerError::Validation(
                "file content does not match the original attachment".to_string(),
            ));
        }
        self.start_upload(id, file);
        Ok(())
    }

    /// Widens the history window by one page. Older records arrive as
    /// added events.
    pub fn load_history(&self) -> Result<(), ControllerError> {
        let page = self.inner.config.history_page;
        let limit = self.inner.history_limit.fetch_add(page, Ordering::SeqCst) + page;
        let fetch = FetchParams {
            history_limit: limit,
            ..self.inner.config.fetch.clone()
        };
        self.binding.update_stream(&fetch)
    }

    pub fn close(&self) {
        self.binding.close();
        for timer in self
            .inner
            .timers
            .lock()
            .expect("channel timers lock")
            .drain(..)
        {
            timer.abort();
        }
        // unconditional purge releases every materialized object
        self.inner.purge(Duration::ZERO);
    }
}

impl ChannelInner {
    fn is_closed(&self) -> bool {
        self.binding
            .get()
            .and_then(Weak::upgrade)
            .map(|b| b.is_closed())
            .unwrap_or(true)
    }

    async fn license(&self, records: &[Record]) -> Result<(), ControllerError> {
        for record in records {
            if record.licensed {
                self.services.store.post_license(record, &self.targets).await?;
            }
        }
        Ok(())
    }

    /// Folds one record into the timeline. Returns the owner when the
    /// item was materialized from the stream.
    fn reconcile_item(&self, id: &ItemId, is_new: bool) -> Option<UserKey> {
        let record = self.view.record(id)?;
        let mut start_download = false;
        {
            let mut guard = self.state.lock().expect("timeline lock");
            let state = &mut *guard;
            let now = Instant::now();
            let msg = state
                .messages
                .entry(*id)
                .or_insert_with(|| Message::from_record(&record, now));
            msg.owner = record.owner;
            msg.created_at = record.created_at;
            msg.text = record.text();
            msg.has_blob = record.has_blob;
            msg.blob_length = record.blob_length;
            msg.last_activity = now;
            if let Some(ann) = record.annotations() {
                if let Some(text) = ann.edited_text {
                    msg.edited_text = Some(text);
                }
                if let Some(reactions) = ann.reactions {
                    msg.reactions = Some(reactions);
                }
            }

            let untouched = msg.transfer.is_none()
                && msg.object_url.is_none()
                && msg.download.is_none()
                && msg.upload.is_none();
            if record.has_blob && untouched {
                let size = record.blob_length.unwrap_or(0);
                let filename = msg.text.clone().unwrap_or_default();
                if size > self.config.max_blob_size {
                    msg.download = Some(DownloadInfo {
                        error: Some("Attachment too large to download".to_string()),
                        ..DownloadInfo::default()
                    });
                } else if is_image(mime_for_filename(&filename)) {
                    start_download = true;
                } else {
                    msg.download = Some(DownloadInfo {
                        link_text: Some(format!("Download {filename}")),
                        ..DownloadInfo::default()
                    });
                }
            }

            if is_new {
                insert_ordered(&mut state.order, &state.messages, *id);
            }
        }

        if start_download {
            if let Some(inner) = self.weak.upgrade() {
                tokio::spawn(inner.run_download(*id, true));
            }
        }
        Some(record.owner)
    }

    fn remove_item(&self, id: &ItemId) {
        let mut state = self.state.lock().expect("timeline lock");
        if let Some(msg) = state.messages.remove(id) {
            if let Some(object) = msg.object_url {
                self.objects.revoke(&object);
            }
        }
        state.order.retain(|item| item != id);
    }

    fn run_download(
        self: Arc<Self>,
        id: ItemId,
        retry: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(self.run_download_inner(id, retry))
    }

    async fn run_download_inner(self: Arc<Self>, id: ItemId, retry: bool) {
        {
            let mut state = self.state.lock().expect("timeline lock");
            let Some(msg) = state.messages.get_mut(&id) else {
                return;
            };
            if msg.transfer.is_some() {
                return;
            }
            msg.transfer = Some(TransferKind::Download);
            msg.download_cancelled = false;
            let info = msg.download.get_or_insert_with(DownloadInfo::default);
            info.error = None;
        }
        self.update_signal.emit(());

        let result = match self.services.blobs.open_reader(&id) {
            Ok(mut reader) => {
                let weak = self.weak.clone();
                reader.on_stats(Box::new(move |stats| {
                    if let Some(inner) = weak.upgrade() {
                        inner.set_download_throughput(&id, format_transfer_stats(&stats));
                    }
                }));
                read_to_buffer(reader.as_mut()).await
            }
            Err(err) => Err(err),
        };

        if self.is_closed() {
            return;
        }

        match result {
            Ok(bytes) => self.finish_download(&id, bytes),
            Err(err) => {
                debug!(id = %id.short(), %err, "attachment download failed");
                let cancelled = {
                    let mut state = self.state.lock().expect("timeline lock");
                    match state.messages.get_mut(&id) {
                        Some(msg) => {
                            msg.transfer = None;
                            msg.download_cancelled
                        }
                        None => return,
                    }
                };
                if cancelled || !retry {
                    self.fail_download(&id, "Attachment could not be downloaded. Click to retry.");
                } else {
                    self.retry_via_peers(id).await;
                }
            }
        }
    }

    /// Fallback after a failed local read: arm an availability hook that
    /// restarts the download once the blob lands, then walk the peer
    /// sync attempts until one succeeds or they run out.
    async fn retry_via_peers(self: &Arc<Self>, id: ItemId) {
        {
            let mut state = self.state.lock().expect("timeline lock");
            if let Some(msg) = state.messages.get_mut(&id) {
                let info = msg.download.get_or_insert_with(DownloadInfo::default);
                info.error = None;
                info.throughput = Some("Waiting for peers".to_string());
            }
        }
        self.update_signal.emit(());

        let weak = self.weak.clone();
        let hook = self.services.peers.on_blob(
            &id,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(inner.run_download(id, false));
                }
            }),
        );

        let mut attempts = self.services.peers.sync_blob(&id);
        loop {
            let Some(mut attempt) = attempts.next().await else {
                hook.cancel();
                if !self.is_closed() {
                    self.fail_download(
                        &id,
                        "Attachment could not be fetched from peers. Click to retry.",
                    );
                }
                return;
            };

            let weak = self.weak.clone();
            attempt.writer.on_stats(Box::new(move |stats| {
                if let Some(inner) = weak.upgrade() {
                    inner.set_download_throughput(
                        &id,
                        format!("Syncing from peers {} kb", stats.written / 1024),
                    );
                }
            }));
            match attempt.writer.run().await {
                // the armed hook restarts the download
                Ok(()) => return,
                Err(err) => {
                    debug!(id = %id.short(), %err, "peer sync attempt failed");
                }
            }
        }
    }

    fn finish_download(&self, id: &ItemId, bytes: Bytes) {
        {
            let mut state = self.state.lock().expect("timeline lock");
            let Some(msg) = state.messages.get_mut(id) else {
                return;
            };
            let filename = msg.text.clone().unwrap_or_default();
            let mime = mime_for_filename(&filename);
            if let Some(old) = msg.object_url.take() {
                self.objects.revoke(&old);
            }
            let object = self.objects.create(bytes, mime);
            if is_image(mime) {
                msg.img_src = Some(object.url().to_string());
                msg.att_src = None;
            } else {
                msg.att_src = Some(object.url().to_string());
                msg.img_src = None;
            }
            msg.object_url = Some(object);
            msg.download = None;
            msg.transfer = None;
            msg.last_activity = Instant::now();
        }
        self.update_signal.emit(());
    }

    fn fail_download(&self, id: &ItemId, text: &str) {
        {
            let mut state = self.state.lock().expect("timeline lock");
            let Some(msg) = state.messages.get_mut(id) else {
                return;
            };
            msg.transfer = None;
            msg.download = Some(DownloadInfo {
                error: Some(text.to_string()),
                ..DownloadInfo::default()
            });
        }
        self.update_signal.emit(());
    }

    fn set_download_throughput(&self, id: &ItemId, text: String) {
        {
            let mut state = self.state.lock().expect("timeline lock");
            let Some(msg) = state.messages.get_mut(id) else {
                return;
            };
            let info = msg.download.get_or_insert_with(DownloadInfo::default);
            info.throughput = Some(text);
        }
        self.update_signal.emit(());
    }

    fn set_upload_throughput(&self, id: &ItemId, text: String) {
        {
            let mut state = self.state.lock().expect("timeline lock");
            let Some(msg) = state.messages.get_mut(id) else {
                return;
            };
            let info = msg.upload.get_or_insert_with(UploadInfo::default);
            info.throughput = Some(text);
        }
        self.update_signal.emit(());
    }

    async fn run_upload(self: Arc<Self>, id: ItemId, file: FileSource) {
        {
            let mut state = self.state.lock().expect("timeline lock");
            let Some(msg) = state.messages.get_mut(&id) else {
                return;
            };
            if msg.transfer.is_some() {
                return;
            }
            msg.transfer = Some(TransferKind::Upload);
            let info = msg.upload.get_or_insert_with(UploadInfo::default);
            info.error = None;
            info.text = None;
        }
        self.update_signal.emit(());

        let result = match self.services.blobs.open_writer(&id, file.clone()) {
            Ok(mut writer) => {
                let weak = self.weak.clone();
                writer.on_stats(Box::new(move |stats| {
                    if let Some(inner) = weak.upgrade() {
                        inner.set_upload_throughput(&id, format_transfer_stats(&stats));
                    }
                }));
                writer.run().await
            }
            Err(err) => Err(err),
        };

        if self.is_closed() {
            return;
        }

        {
            let mut state = self.state.lock().expect("timeline lock");
            let Some(msg) = state.messages.get_mut(&id) else {
                return;
            };
            msg.transfer = None;
            match result {
                Ok(()) => {
                    let mime = mime_for_filename(&file.name);
                    if is_image(mime) {
                        if let Some(old) = msg.object_url.take() {
                            self.objects.revoke(&old);
                        }
                        let object = self.objects.create(file.data.clone(), mime);
                        msg.img_src = Some(object.url().to_string());
                        msg.object_url = Some(object);
                        msg.upload = None;
                    } else {
                        msg.upload = Some(UploadInfo {
                            text: Some("Attachment uploaded. Click to download.".to_string()),
                            ..UploadInfo::default()
                        });
                    }
                    msg.last_activity = Instant::now();
                }
                Err(err) => {
                    warn!(id = %id.short(), %err, "attachment upload failed");
                    msg.upload = Some(UploadInfo {
                        text: Some("Attachment could not be uploaded. Click to retry.".to_string()),
                        error: Some(err.to_string()),
                        file: Some(file),
                        ..UploadInfo::default()
                    });
                }
            }
        }
        self.update_signal.emit(());
    }

    /// Evicts materialized attachment bytes that nothing touched for
    /// `max_age`. Timeline entries stay; only the media references go.
    fn purge(&self, max_age: Duration) {
        let now = Instant::now();
        let mut purged = false;
        {
            let mut state = self.state.lock().expect("timeline lock");
            for msg in state.messages.values_mut() {
                if now.duration_since(msg.last_activity) < max_age {
                    continue;
                }
                if let Some(object) = msg.object_url.take() {
                    self.objects.revoke(&object);
                    purged = true;
                }
                if msg.img_src.take().is_some() {
                    purged = true;
                }
                if msg.att_src.take().is_some() {
                    purged = true;
                }
            }
        }
        if purged {
            debug!(channel = %self.channel.id.short(), "purged idle media");
            self.update_signal.emit(());
        }
    }
}

impl Reconciler for ChannelInner {
    fn on_change(&self, event: &ChangeEvent) {
        let own = self.services.identity.public_key();
        let mut foreign_arrival = false;
        for id in &event.updated {
            self.reconcile_item(id, false);
        }
        for id in &event.added {
            if let Some(owner) = self.reconcile_item(id, true) {
                if owner != own {
                    foreign_arrival = true;
                }
            }
        }
        for id in &event.deleted {
            self.remove_item(id);
        }
        if foreign_arrival {
            self.notification_signal.emit(());
        }
        self.update_signal.emit(());
    }
}

/// Inserts `id` into `order` keeping (created_at, id) ordering, so
/// timelines agree across parties even when clocks collide.
fn insert_ordered(order: &mut Vec<ItemId>, messages: &HashMap<ItemId, Message>, id: ItemId) {
    if order.contains(&id) {
        return;
    }
    let Some(new_msg) = messages.get(&id) else {
        return;
    };
    let sort_key = (new_msg.created_at, id);
    let at = order
        .iter()
        .position(|existing| {
            messages
                .get(existing)
                .map(|m| (m.created_at, m.id) > sort_key)
                .unwrap_or(false)
        })
        .unwrap_or(order.len());
    order.insert(at, id);
}

// Offline Core - Offline download engine for media streaming clients
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Single-slot download queue
//!
//! [`DownloadQueue`] is a cheap, cloneable handle. Every operation is sent as
//! a [`QueueCommand`] to one spawned actor which owns the item collection, so
//! "is anything downloading" and the decision to admit an item are evaluated
//! and applied in the same step. Transfer tasks report progress and their
//! outcome back into the same actor loop.
//!
//! # Usage Example
//! ```no_run
//! use offline_core::blob::MemoryBlobStore;
//! use offline_core::download::{DownloadQueue, HttpSource, MediaItem, QueueOptions};
//! use offline_core::storage::{Database, MetadataStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let queue = DownloadQueue::start(
//!     QueueOptions::default(),
//!     Arc::new(MemoryBlobStore::new()),
//!     Arc::new(HttpSource::new(Duration::from_secs(30))?),
//!     MetadataStore::new(db.pool().clone()),
//! )
//! .await?;
//!
//! let item = MediaItem::new("m1", "Movie One", "https://cdn.example.com/m1.mp4")?;
//! queue.request_download(item).await?;
//! # Ok(())
//! # }
//! ```

use crate::blob::{BlobStore, StorageUsage};
use crate::config::DownloadConfig;
use crate::download::item::{DownloadItem, DownloadStatus, MediaItem};
use crate::download::progress::ProgressSample;
use crate::download::source::ByteSource;
use crate::download::transfer::{run_transfer, TransferContext, TransferOutcome};
use crate::error::{OfflineError, Result};
use crate::export::{export_filename, FileSaver};
use crate::storage::MetadataStore;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 64;
const NOTICE_BUFFER: usize = 64;

/// Tuning for a [`DownloadQueue`]
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub progress_interval: Duration,
    pub stall_timeout: Option<Duration>,
    pub offline_expiry: chrono::Duration,
    /// Delete blobs that have no metadata entry when the queue starts
    pub reconcile_storage_on_start: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for QueueOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            progress_interval: config.progress_interval(),
            stall_timeout: config.stall_timeout(),
            offline_expiry: config.offline_expiry(),
            reconcile_storage_on_start: config.reconcile_storage_on_start,
        }
    }
}

/// What `request_download` did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The slot was free; the transfer started
    Admitted,
    /// Appended behind the active transfer
    Queued,
    /// The item is already tracked in this status; nothing changed
    AlreadyTracked(DownloadStatus),
}

/// Transient user notification
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadNotice {
    Completed { item_id: String, title: String },
    Failed { item_id: String, title: String, message: String },
    Paused { item_id: String },
    Removed { item_id: String },
}

enum QueueCommand {
    Request {
        media: MediaItem,
        reply: oneshot::Sender<Result<RequestOutcome>>,
    },
    Pause {
        item_id: String,
        reply: oneshot::Sender<bool>,
    },
    CancelQueued {
        item_id: String,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        item_id: String,
        reply: oneshot::Sender<bool>,
    },
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },
    Items {
        reply: oneshot::Sender<Vec<DownloadItem>>,
    },
    Get {
        item_id: String,
        reply: oneshot::Sender<Option<DownloadItem>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum TransferEvent {
    Progress {
        item_id: String,
        attempt: u64,
        sample: ProgressSample,
    },
    Finished {
        item_id: String,
        attempt: u64,
        outcome: TransferOutcome,
    },
}

/// Handle to the download queue actor
#[derive(Clone)]
pub struct DownloadQueue {
    commands: mpsc::Sender<QueueCommand>,
    snapshots: watch::Receiver<Vec<DownloadItem>>,
    notices: broadcast::Sender<DownloadNotice>,
    store: Arc<dyn BlobStore>,
}

impl DownloadQueue {
    /// Load persisted items and spawn the queue actor
    ///
    /// Items persisted as `downloading` come back `paused`. Queued items are
    /// admitted right away if nothing else holds the slot.
    pub async fn start(
        options: QueueOptions,
        store: Arc<dyn BlobStore>,
        source: Arc<dyn ByteSource>,
        metadata: MetadataStore,
    ) -> Result<Self> {
        let items = metadata.load_all().await?;
        let next_sequence = metadata.max_sequence().await? + 1;

        tracing::info!(items = items.len(), "loaded download metadata");

        if options.reconcile_storage_on_start {
            reconcile_storage(store.as_ref(), &items).await;
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(items.clone());
        let (notice_tx, _) = broadcast::channel(NOTICE_BUFFER);

        let actor = QueueActor {
            items,
            active: None,
            settling: HashMap::new(),
            next_attempt: 0,
            next_sequence,
            offline_expiry: options.offline_expiry,
            ctx: TransferContext {
                source,
                store: Arc::clone(&store),
                progress_interval: options.progress_interval,
                stall_timeout: options.stall_timeout,
            },
            metadata,
            commands: command_rx,
            events: event_rx,
            event_tx,
            snapshots: snapshot_tx,
            notices: notice_tx.clone(),
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            notices: notice_tx,
            store,
        })
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> QueueCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| OfflineError::Shutdown)?;
        reply_rx.await.map_err(|_| OfflineError::Shutdown)
    }

    /// Request a download for `media`
    ///
    /// A `paused` or `failed` entry is discarded and re-requested from the
    /// back of the queue; any other tracked entry is left alone.
    pub async fn request_download(&self, media: MediaItem) -> Result<RequestOutcome> {
        media.validate()?;
        self.call(|reply| QueueCommand::Request { media, reply }).await?
    }

    /// Pause the active transfer for `item_id`; false if it is not downloading
    ///
    /// Returns once anything the cancelled attempt stored has been deleted.
    pub async fn pause(&self, item_id: &str) -> Result<bool> {
        let item_id = item_id.to_string();
        self.call(|reply| QueueCommand::Pause { item_id, reply }).await
    }

    /// Drop a `queued` entry; false for any other status
    pub async fn cancel_queued(&self, item_id: &str) -> Result<bool> {
        let item_id = item_id.to_string();
        self.call(|reply| QueueCommand::CancelQueued { item_id, reply }).await
    }

    /// Cancel, delete the blob of, and forget `item_id`
    ///
    /// Returns once the blob delete has been attempted.
    pub async fn remove(&self, item_id: &str) -> Result<bool> {
        let item_id = item_id.to_string();
        self.call(|reply| QueueCommand::Remove { item_id, reply }).await
    }

    /// Delete blobs and metadata of every completed item; returns how many
    pub async fn clear_completed(&self) -> Result<usize> {
        self.call(|reply| QueueCommand::ClearCompleted { reply }).await
    }

    /// All tracked items in request order
    pub async fn items(&self) -> Result<Vec<DownloadItem>> {
        self.call(|reply| QueueCommand::Items { reply }).await
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<DownloadItem>> {
        let item_id = item_id.to_string();
        self.call(|reply| QueueCommand::Get { item_id, reply }).await
    }

    pub async fn usage_estimate(&self) -> StorageUsage {
        self.store.usage_estimate().await
    }

    /// Hand a completed item's blob to `saver`
    pub async fn export(&self, item_id: &str, saver: &dyn FileSaver) -> Result<PathBuf> {
        let item = self
            .get(item_id)
            .await?
            .ok_or_else(|| OfflineError::not_found(format!("download '{}'", item_id)))?;

        if item.status != DownloadStatus::Completed {
            return Err(OfflineError::InvalidState(format!(
                "'{}' is {}, only completed downloads can be exported",
                item_id, item.status
            )));
        }

        let blob = self
            .store
            .get(item_id)
            .await?
            .ok_or_else(|| OfflineError::NotFoundOnExport(item_id.to_string()))?;

        saver.save(&export_filename(&item.title), blob).await
    }

    /// Live snapshots of the collection, republished on every change
    pub fn subscribe(&self) -> watch::Receiver<Vec<DownloadItem>> {
        self.snapshots.clone()
    }

    pub fn notifications(&self) -> broadcast::Receiver<DownloadNotice> {
        self.notices.subscribe()
    }

    /// Stop the actor; an active transfer is cancelled and kept as `paused`
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| QueueCommand::Shutdown { reply }).await
    }
}

/// Delete blobs no item refers to and report completed items without one
async fn reconcile_storage(store: &dyn BlobStore, items: &[DownloadItem]) {
    let keys = match store.keys().await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(error = %e, "could not list stored blobs, skipping reconciliation");
            return;
        }
    };

    let known: HashSet<&str> = items.iter().map(|item| item.item_id.as_str()).collect();
    for key in keys.iter().filter(|key| !known.contains(key.as_str())) {
        match store.delete(key).await {
            Ok(()) => tracing::info!(item_id = %key, "deleted orphaned blob"),
            Err(e) => tracing::warn!(item_id = %key, error = %e, "failed to delete orphaned blob"),
        }
    }

    let stored: HashSet<&str> = keys.iter().map(String::as_str).collect();
    for item in items {
        if item.status == DownloadStatus::Completed && !stored.contains(item.item_id.as_str()) {
            tracing::warn!(item_id = %item.item_id, "completed download has no stored blob");
        }
    }
}

struct ActiveTransfer {
    item_id: String,
    attempt: u64,
    cancel: CancellationToken,
}

struct QueueActor {
    items: Vec<DownloadItem>,
    active: Option<ActiveTransfer>,
    /// Last spawned transfer or cleanup task per item
    settling: HashMap<String, JoinHandle<()>>,
    next_attempt: u64,
    next_sequence: i64,
    offline_expiry: chrono::Duration,
    ctx: TransferContext,
    metadata: MetadataStore,
    commands: mpsc::Receiver<QueueCommand>,
    events: mpsc::UnboundedReceiver<TransferEvent>,
    event_tx: mpsc::UnboundedSender<TransferEvent>,
    snapshots: watch::Sender<Vec<DownloadItem>>,
    notices: broadcast::Sender<DownloadNotice>,
}

impl QueueActor {
    async fn run(mut self) {
        self.reconcile().await;
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(QueueCommand::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
            }
        }

        tracing::info!("download queue stopped");
    }

    async fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::Request { media, reply } => {
                let outcome = self.request(media).await;
                self.publish();
                let _ = reply.send(outcome);
            }
            QueueCommand::Pause { item_id, reply } => self.pause(&item_id, reply).await,
            QueueCommand::CancelQueued { item_id, reply } => {
                let cancelled = self.cancel_queued(&item_id).await;
                self.publish();
                let _ = reply.send(cancelled);
            }
            QueueCommand::Remove { item_id, reply } => self.remove(&item_id, reply).await,
            QueueCommand::ClearCompleted { reply } => self.clear_completed(reply).await,
            QueueCommand::Items { reply } => {
                let _ = reply.send(self.items.clone());
            }
            QueueCommand::Get { item_id, reply } => {
                let _ = reply.send(self.position(&item_id).map(|idx| self.items[idx].clone()));
            }
            // Handled by the run loop
            QueueCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn request(&mut self, media: MediaItem) -> Result<RequestOutcome> {
        let now = Utc::now();
        let expiry = now.checked_add_signed(self.offline_expiry).ok_or_else(|| {
            OfflineError::ConfigurationError(format!(
                "offline expiry of {} days is out of range",
                self.offline_expiry.num_days()
            ))
        })?;

        if let Some(idx) = self.position(&media.id) {
            let status = self.items[idx].status;
            if !status.accepts_rerequest() {
                tracing::debug!(item_id = %media.id, %status, "download already tracked");
                return Ok(RequestOutcome::AlreadyTracked(status));
            }

            // Re-requests start over from the back of the queue
            self.items.remove(idx);
            let _ = self.spawn_cleanup(&media.id);
            tracing::info!(item_id = %media.id, previous = %status, "re-requesting download");
        }

        let item = DownloadItem::new(
            &media,
            DownloadStatus::Queued,
            self.next_sequence,
            now,
            expiry,
        );
        self.next_sequence += 1;
        self.items.push(item);
        self.persist(&media.id).await;

        self.reconcile().await;

        let outcome = match self.position(&media.id).map(|idx| self.items[idx].status) {
            Some(DownloadStatus::Downloading) => RequestOutcome::Admitted,
            _ => RequestOutcome::Queued,
        };
        if outcome == RequestOutcome::Queued {
            tracing::info!(item_id = %media.id, "download queued");
        }
        Ok(outcome)
    }

    async fn pause(&mut self, item_id: &str, reply: oneshot::Sender<bool>) {
        let Some(idx) = self
            .position(item_id)
            .filter(|&idx| self.items[idx].is_downloading())
        else {
            let _ = reply.send(false);
            return;
        };

        if let Err(e) = self.items[idx].transition(DownloadStatus::Paused) {
            tracing::error!(item_id, error = %e, "pause rejected");
            let _ = reply.send(false);
            return;
        }
        self.cancel_active(item_id);
        tracing::info!(item_id, "download paused");
        self.persist(item_id).await;
        self.notify(DownloadNotice::Paused {
            item_id: item_id.to_string(),
        });

        // The attempt may have stored its blob just before the cancel landed
        let rolled_back = self.spawn_cleanup(item_id);
        self.reconcile().await;
        self.publish();

        tokio::spawn(async move {
            let _ = rolled_back.await;
            let _ = reply.send(true);
        });
    }

    async fn cancel_queued(&mut self, item_id: &str) -> bool {
        match self.position(item_id) {
            Some(idx) if self.items[idx].status == DownloadStatus::Queued => {
                self.items.remove(idx);
                self.forget(item_id).await;
                tracing::info!(item_id, "queued download cancelled");
                true
            }
            _ => false,
        }
    }

    async fn remove(&mut self, item_id: &str, reply: oneshot::Sender<bool>) {
        let Some(idx) = self.position(item_id) else {
            let _ = reply.send(false);
            return;
        };

        self.cancel_active(item_id);
        self.items.remove(idx);
        self.forget(item_id).await;
        tracing::info!(item_id, "download removed");
        self.notify(DownloadNotice::Removed {
            item_id: item_id.to_string(),
        });

        let deleted = self.spawn_cleanup(item_id);
        self.reconcile().await;
        self.publish();

        tokio::spawn(async move {
            let _ = deleted.await;
            let _ = reply.send(true);
        });
    }

    async fn clear_completed(&mut self, reply: oneshot::Sender<usize>) {
        let completed: Vec<String> = self
            .items
            .iter()
            .filter(|item| item.status == DownloadStatus::Completed)
            .map(|item| item.item_id.clone())
            .collect();

        self.items.retain(|item| item.status != DownloadStatus::Completed);

        let mut pending = Vec::with_capacity(completed.len());
        for item_id in &completed {
            self.forget(item_id).await;
            pending.push(self.spawn_cleanup(item_id));
        }
        tracing::info!(count = completed.len(), "cleared completed downloads");
        self.publish();

        let count = completed.len();
        tokio::spawn(async move {
            for deleted in pending {
                let _ = deleted.await;
            }
            let _ = reply.send(count);
        });
    }

    async fn handle_event(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Progress {
                item_id,
                attempt,
                sample,
            } => {
                if !self.is_current(&item_id, attempt) {
                    return;
                }
                if let Some(idx) = self.position(&item_id) {
                    self.items[idx].apply_sample(&sample);
                    self.persist(&item_id).await;
                    self.publish();
                }
            }
            TransferEvent::Finished {
                item_id,
                attempt,
                outcome,
            } => {
                if !self.is_current(&item_id, attempt) {
                    tracing::debug!(item_id = %item_id, attempt, "ignoring superseded transfer");
                    return;
                }
                self.active = None;
                self.finish(&item_id, outcome).await;
                self.reconcile().await;
                self.publish();
            }
        }
    }

    async fn finish(&mut self, item_id: &str, outcome: TransferOutcome) {
        let Some(idx) = self.position(item_id) else {
            return;
        };

        let notice = {
            let item = &mut self.items[idx];
            let result = match outcome {
                TransferOutcome::Completed { bytes } => {
                    item.transition(DownloadStatus::Completed).map(|()| {
                        item.downloaded_size_bytes = bytes;
                        if item.total_size_bytes == 0 {
                            item.total_size_bytes = bytes;
                        }
                        tracing::info!(item_id, bytes, "download completed");
                        DownloadNotice::Completed {
                            item_id: item_id.to_string(),
                            title: item.title.clone(),
                        }
                    })
                }
                TransferOutcome::Cancelled => item.transition(DownloadStatus::Paused).map(|()| {
                    tracing::info!(item_id, "transfer cancelled");
                    DownloadNotice::Paused {
                        item_id: item_id.to_string(),
                    }
                }),
                TransferOutcome::Failed(e) => item.transition(DownloadStatus::Failed).map(|()| {
                    tracing::warn!(item_id, error = %e, "download failed");
                    let message = e.user_message();
                    item.error = Some(message.clone());
                    DownloadNotice::Failed {
                        item_id: item_id.to_string(),
                        title: item.title.clone(),
                        message,
                    }
                }),
            };
            match result {
                Ok(notice) => notice,
                Err(e) => {
                    tracing::error!(item_id, error = %e, "transfer outcome rejected");
                    return;
                }
            }
        };

        self.persist(item_id).await;
        self.notify(notice);
    }

    /// Admit the earliest queued item when nothing is downloading
    async fn reconcile(&mut self) {
        self.settling.retain(|_, task| !task.is_finished());

        let downloading = self.items.iter().filter(|item| item.is_downloading()).count();
        debug_assert!(downloading <= 1, "more than one active download");
        if downloading > 0 {
            return;
        }

        let Some(idx) = self
            .items
            .iter()
            .position(|item| item.status == DownloadStatus::Queued)
        else {
            return;
        };

        if let Err(e) = self.items[idx].transition(DownloadStatus::Downloading) {
            tracing::error!(error = %e, "could not admit queued download");
            return;
        }
        let item_id = self.items[idx].item_id.clone();
        let media = self.items[idx].media();
        self.start_transfer(media);
        tracing::info!(item_id = %item_id, "download started");
        self.persist(&item_id).await;
    }

    fn start_transfer(&mut self, media: MediaItem) {
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let cancel = CancellationToken::new();
        self.active = Some(ActiveTransfer {
            item_id: media.id.clone(),
            attempt,
            cancel: cancel.clone(),
        });

        let previous = self.settling.remove(&media.id);
        let ctx = self.ctx.clone();
        let events = self.event_tx.clone();
        let item_id = media.id.clone();

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            let progress_events = events.clone();
            let progress_id = media.id.clone();
            let outcome = run_transfer(&ctx, &media, &cancel, move |sample| {
                let _ = progress_events.send(TransferEvent::Progress {
                    item_id: progress_id.clone(),
                    attempt,
                    sample,
                });
            })
            .await;

            let _ = events.send(TransferEvent::Finished {
                item_id: media.id,
                attempt,
                outcome,
            });
        });
        self.settling.insert(item_id, task);
    }

    /// Delete the blob for `item_id` after any earlier task for it settles
    fn spawn_cleanup(&mut self, item_id: &str) -> oneshot::Receiver<()> {
        let previous = self.settling.remove(item_id);
        let store = Arc::clone(&self.ctx.store);
        let key = item_id.to_string();
        let (done_tx, done_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = store.delete(&key).await {
                tracing::warn!(item_id = %key, error = %e, "failed to delete blob");
            }
            let _ = done_tx.send(());
        });
        self.settling.insert(item_id.to_string(), task);
        done_rx
    }

    fn cancel_active(&mut self, item_id: &str) {
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.item_id == item_id)
        {
            if let Some(active) = self.active.take() {
                active.cancel.cancel();
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if let Some(idx) = self.position(&active.item_id) {
                if self.items[idx].transition(DownloadStatus::Paused).is_ok() {
                    self.persist(&active.item_id).await;
                }
            }
            let _ = self.spawn_cleanup(&active.item_id);
        }
        self.publish();

        for (_, task) in self.settling.drain() {
            let _ = task.await;
        }
    }

    fn is_current(&self, item_id: &str, attempt: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.attempt == attempt && active.item_id == item_id)
    }

    fn position(&self, item_id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.item_id == item_id)
    }

    async fn persist(&self, item_id: &str) {
        let Some(idx) = self.position(item_id) else {
            return;
        };
        if let Err(e) = self.metadata.upsert(&self.items[idx]).await {
            tracing::warn!(item_id, error = %e, "failed to persist download metadata");
        }
    }

    async fn forget(&self, item_id: &str) {
        if let Err(e) = self.metadata.delete(item_id).await {
            tracing::warn!(item_id, error = %e, "failed to delete download metadata");
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.items.clone());
    }

    fn notify(&self, notice: DownloadNotice) {
        // No receivers is fine
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::download::source::ByteStream;
    use crate::export::DirectorySaver;
    use crate::storage::Database;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream::{self, StreamExt};

    /// Serves a fixed body immediately, or never finishes when `hang` is set
    struct StaticSource {
        body: &'static [u8],
        hang: bool,
    }

    #[async_trait]
    impl ByteSource for StaticSource {
        async fn open(&self, _item: &MediaItem) -> Result<ByteStream> {
            if self.hang {
                return Ok(ByteStream {
                    total: None,
                    chunks: stream::pending().boxed(),
                });
            }
            Ok(ByteStream {
                total: Some(self.body.len() as u64),
                chunks: stream::iter(vec![Ok(Bytes::from_static(self.body))]).boxed(),
            })
        }
    }

    fn media(id: &str) -> MediaItem {
        MediaItem::new(id, format!("Movie {}", id), format!("https://cdn.example.com/{}.mp4", id)).unwrap()
    }

    fn options() -> QueueOptions {
        QueueOptions {
            progress_interval: Duration::from_millis(10),
            ..QueueOptions::default()
        }
    }

    async fn start(
        source: StaticSource,
        store: Arc<MemoryBlobStore>,
        metadata: MetadataStore,
    ) -> DownloadQueue {
        DownloadQueue::start(options(), store, Arc::new(source), metadata)
            .await
            .unwrap()
    }

    async fn wait_for_status(queue: &DownloadQueue, item_id: &str, status: DownloadStatus) {
        let mut rx = queue.subscribe();
        let id = item_id.to_string();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|items| items.iter().any(|i| i.item_id == id && i.status == status)),
        )
        .await
        .expect("timed out waiting for status")
        .unwrap();
    }

    #[tokio::test]
    async fn test_request_downloads_and_completes() {
        let db = Database::new_in_memory().await.unwrap();
        let metadata = MetadataStore::new(db.pool().clone());
        let store = Arc::new(MemoryBlobStore::new());
        let queue = start(StaticSource { body: b"movie-bytes", hang: false }, store.clone(), metadata.clone()).await;
        let mut notices = queue.notifications();

        let outcome = queue.request_download(media("a")).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Admitted);

        wait_for_status(&queue, "a", DownloadStatus::Completed).await;

        let item = queue.get("a").await.unwrap().unwrap();
        assert_eq!(item.progress, 100.0);
        assert_eq!(item.speed, None);
        assert_eq!(item.downloaded_size_bytes, 11);
        assert_eq!(store.get("a").await.unwrap().unwrap().len(), 11);

        let persisted = metadata.get("a").await.unwrap().unwrap();
        assert_eq!(persisted.status, DownloadStatus::Completed);

        assert_eq!(
            notices.recv().await.unwrap(),
            DownloadNotice::Completed {
                item_id: "a".to_string(),
                title: "Movie a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_request_for_tracked_item_is_noop() {
        let db = Database::new_in_memory().await.unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        let queue = start(StaticSource { body: b"", hang: true }, store, MetadataStore::new(db.pool().clone())).await;

        assert_eq!(queue.request_download(media("a")).await.unwrap(), RequestOutcome::Admitted);
        assert_eq!(queue.request_download(media("b")).await.unwrap(), RequestOutcome::Queued);
        assert_eq!(
            queue.request_download(media("a")).await.unwrap(),
            RequestOutcome::AlreadyTracked(DownloadStatus::Downloading)
        );
        assert_eq!(
            queue.request_download(media("b")).await.unwrap(),
            RequestOutcome::AlreadyTracked(DownloadStatus::Queued)
        );
        assert_eq!(queue.items().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_queued_only_affects_queued_items() {
        let db = Database::new_in_memory().await.unwrap();
        let metadata = MetadataStore::new(db.pool().clone());
        let store = Arc::new(MemoryBlobStore::new());
        let queue = start(StaticSource { body: b"", hang: true }, store, metadata.clone()).await;

        queue.request_download(media("a")).await.unwrap();
        queue.request_download(media("b")).await.unwrap();

        assert!(!queue.cancel_queued("a").await.unwrap());
        assert!(queue.cancel_queued("b").await.unwrap());
        assert!(!queue.cancel_queued("b").await.unwrap());

        assert!(queue.get("b").await.unwrap().is_none());
        assert!(metadata.get("b").await.unwrap().is_none());
        assert!(queue.get("a").await.unwrap().unwrap().is_downloading());
    }

    #[tokio::test]
    async fn test_pause_of_idle_item_is_noop() {
        let db = Database::new_in_memory().await.unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        let queue = start(StaticSource { body: b"", hang: true }, store, MetadataStore::new(db.pool().clone())).await;

        queue.request_download(media("a")).await.unwrap();
        queue.request_download(media("b")).await.unwrap();

        assert!(!queue.pause("b").await.unwrap());
        assert!(!queue.pause("missing").await.unwrap());
        assert!(queue.pause("a").await.unwrap());

        let items = queue.items().await.unwrap();
        assert_eq!(items[0].status, DownloadStatus::Paused);
        assert_eq!(items[1].status, DownloadStatus::Downloading);
    }

    #[tokio::test]
    async fn test_start_restores_state_and_reconciles_storage() {
        let db = Database::new_in_memory().await.unwrap();
        let metadata = MetadataStore::new(db.pool().clone());
        let store = Arc::new(MemoryBlobStore::new());

        let now = Utc::now();
        let expiry = now + chrono::Duration::days(7);
        metadata
            .upsert(&DownloadItem::new(&media("was-active"), DownloadStatus::Downloading, 1, now, expiry))
            .await
            .unwrap();
        metadata
            .upsert(&DownloadItem::new(&media("waiting"), DownloadStatus::Queued, 2, now, expiry))
            .await
            .unwrap();
        store.put("orphan", Bytes::from_static(b"stale")).await.unwrap();

        let queue = start(StaticSource { body: b"fresh", hang: false }, store.clone(), metadata).await;

        wait_for_status(&queue, "waiting", DownloadStatus::Completed).await;

        let restored = queue.get("was-active").await.unwrap().unwrap();
        assert_eq!(restored.status, DownloadStatus::Paused);
        assert!(store.get("orphan").await.unwrap().is_none());
        assert!(store.get("waiting").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_export_requires_completed_item_with_blob() {
        let db = Database::new_in_memory().await.unwrap();
        let store = Arc::new(MemoryBlobStore::new());
        let dir = tempfile::TempDir::new().unwrap();
        let saver = DirectorySaver::new(dir.path());
        let queue = start(StaticSource { body: b"movie", hang: false }, store.clone(), MetadataStore::new(db.pool().clone())).await;

        let err = queue.export("missing", &saver).await.unwrap_err();
        assert!(matches!(err, OfflineError::RecordNotFound(_)));

        queue.request_download(media("a")).await.unwrap();
        wait_for_status(&queue, "a", DownloadStatus::Completed).await;

        let path = queue.export("a", &saver).await.unwrap();
        assert_eq!(path, dir.path().join("moviea.mp4"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"movie");

        store.delete("a").await.unwrap();
        let err = queue.export("a", &saver).await.unwrap_err();
        assert!(matches!(err, OfflineError::NotFoundOnExport(id) if id == "a"));
        assert_eq!(queue.get("a").await.unwrap().unwrap().status, DownloadStatus::Completed);
    }

    #[tokio::test]
    async fn test_out_of_range_expiry_rejects_request_and_keeps_running() {
        let db = Database::new_in_memory().await.unwrap();
        let queue = DownloadQueue::start(
            QueueOptions {
                offline_expiry: chrono::Duration::days(1_000_000_000),
                ..options()
            },
            Arc::new(MemoryBlobStore::new()),
            Arc::new(StaticSource { body: b"", hang: true }),
            MetadataStore::new(db.pool().clone()),
        )
        .await
        .unwrap();

        let err = queue.request_download(media("a")).await.unwrap_err();
        assert!(matches!(err, OfflineError::ConfigurationError(_)));
        assert!(queue.items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_pauses_active_transfer() {
        let db = Database::new_in_memory().await.unwrap();
        let metadata = MetadataStore::new(db.pool().clone());
        let store = Arc::new(MemoryBlobStore::new());
        let queue = start(StaticSource { body: b"", hang: true }, store, metadata.clone()).await;

        queue.request_download(media("a")).await.unwrap();
        queue.shutdown().await.unwrap();

        assert_eq!(metadata.get("a").await.unwrap().unwrap().status, DownloadStatus::Paused);
        assert!(matches!(queue.items().await, Err(OfflineError::Shutdown)));
    }
}

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


//! Transfer Unit: one streaming download for one item
//!
//! 1. Open the item's byte stream (cancelable)
//! 2. Accumulate chunks, publishing throttled progress samples
//! 3. On exhaustion, write the assembled blob to the blob store
//!
//! The cancellation token is checked at every suspension point. A transfer
//! that is cancelled never leaves a blob behind: if cancellation lands while
//! the final write is in flight, the written blob is deleted again.

use crate::blob::BlobStore;
use crate::download::item::MediaItem;
use crate::download::progress::{ProgressSample, ProgressSampler};
use crate::download::source::ByteSource;
use crate::error::{OfflineError, Result};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Upper bound for the up-front buffer reservation
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// How a transfer attempt ended
#[derive(Debug)]
pub enum TransferOutcome {
    /// Blob stored; `bytes` is its size
    Completed { bytes: u64 },
    /// Stopped by the cancellation token; nothing stored
    Cancelled,
    /// Network, stream or storage failure; nothing stored
    Failed(OfflineError),
}

/// Collaborators and tuning shared by every transfer
#[derive(Clone)]
pub struct TransferContext {
    pub source: Arc<dyn ByteSource>,
    pub store: Arc<dyn BlobStore>,
    pub progress_interval: Duration,
    pub stall_timeout: Option<Duration>,
}

/// Run one transfer to the end
///
/// All failures are converted into a [`TransferOutcome`]; nothing escapes.
pub async fn run_transfer<F>(
    ctx: &TransferContext,
    item: &MediaItem,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> TransferOutcome
where
    F: FnMut(ProgressSample) + Send,
{
    match transfer(ctx, item, cancel, &mut on_progress).await {
        Ok(bytes) => TransferOutcome::Completed { bytes },
        Err(OfflineError::Cancelled) => TransferOutcome::Cancelled,
        Err(e) => TransferOutcome::Failed(e),
    }
}

async fn transfer<F>(
    ctx: &TransferContext,
    item: &MediaItem,
    cancel: &CancellationToken,
    on_progress: &mut F,
) -> Result<u64>
where
    F: FnMut(ProgressSample) + Send,
{
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(OfflineError::Cancelled),
        opened = ctx.source.open(item) => opened?,
    };

    let mut sampler = ProgressSampler::new(ctx.progress_interval, stream.total);
    let mut buffer = BytesMut::with_capacity(stream.total.unwrap_or(0).min(MAX_PREALLOCATION) as usize);
    let mut chunks = stream.chunks;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OfflineError::Cancelled),
            next = next_chunk(&mut chunks, ctx.stall_timeout) => next?,
        };
        let Some(chunk) = next else { break };

        buffer.extend_from_slice(&chunk);
        if let Some(sample) = sampler.record(chunk.len()) {
            tracing::debug!(
                item_id = %item.id,
                downloaded = sample.downloaded_bytes,
                speed = sample.speed,
                "transfer progress"
            );
            on_progress(sample);
        }
    }

    let downloaded = sampler.downloaded();
    if let Some(total) = sampler.total() {
        if downloaded < total {
            return Err(OfflineError::TransferFailed(format!(
                "Download incomplete: {}/{} bytes",
                downloaded, total
            )));
        }
    }

    if cancel.is_cancelled() {
        return Err(OfflineError::Cancelled);
    }

    let blob: Bytes = buffer.freeze();
    ctx.store.put(&item.id, blob).await?;

    if cancel.is_cancelled() {
        if let Err(e) = ctx.store.delete(&item.id).await {
            tracing::warn!(item_id = %item.id, error = %e, "failed to roll back blob of cancelled transfer");
        }
        return Err(OfflineError::Cancelled);
    }

    Ok(downloaded)
}

async fn next_chunk(
    chunks: &mut BoxStream<'static, Result<Bytes>>,
    stall_timeout: Option<Duration>,
) -> Result<Option<Bytes>> {
    match stall_timeout {
        None => chunks.next().await.transpose(),
        Some(limit) => match tokio::time::timeout(limit, chunks.next()).await {
            Ok(next) => next.transpose(),
            Err(_) => Err(OfflineError::StalledTransfer {
                idle_secs: limit.as_secs(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::download::source::ByteStream;
    use async_trait::async_trait;
    use futures_util::stream;

    /// Source serving fixed chunks, optionally without a reported length
    struct FixedSource {
        chunks: Vec<&'static str>,
        report_length: bool,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl ByteSource for FixedSource {
        async fn open(&self, _item: &MediaItem) -> Result<ByteStream> {
            let total: u64 = self.chunks.iter().map(|c| c.len() as u64).sum();
            let fail_after = self.fail_after;
            let items: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .enumerate()
                .map(|(i, c)| match fail_after {
                    Some(n) if i >= n => Err(OfflineError::network_error("connection reset", true)),
                    _ => Ok(Bytes::copy_from_slice(c.as_bytes())),
                })
                .collect();
            Ok(ByteStream {
                total: self.report_length.then_some(total),
                chunks: stream::iter(items).boxed(),
            })
        }
    }

    /// Source whose stream never yields
    struct SilentSource;

    #[async_trait]
    impl ByteSource for SilentSource {
        async fn open(&self, _item: &MediaItem) -> Result<ByteStream> {
            Ok(ByteStream {
                total: Some(10),
                chunks: stream::pending().boxed(),
            })
        }
    }

    fn media() -> MediaItem {
        MediaItem::new("m1", "Movie", "https://cdn.example.com/m1.mp4").unwrap()
    }

    fn context(source: Arc<dyn ByteSource>, store: Arc<MemoryBlobStore>) -> TransferContext {
        TransferContext {
            source,
            store,
            progress_interval: Duration::from_millis(800),
            stall_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_completed_transfer_stores_blob() {
        let store = Arc::new(MemoryBlobStore::new());
        let ctx = context(
            Arc::new(FixedSource { chunks: vec!["abc", "defg"], report_length: true, fail_after: None }),
            store.clone(),
        );

        let outcome = run_transfer(&ctx, &media(), &CancellationToken::new(), |_| {}).await;
        assert!(matches!(outcome, TransferOutcome::Completed { bytes: 7 }));
        assert_eq!(store.get("m1").await.unwrap(), Some(Bytes::from_static(b"abcdefg")));
    }

    #[tokio::test]
    async fn test_unknown_length_still_completes() {
        let store = Arc::new(MemoryBlobStore::new());
        let ctx = context(
            Arc::new(FixedSource { chunks: vec!["abc"], report_length: false, fail_after: None }),
            store.clone(),
        );

        let outcome = run_transfer(&ctx, &media(), &CancellationToken::new(), |_| {}).await;
        assert!(matches!(outcome, TransferOutcome::Completed { bytes: 3 }));
    }

    #[tokio::test]
    async fn test_stream_error_fails_without_blob() {
        let store = Arc::new(MemoryBlobStore::new());
        let ctx = context(
            Arc::new(FixedSource { chunks: vec!["abc", "def"], report_length: true, fail_after: Some(1) }),
            store.clone(),
        );

        let outcome = run_transfer(&ctx, &media(), &CancellationToken::new(), |_| {}).await;
        assert!(matches!(outcome, TransferOutcome::Failed(OfflineError::NetworkError { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let store = Arc::new(MemoryBlobStore::new());
        store.set_fail_writes(true);
        let ctx = context(
            Arc::new(FixedSource { chunks: vec!["abc"], report_length: true, fail_after: None }),
            store.clone(),
        );

        let outcome = run_transfer(&ctx, &media(), &CancellationToken::new(), |_| {}).await;
        assert!(matches!(outcome, TransferOutcome::Failed(ref e) if e.is_storage_error()));
    }

    #[tokio::test]
    async fn test_cancelled_transfer_stores_nothing() {
        let store = Arc::new(MemoryBlobStore::new());
        let ctx = context(Arc::new(SilentSource), store.clone());
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { run_transfer(&ctx, &media(), &cancel, |_| {}).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, TransferOutcome::Cancelled));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_watchdog() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut ctx = context(Arc::new(SilentSource), store.clone());
        ctx.stall_timeout = Some(Duration::from_secs(30));

        let outcome = run_transfer(&ctx, &media(), &CancellationToken::new(), |_| {}).await;
        assert!(matches!(
            outcome,
            TransferOutcome::Failed(OfflineError::StalledTransfer { idle_secs: 30 })
        ));
    }
}

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


//! Byte sources for transfers
//!
//! A [`ByteSource`] opens a cancelable stream of chunks for a media item.
//! [`HttpSource`] is the production implementation over reqwest; tests
//! provide scripted sources.

use crate::download::item::MediaItem;
use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::Client;
use std::time::Duration;

/// An opened byte stream
pub struct ByteStream {
    /// Length reported by the source, if any
    pub total: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream").field("total", &self.total).finish_non_exhaustive()
    }
}

/// Opens byte streams for media items
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn open(&self, item: &MediaItem) -> Result<ByteStream>;
}

/// HTTP(S) byte source
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// Create a source with the given connect timeout
    ///
    /// No overall request timeout is set: a long media download must not be
    /// cut off mid-stream. Idle detection is the transfer watchdog's job.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn open(&self, item: &MediaItem) -> Result<ByteStream> {
        let response = self
            .client
            .get(&item.source_url)
            .send()
            .await
            .map_err(|e| OfflineError::network_error(format!("Request failed: {}", e), true))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OfflineError::UnexpectedStatusCode {
                status_code: status.as_u16(),
                url: item.source_url.clone(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| OfflineError::network_error(format!("Stream error: {}", e), true))
            })
            .boxed();

        Ok(ByteStream { total, chunks })
    }
}

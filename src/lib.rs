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


//! Offline download engine for a media streaming client
//!
//! Download requests go through a single-slot [`DownloadQueue`]; each
//! admitted item is streamed into a [`blob::BlobStore`] with throttled
//! progress reporting, and item metadata is kept in SQLite so the queue
//! survives restarts.

pub mod blob;
pub mod config;
pub mod download;
pub mod error;
pub mod export;
pub mod logging;
pub mod storage;

pub use config::DownloadConfig;
pub use download::{DownloadItem, DownloadNotice, DownloadQueue, DownloadStatus, MediaItem, RequestOutcome};
pub use error::{OfflineError, Result};

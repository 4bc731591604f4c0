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


//! Download queue and transfer engine
//!
//! - [`item`]: download items and the status machine
//! - [`progress`]: throttled progress and speed sampling
//! - [`source`]: where media bytes come from
//! - [`transfer`]: one cancellable transfer into the blob store
//! - [`queue`]: the single-slot queue that owns every item

pub mod item;
pub mod progress;
pub mod queue;
pub mod source;
pub mod transfer;

// Re-export commonly used types
pub use item::{DownloadItem, DownloadStatus, MediaItem};
pub use progress::{ProgressSample, ProgressSampler};
pub use queue::{DownloadNotice, DownloadQueue, QueueOptions, RequestOutcome};
pub use source::{ByteSource, ByteStream, HttpSource};
pub use transfer::{run_transfer, TransferContext, TransferOutcome};

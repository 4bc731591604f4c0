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


//! Local blob storage for downloaded media
//!
//! One blob per item id. Existence of a blob is what makes an item playable
//! offline, independent of the item's metadata status.
//!
//! # Contract
//! - `put` overwrites any prior value; fails with `StorageError` or
//!   `QuotaExceeded`
//! - `get` returns `Ok(None)` for a missing key
//! - `delete` is idempotent
//! - `usage_estimate` is best-effort and may report `(0, 0)`

pub mod fs;
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Storage usage in bytes; `quota == 0` means unknown or unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used: u64,
    pub quota: u64,
}

impl StorageUsage {
    /// Fraction of the quota in use, for storage meters
    pub fn fraction_used(&self) -> Option<f64> {
        if self.quota == 0 {
            None
        } else {
            Some(self.used as f64 / self.quota as f64)
        }
    }
}

/// Durable byte storage keyed by item id
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn usage_estimate(&self) -> StorageUsage;

    /// Every key currently stored
    async fn keys(&self) -> Result<Vec<String>>;
}

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


//! In-memory blob store for tests and ephemeral sessions

use crate::blob::{BlobStore, StorageUsage};
use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    quota: Option<u64>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Make subsequent `put` calls fail with `StorageError`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `delete` calls fail with `StorageError`
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        // A poisoned map is still structurally valid
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(OfflineError::storage("storage unavailable"));
        }

        let mut blobs = self.lock();
        if let Some(quota) = self.quota {
            let used: u64 = blobs
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len() as u64)
                .sum();
            let need = used + data.len() as u64;
            if need > quota {
                return Err(OfflineError::QuotaExceeded { need, quota });
            }
        }
        blobs.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(OfflineError::storage("delete rejected"));
        }
        self.lock().remove(key);
        Ok(())
    }

    async fn usage_estimate(&self) -> StorageUsage {
        let used = self.lock().values().map(|v| v.len() as u64).sum();
        StorageUsage {
            used,
            quota: self.quota.unwrap_or(0),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryBlobStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryBlobStore::new();
        store.set_fail_writes(true);
        assert!(store.put("a", Bytes::from_static(b"x")).await.unwrap_err().is_storage_error());
        assert!(store.is_empty());

        store.set_fail_writes(false);
        store.put("a", Bytes::from_static(b"x")).await.unwrap();
        store.set_fail_deletes(true);
        assert!(store.delete("a").await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_usage_reports_quota() {
        let store = MemoryBlobStore::with_quota(100);
        store.put("a", Bytes::from(vec![0u8; 40])).await.unwrap();
        let usage = store.usage_estimate().await;
        assert_eq!(usage, StorageUsage { used: 40, quota: 100 });
        assert_eq!(usage.fraction_used(), Some(0.4));
    }
}

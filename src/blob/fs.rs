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


//! Filesystem blob store
//!
//! Each key is stored as `<hex(key)>.blob` inside one directory. Writes go to
//! a hidden temp file that is synced and renamed into place, so a reader never
//! sees a half-written blob.

use crate::blob::{BlobStore, StorageUsage};
use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const BLOB_EXTENSION: &str = "blob";

/// Longest key whose hex file name stays within common 255-byte name limits
pub const MAX_KEY_BYTES: usize = 120;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    quota: Option<u64>,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open<P: AsRef<Path>>(root: P, quota: Option<u64>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            OfflineError::storage(format!(
                "Failed to create blob directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root, quota })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", hex::encode(key.as_bytes()), BLOB_EXTENSION))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let raw = hex::decode(stem).ok()?;
        String::from_utf8(raw).ok()
    }

    /// Total size of stored blobs, optionally ignoring one key
    async fn used_bytes(&self, except: Option<&str>) -> Result<u64> {
        let except_path = except.map(|k| self.blob_path(k));
        let mut used = 0u64;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if Self::key_from_path(&path).is_none() {
                continue;
            }
            if except_path.as_deref() == Some(path.as_path()) {
                continue;
            }
            used += entry.metadata().await?.len();
        }
        Ok(used)
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("blob");
        let temp_path = self.root.join(format!(".{}.tmp", file_name));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if key.len() > MAX_KEY_BYTES {
            return Err(OfflineError::invalid_input(format!(
                "Blob key is {} bytes, at most {} are supported",
                key.len(),
                MAX_KEY_BYTES
            )));
        }

        if let Some(quota) = self.quota {
            let need = self.used_bytes(Some(key)).await? + data.len() as u64;
            if need > quota {
                return Err(OfflineError::QuotaExceeded { need, quota });
            }
        }

        let path = self.blob_path(key);
        self.write_atomic(&path, &data).await.map_err(|e| {
            OfflineError::storage(format!("Failed to store blob for '{}': {}", key, e))
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OfflineError::storage(format!(
                "Failed to read blob for '{}': {}",
                key, e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OfflineError::storage(format!(
                "Failed to delete blob for '{}': {}",
                key, e
            ))),
        }
    }

    async fn usage_estimate(&self) -> StorageUsage {
        match self.used_bytes(None).await {
            Ok(used) => StorageUsage {
                used,
                quota: self.quota.unwrap_or(0),
            },
            Err(e) => {
                tracing::warn!(error = %e, "blob usage estimate unavailable");
                StorageUsage::default()
            }
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = Self::key_from_path(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

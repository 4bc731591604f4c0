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


//! Engine configuration
//!
//! `DownloadConfig` is loaded from a JSON file (missing fields fall back to
//! defaults) and can be overridden from `OFFLINE_*` environment variables.
//!
//! # Default locations
//! - macOS: ~/Library/Application Support/OfflineCore/
//! - Linux: ~/.local/share/OfflineCore/
//! - Windows: %APPDATA%/OfflineCore/

use crate::error::{OfflineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum publication interval for progress samples
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 800;

/// Days a completed download stays fresh
pub const DEFAULT_OFFLINE_EXPIRY_DAYS: i64 = 7;

/// Upper bound for `offline_expiry_days` (about a century)
pub const MAX_OFFLINE_EXPIRY_DAYS: i64 = 36_500;

/// Download engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// SQLite file holding download metadata
    pub database_path: PathBuf,

    /// Directory used by the filesystem blob store
    pub blob_directory: PathBuf,

    /// Directory exports are saved into
    pub export_directory: PathBuf,

    /// Minimum interval between published progress samples
    pub progress_interval_ms: u64,

    /// Expiry horizon stamped on newly requested items
    pub offline_expiry_days: i64,

    /// Fail a transfer when no bytes arrive for this long (disabled when None)
    pub stall_timeout_secs: Option<u64>,

    /// Blob store quota in bytes (unbounded when None)
    pub storage_quota_bytes: Option<u64>,

    /// Connect timeout for HTTP sources
    pub request_timeout_secs: u64,

    /// Delete blobs without metadata when the queue starts
    pub reconcile_storage_on_start: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let data_dir = default_data_directory();
        Self {
            database_path: data_dir.join("downloads.db"),
            blob_directory: data_dir.join("blobs"),
            export_directory: data_dir.join("exports"),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            offline_expiry_days: DEFAULT_OFFLINE_EXPIRY_DAYS,
            stall_timeout_secs: None,
            storage_quota_bytes: None,
            request_timeout_secs: 30,
            reconcile_storage_on_start: true,
        }
    }
}

impl DownloadConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            OfflineError::ConfigurationError(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `OFFLINE_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `OFFLINE_*` environment overrides on top of this configuration
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(v) = std::env::var("OFFLINE_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OFFLINE_BLOB_DIR") {
            self.blob_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OFFLINE_EXPORT_DIR") {
            self.export_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OFFLINE_PROGRESS_INTERVAL_MS") {
            self.progress_interval_ms = parse_env("OFFLINE_PROGRESS_INTERVAL_MS", &v)?;
        }
        if let Ok(v) = std::env::var("OFFLINE_EXPIRY_DAYS") {
            self.offline_expiry_days = parse_env("OFFLINE_EXPIRY_DAYS", &v)?;
        }
        if let Ok(v) = std::env::var("OFFLINE_STALL_TIMEOUT_SECS") {
            self.stall_timeout_secs = Some(parse_env("OFFLINE_STALL_TIMEOUT_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("OFFLINE_STORAGE_QUOTA_BYTES") {
            self.storage_quota_bytes = Some(parse_env("OFFLINE_STORAGE_QUOTA_BYTES", &v)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_ms == 0 {
            return Err(OfflineError::ConfigurationError(
                "progress_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.offline_expiry_days <= 0 {
            return Err(OfflineError::ConfigurationError(
                "offline_expiry_days must be positive".to_string(),
            ));
        }
        if self.offline_expiry_days > MAX_OFFLINE_EXPIRY_DAYS {
            return Err(OfflineError::ConfigurationError(format!(
                "offline_expiry_days must be at most {}",
                MAX_OFFLINE_EXPIRY_DAYS
            )));
        }
        if self.stall_timeout_secs == Some(0) {
            return Err(OfflineError::ConfigurationError(
                "stall_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_secs.map(Duration::from_secs)
    }

    pub fn offline_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(self.offline_expiry_days.clamp(1, MAX_OFFLINE_EXPIRY_DAYS))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        OfflineError::ConfigurationError(format!("{} has an invalid value: {}", name, value))
    })
}

/// Platform application data directory
pub fn default_data_directory() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("OfflineCore")
    }

    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local").join("share").join("OfflineCore")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("OfflineCore")
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("./offline-core")
    }
}

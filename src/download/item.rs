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


//! Download items and their status machine
//!
//! ```text
//! queued ──▶ downloading ──▶ completed
//!   ▲            │  │
//!   │            │  └──────▶ failed ──┐
//!   │            ▼                    │
//!   └──────── paused ◀────────────────┘ (re-request: paused/failed ──▶ downloading | queued)
//! ```
//!
//! Every status change goes through [`DownloadItem::transition`], which
//! rejects anything not drawn above.

use crate::download::progress::ProgressSample;
use crate::error::{OfflineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest accepted item id; ids double in length as blob file names
pub const MAX_ITEM_ID_BYTES: usize = crate::blob::fs::MAX_KEY_BYTES;

/// Status of a download item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
    Paused,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Paused => "paused",
        }
    }

    /// Whether `self -> next` is an edge of the status machine
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Paused)
                | (Paused, Downloading)
                | (Paused, Queued)
                | (Failed, Downloading)
                | (Failed, Queued)
        )
    }

    /// A new request for an item in this status starts a fresh attempt
    pub fn accepts_rerequest(&self) -> bool {
        matches!(self, DownloadStatus::Paused | DownloadStatus::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = OfflineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(DownloadStatus::Queued),
            "downloading" => Ok(DownloadStatus::Downloading),
            "completed" => Ok(DownloadStatus::Completed),
            "failed" => Ok(DownloadStatus::Failed),
            "paused" => Ok(DownloadStatus::Paused),
            _ => Err(OfflineError::invalid_input(format!("Invalid download status: {}", s))),
        }
    }
}

/// A media work the UI asks to make available offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable item key
    pub id: String,
    /// Display title, also used for export filenames
    pub title: String,
    /// Where the media bytes are fetched from
    pub source_url: String,
}

impl MediaItem {
    /// Build a media item, validating the id and source URL
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Result<Self> {
        let item = Self {
            id: id.into(),
            title: title.into(),
            source_url: source_url.into(),
        };
        item.validate()?;
        Ok(item)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(OfflineError::invalid_input("Media item id must not be empty"));
        }
        if self.id.len() > MAX_ITEM_ID_BYTES {
            return Err(OfflineError::invalid_input(format!(
                "Media item id must be at most {} bytes",
                MAX_ITEM_ID_BYTES
            )));
        }
        url::Url::parse(&self.source_url)?;
        Ok(())
    }
}

/// One tracked download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub item_id: String,
    pub title: String,
    pub source_url: String,
    pub status: DownloadStatus,
    /// Percentage in [0, 100]
    pub progress: f64,
    /// After this instant the offline copy is considered stale (informational)
    pub expiry: DateTime<Utc>,
    /// 0 while unknown
    pub total_size_bytes: u64,
    pub downloaded_size_bytes: u64,
    /// Bytes per second, only while downloading
    pub speed: Option<f64>,
    pub requested_at: DateTime<Utc>,
    /// Insertion order key
    pub sequence: i64,
    /// Last failure message (not persisted)
    pub error: Option<String>,
}

impl DownloadItem {
    pub fn new(
        media: &MediaItem,
        status: DownloadStatus,
        sequence: i64,
        requested_at: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id: media.id.clone(),
            title: media.title.clone(),
            source_url: media.source_url.clone(),
            status,
            progress: 0.0,
            expiry,
            total_size_bytes: 0,
            downloaded_size_bytes: 0,
            speed: None,
            requested_at,
            sequence,
            error: None,
        }
    }

    /// Rebuild the media descriptor this item was requested with
    pub fn media(&self) -> MediaItem {
        MediaItem {
            id: self.item_id.clone(),
            title: self.title.clone(),
            source_url: self.source_url.clone(),
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.status == DownloadStatus::Downloading
    }

    /// Move to `next`, rejecting edges the status machine does not have
    pub fn transition(&mut self, next: DownloadStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OfflineError::InvalidTransition {
                item_id: self.item_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        self.status = next;
        match next {
            DownloadStatus::Downloading => {
                // Each attempt starts its byte accounting from zero
                self.progress = 0.0;
                self.total_size_bytes = 0;
                self.downloaded_size_bytes = 0;
                self.speed = None;
                self.error = None;
            }
            DownloadStatus::Completed => {
                self.progress = 100.0;
                self.speed = None;
                self.error = None;
            }
            DownloadStatus::Queued => {
                self.speed = None;
                self.error = None;
            }
            DownloadStatus::Failed | DownloadStatus::Paused => {
                self.speed = None;
            }
        }
        Ok(())
    }

    /// Fold a published progress sample into the item
    pub fn apply_sample(&mut self, sample: &ProgressSample) {
        self.downloaded_size_bytes = sample.downloaded_bytes;
        if let Some(total) = sample.total_bytes {
            self.total_size_bytes = total;
        }
        if let Some(percent) = sample.percent {
            self.progress = percent.clamp(0.0, 100.0);
        }
        self.speed = Some(sample.speed);
    }

    /// Normalise an item read back from persistent storage
    ///
    /// No transfer survives a restart, so `downloading` becomes `paused`.
    pub fn restored(mut self) -> Self {
        if self.status == DownloadStatus::Downloading {
            self.status = DownloadStatus::Paused;
        }
        self.speed = None;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: DownloadStatus) -> DownloadItem {
        let media = MediaItem::new("m1", "Movie One", "https://cdn.example.com/m1.mp4").unwrap();
        let now = Utc::now();
        DownloadItem::new(&media, status, 1, now, now + chrono::Duration::days(7))
    }

    #[test]
    fn test_media_item_id_length_is_bounded() {
        let longest = "i".repeat(MAX_ITEM_ID_BYTES);
        assert!(MediaItem::new(longest, "t", "https://cdn.example.com/a.mp4").is_ok());

        let too_long = "i".repeat(MAX_ITEM_ID_BYTES + 1);
        let err = MediaItem::new(too_long, "t", "https://cdn.example.com/a.mp4").unwrap_err();
        assert!(matches!(err, OfflineError::InvalidInput(_)));
    }

    #[test]
    fn test_is_expired_at_expiry() {
        let entry = item(DownloadStatus::Completed);
        assert!(!entry.is_expired(entry.expiry - chrono::Duration::seconds(1)));
        assert!(entry.is_expired(entry.expiry));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            DownloadStatus::Queued,
            DownloadStatus::Downloading,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
            DownloadStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<DownloadStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<DownloadStatus>().is_err());
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut item = item(DownloadStatus::Completed);
        for next in [
            DownloadStatus::Queued,
            DownloadStatus::Downloading,
            DownloadStatus::Failed,
            DownloadStatus::Paused,
        ] {
            assert!(matches!(
                item.transition(next),
                Err(OfflineError::InvalidTransition { .. })
            ));
        }
        assert_eq!(item.status, DownloadStatus::Completed);
    }

    #[test]
    fn test_queued_cannot_pause() {
        let mut item = item(DownloadStatus::Queued);
        assert!(item.transition(DownloadStatus::Paused).is_err());
        assert!(item.transition(DownloadStatus::Downloading).is_ok());
    }

    #[test]
    fn test_downloading_resets_accounting() {
        let mut item = item(DownloadStatus::Paused);
        item.downloaded_size_bytes = 500;
        item.total_size_bytes = 1000;
        item.progress = 50.0;
        item.error = Some("old".to_string());

        item.transition(DownloadStatus::Downloading).unwrap();
        assert_eq!(item.downloaded_size_bytes, 0);
        assert_eq!(item.total_size_bytes, 0);
        assert_eq!(item.progress, 0.0);
        assert!(item.error.is_none());
    }

    #[test]
    fn test_pause_and_complete_clear_speed() {
        let mut item = item(DownloadStatus::Downloading);
        item.speed = Some(1024.0);
        item.transition(DownloadStatus::Paused).unwrap();
        assert!(item.speed.is_none());

        let mut item = self::item(DownloadStatus::Downloading);
        item.speed = Some(1024.0);
        item.transition(DownloadStatus::Completed).unwrap();
        assert!(item.speed.is_none());
        assert_eq!(item.progress, 100.0);
    }

    #[test]
    fn test_restored_downloading_becomes_paused() {
        let mut item = item(DownloadStatus::Downloading);
        item.speed = Some(10.0);
        let restored = item.restored();
        assert_eq!(restored.status, DownloadStatus::Paused);
        assert!(restored.speed.is_none());
    }

    #[test]
    fn test_apply_sample_keeps_progress_when_total_unknown() {
        let mut item = item(DownloadStatus::Downloading);
        item.progress = 12.0;
        item.apply_sample(&ProgressSample {
            downloaded_bytes: 4096,
            total_bytes: None,
            percent: None,
            speed: 2048.0,
        });
        assert_eq!(item.downloaded_size_bytes, 4096);
        assert_eq!(item.progress, 12.0);
        assert_eq!(item.speed, Some(2048.0));
    }

    #[test]
    fn test_media_item_validation() {
        assert!(MediaItem::new("", "t", "https://example.com/a").is_err());
        assert!(MediaItem::new("a", "t", "not a url").is_err());
        assert!(MediaItem::new("a", "t", "https://example.com/a").is_ok());
    }
}

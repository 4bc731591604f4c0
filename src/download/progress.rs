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


//! Transfer progress sampling and display formatting
//!
//! Byte counts are updated on every chunk, but samples are only published
//! once per interval (800ms by default). Speed is the number of bytes
//! received since the previous sample divided by the seconds since that
//! sample. All arithmetic stays in bytes; MB/GB only appear in the
//! `*_string` helpers used for display.

use crate::download::item::{DownloadItem, DownloadStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Published progress snapshot for one transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub downloaded_bytes: u64,
    /// None while the source has not reported a length
    pub total_bytes: Option<u64>,
    /// None while the total is unknown
    pub percent: Option<f64>,
    /// Bytes per second over the last sampling window
    pub speed: f64,
}

/// Throttled progress sampler for a single transfer
#[derive(Debug)]
pub struct ProgressSampler {
    downloaded: u64,
    total: Option<u64>,
    interval: Duration,
    last_sample_at: Instant,
    last_sample_bytes: u64,
}

impl ProgressSampler {
    pub fn new(interval: Duration, total: Option<u64>) -> Self {
        Self {
            downloaded: 0,
            total: total.filter(|t| *t > 0),
            interval,
            last_sample_at: Instant::now(),
            last_sample_bytes: 0,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Account for a received chunk
    ///
    /// Returns a sample when the publication interval has elapsed.
    pub fn record(&mut self, chunk_len: usize) -> Option<ProgressSample> {
        self.downloaded += chunk_len as u64;

        let now = Instant::now();
        if now.duration_since(self.last_sample_at) >= self.interval {
            Some(self.take_sample(now))
        } else {
            None
        }
    }

    fn take_sample(&mut self, now: Instant) -> ProgressSample {
        let elapsed = now.duration_since(self.last_sample_at).as_secs_f64();
        let delta = self.downloaded.saturating_sub(self.last_sample_bytes);
        let speed = if elapsed > 0.0 { delta as f64 / elapsed } else { 0.0 };

        self.last_sample_at = now;
        self.last_sample_bytes = self.downloaded;

        ProgressSample {
            downloaded_bytes: self.downloaded,
            total_bytes: self.total,
            percent: percentage(self.downloaded, self.total),
            speed,
        }
    }
}

/// `downloaded / total * 100`, or None when the total is unknown
pub fn percentage(downloaded: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some((downloaded as f64 / total as f64 * 100.0).min(100.0)),
        _ => None,
    }
}

/// Format bytes as human-readable string (e.g., "45.2 MB", "1.30 GB")
pub fn bytes_string(bytes: u64) -> String {
    let mb = bytes as f64 / 1_000_000.0;
    if mb >= 1000.0 {
        format!("{:.2} GB", mb / 1000.0)
    } else {
        format!("{:.1} MB", mb)
    }
}

/// Format download speed as human-readable string (e.g., "2.5 MB/s")
pub fn speed_string(bytes_per_sec: f64) -> String {
    format!("{:.1} MB/s", bytes_per_sec / 1_000_000.0)
}

/// One-line status for list views
pub fn display_string(item: &DownloadItem) -> String {
    match item.status {
        DownloadStatus::Queued => format!("{}: Queued", item.title),
        DownloadStatus::Downloading => {
            let total = if item.total_size_bytes > 0 {
                bytes_string(item.total_size_bytes)
            } else {
                "?".to_string()
            };
            format!(
                "{}: {:.0}% ({} / {}) - {}",
                item.title,
                item.progress,
                bytes_string(item.downloaded_size_bytes),
                total,
                speed_string(item.speed.unwrap_or(0.0))
            )
        }
        DownloadStatus::Paused => format!("{}: Paused at {:.0}%", item.title, item.progress),
        DownloadStatus::Completed => {
            format!("{}: Completed ({})", item.title, bytes_string(item.downloaded_size_bytes))
        }
        DownloadStatus::Failed => format!(
            "{}: Failed - {}",
            item.title,
            item.error.as_deref().unwrap_or("Unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(250_000, Some(1_000_000)), Some(25.0));
        assert_eq!(percentage(1_000_000, Some(1_000_000)), Some(100.0));
        assert_eq!(percentage(10, None), None);
        assert_eq!(percentage(10, Some(0)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_throttles_publication() {
        let mut sampler = ProgressSampler::new(Duration::from_millis(800), Some(10_000));

        assert!(sampler.record(1_000).is_none());
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(sampler.record(1_000).is_none());
        assert_eq!(sampler.downloaded(), 2_000);

        tokio::time::advance(Duration::from_millis(400)).await;
        let sample = sampler.record(2_000).expect("interval elapsed");
        assert_eq!(sample.downloaded_bytes, 4_000);
        assert_eq!(sample.percent, Some(40.0));
        // 4000 bytes over 0.8 seconds
        assert!((sample.speed - 5_000.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_uses_bytes_since_last_sample() {
        let mut sampler = ProgressSampler::new(Duration::from_millis(800), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        let first = sampler.record(10_000).unwrap();
        assert!((first.speed - 10_000.0).abs() < 1.0);
        assert_eq!(first.percent, None);

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = sampler.record(1_000).unwrap();
        assert!((second.speed - 500.0).abs() < 1.0);
        assert_eq!(second.downloaded_bytes, 11_000);
    }

    #[test]
    fn test_bytes_string_units() {
        assert_eq!(bytes_string(45_200_000), "45.2 MB");
        assert_eq!(bytes_string(1_300_000_000), "1.30 GB");
        assert_eq!(speed_string(2_500_000.0), "2.5 MB/s");
    }
}

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


//! Export of completed downloads to the host file system
//!
//! A completed item's blob is handed to a [`FileSaver`] under a filename
//! derived from the item's title.

use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

lazy_static! {
    static ref NON_ALPHANUMERIC: Regex = Regex::new(r"[^A-Za-z0-9]").unwrap();
}

const EXPORT_EXTENSION: &str = "mp4";
const FALLBACK_STEM: &str = "download";

/// Build the export filename for a title
///
/// Everything but ASCII letters and digits is dropped and the rest is
/// lower-cased, e.g. `"The Movie: Part 2"` becomes `"themoviepart2.mp4"`.
pub fn export_filename(title: &str) -> String {
    let stem = NON_ALPHANUMERIC.replace_all(title, "").to_ascii_lowercase();
    if stem.is_empty() {
        format!("{}.{}", FALLBACK_STEM, EXPORT_EXTENSION)
    } else {
        format!("{}.{}", stem, EXPORT_EXTENSION)
    }
}

/// Host file-save mechanism
#[async_trait]
pub trait FileSaver: Send + Sync {
    /// Save `data` as `filename`, returning where it ended up
    async fn save(&self, filename: &str, data: Bytes) -> Result<PathBuf>;
}

/// Saves exports into a fixed directory
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    directory: PathBuf,
}

impl DirectorySaver {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl FileSaver for DirectorySaver {
    async fn save(&self, filename: &str, data: Bytes) -> Result<PathBuf> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(OfflineError::invalid_input(format!(
                "Invalid export filename: {:?}",
                filename
            )));
        }

        tokio::fs::create_dir_all(&self.directory).await?;

        let target = self.directory.join(filename);
        let temp = self.directory.join(format!(".{}.part", filename));

        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::info!(path = %target.display(), bytes = data.len(), "exported download");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_export_filename_strips_and_lowercases() {
        assert_eq!(export_filename("The Movie: Part 2"), "themoviepart2.mp4");
        assert_eq!(export_filename("Amélie (2001)"), "amlie2001.mp4");
        assert_eq!(export_filename("already_clean-name"), "alreadycleanname.mp4");
    }

    #[test]
    fn test_export_filename_fallback() {
        assert_eq!(export_filename(""), "download.mp4");
        assert_eq!(export_filename("!!! ???"), "download.mp4");
    }

    #[tokio::test]
    async fn test_directory_saver_writes_file() {
        let dir = TempDir::new().unwrap();
        let saver = DirectorySaver::new(dir.path().join("exports"));

        let path = saver
            .save("movie.mp4", Bytes::from_static(b"media bytes"))
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("exports").join("movie.mp4"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"media bytes");
        assert!(!dir.path().join("exports").join(".movie.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_directory_saver_overwrites() {
        let dir = TempDir::new().unwrap();
        let saver = DirectorySaver::new(dir.path());

        saver.save("a.mp4", Bytes::from_static(b"old")).await.unwrap();
        let path = saver.save("a.mp4", Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_directory_saver_rejects_path_separators() {
        let dir = TempDir::new().unwrap();
        let saver = DirectorySaver::new(dir.path());

        let err = saver.save("../escape.mp4", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, OfflineError::InvalidInput(_)));
    }
}

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


//! Offline Core CLI - Desktop tool for managing offline downloads
//!
//! Commands that change the queue keep running until no download is active,
//! so queued work started by the command is carried to the end. Transfers
//! only live inside that running command, so there is no separate pause
//! command: Ctrl-C stops early and leaves the active download paused, and
//! running `download` again for the same id starts it over.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use offline_core::blob::{BlobStore, FsBlobStore};
use offline_core::download::progress::{bytes_string, display_string};
use offline_core::download::{DownloadQueue, HttpSource, MediaItem, QueueOptions, RequestOutcome};
use offline_core::export::DirectorySaver;
use offline_core::logging::{init_logging, LoggingConfig};
use offline_core::storage::{Database, MetadataStore};
use offline_core::DownloadConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "offline-cli")]
#[command(about = "Offline Core CLI - manage offline media downloads", long_about = None)]
struct Cli {
    /// JSON config file (OFFLINE_* environment variables still apply)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a download and wait for the queue to finish
    Download {
        /// Media item id
        id: String,
        /// Source URL of the media file
        url: String,
        /// Display title (defaults to the id)
        #[arg(short, long)]
        title: Option<String>,
    },
    /// List tracked downloads
    List,
    /// Remove a download and its stored media
    Remove { id: String },
    /// Cancel a queued download
    Cancel { id: String },
    /// Remove all completed downloads
    ClearCompleted,
    /// Export a completed download
    Export {
        id: String,
        /// Target directory (defaults to the configured export directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show offline storage usage
    Usage,
}

struct Session {
    metadata: MetadataStore,
    store: Arc<FsBlobStore>,
    config: DownloadConfig,
}

impl Session {
    async fn open(config: DownloadConfig) -> Result<Self> {
        let db = Database::new(&config.database_path)
            .await
            .with_context(|| format!("opening {}", config.database_path.display()))?;
        let store = FsBlobStore::open(&config.blob_directory, config.storage_quota_bytes)
            .await
            .with_context(|| format!("opening {}", config.blob_directory.display()))?;

        Ok(Self {
            metadata: MetadataStore::new(db.pool().clone()),
            store: Arc::new(store),
            config,
        })
    }

    async fn start_queue(&self) -> Result<DownloadQueue> {
        let source = HttpSource::new(Duration::from_secs(self.config.request_timeout_secs))?;
        let queue = DownloadQueue::start(
            QueueOptions::from(&self.config),
            self.store.clone(),
            Arc::new(source),
            self.metadata.clone(),
        )
        .await?;
        Ok(queue)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LoggingConfig::default())?;

    let config = match &cli.config {
        Some(path) => DownloadConfig::load(path)?.with_env_overrides()?,
        None => DownloadConfig::from_env()?,
    };
    config.validate()?;

    let session = Session::open(config).await?;

    match cli.command {
        Commands::List => {
            let items = session.metadata.load_all().await?;
            if items.is_empty() {
                println!("No downloads.");
            }
            let now = Utc::now();
            for item in items {
                let expiry = if item.is_expired(now) {
                    format!("expired {}", item.expiry.format("%Y-%m-%d"))
                } else {
                    format!("expires {}", item.expiry.format("%Y-%m-%d"))
                };
                println!("[{}] {} ({})", item.item_id, display_string(&item), expiry);
            }
            return Ok(());
        }
        Commands::Usage => {
            let usage = session.store.usage_estimate().await;
            match usage.fraction_used() {
                Some(fraction) => println!(
                    "{} of {} used ({:.1}%)",
                    bytes_string(usage.used),
                    bytes_string(usage.quota),
                    fraction * 100.0
                ),
                None => println!("{} used (no quota)", bytes_string(usage.used)),
            }
            return Ok(());
        }
        _ => {}
    }

    let queue = session.start_queue().await?;

    match cli.command {
        Commands::Download { id, url, title } => {
            let title = title.unwrap_or_else(|| id.clone());
            let media = MediaItem::new(id.clone(), title, url)?;
            match queue.request_download(media).await? {
                RequestOutcome::Admitted => println!("Downloading {}", id),
                RequestOutcome::Queued => println!("Queued {}", id),
                RequestOutcome::AlreadyTracked(status) => println!("{} is already {}", id, status),
            }
        }
        Commands::Remove { id } => {
            if !queue.remove(&id).await? {
                bail!("no download with id {}", id);
            }
            println!("Removed {}", id);
        }
        Commands::Cancel { id } => {
            if !queue.cancel_queued(&id).await? {
                bail!("{} is not queued", id);
            }
            println!("Cancelled {}", id);
        }
        Commands::ClearCompleted => {
            let count = queue.clear_completed().await?;
            println!("Cleared {} completed download(s)", count);
        }
        Commands::Export { id, output } => {
            let directory = output.unwrap_or_else(|| session.config.export_directory.clone());
            let path = queue.export(&id, &DirectorySaver::new(directory)).await?;
            println!("Exported to {}", path.display());
        }
        Commands::List | Commands::Usage => {}
    }

    drain(&queue).await?;
    queue.shutdown().await?;
    Ok(())
}

/// Render progress until nothing is downloading or Ctrl-C is pressed
async fn drain(queue: &DownloadQueue) -> Result<()> {
    let mut snapshots = queue.subscribe();
    let mut notices = queue.notifications();

    loop {
        let active = snapshots
            .borrow_and_update()
            .iter()
            .find(|item| item.is_downloading())
            .map(display_string);
        let Some(line) = active else {
            return Ok(());
        };
        println!("{}", line);

        tokio::select! {
            changed = snapshots.changed() => changed?,
            notice = notices.recv() => {
                if let Ok(notice) = notice {
                    println!("{:?}", notice);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, pausing active download");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_queue_commands() {
        let cli = Cli::try_parse_from(["offline-cli", "download", "m1", "https://cdn.example.com/m1.mp4", "--title", "Movie"]).unwrap();
        assert!(matches!(cli.command, Commands::Download { ref id, .. } if id == "m1"));
        assert!(Cli::try_parse_from(["offline-cli", "clear-completed"]).is_ok());
    }

    #[test]
    fn test_has_no_standalone_pause() {
        assert!(Cli::try_parse_from(["offline-cli", "pause", "m1"]).is_err());
    }
}

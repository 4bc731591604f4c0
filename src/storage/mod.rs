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


//! Metadata persistence
//!
//! Download metadata lives in SQLite so the queue survives restarts. Media
//! bytes are not stored here; see [`crate::blob`].
//!
//! # Usage Example
//! ```no_run
//! use offline_core::storage::{Database, MetadataStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./downloads.db").await?;
//! let metadata = MetadataStore::new(db.pool().clone());
//! let items = metadata.load_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod metadata;
pub mod migrations;

pub use database::Database;
pub use metadata::MetadataStore;

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


//! Persisted download metadata
//!
//! One row per tracked item: `{ item_id, status, progress, expiry,
//! total_size_bytes, downloaded_size_bytes }` plus what is needed to restart
//! a transfer after a restart (title, source URL, request order).

use crate::download::item::{DownloadItem, DownloadStatus};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load every item in request order
    ///
    /// Items saved while `downloading` come back as `paused`.
    pub async fn load_all(&self) -> Result<Vec<DownloadItem>> {
        let rows = sqlx::query("SELECT * FROM DownloadItems ORDER BY sequence ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Self::row_to_item(row).map(DownloadItem::restored))
            .collect()
    }

    /// Insert or replace the row for `item`
    pub async fn upsert(&self, item: &DownloadItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO DownloadItems (
                item_id, title, source_url, status, progress, expiry,
                total_size_bytes, downloaded_size_bytes, requested_at, sequence
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                title = excluded.title,
                source_url = excluded.source_url,
                status = excluded.status,
                progress = excluded.progress,
                expiry = excluded.expiry,
                total_size_bytes = excluded.total_size_bytes,
                downloaded_size_bytes = excluded.downloaded_size_bytes,
                requested_at = excluded.requested_at,
                sequence = excluded.sequence
            "#,
        )
        .bind(&item.item_id)
        .bind(&item.title)
        .bind(&item.source_url)
        .bind(item.status.as_str())
        .bind(item.progress)
        .bind(item.expiry)
        .bind(item.total_size_bytes as i64)
        .bind(item.downloaded_size_bytes as i64)
        .bind(item.requested_at)
        .bind(item.sequence)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete the row for `item_id`; returns whether a row existed
    pub async fn delete(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM DownloadItems WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, item_id: &str) -> Result<Option<DownloadItem>> {
        let row = sqlx::query("SELECT * FROM DownloadItems WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_item).transpose()
    }

    /// Highest sequence in use, 0 when empty
    pub async fn max_sequence(&self) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence) FROM DownloadItems")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }

    fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<DownloadItem> {
        let status_str: String = row.try_get("status")?;
        let status: DownloadStatus = status_str.parse()?;
        let expiry: DateTime<Utc> = row.try_get("expiry")?;
        let requested_at: DateTime<Utc> = row.try_get("requested_at")?;

        Ok(DownloadItem {
            item_id: row.try_get("item_id")?,
            title: row.try_get("title")?,
            source_url: row.try_get("source_url")?,
            status,
            progress: row.try_get("progress")?,
            expiry,
            total_size_bytes: row.try_get::<i64, _>("total_size_bytes")? as u64,
            downloaded_size_bytes: row.try_get::<i64, _>("downloaded_size_bytes")? as u64,
            speed: None,
            requested_at,
            sequence: row.try_get("sequence")?,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::item::MediaItem;
    use crate::storage::Database;

    fn item(id: &str, status: DownloadStatus, sequence: i64) -> DownloadItem {
        let media = MediaItem::new(id, format!("Title {}", id), format!("https://cdn.example.com/{}.mp4", id)).unwrap();
        let now = Utc::now();
        DownloadItem::new(&media, status, sequence, now, now + chrono::Duration::days(7))
    }

    #[tokio::test]
    async fn test_upsert_and_load_in_sequence_order() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db.pool().clone());

        store.upsert(&item("b", DownloadStatus::Queued, 2)).await.unwrap();
        store.upsert(&item("a", DownloadStatus::Completed, 1)).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        let ids: Vec<_> = loaded.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.max_sequence().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_downloading_loads_as_paused_without_speed() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db.pool().clone());

        let mut active = item("a", DownloadStatus::Downloading, 1);
        active.speed = Some(1_000.0);
        active.downloaded_size_bytes = 512;
        active.total_size_bytes = 1024;
        active.progress = 50.0;
        store.upsert(&active).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].status, DownloadStatus::Paused);
        assert_eq!(loaded[0].speed, None);
        assert_eq!(loaded[0].downloaded_size_bytes, 512);
        assert_eq!(loaded[0].progress, 50.0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete() {
        let db = Database::new_in_memory().await.unwrap();
        let store = MetadataStore::new(db.pool().clone());

        let mut entry = item("a", DownloadStatus::Queued, 1);
        store.upsert(&entry).await.unwrap();
        entry.status = DownloadStatus::Failed;
        store.upsert(&entry).await.unwrap();

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Failed);
        assert_eq!(stored.expiry.timestamp(), entry.expiry.timestamp());

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }
}

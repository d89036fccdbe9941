//! Catalog CRUD operations (`videos` table).

use crate::error::DatabaseError;
use crate::types::Metadata;
use crate::{Error, Result};
use std::path::Path;

use super::{Database, VideoRow};

impl Database {
    /// Insert or repoint a catalog row
    ///
    /// A row for the same URL is repointed to the new path; a row for the same
    /// path under another URL is replaced. Either way at most one row exists
    /// per URL and per path afterwards.
    pub async fn insert_video(&self, path: &Path, metadata: &Metadata) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query("DELETE FROM videos WHERE path = ? AND url != ?")
            .bind(&path_str)
            .bind(&metadata.url)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to release video path: {}",
                    e
                )))
            })?;

        sqlx::query(
            r#"
            INSERT INTO videos (url, path, title, artist)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                path = excluded.path,
                title = excluded.title,
                artist = excluded.artist
            "#,
        )
        .bind(&metadata.url)
        .bind(&path_str)
        .bind(&metadata.title)
        .bind(&metadata.artist)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert video: {}",
                e
            )))
        })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit video: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a catalog row by URL, regardless of whether its file still exists
    pub async fn get_video(&self, url: &str) -> Result<Option<VideoRow>> {
        let row = sqlx::query_as::<_, VideoRow>(
            r#"
            SELECT url, path, title, artist
            FROM videos
            WHERE url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get video: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all catalog rows
    pub async fn list_videos(&self) -> Result<Vec<VideoRow>> {
        let rows = sqlx::query_as::<_, VideoRow>(
            r#"
            SELECT url, path, title, artist
            FROM videos
            ORDER BY artist ASC, title ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list videos: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete a catalog row, returning whether one existed
    pub async fn delete_video(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM videos WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete video: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

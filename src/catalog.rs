//! Catalog of completed downloads
//!
//! Thin policy layer over the `videos` table. A row only counts as a
//! completed download while its file exists: [`Catalog::lookup`] drops rows
//! whose file has vanished, and [`Catalog::prune`] does the same for the whole
//! table.

use crate::db::Database;
use crate::types::{CatalogEntry, Metadata};
use crate::utils::{remove_dir_if_empty, remove_file_if_exists};
use crate::Result;
use std::path::Path;
use std::sync::Arc;

/// Catalog store backed by the shared [`Database`]
#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    /// Create a catalog over an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Completed download for `url`, if its file is still on disk
    ///
    /// A row whose file is missing is deleted before returning `None`.
    pub async fn lookup(&self, url: &str) -> Result<Option<CatalogEntry>> {
        let Some(row) = self.db.get_video(url).await? else {
            return Ok(None);
        };
        let entry = CatalogEntry::from(row);

        if tokio::fs::try_exists(&entry.path).await? {
            return Ok(Some(entry));
        }

        tracing::info!(url = %url, path = ?entry.path, "catalog entry has no file, dropping it");
        self.db.delete_video(url).await?;
        Ok(None)
    }

    /// Record a finished download
    pub async fn record(&self, path: &Path, metadata: &Metadata) -> Result<()> {
        self.db.insert_video(path, metadata).await?;
        tracing::debug!(url = %metadata.url, path = ?path, "recorded in catalog");
        Ok(())
    }

    /// All catalog entries, whether or not their files exist
    pub async fn entries(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .db
            .list_videos()
            .await?
            .into_iter()
            .map(CatalogEntry::from)
            .collect())
    }

    /// Drop every entry whose file no longer exists
    ///
    /// Directories left empty by missing files are removed too. Returns the
    /// number of rows dropped.
    pub async fn prune(&self) -> Result<usize> {
        let mut pruned = 0;

        for entry in self.entries().await? {
            if tokio::fs::try_exists(&entry.path).await? {
                continue;
            }

            if self.db.delete_video(&entry.metadata.url).await? {
                tracing::info!(url = %entry.metadata.url, path = ?entry.path, "pruned");
                pruned += 1;
            }
            if let Some(parent) = entry.path.parent() {
                remove_dir_if_empty(parent).await?;
            }
        }

        Ok(pruned)
    }

    /// Delete the entry for `url` together with its file
    ///
    /// The parent directory is removed if this leaves it empty. Returns the
    /// deleted entry, or `None` if the URL was not in the catalog.
    pub async fn delete(&self, url: &str) -> Result<Option<CatalogEntry>> {
        let Some(row) = self.db.get_video(url).await? else {
            return Ok(None);
        };
        let entry = CatalogEntry::from(row);

        if !remove_file_if_exists(&entry.path).await? {
            tracing::warn!(path = ?entry.path, "file was already gone");
        }
        if let Some(parent) = entry.path.parent() {
            remove_dir_if_empty(parent).await?;
        }
        self.db.delete_video(url).await?;

        tracing::info!(url = %url, path = ?entry.path, "deleted");
        Ok(Some(entry))
    }
}

//! Newsboat `cache.db` reader
//!
//! Opened read-only; the feed reader owns the file and may be running.

use super::{FeedItem, FeedItemMetadata, FeedStore};
use crate::error::DatabaseError;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, FromRow)]
struct ItemLookupRow {
    title: String,
    author: Option<String>,
    feed_title: Option<String>,
}

#[derive(Debug, FromRow)]
struct ItemRow {
    url: String,
    title: String,
    author: Option<String>,
    unread: i64,
    #[sqlx(rename = "pubDate")]
    pub_date: Option<i64>,
}

/// Feed store backed by Newsboat's SQLite cache
pub struct NewsboatStore {
    pool: SqlitePool,
}

impl NewsboatStore {
    /// Open the cache at `path` read-only
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file does not exist, since opening
    /// read-only never creates it.
    pub async fn open(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            return Err(Error::NotFound(format!(
                "newsboat cache {} does not exist",
                path.display()
            )));
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse newsboat cache path: {}",
                    e
                )))
            })?
            .read_only(true);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to open newsboat cache: {}",
                e
            )))
        })?;

        Ok(Self { pool })
    }

    /// Close the underlying pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl FeedStore for NewsboatStore {
    async fn lookup(&self, url: &str) -> Result<Option<FeedItemMetadata>> {
        let row = sqlx::query_as::<_, ItemLookupRow>(
            r#"
            SELECT i.title, i.author, f.title AS feed_title
            FROM rss_item i
            JOIN rss_feed f ON i.feedurl = f.rssurl
            WHERE i.url = ?
            ORDER BY i.id ASC
            LIMIT 1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to look up newsboat item: {}",
                e
            )))
        })?;

        Ok(row.map(|row| FeedItemMetadata {
            feed_title: row.feed_title.unwrap_or_default(),
            item_title: row.title,
            item_author: row.author.filter(|a| !a.trim().is_empty()),
        }))
    }

    async fn items_for_feed(&self, feed_url: &str) -> Result<Option<Vec<FeedItem>>> {
        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rss_feed WHERE rssurl = ?")
            .bind(feed_url)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to look up newsboat feed: {}",
                    e
                )))
            })?;

        if known == 0 {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT url, title, author, unread, pubDate
            FROM rss_item
            WHERE feedurl = ? AND deleted = 0
            ORDER BY pubDate ASC, id ASC
            "#,
        )
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list newsboat items: {}",
                e
            )))
        })?;

        Ok(Some(
            rows.into_iter()
                .filter(|row| !row.url.is_empty())
                .map(|row| FeedItem {
                    url: row.url,
                    title: row.title,
                    author: row.author.filter(|a| !a.trim().is_empty()),
                    unread: row.unread != 0,
                    published: row
                        .pub_date
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
                })
                .collect(),
        ))
    }

    fn name(&self) -> &'static str {
        "newsboat"
    }
}

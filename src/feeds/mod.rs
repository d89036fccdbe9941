//! Feed sources
//!
//! Two places know about feed items:
//! - the feed reader's local cache ([`NewsboatStore`]), which is the fast,
//!   offline source of both item lists and per-URL metadata
//! - the feed itself over HTTP ([`RemoteFeed`]), used for `--feed` URLs the
//!   reader does not track
//!
//! [`FeedSource`] combines the two for batch runs.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

mod newsboat;
mod remote;

pub use newsboat::NewsboatStore;
pub use remote::RemoteFeed;

/// One item of a feed
#[derive(Clone, Debug, PartialEq)]
pub struct FeedItem {
    /// Link to the video page
    pub url: String,
    /// Item title
    pub title: String,
    /// Item author, when the feed provides one
    pub author: Option<String>,
    /// Whether the item is unread in the feed reader
    pub unread: bool,
    /// Publication time, when known
    pub published: Option<DateTime<Utc>>,
}

/// What the feed reader knows about a single item URL
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedItemMetadata {
    /// Title of the feed the item belongs to
    pub feed_title: String,
    /// Item title
    pub item_title: String,
    /// Item author, when recorded
    pub item_author: Option<String>,
}

/// Read-only view of the feed reader's database
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Metadata for the item whose link is exactly `url`
    async fn lookup(&self, url: &str) -> Result<Option<FeedItemMetadata>>;

    /// Items of the feed `feed_url` in publication order, oldest first
    ///
    /// Returns `None` when the store does not track the feed.
    async fn items_for_feed(&self, feed_url: &str) -> Result<Option<Vec<FeedItem>>>;

    /// Name of the implementation
    fn name(&self) -> &'static str;
}

/// Feed store used when no feed reader database is available
///
/// Knows no items and no feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFeedStore;

#[async_trait]
impl FeedStore for EmptyFeedStore {
    async fn lookup(&self, _url: &str) -> Result<Option<FeedItemMetadata>> {
        Ok(None)
    }

    async fn items_for_feed(&self, _feed_url: &str) -> Result<Option<Vec<FeedItem>>> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "empty"
    }
}

/// Item lists for batch runs: the local store first, then the network
pub struct FeedSource {
    store: Arc<dyn FeedStore>,
    remote: Option<RemoteFeed>,
}

impl FeedSource {
    /// Combine a store with an optional remote fallback
    pub fn new(store: Arc<dyn FeedStore>, remote: Option<RemoteFeed>) -> Self {
        Self { store, remote }
    }

    /// URLs of the items of `feed_url`, oldest first
    ///
    /// Unless `include_read` is set only unread items are returned. Items
    /// fetched over the network carry no read state and always count as
    /// unread.
    pub async fn item_urls(&self, feed_url: &str, include_read: bool) -> Result<Vec<String>> {
        let items = match self.store.items_for_feed(feed_url).await? {
            Some(items) => {
                tracing::debug!(
                    feed = %feed_url,
                    store = self.store.name(),
                    count = items.len(),
                    "feed items from local store"
                );
                items
            }
            None => match &self.remote {
                Some(remote) => {
                    tracing::info!(feed = %feed_url, "feed not in local store, fetching it");
                    remote.fetch(feed_url).await?
                }
                None => {
                    return Err(Error::NotFound(format!(
                        "feed {} is not tracked by the feed reader",
                        feed_url
                    )));
                }
            },
        };

        Ok(items
            .into_iter()
            .filter(|item| include_read || item.unread)
            .map(|item| item.url)
            .collect())
    }
}

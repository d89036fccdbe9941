//! Feeds fetched over HTTP
//!
//! Used for `--feed` URLs the local feed reader does not track. The body is
//! parsed as RSS first and as Atom if that fails.

use super::FeedItem;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// HTTP client for feeds outside the feed reader
pub struct RemoteFeed {
    http_client: reqwest::Client,
}

impl RemoteFeed {
    /// Create a client with the given request timeout
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("video-archiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Fetch and parse a feed, oldest item first
    ///
    /// Items without a link are dropped. Every item counts as unread.
    ///
    /// # Errors
    /// Returns error if:
    /// - HTTP request fails or returns a non-success status
    /// - Feed cannot be parsed as either RSS or Atom
    pub async fn fetch(&self, feed_url: &str) -> Result<Vec<FeedItem>> {
        debug!(feed = %feed_url, "fetching feed");

        let response = self
            .http_client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| Error::Other(format!("Failed to fetch feed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Other(format!(
                "Feed returned HTTP {}: {}",
                status.as_u16(),
                feed_url
            )));
        }

        let content = response
            .text()
            .await
            .map_err(|e| Error::Other(format!("Failed to read feed content: {}", e)))?;

        let mut items = parse_feed(&content)?;
        // Feeds list newest first; batches run oldest first. Stable, so
        // undated items keep their relative order.
        items.sort_by_key(|item| item.published);
        Ok(items)
    }
}

/// Parse RSS, falling back to Atom
pub(crate) fn parse_feed(content: &str) -> Result<Vec<FeedItem>> {
    match parse_as_rss(content) {
        Ok(items) => {
            debug!("Successfully parsed as RSS, found {} items", items.len());
            Ok(items)
        }
        Err(rss_err) => {
            debug!("Failed to parse as RSS: {}, trying Atom", rss_err);
            match parse_as_atom(content) {
                Ok(items) => {
                    debug!("Successfully parsed as Atom, found {} items", items.len());
                    Ok(items)
                }
                Err(atom_err) => Err(Error::Other(format!(
                    "Failed to parse feed as RSS or Atom. RSS error: {}. Atom error: {}",
                    rss_err, atom_err
                ))),
            }
        }
    }
}

fn parse_as_rss(content: &str) -> Result<Vec<FeedItem>> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| Error::Other(format!("RSS parse error: {}", e)))?;

    let items = channel
        .items()
        .iter()
        .filter_map(|item| {
            let url = item.link()?.trim().to_string();
            if url.is_empty() {
                return None;
            }

            let author = item
                .author()
                .map(str::to_string)
                .or_else(|| {
                    item.dublin_core_ext()
                        .and_then(|dc| dc.creators().first().cloned())
                });

            let published = item.pub_date().and_then(|date_str| {
                DateTime::parse_from_rfc2822(date_str)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            });

            Some(FeedItem {
                url,
                title: item.title().unwrap_or("").to_string(),
                author,
                unread: true,
                published,
            })
        })
        .collect();

    Ok(items)
}

fn parse_as_atom(content: &str) -> Result<Vec<FeedItem>> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())
        .map_err(|e| Error::Other(format!("Atom parse error: {}", e)))?;

    let items = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            // Prefer the alternate link, which is the page itself
            let link = entry
                .links()
                .iter()
                .find(|link| link.rel() == "alternate")
                .or_else(|| entry.links().first())?;

            let published = entry
                .published()
                .copied()
                .unwrap_or_else(|| *entry.updated())
                .with_timezone(&Utc);

            Some(FeedItem {
                url: link.href().to_string(),
                title: entry.title().as_str().to_string(),
                author: entry.authors().first().map(|a| a.name().to_string()),
                unread: true,
                published: Some(published),
            })
        })
        .collect();

    Ok(items)
}

//! Metadata resolution
//!
//! Turns a URL into a [`ResolvedTarget`]: its [`LinkType`], the metadata to
//! embed and record, and the final path in the library. Sources are tried in
//! order:
//!
//! 1. the feed reader's cache (offline, and the only source that knows the
//!    feed's name)
//! 2. the lecture-capture player service, for lecture-capture links
//! 3. the generic extractor in metadata-only mode, for everything else

use crate::config::Config;
use crate::extractor::GenericExtractor;
use crate::feeds::FeedStore;
use crate::lecture_capture::LectureCaptureClient;
use crate::types::{LinkType, Metadata, ResolvedTarget};
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

mod classify;
mod sanitize;

pub use sanitize::{MAX_COMPONENT_BYTES, library_path, sanitize_component};

/// Artist recorded when no source names one
pub const UNKNOWN_ARTIST: &str = "Unknown";

/// Where finished files go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryLayout {
    /// Root for everything except lecture captures
    pub videos_dir: PathBuf,
    /// Root for lecture captures, whose titles follow a different scheme
    pub lecture_capture_dir: PathBuf,
    /// Container extension, without the dot
    pub extension: String,
}

impl LibraryLayout {
    /// Layout described by the configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            videos_dir: config.library.videos_dir.clone(),
            lecture_capture_dir: config.lecture_capture_dir(),
            extension: config.tools.container.clone(),
        }
    }

    /// Final path for a file named `stem` by `artist`
    pub fn destination(&self, link_type: LinkType, artist: &str, stem: &str) -> PathBuf {
        let root = match link_type {
            LinkType::LectureCapture => &self.lecture_capture_dir,
            _ => &self.videos_dir,
        };
        library_path(root, artist, stem, &self.extension)
    }
}

/// Metadata resolver
pub struct Resolver {
    feeds: Arc<dyn FeedStore>,
    lecture_capture: Arc<LectureCaptureClient>,
    extractor: Arc<dyn GenericExtractor>,
    layout: LibraryLayout,
}

impl Resolver {
    /// Create a resolver over its metadata sources
    pub fn new(
        feeds: Arc<dyn FeedStore>,
        lecture_capture: Arc<LectureCaptureClient>,
        extractor: Arc<dyn GenericExtractor>,
        layout: LibraryLayout,
    ) -> Self {
        Self {
            feeds,
            lecture_capture,
            extractor,
            layout,
        }
    }

    /// Library layout in use
    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    /// Resolve `url` to a download target
    ///
    /// # Errors
    /// [`Error::UnresolvableUrl`] when no source can name the video.
    pub async fn resolve(&self, url: &str) -> Result<ResolvedTarget> {
        self.resolve_as(url, LinkType::classify(url)).await
    }

    pub(crate) async fn resolve_as(&self, url: &str, link_type: LinkType) -> Result<ResolvedTarget> {
        tracing::debug!(url = %url, link_type = %link_type, "resolving");

        let (metadata, stem) = match self.from_feed_reader(url).await {
            Some(metadata) => (metadata, None),
            None => match link_type {
                LinkType::LectureCapture => (self.from_lecture_capture(url).await?, None),
                _ => self.from_extractor(url, link_type).await?,
            },
        };

        let stem = stem.unwrap_or_else(|| metadata.title.clone());
        let destination = self.layout.destination(link_type, &metadata.artist, &stem);

        tracing::info!(
            url = %url,
            title = %metadata.title,
            artist = %metadata.artist,
            destination = ?destination,
            "resolved"
        );

        Ok(ResolvedTarget {
            destination,
            metadata,
            link_type,
        })
    }

    /// Feed reader cache; failures only cost the fast path
    async fn from_feed_reader(&self, url: &str) -> Option<Metadata> {
        let item = match self.feeds.lookup(url).await {
            Ok(Some(item)) => item,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(url = %url, store = self.feeds.name(), error = %e, "feed reader lookup failed");
                return None;
            }
        };

        if item.item_title.trim().is_empty() {
            return None;
        }

        let artist = [Some(item.feed_title), item.item_author]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

        Some(Metadata::new(url, item.item_title, artist))
    }

    async fn from_lecture_capture(&self, url: &str) -> Result<Metadata> {
        match self.lecture_capture.metadata(url).await {
            Ok(Some(metadata)) => Ok(metadata),
            Ok(None) => Err(Error::unresolvable(
                url,
                "lecture-capture portal did not describe the presentation; is the browser session signed in?",
            )),
            Err(Error::UnresolvableUrl { url, reason }) => Err(Error::UnresolvableUrl { url, reason }),
            Err(e) => Err(Error::unresolvable(url, e.to_string())),
        }
    }

    async fn from_extractor(
        &self,
        url: &str,
        link_type: LinkType,
    ) -> Result<(Metadata, Option<String>)> {
        let info = self.extractor.probe(url).await?;

        let title = info
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| info.id.clone());
        if title.trim().is_empty() {
            return Err(Error::unresolvable(url, "extractor returned neither title nor id"));
        }

        let artist = [info.uploader, info.channel]
            .into_iter()
            .flatten()
            .find(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

        // Zoom recordings tend to share generic titles; their id keeps the
        // file names apart.
        let stem = (link_type == LinkType::Zoom && !info.id.is_empty())
            .then(|| format!("zoom-{}", info.id));

        Ok((Metadata::new(url, title, artist), stem))
    }
}

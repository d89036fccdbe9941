//! Core types for video-archiver

use std::fmt;
use std::path::PathBuf;

/// Classification of a URL, driving both metadata and fetch strategy selection
///
/// Derived purely from URL pattern matching (see [`LinkType::classify`]) and
/// threaded through the resolver and the pipeline without being re-derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Any page the generic site extractor can handle
    #[default]
    Default,
    /// Zoom cloud recording
    Zoom,
    /// Lecture-capture portal (Mediasite) requiring an authenticated session
    LectureCapture,
    /// Social media reel (Instagram)
    Reel,
}

impl LinkType {
    /// Short lowercase name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Default => "default",
            LinkType::Zoom => "zoom",
            LinkType::LectureCapture => "lecture_capture",
            LinkType::Reel => "reel",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source metadata stamped into the container and stored in the catalog
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    /// Source URL
    pub url: String,
    /// Video title
    pub title: String,
    /// Channel, uploader, or feed name
    pub artist: String,
}

impl Metadata {
    /// Create a metadata record
    pub fn new(url: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            artist: artist.into(),
        }
    }
}

/// Output of the metadata resolver, consumed immediately by the fetch pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedTarget {
    /// Final path of the finished file
    pub destination: PathBuf,
    /// Metadata to embed and record
    pub metadata: Metadata,
    /// Strategy selector
    pub link_type: LinkType,
}

/// A completed, on-disk download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Path of the finished file
    pub path: PathBuf,
    /// Metadata recorded for the file
    pub metadata: Metadata,
}

/// Identity of a running process that survives PID reuse
///
/// `start_time` is the process creation time in seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessFingerprint {
    /// Operating system process id
    pub pid: u32,
    /// Creation time, seconds since the Unix epoch
    pub start_time: f64,
}

/// An in-flight download claim
#[derive(Clone, Debug, PartialEq)]
pub struct Reservation {
    /// Metadata of the item being downloaded
    pub metadata: Metadata,
    /// The process that owns the claim
    pub owner: ProcessFingerprint,
}

/// Result of a single download attempt that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file was fetched, finalized and recorded
    Downloaded(PathBuf),
    /// A catalog entry with a backing file already exists
    AlreadyDownloaded(PathBuf),
    /// Another live process holds the reservation for this URL
    InProgressElsewhere,
}

impl DownloadOutcome {
    /// Whether a new file was produced
    pub fn is_downloaded(&self) -> bool {
        matches!(self, DownloadOutcome::Downloaded(_))
    }
}

/// Counts reported at the end of a batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Items newly downloaded in this run
    pub downloaded: usize,
    /// Items already in the catalog or owned by another process
    pub skipped: usize,
    /// Items that failed to resolve, fetch or finalize
    pub failed: usize,
    /// Whether the batch stopped early on a user interruption
    pub cancelled: bool,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} failed",
            self.downloaded, self.skipped, self.failed
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// Where a batch gets its URLs from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchSource {
    /// An explicit list of URLs, processed in order
    Urls(Vec<String>),
    /// A newline-delimited URL list file (`#` and `//` lines ignored)
    File(PathBuf),
    /// The items of a feed, in feed order
    Feed {
        /// The feed's RSS/Atom URL
        url: String,
        /// Include items already marked read in the feed reader
        include_read: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_summary_display() {
        let summary = BatchSummary {
            downloaded: 2,
            skipped: 3,
            failed: 0,
            cancelled: false,
        };
        assert_eq!(summary.to_string(), "2 downloaded, 3 skipped, 0 failed");

        let cancelled = BatchSummary {
            cancelled: true,
            ..summary
        };
        assert!(cancelled.to_string().ends_with("(cancelled)"));
    }

    #[test]
    fn test_link_type_names() {
        assert_eq!(LinkType::default(), LinkType::Default);
        assert_eq!(LinkType::Zoom.to_string(), "zoom");
        assert_eq!(LinkType::LectureCapture.as_str(), "lecture_capture");
    }
}

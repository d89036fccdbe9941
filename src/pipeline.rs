//! Fetch pipeline
//!
//! Downloads a [`ResolvedTarget`] into a temp sibling of its destination,
//! then finalizes it into the destination with metadata embedded:
//!
//! ```text
//! Artist/Title.part.mkv  --finalize-->  Artist/Title.mkv
//! ```
//!
//! A half-written file never carries the final name. On failure or
//! cancellation every artifact of the attempt is removed before the error
//! is returned; releasing the reservation is left to the caller.

use crate::error::FinalizeError;
use crate::extractor::GenericExtractor;
use crate::lecture_capture::LectureCaptureClient;
use crate::media::{Encoding, MediaTool};
use crate::types::{LinkType, Metadata, ResolvedTarget};
use crate::utils::{remove_dir_if_empty, remove_file_if_exists, temp_path_for};
use crate::{Error, Result};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fetch-then-finalize executor
pub struct Pipeline {
    extractor: Arc<dyn GenericExtractor>,
    media: Arc<dyn MediaTool>,
    lecture_capture: Arc<LectureCaptureClient>,
    temp_suffix: String,
    enable_zoom_reencoding: bool,
}

impl Pipeline {
    /// Create a pipeline over its external tools
    pub fn new(
        extractor: Arc<dyn GenericExtractor>,
        media: Arc<dyn MediaTool>,
        lecture_capture: Arc<LectureCaptureClient>,
        temp_suffix: String,
        enable_zoom_reencoding: bool,
    ) -> Self {
        Self {
            extractor,
            media,
            lecture_capture,
            temp_suffix,
            enable_zoom_reencoding,
        }
    }

    /// Encoding used when finalizing `link_type`
    ///
    /// Only Zoom recordings are ever re-encoded, and only when enabled.
    pub fn encoding_for(&self, link_type: LinkType) -> Encoding {
        if link_type == LinkType::Zoom && self.enable_zoom_reencoding {
            Encoding::Reencode
        } else {
            Encoding::Copy
        }
    }

    /// Download and finalize `target`
    ///
    /// # Errors
    /// - [`Error::Fetch`] when acquisition fails
    /// - [`Error::Finalize`] when the metadata pass fails or a lecture
    ///   capture has no stream
    /// - [`Error::Cancelled`] when `cancel` fires mid-flight
    ///
    /// In every error case neither the temp file nor the destination exists
    /// afterwards.
    pub async fn run(&self, target: &ResolvedTarget, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let destination = &target.destination;
        let parent = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                Error::Finalize(FinalizeError::InvalidDestination {
                    path: destination.clone(),
                })
            })?;
        let temp = temp_path_for(destination, &self.temp_suffix);

        tokio::fs::create_dir_all(parent).await?;
        // Leftovers of an attempt that was killed outright
        remove_temp_artifacts(&temp).await;

        tracing::info!(url = %target.metadata.url, temp = ?temp, "fetching");
        // Tools have reaped everything they started by the time they return
        if let Err(e) = self.fetch(target, &temp, cancel).await {
            self.discard(&temp, None).await;
            return Err(e);
        }

        let encoding = self.encoding_for(target.link_type);
        tracing::info!(destination = ?destination, ?encoding, "finalizing");
        let finalized = self
            .media
            .finalize(&temp, destination, &target.metadata, encoding, cancel)
            .await;
        if let Err(e) = finalized {
            self.discard(&temp, Some(destination)).await;
            return Err(e);
        }

        if let Err(e) = remove_file_if_exists(&temp).await {
            tracing::warn!(temp = ?temp, error = %e, "failed to remove temp file");
        }
        Ok(())
    }

    async fn fetch(
        &self,
        target: &ResolvedTarget,
        temp: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = &target.metadata.url;
        match target.link_type {
            LinkType::LectureCapture => {
                let manifest = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    manifest = self.lecture_capture.manifest(url) => manifest?,
                };
                self.media
                    .copy_stream(&manifest.url, &manifest.headers, temp, cancel)
                    .await
            }
            LinkType::Default | LinkType::Zoom | LinkType::Reel => {
                self.extractor.fetch(url, temp, cancel).await
            }
        }
    }

    /// Remove everything a failed attempt may have written
    async fn discard(&self, temp: &Path, destination: Option<&Path>) {
        remove_temp_artifacts(temp).await;

        if let Some(destination) = destination {
            match remove_file_if_exists(destination).await {
                Ok(true) => tracing::debug!(path = ?destination, "removed partial destination"),
                Ok(false) => {}
                Err(e) => tracing::warn!(path = ?destination, error = %e, "failed to remove partial destination"),
            }
        }

        if let Some(parent) = temp.parent()
            && let Err(e) = remove_dir_if_empty(parent).await
        {
            tracing::debug!(dir = ?parent, error = %e, "failed to remove empty directory");
        }
    }
}

/// Delete the temp file and the tool's own intermediates next to it
///
/// Only names the extractor derives from the temp file are touched: the temp
/// file itself, its `.part`/`.ytdl`/fragment companions, and the per-format
/// and merge files (`Title.part.f137.mp4`, `Title.part.temp.mkv`). Other
/// videos in the directory never match, even when their titles share the
/// temp file's prefix.
async fn remove_temp_artifacts(temp: &Path) {
    let (Some(dir), Some(pattern)) = (temp.parent(), temp_artifact_pattern(temp)) else {
        return;
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        if !pattern.is_match(&entry.file_name().to_string_lossy()) {
            continue;
        }
        match remove_file_if_exists(&entry.path()).await {
            Ok(true) => tracing::debug!(path = ?entry.path(), "removed temp artifact"),
            Ok(false) => {}
            Err(e) => tracing::warn!(path = ?entry.path(), error = %e, "failed to remove temp artifact"),
        }
    }
}

/// Anchored pattern for the file names an attempt writing `temp` produces
fn temp_artifact_pattern(temp: &Path) -> Option<Regex> {
    let name = regex::escape(&temp.file_name()?.to_string_lossy());
    let stem = regex::escape(&temp.file_stem()?.to_string_lossy());
    let pattern = format!(
        r"^(?:{name}|{stem}\.(?:f[0-9]+(?:-[0-9A-Za-z]+)?|temp)\.[0-9A-Za-z]+)(?:\.part(?:-Frag[0-9]+)?|\.ytdl)?$"
    );
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(temp = ?temp, error = %e, "cannot match temp artifacts");
            None
        }
    }
}

/// Embed `metadata` into an existing file, writing `output`
///
/// The standalone finalize step: codec copy, parent directory created.
pub async fn tag_file(
    media: &dyn MediaTool,
    input: &Path,
    output: &Path,
    metadata: &Metadata,
    cancel: &CancellationToken,
) -> Result<()> {
    if !tokio::fs::try_exists(input).await? {
        return Err(Error::NotFound(format!("{} does not exist", input.display())));
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    media
        .finalize(input, output, metadata, Encoding::Copy, cancel)
        .await
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        FakeExtractor, FakeMediaTool, FakeSessionSource, FetchBehavior, FinalizeBehavior,
    };
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        pipeline: Pipeline,
        extractor: Arc<FakeExtractor>,
        media: Arc<FakeMediaTool>,
        library: TempDir,
    }

    fn fixture(enable_zoom_reencoding: bool) -> Fixture {
        let extractor = Arc::new(FakeExtractor::new());
        let media = Arc::new(FakeMediaTool::new());
        let lecture_capture = Arc::new(
            LectureCaptureClient::new(
                Arc::new(FakeSessionSource::new("MediasiteAuth=abc")),
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        Fixture {
            pipeline: Pipeline::new(
                extractor.clone(),
                media.clone(),
                lecture_capture,
                "part".to_string(),
                enable_zoom_reencoding,
            ),
            extractor,
            media,
            library: tempdir().unwrap(),
        }
    }

    fn target(library: &Path, url: &str, link_type: LinkType) -> ResolvedTarget {
        ResolvedTarget {
            destination: library.join("Chan").join("Title.mkv"),
            metadata: Metadata::new(url, "Title", "Chan"),
            link_type,
        }
    }

    fn dir_entries(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_success_leaves_only_destination() {
        let f = fixture(false);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);

        f.pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap();

        assert!(target.destination.exists());
        assert_eq!(dir_entries(&f.library.path().join("Chan")), vec![target.destination.clone()]);

        let calls = f.media.finalize_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, f.library.path().join("Chan/Title.part.mkv"));
        assert_eq!(calls[0].output, target.destination);
        assert_eq!(calls[0].metadata, target.metadata);
        assert_eq!(calls[0].encoding, Encoding::Copy);
        assert_eq!(f.extractor.fetched_urls(), vec!["https://x/v"]);
    }

    #[tokio::test]
    async fn test_overwrites_previous_failed_destination() {
        let f = fixture(false);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);
        std::fs::create_dir_all(target.destination.parent().unwrap()).unwrap();
        std::fs::write(&target.destination, b"stale partial").unwrap();

        f.pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target.destination).unwrap(), FakeExtractor::CONTENT);
    }

    #[tokio::test]
    async fn test_fetch_failure_cleans_up() {
        let f = fixture(false);
        f.extractor.set_behavior("https://x/v", FetchBehavior::Fail);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);

        let err = f
            .pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
        assert!(!f.library.path().join("Chan").exists(), "no temp, no empty dir");
        assert!(f.media.finalize_calls().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_failure_removes_partial_destination() {
        let f = fixture(false);
        f.media.set_finalize_behavior(FinalizeBehavior::FailAfterPartialWrite);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);

        let err = f
            .pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Finalize(_)));
        assert!(!target.destination.exists());
        assert!(dir_entries(&f.library.path().join("Chan")).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_fetch_removes_temp_and_destination() {
        let f = fixture(false);
        f.extractor.set_behavior("https://x/v", FetchBehavior::HangAfterWrite);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);
        let temp = f.library.path().join("Chan/Title.part.mkv");

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            let target = target.clone();
            let pipeline = f.pipeline;
            tokio::spawn(async move { pipeline.run(&target, &cancel).await })
        };

        f.extractor.wait_for_fetch_start().await;
        assert!(temp.exists(), "temp file written before interruption");

        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();

        assert!(err.is_cancelled());
        assert!(!temp.exists());
        assert!(!target.destination.exists());
        assert!(f.media.finalize_calls().is_empty());
    }

    #[tokio::test]
    async fn test_already_cancelled_does_nothing() {
        let f = fixture(false);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f.pipeline.run(&target, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(f.extractor.fetched_urls().is_empty());
        assert!(!target.destination.exists());
    }

    #[tokio::test]
    async fn test_removes_leftovers_of_killed_attempt() {
        let f = fixture(false);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);
        let dir = f.library.path().join("Chan");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Title.part.mkv.part"), b"x").unwrap();
        std::fs::write(dir.join("Title.part.f137.mp4"), b"x").unwrap();
        std::fs::write(dir.join("Other.mkv"), b"keep").unwrap();

        f.pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap();

        let mut names: Vec<String> = dir_entries(&dir)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Other.mkv", "Title.mkv"]);
    }

    #[tokio::test]
    async fn test_keeps_videos_sharing_the_temp_prefix() {
        let f = fixture(false);
        let target = target(f.library.path(), "https://x/v", LinkType::Default);
        let dir = f.library.path().join("Chan");
        std::fs::create_dir_all(&dir).unwrap();
        for neighbour in ["Title.part.2.mkv", "Title.part.mkv.backup.mkv", "Title.part.final.mp4"] {
            std::fs::write(dir.join(neighbour), b"finished video").unwrap();
        }
        std::fs::write(dir.join("Title.part.temp.mkv"), b"x").unwrap();
        std::fs::write(dir.join("Title.part.f251-drc.webm.part-Frag7"), b"x").unwrap();

        f.pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap();

        let mut names: Vec<String> = dir_entries(&dir)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "Title.mkv",
                "Title.part.2.mkv",
                "Title.part.final.mp4",
                "Title.part.mkv.backup.mkv",
            ]
        );
    }

    #[test]
    fn test_temp_artifact_pattern() {
        let pattern = temp_artifact_pattern(Path::new("/v/Chan/Title (1).part.mkv")).unwrap();
        for name in [
            "Title (1).part.mkv",
            "Title (1).part.mkv.part",
            "Title (1).part.mkv.ytdl",
            "Title (1).part.mkv.part-Frag12",
            "Title (1).part.f137.mp4",
            "Title (1).part.f137.mp4.part",
            "Title (1).part.temp.mkv",
        ] {
            assert!(pattern.is_match(name), "{name} should match");
        }
        for name in [
            "Title (1).mkv",
            "Title (1).part.2.mkv",
            "Title (1).part.mkv.old.mkv",
            "Title X1).part.mkv",
            "prefix Title (1).part.mkv",
        ] {
            assert!(!pattern.is_match(name), "{name} should not match");
        }
    }

    #[tokio::test]
    async fn test_zoom_reencoding_only_when_enabled() {
        for (enabled, link_type, expected) in [
            (true, LinkType::Zoom, Encoding::Reencode),
            (false, LinkType::Zoom, Encoding::Copy),
            (true, LinkType::Default, Encoding::Copy),
            (true, LinkType::Reel, Encoding::Copy),
        ] {
            let f = fixture(enabled);
            let target = target(f.library.path(), "https://x/v", link_type);
            f.pipeline
                .run(&target, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(f.media.finalize_calls()[0].encoding, expected);
        }
    }

    #[tokio::test]
    async fn test_lecture_capture_copies_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "d": { "Presentation": {
                    "Title": "L",
                    "Streams": [{ "VideoUrls": [
                        { "MimeType": "audio/x-mpegurl", "Location": "https://cdn/l.m3u8" }
                    ] }]
                } }
            })))
            .mount(&server)
            .await;

        let f = fixture(false);
        let url = format!("{}/Mediasite/Play/abc", server.uri());
        let target = target(f.library.path(), &url, LinkType::LectureCapture);

        f.pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap();

        let copies = f.media.copy_calls();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].0, "https://cdn/l.m3u8");
        assert!(copies[0].1.starts_with("Referer: "));
        assert!(f.extractor.fetched_urls().is_empty());
        assert!(target.destination.exists());
    }

    #[tokio::test]
    async fn test_lecture_capture_expired_session_is_finalize_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "d": { "Presentation": null } })),
            )
            .mount(&server)
            .await;

        let f = fixture(false);
        let url = format!("{}/Mediasite/Play/abc", server.uri());
        let target = target(f.library.path(), &url, LinkType::LectureCapture);

        let err = f
            .pipeline
            .run(&target, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Finalize(FinalizeError::NoStreamFound { .. })
        ));
        assert!(!f.library.path().join("Chan").exists());
    }

    #[tokio::test]
    async fn test_tag_file() {
        let media = FakeMediaTool::new();
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.mkv");
        std::fs::write(&input, b"video").unwrap();
        let output = dir.path().join("nested/out.mkv");
        let meta = Metadata::new("https://x", "T", "A");

        tag_file(&media, &input, &output, &meta, &CancellationToken::new())
            .await
            .unwrap();

        assert!(output.exists());
        let calls = media.finalize_calls();
        assert_eq!(calls[0].encoding, Encoding::Copy);
        assert_eq!(calls[0].metadata, meta);
    }

    #[tokio::test]
    async fn test_tag_missing_input() {
        let media = FakeMediaTool::new();
        let dir = tempdir().unwrap();
        let err = tag_file(
            &media,
            &dir.path().join("missing.mkv"),
            &dir.path().join("out.mkv"),
            &Metadata::new("u", "t", "a"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

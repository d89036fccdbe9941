//! In-memory stand-ins for the external collaborators, shared by unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::error::{FetchError, FinalizeError};
use crate::extractor::{GenericExtractor, ProbeResult};
use crate::feeds::{FeedItem, FeedItemMetadata, FeedStore};
use crate::media::{Encoding, MediaTool};
use crate::notify::Notifier;
use crate::process::ProcessProbe;
use crate::session::SessionSource;
use crate::types::Metadata;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Process table keyed by pid, holding each process's creation time
pub(crate) struct FakeProcessProbe {
    processes: Mutex<HashMap<u32, f64>>,
}

impl FakeProcessProbe {
    pub(crate) fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or replace) the process with `pid`
    pub(crate) fn spawn(&self, pid: u32, start_time: f64) {
        self.processes.lock().unwrap().insert(pid, start_time);
    }

    pub(crate) fn kill(&self, pid: u32) {
        self.processes.lock().unwrap().remove(&pid);
    }
}

impl ProcessProbe for FakeProcessProbe {
    fn creation_time(&self, pid: u32) -> Option<f64> {
        self.processes.lock().unwrap().get(&pid).copied()
    }
}

/// Feed reader cache held in memory
pub(crate) struct FakeFeedStore {
    items: Mutex<HashMap<String, FeedItemMetadata>>,
    feeds: Mutex<HashMap<String, Vec<FeedItem>>>,
}

impl FakeFeedStore {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add_item(&self, url: &str, metadata: FeedItemMetadata) {
        self.items
            .lock()
            .unwrap()
            .insert(url.to_string(), metadata);
    }

    pub(crate) fn add_feed(&self, feed_url: &str, items: Vec<FeedItem>) {
        self.feeds
            .lock()
            .unwrap()
            .insert(feed_url.to_string(), items);
    }
}

#[async_trait]
impl FeedStore for FakeFeedStore {
    async fn lookup(&self, url: &str) -> Result<Option<FeedItemMetadata>> {
        Ok(self.items.lock().unwrap().get(url).cloned())
    }

    async fn items_for_feed(&self, feed_url: &str) -> Result<Option<Vec<FeedItem>>> {
        Ok(self.feeds.lock().unwrap().get(feed_url).cloned())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Browser session that always returns the same cookie header
pub(crate) struct FakeSessionSource {
    cookies: String,
}

impl FakeSessionSource {
    pub(crate) fn new(cookies: &str) -> Self {
        Self {
            cookies: cookies.to_string(),
        }
    }
}

#[async_trait]
impl SessionSource for FakeSessionSource {
    async fn cookies_for_domain(&self, _domain: &str) -> Result<String> {
        Ok(self.cookies.clone())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// How [`FakeExtractor::fetch`] behaves for a URL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FetchBehavior {
    /// Write [`FakeExtractor::CONTENT`] to the output
    Succeed,
    /// Write part of the output, then fail
    Fail,
    /// Write part of the output, then wait for cancellation
    HangAfterWrite,
}

/// Site extractor over a fixed table of videos
pub(crate) struct FakeExtractor {
    videos: Mutex<HashMap<String, ProbeResult>>,
    behaviors: Mutex<HashMap<String, FetchBehavior>>,
    fetched: Mutex<Vec<String>>,
    probes: AtomicUsize,
    fetch_started: Notify,
}

impl FakeExtractor {
    pub(crate) const CONTENT: &'static [u8] = b"fake video stream";

    pub(crate) fn new() -> Self {
        Self {
            videos: Mutex::new(HashMap::new()),
            behaviors: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            fetch_started: Notify::new(),
        }
    }

    pub(crate) fn add_video(
        &self,
        url: &str,
        id: &str,
        title: Option<&str>,
        uploader: Option<&str>,
    ) {
        self.videos.lock().unwrap().insert(
            url.to_string(),
            ProbeResult {
                id: id.to_string(),
                title: title.map(str::to_string),
                uploader: uploader.map(str::to_string),
                channel: None,
            },
        );
    }

    pub(crate) fn set_behavior(&self, url: &str, behavior: FetchBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// URLs passed to `fetch`, in call order
    pub(crate) fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// Resolves once a fetch has written its partial output
    pub(crate) async fn wait_for_fetch_start(&self) {
        self.fetch_started.notified().await;
    }
}

#[async_trait]
impl GenericExtractor for FakeExtractor {
    async fn probe(&self, url: &str) -> Result<ProbeResult> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.videos
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::unresolvable(url, "Unsupported URL"))
    }

    async fn fetch(&self, url: &str, output: &Path, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.fetched.lock().unwrap().push(url.to_string());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(FetchBehavior::Succeed);

        match behavior {
            FetchBehavior::Succeed => {
                tokio::fs::write(output, Self::CONTENT).await?;
                Ok(())
            }
            FetchBehavior::Fail => {
                tokio::fs::write(output, &Self::CONTENT[..4]).await?;
                Err(Error::Fetch(FetchError::ToolFailed {
                    tool: "fake".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "ERROR: HTTP Error 403: Forbidden".to_string(),
                }))
            }
            FetchBehavior::HangAfterWrite => {
                tokio::fs::write(output, &Self::CONTENT[..4]).await?;
                self.fetch_started.notify_one();
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// How [`FakeMediaTool::finalize`] behaves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FinalizeBehavior {
    /// Copy input to output
    Succeed,
    /// Write a truncated output, then fail
    FailAfterPartialWrite,
}

/// One recorded `finalize` call
#[derive(Clone, Debug)]
pub(crate) struct FinalizeCall {
    pub(crate) input: PathBuf,
    pub(crate) output: PathBuf,
    pub(crate) metadata: Metadata,
    pub(crate) encoding: Encoding,
}

/// Media tool that copies bytes and records what it was asked to do
pub(crate) struct FakeMediaTool {
    behavior: Mutex<FinalizeBehavior>,
    finalize_calls: Mutex<Vec<FinalizeCall>>,
    copy_calls: Mutex<Vec<(String, String)>>,
}

impl FakeMediaTool {
    pub(crate) fn new() -> Self {
        Self {
            behavior: Mutex::new(FinalizeBehavior::Succeed),
            finalize_calls: Mutex::new(Vec::new()),
            copy_calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_finalize_behavior(&self, behavior: FinalizeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub(crate) fn finalize_calls(&self) -> Vec<FinalizeCall> {
        self.finalize_calls.lock().unwrap().clone()
    }

    /// `(manifest_url, headers)` of every `copy_stream` call
    pub(crate) fn copy_calls(&self) -> Vec<(String, String)> {
        self.copy_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTool for FakeMediaTool {
    async fn copy_stream(
        &self,
        manifest_url: &str,
        headers: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.copy_calls
            .lock()
            .unwrap()
            .push((manifest_url.to_string(), headers.to_string()));
        tokio::fs::write(output, FakeExtractor::CONTENT).await?;
        Ok(())
    }

    async fn finalize(
        &self,
        input: &Path,
        output: &Path,
        metadata: &Metadata,
        encoding: Encoding,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.finalize_calls.lock().unwrap().push(FinalizeCall {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            metadata: metadata.clone(),
            encoding,
        });

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            FinalizeBehavior::Succeed => {
                tokio::fs::copy(input, output).await?;
                Ok(())
            }
            FinalizeBehavior::FailAfterPartialWrite => {
                tokio::fs::write(output, b"trunc").await?;
                Err(Error::Finalize(FinalizeError::ToolFailed {
                    tool: "fake".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "Invalid data found when processing input".to_string(),
                }))
            }
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Notifier that keeps every `(title, message)` it receives
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn titles(&self) -> Vec<String> {
        self.sent().into_iter().map(|(title, _)| title).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

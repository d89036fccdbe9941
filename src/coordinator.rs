//! Single-download handler and batch coordinator
//!
//! Every item goes through the same sequence:
//!
//! 1. catalog lookup (already downloaded?)
//! 2. reservation check (another process on it?)
//! 3. metadata resolution
//! 4. reserve, run the pipeline, record in the catalog, release
//!
//! A batch applies this to each URL in source order. Item failures are
//! counted and reported, and the batch moves on; a cancellation ends it.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db::Database;
use crate::extractor::{GenericExtractor, YtDlpExtractor};
use crate::feeds::{EmptyFeedStore, FeedSource, FeedStore, NewsboatStore, RemoteFeed};
use crate::lecture_capture::LectureCaptureClient;
use crate::ledger::ReservationLedger;
use crate::media::{FfmpegTool, MediaTool};
use crate::notify::{DesktopNotifier, Notifier};
use crate::pipeline::Pipeline;
use crate::process::{ProcessProbe, SystemProcessProbe};
use crate::resolver::{LibraryLayout, Resolver};
use crate::session::{FirefoxCookies, NoSession, SessionSource};
use crate::types::{BatchSource, BatchSummary, CatalogEntry, DownloadOutcome, ProcessFingerprint};
use crate::utils::read_urls_from_file;
use crate::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Drives downloads for one process
pub struct Coordinator {
    db: Arc<Database>,
    catalog: Catalog,
    ledger: ReservationLedger,
    resolver: Resolver,
    pipeline: Pipeline,
    feeds: FeedSource,
    notifier: Arc<dyn Notifier>,
}

impl Coordinator {
    /// Assemble a coordinator from its parts
    ///
    /// Reservations are written with `owner` as their fingerprint and judged
    /// live through `probe`.
    pub fn new(
        db: Arc<Database>,
        resolver: Resolver,
        pipeline: Pipeline,
        feeds: FeedSource,
        probe: Arc<dyn ProcessProbe>,
        owner: ProcessFingerprint,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            catalog: Catalog::new(db.clone()),
            ledger: ReservationLedger::new(db.clone(), probe, owner),
            db,
            resolver,
            pipeline,
            feeds,
            notifier,
        }
    }

    /// Open the database and wire up the external tools named in `config`
    ///
    /// # Errors
    /// Fails when the database cannot be opened, the current process cannot
    /// be fingerprinted, or yt-dlp or ffmpeg cannot be located. A missing
    /// feed reader cache or browser profile is not an error.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database_path()).await?);

        let feed_store: Arc<dyn FeedStore> =
            match NewsboatStore::open(&config.feeds.newsboat_cache_path).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::debug!(
                        path = ?config.feeds.newsboat_cache_path,
                        error = %e,
                        "feed reader cache unavailable"
                    );
                    Arc::new(EmptyFeedStore)
                }
            };
        let remote = if config.feeds.remote_fallback {
            Some(RemoteFeed::new(config.feeds.http_timeout)?)
        } else {
            None
        };

        let session: Arc<dyn SessionSource> = match FirefoxCookies::from_config(&config.session) {
            Some(cookies) => {
                tracing::debug!(path = ?cookies.path(), "using browser session");
                Arc::new(cookies)
            }
            None => {
                tracing::debug!("no browser profile found, lecture-capture requests are anonymous");
                Arc::new(NoSession)
            }
        };
        let lecture_capture = Arc::new(LectureCaptureClient::new(
            session,
            config.feeds.http_timeout,
        )?);

        let extractor: Arc<dyn GenericExtractor> =
            Arc::new(YtDlpExtractor::from_config(&config.tools)?);
        let media: Arc<dyn MediaTool> = Arc::new(FfmpegTool::from_config(&config.tools)?);

        let resolver = Resolver::new(
            feed_store.clone(),
            lecture_capture.clone(),
            extractor.clone(),
            LibraryLayout::from_config(config),
        );
        let pipeline = Pipeline::new(
            extractor,
            media,
            lecture_capture,
            config.library.temp_suffix.clone(),
            config.features.enable_zoom_reencoding,
        );

        Ok(Self::new(
            db,
            resolver,
            pipeline,
            FeedSource::new(feed_store, remote),
            Arc::new(SystemProcessProbe),
            ProcessFingerprint::current()?,
            Arc::new(DesktopNotifier::from_config(&config.notifications)),
        ))
    }

    /// Catalog of completed downloads
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Reservation ledger owned by this process
    pub fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    /// Download a single URL
    ///
    /// Skips are reported through the notifier as well as returned.
    ///
    /// # Errors
    /// Resolution, fetch and finalize failures, and [`Error::Cancelled`].
    /// The reservation is released in every case.
    pub async fn download_one(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        self.acquire(url, cancel, true).await
    }

    /// Download every URL of `source`, in order
    ///
    /// Items already in the catalog or held by another process are skipped
    /// quietly. A failing item is counted and the batch continues. A
    /// cancellation stops the batch after cleaning up the current item and
    /// is reported through [`BatchSummary::cancelled`].
    ///
    /// # Errors
    /// Only when the source itself cannot be read.
    pub async fn run_batch(
        &self,
        source: BatchSource,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let urls = match source {
            BatchSource::Urls(urls) => Ok(urls),
            BatchSource::File(path) => read_urls_from_file(&path).await,
            BatchSource::Feed { url, include_read } => {
                self.feeds.item_urls(&url, include_read).await
            }
        };
        let urls = match urls {
            Ok(urls) => urls,
            Err(e) => {
                self.notifier.notify("Error", &e.to_string()).await;
                return Err(e);
            }
        };
        tracing::info!(count = urls.len(), "starting batch");

        let mut summary = BatchSummary::default();
        for url in &urls {
            match self.acquire(url, cancel, false).await {
                Ok(DownloadOutcome::Downloaded(_)) => summary.downloaded += 1,
                Ok(DownloadOutcome::AlreadyDownloaded(_) | DownloadOutcome::InProgressElsewhere) => {
                    summary.skipped += 1
                }
                Err(e) if e.is_cancelled() => {
                    tracing::warn!(url = %url, "batch cancelled");
                    summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(url = %url, error = %e, code = e.error_code(), "batch item failed");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        self.notifier
            .notify("Batch Finished", &summary.to_string())
            .await;
        Ok(summary)
    }

    /// Remove `url` and its file from the library
    pub async fn delete(&self, url: &str) -> Result<Option<CatalogEntry>> {
        delete_from_library(&self.catalog, self.notifier.as_ref(), url).await
    }

    /// Drop catalog entries whose files are gone
    pub async fn prune(&self) -> Result<usize> {
        self.catalog.prune().await
    }

    /// Close the database pool
    pub async fn close(&self) {
        self.db.pool().close().await;
    }

    async fn acquire(
        &self,
        url: &str,
        cancel: &CancellationToken,
        announce_skips: bool,
    ) -> Result<DownloadOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(entry) = self.catalog.lookup(url).await? {
            return Ok(self.already_downloaded(entry, announce_skips).await);
        }
        if self.ledger.is_reserved(url).await? {
            return Ok(self.in_progress_elsewhere(url, announce_skips).await);
        }

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            resolved = self.resolver.resolve(url) => resolved,
        };
        let target = match resolved {
            Ok(target) => target,
            Err(e) => {
                self.report_failure(url, &e).await;
                return Err(e);
            }
        };
        let title = target.metadata.title.as_str();

        if !self.ledger.try_reserve(&target.metadata).await? {
            return Ok(self.in_progress_elsewhere(title, announce_skips).await);
        }

        // Another process may have finished it between the lookup and the reserve
        match self.catalog.lookup(url).await {
            Ok(Some(entry)) => {
                self.release(url).await;
                return Ok(self.already_downloaded(entry, announce_skips).await);
            }
            Ok(None) => {}
            Err(e) => {
                self.release(url).await;
                return Err(e);
            }
        }

        self.notifier.notify("Starting Download", title).await;

        let result = match self.pipeline.run(&target, cancel).await {
            Ok(()) => {
                self.catalog
                    .record(&target.destination, &target.metadata)
                    .await
            }
            Err(e) => Err(e),
        };
        self.release(url).await;

        match result {
            Ok(()) => {
                tracing::info!(url = %url, path = ?target.destination, "downloaded");
                self.notifier.notify("Finished Download", title).await;
                Ok(DownloadOutcome::Downloaded(target.destination))
            }
            Err(e) if e.is_cancelled() => {
                tracing::warn!(url = %url, "download cancelled");
                Err(e)
            }
            Err(e) => {
                self.report_failure(title, &e).await;
                Err(e)
            }
        }
    }

    async fn already_downloaded(&self, entry: CatalogEntry, announce: bool) -> DownloadOutcome {
        tracing::info!(url = %entry.metadata.url, path = ?entry.path, "already downloaded");
        if announce {
            self.notifier
                .notify("Already Downloaded", &entry.metadata.title)
                .await;
        }
        DownloadOutcome::AlreadyDownloaded(entry.path)
    }

    async fn in_progress_elsewhere(&self, label: &str, announce: bool) -> DownloadOutcome {
        tracing::info!(item = %label, "already downloading in another process");
        if announce {
            self.notifier.notify("Already Downloading", label).await;
        }
        DownloadOutcome::InProgressElsewhere
    }

    async fn report_failure(&self, label: &str, error: &Error) {
        tracing::error!(item = %label, error = %error, code = error.error_code(), "download failed");
        self.notifier
            .notify("Error", &format!("{}: {}", label, error))
            .await;
    }

    async fn release(&self, url: &str) {
        if let Err(e) = self.ledger.clear(url).await {
            tracing::error!(url = %url, error = %e, "failed to clear reservation");
        }
    }
}

/// Delete `url` from the catalog together with its file, notifying the outcome
pub async fn delete_from_library(
    catalog: &Catalog,
    notifier: &dyn Notifier,
    url: &str,
) -> Result<Option<CatalogEntry>> {
    match catalog.delete(url).await? {
        Some(entry) => {
            notifier
                .notify("Deleted Video", &entry.metadata.title)
                .await;
            Ok(Some(entry))
        }
        None => {
            notifier
                .notify("Failed to Delete Video", &format!("{} is not in the library", url))
                .await;
            Ok(None)
        }
    }
}

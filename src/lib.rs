//! # video-archiver
//!
//! Archives remote videos into a local library, one file per video under
//! `<videos_dir>/<artist>/<title>.<ext>`, with the source URL, title and
//! artist embedded in the container.
//!
//! ## Design
//!
//! Each invocation is an independent process. Processes coordinate through
//! a shared SQLite database holding two tables:
//! - the **catalog** of completed downloads, consulted before any work
//! - the **reservation ledger** of in-flight downloads, each row owned by a
//!   process fingerprint (pid plus creation time) so that claims left by
//!   killed processes are reclaimed automatically
//!
//! Downloads are written to a temp sibling of the destination and only
//! finalized into the destination name once complete.
//!
//! ## Quick Start
//!
//! ```no_run
//! use video_archiver::{Config, Coordinator, cancel_on_signal};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let coordinator = Coordinator::from_config(&config).await?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(cancel_on_signal(cancel.clone()));
//!
//!     let outcome = coordinator
//!         .download_one("https://www.youtube.com/watch?v=dQw4w9WgXcQ", &cancel)
//!         .await?;
//!     println!("{:?}", outcome);
//!
//!     coordinator.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Catalog of completed downloads
pub mod catalog;
/// Configuration types
pub mod config;
/// Single-download handler and batch coordinator
pub mod coordinator;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Generic site extractor
pub mod extractor;
/// Feed reader store and remote feeds
pub mod feeds;
/// Lecture-capture portal client
pub mod lecture_capture;
/// Cross-process reservation ledger
pub mod ledger;
/// Media remux and tagging tool
pub mod media;
/// User notifications
pub mod notify;
/// Fetch-then-finalize pipeline
pub mod pipeline;
/// Playback from the library or the source
pub mod player;
/// Process fingerprints and liveness
pub mod process;
/// URL classification and metadata resolution
pub mod resolver;
/// Authenticated browser session
pub mod session;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use catalog::Catalog;
pub use config::Config;
pub use coordinator::Coordinator;
pub use db::Database;
pub use error::{DatabaseError, Error, FetchError, FinalizeError, Result};
pub use ledger::ReservationLedger;
pub use notify::{DesktopNotifier, Notifier};
pub use process::{ProcessProbe, SystemProcessProbe};
pub use types::{
    BatchSource, BatchSummary, CatalogEntry, DownloadOutcome, LinkType, Metadata,
    ProcessFingerprint, Reservation, ResolvedTarget,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Meant to be spawned next to the work it interrupts:
///
/// ```no_run
/// # use tokio_util::sync::CancellationToken;
/// # async fn demo() {
/// let cancel = CancellationToken::new();
/// tokio::spawn(video_archiver::cancel_on_signal(cancel.clone()));
/// # }
/// ```
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => token.cancel(),
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, cancelling"),
                _ = sigint.recv() => tracing::info!("Received SIGINT (Ctrl+C), cancelling"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT (Ctrl+C), cancelling");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM, cancelling");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, cancelling"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}

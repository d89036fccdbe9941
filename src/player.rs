//! Playback of library videos
//!
//! A URL that is in the catalog plays from its local file; anything else is
//! streamed straight from the site by the player.

use crate::catalog::Catalog;
use crate::config::ToolsConfig;
use crate::error::FetchError;
use crate::notify::Notifier;
use crate::utils::stderr_tail;
use crate::{Error, Result};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Where a video was played from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playback {
    /// The catalogued file
    Local(PathBuf),
    /// The source URL, streamed
    Streamed,
}

/// Video player backed by the `mpv` binary
pub struct MpvPlayer {
    binary_path: PathBuf,
}

impl MpvPlayer {
    /// Create with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find mpv in PATH
    pub fn from_path() -> Option<Self> {
        which::which("mpv").ok().map(Self::new)
    }

    /// Build from the tools configuration
    ///
    /// # Errors
    /// [`Error::ExternalTool`] when no path is configured and mpv is not in
    /// PATH (or PATH search is disabled).
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        match &config.mpv_path {
            Some(path) => Ok(Self::new(path.clone())),
            None if config.search_path => which::which("mpv")
                .map(Self::new)
                .map_err(|e| Error::ExternalTool(format!("mpv not found in PATH: {}", e))),
            None => Err(Error::ExternalTool(
                "mpv path not configured and PATH search disabled".to_string(),
            )),
        }
    }

    /// Play `target` (a file or a URL) until the player exits
    ///
    /// The terminal stays attached so the player's keyboard controls work;
    /// only stderr is captured.
    pub async fn play(&self, target: &OsStr) -> Result<()> {
        tracing::debug!(binary = ?self.binary_path, target = ?target, "running mpv");

        let output = Command::new(&self.binary_path)
            .arg("--")
            .arg(target)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute mpv: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Fetch(FetchError::ToolFailed {
                tool: "mpv".to_string(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            }));
        }
        Ok(())
    }
}

/// Play `url` from the library if it is there, otherwise stream it
///
/// Streaming failures are reported through `notifier`, with a dedicated
/// title for videos restricted to channel members.
pub async fn play_from_library(
    catalog: &Catalog,
    player: &MpvPlayer,
    notifier: &dyn Notifier,
    url: &str,
) -> Result<Playback> {
    if let Some(entry) = catalog.lookup(url).await? {
        tracing::info!(title = %entry.metadata.title, path = ?entry.path, "playing from library");
        if let Err(e) = player.play(entry.path.as_os_str()).await {
            tracing::warn!(path = ?entry.path, error = %e, "player exited with an error");
        }
        return Ok(Playback::Local(entry.path));
    }

    tracing::info!(url = %url, "streaming");
    match player.play(OsStr::new(url)).await {
        Ok(()) => Ok(Playback::Streamed),
        Err(e) => {
            match &e {
                Error::Fetch(FetchError::ToolFailed { stderr, .. })
                    if stderr.contains("members-only") =>
                {
                    notifier
                        .notify("Error: Members Only", &format!("Members only video: {}", url))
                        .await;
                }
                _ => {
                    notifier
                        .notify("Error", &format!("Error streaming video: {} {}", url, e))
                        .await;
                }
            }
            Err(e)
        }
    }
}

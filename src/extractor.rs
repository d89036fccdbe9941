//! Generic site extractor
//!
//! Everything that is not a lecture-capture portal is fetched through a
//! general-purpose extractor that understands most video sites. The
//! [`GenericExtractor`] trait is the seam; [`YtDlpExtractor`] drives the
//! external `yt-dlp` binary.

use crate::config::ToolsConfig;
use crate::error::FetchError;
use crate::process::run_tool;
use crate::utils::stderr_tail;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Metadata-only view of a page
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProbeResult {
    /// Site-specific video id
    pub id: String,
    /// Video title
    #[serde(default)]
    pub title: Option<String>,
    /// Uploader name
    #[serde(default)]
    pub uploader: Option<String>,
    /// Channel name, for sites that distinguish it from the uploader
    #[serde(default)]
    pub channel: Option<String>,
}

/// Extractor capable of describing and downloading any supported page
#[async_trait]
pub trait GenericExtractor: Send + Sync {
    /// Describe `url` without downloading it
    async fn probe(&self, url: &str) -> Result<ProbeResult>;

    /// Download `url` into exactly `output`
    ///
    /// Best video up to the configured height merged with best audio, in the
    /// configured container. Returns [`Error::Cancelled`] once `cancel` has
    /// fired and nothing started by the download is still running.
    async fn fetch(&self, url: &str, output: &Path, cancel: &CancellationToken) -> Result<()>;

    /// Name of the implementation
    fn name(&self) -> &'static str;
}

/// Extractor backed by the `yt-dlp` binary
///
/// # Examples
///
/// ```no_run
/// use video_archiver::extractor::{GenericExtractor, YtDlpExtractor};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let extractor = YtDlpExtractor::from_path().expect("yt-dlp not found in PATH");
/// let info = extractor.probe("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await?;
/// println!("{:?}", info.title);
/// # Ok(())
/// # }
/// ```
pub struct YtDlpExtractor {
    binary_path: PathBuf,
    max_height: u32,
    container: String,
}

impl YtDlpExtractor {
    /// Create an extractor with an explicit binary path and default format
    /// settings
    pub fn new(binary_path: PathBuf) -> Self {
        let defaults = ToolsConfig::default();
        Self {
            binary_path,
            max_height: defaults.max_height,
            container: defaults.container,
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Build from the tools configuration
    ///
    /// # Errors
    /// [`Error::ExternalTool`] when no path is configured and yt-dlp is not
    /// in PATH (or PATH search is disabled).
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let binary_path = match &config.ytdlp_path {
            Some(path) => path.clone(),
            None if config.search_path => which::which("yt-dlp")
                .map_err(|e| Error::ExternalTool(format!("yt-dlp not found in PATH: {}", e)))?,
            None => {
                return Err(Error::ExternalTool(
                    "yt-dlp path not configured and PATH search disabled".to_string(),
                ));
            }
        };

        Ok(Self {
            binary_path,
            max_height: config.max_height,
            container: config.container.clone(),
        })
    }

    /// Format selector: best video up to the height cap plus best audio,
    /// or the best single file when the site has no separate streams
    pub fn format_selector(&self) -> String {
        format!("bestvideo[height<={}]+bestaudio/best", self.max_height)
    }

    fn fetch_args(&self, url: &str, output: &Path) -> Vec<std::ffi::OsString> {
        vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "-f".into(),
            self.format_selector().into(),
            "--merge-output-format".into(),
            self.container.clone().into(),
            "-o".into(),
            output.as_os_str().to_owned(),
            "--".into(),
            url.into(),
        ]
    }
}

#[async_trait]
impl GenericExtractor for YtDlpExtractor {
    async fn probe(&self, url: &str) -> Result<ProbeResult> {
        let output = Command::new(&self.binary_path)
            .args(["--dump-single-json", "--skip-download", "--no-playlist", "--no-warnings"])
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(Error::unresolvable(url, stderr_tail(&output.stderr)));
        }

        serde_json::from_slice::<ProbeResult>(&output.stdout).map_err(|e| {
            Error::unresolvable(url, format!("unexpected yt-dlp output: {}", e))
        })
    }

    async fn fetch(&self, url: &str, output: &Path, cancel: &CancellationToken) -> Result<()> {
        tracing::debug!(url = %url, output = ?output, format = %self.format_selector(), "running yt-dlp");

        let mut command = Command::new(&self.binary_path);
        command
            .args(self.fetch_args(url, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let result = run_tool(&mut command, cancel)
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?
            .ok_or(Error::Cancelled)?;

        if !result.status.success() {
            return Err(Error::Fetch(FetchError::ToolFailed {
                tool: "yt-dlp".to_string(),
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            }));
        }

        if !tokio::fs::try_exists(output).await? {
            return Err(Error::Fetch(FetchError::MissingOutput {
                path: output.to_path_buf(),
            }));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

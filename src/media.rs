//! Media remux and tagging tool
//!
//! Two jobs go through the external media tool: copying a lecture-capture
//! HLS stream into a local file, and the finalize pass that stamps source
//! metadata into the container while writing the final file.

use crate::config::ToolsConfig;
use crate::error::{FetchError, FinalizeError};
use crate::process::run_tool;
use crate::types::Metadata;
use crate::utils::stderr_tail;
use crate::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// How the finalize pass treats the encoded streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Copy every stream untouched
    Copy,
    /// Re-encode to H.264/AAC
    Reencode,
}

/// External media tool
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Copy the stream at `manifest_url` into `output` without re-encoding
    ///
    /// `headers` is a `\r\n`-separated block of extra request headers.
    async fn copy_stream(
        &self,
        manifest_url: &str,
        headers: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Write `input` to `output` with `metadata` embedded as container tags
    ///
    /// Overwrites `output` if it exists.
    async fn finalize(
        &self,
        input: &Path,
        output: &Path,
        metadata: &Metadata,
        encoding: Encoding,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Name of the implementation
    fn name(&self) -> &'static str;
}

/// Media tool backed by the `ffmpeg` binary
pub struct FfmpegTool {
    binary_path: PathBuf,
}

impl FfmpegTool {
    /// Create with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// Build from the tools configuration
    ///
    /// # Errors
    /// [`Error::ExternalTool`] when no path is configured and ffmpeg is not
    /// in PATH (or PATH search is disabled).
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        match &config.ffmpeg_path {
            Some(path) => Ok(Self::new(path.clone())),
            None if config.search_path => which::which("ffmpeg")
                .map(Self::new)
                .map_err(|e| Error::ExternalTool(format!("ffmpeg not found in PATH: {}", e))),
            None => Err(Error::ExternalTool(
                "ffmpeg path not configured and PATH search disabled".to_string(),
            )),
        }
    }

    async fn run(
        &self,
        args: Vec<OsString>,
        cancel: &CancellationToken,
    ) -> Result<std::process::Output> {
        tracing::debug!(binary = ?self.binary_path, ?args, "running ffmpeg");

        let mut command = Command::new(&self.binary_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        run_tool(&mut command, cancel)
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute ffmpeg: {}", e)))?
            .ok_or(Error::Cancelled)
    }
}

/// Arguments common to every invocation: overwrite, never prompt, quiet
fn base_args() -> Vec<OsString> {
    ["-y", "-nostdin", "-hide_banner", "-loglevel", "error"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

pub(crate) fn copy_stream_args(manifest_url: &str, headers: &str, output: &Path) -> Vec<OsString> {
    let mut args = base_args();
    args.extend(["-headers", headers, "-i", manifest_url, "-c", "copy"].map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

pub(crate) fn finalize_args(
    input: &Path,
    output: &Path,
    metadata: &Metadata,
    encoding: Encoding,
) -> Vec<OsString> {
    let mut args = base_args();
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    args.extend(["-map", "0"].map(OsString::from));

    for (key, value) in [
        ("URL", &metadata.url),
        ("title", &metadata.title),
        ("artist", &metadata.artist),
    ] {
        args.push("-metadata".into());
        args.push(format!("{}={}", key, value).into());
    }

    match encoding {
        Encoding::Copy => args.extend(["-codec", "copy"].map(OsString::from)),
        Encoding::Reencode => args.extend(
            [
                "-c:v", "libx264", "-preset", "veryfast", "-crf", "23", "-c:a", "aac", "-c:s",
                "copy",
            ]
            .map(OsString::from),
        ),
    }

    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn copy_stream(
        &self,
        manifest_url: &str,
        headers: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let result = self
            .run(copy_stream_args(manifest_url, headers, output), cancel)
            .await?;

        if !result.status.success() {
            return Err(Error::Fetch(FetchError::ToolFailed {
                tool: "ffmpeg".to_string(),
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

    async fn finalize(
        &self,
        input: &Path,
        output: &Path,
        metadata: &Metadata,
        encoding: Encoding,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let result = self
            .run(finalize_args(input, output, metadata, encoding), cancel)
            .await?;

        if !result.status.success() {
            return Err(Error::Finalize(FinalizeError::ToolFailed {
                tool: "ffmpeg".to_string(),
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            }));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

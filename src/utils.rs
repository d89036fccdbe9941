//! Utility functions for file operations and URL lists

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Read a newline-delimited URL list
///
/// Lines are trimmed; blank lines and lines starting with `#` or `//` are
/// ignored. Order is preserved and duplicates are kept, since the batch
/// skips anything already in the catalog anyway.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the file does not exist and [`Error::Io`]
/// for any other read failure.
pub async fn read_urls_from_file(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("File does not exist: {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;

    Ok(parse_url_list(&content))
}

/// Parse the contents of a URL list (see [`read_urls_from_file`])
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .map(str::to_string)
        .collect()
}

/// Remove `dir` if it exists and is empty
///
/// Returns `true` if the directory was removed. A directory that is missing
/// or still has entries is left alone and is not an error.
///
/// # Examples
///
/// ```no_run
/// use video_archiver::utils::remove_dir_if_empty;
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> video_archiver::Result<()> {
/// // After deleting the last video of a channel
/// remove_dir_if_empty(Path::new("/home/me/Videos/Some Channel")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_dir_if_empty(dir: &Path) -> Result<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::Io(e)),
    };

    if entries.next_entry().await?.is_some() {
        return Ok(false);
    }

    match tokio::fs::remove_dir(dir).await {
        Ok(()) => {
            tracing::debug!(dir = ?dir, "removed empty directory");
            Ok(true)
        }
        // Another process may have removed it or written into it meanwhile
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::DirectoryNotEmpty
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Remove a file, treating a missing file as success
///
/// Returns `true` if a file was removed.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Sibling path used while a download is still being written
///
/// `Title.mkv` becomes `Title.part.mkv`: same directory, same container
/// extension (the fetch tools pick their muxer from it), and a marker that
/// keeps it from ever sharing the final name.
pub fn temp_path_for(destination: &Path, suffix: &str) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match destination.extension() {
        Some(ext) => format!("{}.{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}.{}", stem, suffix),
    };

    destination.with_file_name(file_name)
}

/// Number of trailing stderr lines kept in error messages
const STDERR_TAIL_LINES: usize = 20;

/// Human-readable tail of an external tool's stderr
///
/// Progress-heavy tools print a lot; the cause of a failure is at the end.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

//! Error types for video-archiver
//!
//! This module provides the error taxonomy for the acquisition orchestrator:
//! - Domain-specific error types (fetch, finalize, database)
//! - Machine-readable error codes for logs and notifications
//! - Process exit codes for the command line front end
//!
//! A reservation conflict is deliberately absent: another process owning a URL
//! is a normal outcome ([`crate::types::DownloadOutcome::InProgressElsewhere`]),
//! not a failure.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for video-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for video-archiver
///
/// Each variant carries enough context to build a human-readable summary
/// (title + reason) for the user notification sink.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "library.videos_dir")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// No metadata source could classify or describe the link
    #[error("cannot resolve {url}: {reason}")]
    UnresolvableUrl {
        /// The URL that could not be resolved
        url: String,
        /// Why every metadata source failed
        reason: String,
    },

    /// Acquisition failure (network or download tool)
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Post-processing failure (tagging, remuxing, stream discovery)
    #[error("finalize error: {0}")]
    Finalize(#[from] FinalizeError),

    /// The operation was interrupted by the user
    #[error("cancelled")]
    Cancelled,

    /// Invalid command line arguments or input list
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool could not be located or spawned (yt-dlp, ffmpeg, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Acquisition errors raised while bytes are being fetched into the temp path
#[derive(Debug, Error)]
pub enum FetchError {
    /// The download tool ran but exited unsuccessfully
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        /// Tool name (e.g., "yt-dlp")
        tool: String,
        /// Exit status description
        status: String,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// The tool reported success but produced no file
    #[error("no output produced at {}", .path.display())]
    MissingOutput {
        /// The expected output path
        path: PathBuf,
    },

    /// The lecture-capture player service rejected the request
    #[error("player service returned HTTP {status} for {url}")]
    PlayerService {
        /// Page URL being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The URL does not carry the resource id the site needs
    #[error("cannot extract resource id from {url}")]
    MissingResourceId {
        /// The offending URL
        url: String,
    },
}

/// Finalize errors raised while embedding metadata or locating the stream
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// The media tool ran but exited unsuccessfully
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        /// Tool name (e.g., "ffmpeg")
        tool: String,
        /// Exit status description
        status: String,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// Player configuration contained no streamable manifest (usually an expired session)
    #[error("no stream found for {url}; is the browser session still signed in?")]
    NoStreamFound {
        /// Page URL being fetched
        url: String,
    },

    /// The destination path has no parent directory
    #[error("invalid destination {}", .path.display())]
    InvalidDestination {
        /// The offending path
        path: PathBuf,
    },
}

impl Error {
    /// Build an [`Error::UnresolvableUrl`]
    pub fn unresolvable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnresolvableUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a user interruption
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Get the machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::UnresolvableUrl { .. } => "unresolvable_url",
            Error::Fetch(e) => match e {
                FetchError::ToolFailed { .. } => "fetch_tool_failed",
                FetchError::MissingOutput { .. } => "fetch_missing_output",
                FetchError::PlayerService { .. } => "player_service_error",
                FetchError::MissingResourceId { .. } => "missing_resource_id",
            },
            Error::Finalize(e) => match e {
                FinalizeError::ToolFailed { .. } => "finalize_tool_failed",
                FinalizeError::NoStreamFound { .. } => "no_stream_found",
                FinalizeError::InvalidDestination { .. } => "invalid_destination",
            },
            Error::Cancelled => "cancelled",
            Error::InvalidArguments(_) => "invalid_arguments",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "internal_error",
        }
    }

    /// Process exit code for the command line front end
    ///
    /// 130 mirrors the shell convention for SIGINT; every other failure is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled => 130,
            _ => 1,
        }
    }
}

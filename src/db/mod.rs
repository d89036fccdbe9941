//! Database layer for video-archiver
//!
//! Handles SQLite persistence for the library catalog and the reservation ledger.
//! One [`Database`] is opened per process invocation and passed explicitly to
//! every component that needs it; nothing reaches the pool any other way.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by table:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`videos`]: Completed downloads (`videos`)
//! - [`reservations`]: In-flight downloads (`downloads_in_progress`)
//!
//! Every mutation is its own implicit transaction. A crash between inserting a
//! catalog row and clearing a reservation leaves a redundant reservation that
//! the staleness sweep reclaims.

use crate::types::{CatalogEntry, Metadata, ProcessFingerprint, Reservation};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod migrations;
mod reservations;
mod videos;

/// Catalog record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct VideoRow {
    /// Source URL (unique key)
    pub url: String,
    /// Path of the finished file (unique)
    pub path: String,
    /// Video title
    pub title: String,
    /// Channel or feed name
    pub artist: String,
}

impl From<VideoRow> for CatalogEntry {
    fn from(row: VideoRow) -> Self {
        CatalogEntry {
            path: PathBuf::from(row.path),
            metadata: Metadata {
                url: row.url,
                title: row.title,
                artist: row.artist,
            },
        }
    }
}

/// Reservation record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct ReservationRow {
    /// Source URL (primary key)
    pub url: String,
    /// Video title
    pub title: String,
    /// Channel or feed name
    pub artist: String,
    /// Owning process id
    pub pid: i64,
    /// Owning process creation time, seconds since the Unix epoch
    pub start_time: f64,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        // Rows are only ever written from a u32 pid; anything else is foreign
        // and maps to a pid no process has, so the sweep reclaims it
        let pid = u32::try_from(row.pid).unwrap_or_else(|_| {
            tracing::warn!(url = %row.url, pid = row.pid, "reservation has an invalid pid");
            u32::MAX
        });
        Reservation {
            metadata: Metadata {
                url: row.url,
                title: row.title,
                artist: row.artist,
            },
            owner: ProcessFingerprint {
                pid,
                start_time: row.start_time,
            },
        }
    }
}

/// Database handle for video-archiver
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

//! Reservation ledger CRUD operations (`downloads_in_progress` table).
//!
//! Liveness policy lives in [`crate::ledger`]; this layer only stores rows.

use crate::error::DatabaseError;
use crate::types::{Metadata, ProcessFingerprint};
use crate::{Error, Result};

use super::{Database, ReservationRow};

impl Database {
    /// Insert a reservation unless one already exists for the URL
    ///
    /// This is a single constraint-checked statement: when two processes race,
    /// exactly one insert changes a row. Returns `true` for the winner.
    pub async fn insert_reservation(
        &self,
        metadata: &Metadata,
        owner: ProcessFingerprint,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO downloads_in_progress (url, title, artist, pid, start_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(&metadata.url)
        .bind(&metadata.title)
        .bind(&metadata.artist)
        .bind(i64::from(owner.pid))
        .bind(owner.start_time)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert reservation: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Get the reservation for a URL
    pub async fn get_reservation(&self, url: &str) -> Result<Option<ReservationRow>> {
        let row = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT url, title, artist, pid, start_time
            FROM downloads_in_progress
            WHERE url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get reservation: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all reservations
    pub async fn list_reservations(&self) -> Result<Vec<ReservationRow>> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT url, title, artist, pid, start_time
            FROM downloads_in_progress
            ORDER BY url ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list reservations: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete the reservation for a URL unconditionally
    pub async fn delete_reservation(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads_in_progress WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete reservation: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a reservation only if it still belongs to the given owner
    ///
    /// Used by the staleness sweep so that a row re-reserved by a live process
    /// between the read and the delete is left alone.
    pub async fn delete_reservation_owned_by(
        &self,
        url: &str,
        owner: ProcessFingerprint,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM downloads_in_progress WHERE url = ? AND pid = ? AND start_time = ?",
        )
        .bind(url)
        .bind(i64::from(owner.pid))
        .bind(owner.start_time)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to delete stale reservation: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }
}

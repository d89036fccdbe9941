//! Reservation ledger
//!
//! Cross-process claim table for in-flight downloads. Every reservation row
//! carries its owner's [`ProcessFingerprint`]; rows whose owner is no longer
//! running are reclaimed by [`ReservationLedger::remove_stale_entries`], which
//! runs before every reserve and lookup.
//!
//! Exclusion comes from the `url` primary key of `downloads_in_progress`: the
//! insert is a single constraint-checked statement, so of several processes
//! racing for the same URL exactly one wins.

use crate::db::Database;
use crate::process::ProcessProbe;
use crate::types::{Metadata, ProcessFingerprint, Reservation};
use crate::Result;
use std::sync::Arc;

/// Reservation ledger bound to one owning process
pub struct ReservationLedger {
    db: Arc<Database>,
    probe: Arc<dyn ProcessProbe>,
    owner: ProcessFingerprint,
}

impl ReservationLedger {
    /// Create a ledger whose reservations are owned by `owner`
    pub fn new(db: Arc<Database>, probe: Arc<dyn ProcessProbe>, owner: ProcessFingerprint) -> Self {
        Self { db, probe, owner }
    }

    /// Fingerprint written into reservations made through this ledger
    pub fn owner(&self) -> ProcessFingerprint {
        self.owner
    }

    /// Delete every reservation whose owning process is gone
    ///
    /// A row counts as stale when no process has the stored pid, or when the
    /// process holding that pid was created at a different time (pid reuse).
    /// Returns the number of rows removed.
    pub async fn remove_stale_entries(&self) -> Result<usize> {
        let mut removed = 0;

        for row in self.db.list_reservations().await? {
            let reservation = Reservation::from(row);
            if self.probe.is_alive(reservation.owner) {
                continue;
            }

            // Only delete the exact row we judged stale; a live process may
            // have re-reserved the URL since we read it.
            if self
                .db
                .delete_reservation_owned_by(&reservation.metadata.url, reservation.owner)
                .await?
            {
                tracing::info!(
                    url = %reservation.metadata.url,
                    pid = reservation.owner.pid,
                    start_time = reservation.owner.start_time,
                    "reclaimed stale reservation"
                );
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Claim `metadata.url` for this process
    ///
    /// Returns `false` without side effects when a live reservation already
    /// exists for the URL.
    pub async fn try_reserve(&self, metadata: &Metadata) -> Result<bool> {
        self.remove_stale_entries().await?;

        let reserved = self.db.insert_reservation(metadata, self.owner).await?;
        if reserved {
            tracing::debug!(url = %metadata.url, pid = self.owner.pid, "reserved");
        } else {
            tracing::debug!(url = %metadata.url, "already reserved by another process");
        }

        Ok(reserved)
    }

    /// Release the reservation for `url` unconditionally
    pub async fn clear(&self, url: &str) -> Result<()> {
        if self.db.delete_reservation(url).await? {
            tracing::debug!(url = %url, "reservation cleared");
        }
        Ok(())
    }

    /// Whether a live reservation exists for `url`
    pub async fn is_reserved(&self, url: &str) -> Result<bool> {
        self.remove_stale_entries().await?;
        Ok(self.db.get_reservation(url).await?.is_some())
    }

    /// Current reservation for `url`, after sweeping stale rows
    pub async fn get(&self, url: &str) -> Result<Option<Reservation>> {
        self.remove_stale_entries().await?;
        Ok(self.db.get_reservation(url).await?.map(Reservation::from))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeProcessProbe;
    use tempfile::NamedTempFile;

    fn fingerprint(pid: u32, start_time: f64) -> ProcessFingerprint {
        ProcessFingerprint { pid, start_time }
    }

    async fn setup() -> (Arc<Database>, Arc<FakeProcessProbe>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
        (db, Arc::new(FakeProcessProbe::new()), temp_file)
    }

    #[tokio::test]
    async fn test_second_process_cannot_reserve_until_cleared() {
        let (db, probe, _temp) = setup().await;
        probe.spawn(100, 1000.0);
        probe.spawn(200, 2000.0);

        let first = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(100, 1000.0));
        let second = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(200, 2000.0));
        let meta = Metadata::new("https://example.com/v/1", "One", "Chan");

        assert!(first.try_reserve(&meta).await.unwrap());
        assert!(!second.try_reserve(&meta).await.unwrap());
        assert!(!second.try_reserve(&meta).await.unwrap());

        first.clear(&meta.url).await.unwrap();
        assert!(second.try_reserve(&meta).await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_owner_is_reclaimed() {
        let (db, probe, _temp) = setup().await;
        probe.spawn(100, 1000.0);
        probe.spawn(200, 2000.0);

        let first = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(100, 1000.0));
        let second = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(200, 2000.0));
        let meta = Metadata::new("https://example.com/v/1", "One", "Chan");

        assert!(first.try_reserve(&meta).await.unwrap());
        probe.kill(100);

        assert!(second.try_reserve(&meta).await.unwrap());
        let owner = second.get(&meta.url).await.unwrap().unwrap().owner;
        assert_eq!(owner, fingerprint(200, 2000.0));
    }

    #[tokio::test]
    async fn test_recycled_pid_is_reclaimed() {
        let (db, probe, _temp) = setup().await;
        probe.spawn(100, 1000.0);
        probe.spawn(200, 2000.0);

        let crashed = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(100, 1000.0));
        let meta = Metadata::new("https://example.com/v/1", "One", "Chan");
        assert!(crashed.try_reserve(&meta).await.unwrap());

        // The owner died and its pid went to an unrelated, newer process
        probe.kill(100);
        probe.spawn(100, 9000.0);

        let other = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(200, 2000.0));
        assert!(!other.is_reserved(&meta.url).await.unwrap());
        assert!(other.try_reserve(&meta).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_rows() {
        let (db, probe, _temp) = setup().await;
        probe.spawn(100, 1000.0);
        probe.spawn(200, 2000.0);

        let live = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(100, 1000.0));
        let dying = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(200, 2000.0));

        live.try_reserve(&Metadata::new("https://a", "A", "C"))
            .await
            .unwrap();
        dying
            .try_reserve(&Metadata::new("https://b", "B", "C"))
            .await
            .unwrap();
        probe.kill(200);

        assert_eq!(live.remove_stale_entries().await.unwrap(), 1);
        assert!(live.is_reserved("https://a").await.unwrap());
        assert!(!live.is_reserved("https://b").await.unwrap());
        assert_eq!(live.remove_stale_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_missing_reservation_is_ok() {
        let (db, probe, _temp) = setup().await;
        probe.spawn(100, 1000.0);
        let ledger = ReservationLedger::new(db, probe, fingerprint(100, 1000.0));

        ledger.clear("https://never-reserved").await.unwrap();
    }

    #[tokio::test]
    async fn test_start_time_within_tolerance_is_same_owner() {
        let (db, probe, _temp) = setup().await;
        probe.spawn(100, 1000.4);
        probe.spawn(200, 2000.0);

        // Written with a slightly different reading of the same process
        let first = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(100, 1000.0));
        let second = ReservationLedger::new(db.clone(), probe.clone(), fingerprint(200, 2000.0));
        let meta = Metadata::new("https://a", "A", "C");

        assert!(first.try_reserve(&meta).await.unwrap());
        assert!(!second.try_reserve(&meta).await.unwrap());
    }
}

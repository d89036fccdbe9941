use crate::db::*;
use crate::types::{Metadata, ProcessFingerprint, Reservation};
use tempfile::NamedTempFile;

fn owner(pid: u32) -> ProcessFingerprint {
    ProcessFingerprint {
        pid,
        start_time: 1_700_000_000.25,
    }
}

#[tokio::test]
async fn test_insert_reservation_first_wins() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let meta = Metadata::new("https://a", "A", "Chan");
    assert!(db.insert_reservation(&meta, owner(100)).await.unwrap());
    assert!(
        !db.insert_reservation(&meta, owner(200)).await.unwrap(),
        "second insert for the same URL must be a no-op"
    );

    let row = db.get_reservation("https://a").await.unwrap().unwrap();
    assert_eq!(row.pid, 100, "loser must not overwrite the winner");

    let reservation = Reservation::from(row);
    assert_eq!(reservation.owner, owner(100));
    assert_eq!(reservation.metadata, meta);

    db.close().await;
}

#[tokio::test]
async fn test_concurrent_inserts_have_one_winner() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = std::sync::Arc::new(Database::new(temp_file.path()).await.unwrap());

    let mut handles = Vec::new();
    for pid in 1..=8u32 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let meta = Metadata::new("https://race", "Race", "Chan");
            db.insert_reservation(&meta, owner(pid)).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(db.list_reservations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_reservation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let meta = Metadata::new("https://a", "A", "Chan");
    db.insert_reservation(&meta, owner(1)).await.unwrap();

    assert!(db.delete_reservation("https://a").await.unwrap());
    assert!(!db.delete_reservation("https://a").await.unwrap());
    assert!(db.insert_reservation(&meta, owner(2)).await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_delete_owned_by_ignores_other_owner() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let meta = Metadata::new("https://a", "A", "Chan");
    db.insert_reservation(&meta, owner(1)).await.unwrap();

    assert!(
        !db.delete_reservation_owned_by("https://a", owner(2))
            .await
            .unwrap()
    );
    assert!(db.get_reservation("https://a").await.unwrap().is_some());

    assert!(
        db.delete_reservation_owned_by("https://a", owner(1))
            .await
            .unwrap()
    );
    assert!(db.get_reservation("https://a").await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_start_time_round_trips_exactly() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let fingerprint = ProcessFingerprint {
        pid: 4242,
        start_time: 1_712_345_678.73,
    };
    db.insert_reservation(&Metadata::new("https://a", "A", "Chan"), fingerprint)
        .await
        .unwrap();

    let row = db.get_reservation("https://a").await.unwrap().unwrap();
    assert_eq!(row.start_time, fingerprint.start_time);

    db.close().await;
}

#[tokio::test]
async fn test_row_with_invalid_pid_maps_to_unused_pid() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    sqlx::query(
        "INSERT INTO downloads_in_progress (url, title, artist, pid, start_time) VALUES (?, ?, ?, ?, ?)",
    )
    .bind("https://a")
    .bind("A")
    .bind("Chan")
    .bind(-5_i64)
    .bind(1_700_000_000.0_f64)
    .execute(db.pool())
    .await
    .unwrap();

    let reservation = Reservation::from(db.get_reservation("https://a").await.unwrap().unwrap());
    assert_eq!(reservation.owner.pid, u32::MAX);
    assert_eq!(reservation.metadata.url, "https://a");

    db.close().await;
}

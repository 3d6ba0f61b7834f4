//! SQLite-backed download ledger
//!
//! One row per issued token. The consumed flag is flipped with a single
//! conditional `UPDATE`, so concurrent requests for the same token can never
//! both claim it.

use crate::error::{Result, StemdropError};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stemdrop_types::{Consumption, DownloadRecord};

/// Handle to the download ledger. Cheap to clone; clones share the pool.
#[derive(Clone, Debug)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (and create if missing) the ledger database
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StemdropError::StorageUnavailable(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| StemdropError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                token TEXT PRIMARY KEY NOT NULL,
                song_path TEXT NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                consumed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_downloads_created ON downloads(created_at);
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StemdropError::StorageUnavailable(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Download ledger opened");

        Ok(Self { pool })
    }

    /// Register a new, unconsumed token for an archive
    pub async fn create(&self, song_path: &Path, token: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO downloads (token, song_path, consumed, created_at) VALUES (?, ?, 0, ?)",
        )
        .bind(token)
        .bind(song_path.to_string_lossy().to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StemdropError::from_write)?;

        Ok(())
    }

    /// Archive path for an unconsumed token.
    ///
    /// Unknown and consumed tokens both return `None`.
    pub async fn lookup(&self, token: &str) -> Result<Option<PathBuf>> {
        let row = sqlx::query("SELECT song_path FROM downloads WHERE token = ? AND consumed = 0")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(StemdropError::from_read)?;

        Ok(row.map(|row| PathBuf::from(row.get::<String, _>("song_path"))))
    }

    /// Flip the consumed flag.
    ///
    /// Exactly one caller observes `Claimed` for a given token. A failed write
    /// leaves the token unconsumed and is returned as an error.
    pub async fn mark_consumed(&self, token: &str) -> Result<Consumption> {
        let result = sqlx::query(
            "UPDATE downloads SET consumed = 1, consumed_at = ? WHERE token = ? AND consumed = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(StemdropError::from_write)?;

        if result.rows_affected() == 1 {
            Ok(Consumption::Claimed)
        } else {
            Ok(Consumption::AlreadyConsumed)
        }
    }

    /// Full record for a token, consumed or not
    pub async fn record(&self, token: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(StemdropError::from_read)?;

        row.map(row_to_record).transpose()
    }

    /// All records, newest first
    pub async fn records(&self) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(StemdropError::from_read)?;

        rows.into_iter().map(row_to_record).collect()
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_record(row: SqliteRow) -> Result<DownloadRecord> {
    let parse_time = |s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StemdropError::StorageUnavailable(format!("corrupt timestamp: {}", e)))
    };

    Ok(DownloadRecord {
        token: row.get("token"),
        song_path: PathBuf::from(row.get::<String, _>("song_path")),
        consumed: row.get::<i64, _>("consumed") != 0,
        created_at: parse_time(row.get::<String, _>("created_at").as_str())?,
        consumed_at: row
            .get::<Option<String>, _>("consumed_at")
            .map(|s| parse_time(&s))
            .transpose()?,
    })
}

/// Make every `UPDATE` on the ledger fail, as a full disk or read-only
/// mount would.
#[cfg(test)]
pub(crate) async fn inject_write_fault(ledger: &Ledger) {
    sqlx::query(
        "CREATE TRIGGER fail_updates BEFORE UPDATE ON downloads BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    )
    .execute(ledger.pool())
    .await
    .unwrap();
}

#[cfg(test)]
pub(crate) async fn clear_write_fault(ledger: &Ledger) {
    sqlx::query("DROP TRIGGER fail_updates")
        .execute(ledger.pool())
        .await
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn open_temp() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("db").join("stemdrop.db"))
            .await
            .unwrap();
        (dir, ledger)
    }

    #[tokio::test]
    async fn test_unknown_token_is_absent() {
        let (_dir, ledger) = open_temp().await;
        assert_eq!(ledger.lookup("never-issued").await.unwrap(), None);
        assert_eq!(
            ledger.mark_consumed("never-issued").await.unwrap(),
            Consumption::AlreadyConsumed
        );
        assert!(ledger.record("never-issued").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consumed_token_is_absent_but_retained() {
        let (_dir, ledger) = open_temp().await;
        ledger.create(Path::new("downloads/song1.zip"), "tok").await.unwrap();

        assert_eq!(
            ledger.lookup("tok").await.unwrap(),
            Some(PathBuf::from("downloads/song1.zip"))
        );
        assert_eq!(ledger.mark_consumed("tok").await.unwrap(), Consumption::Claimed);
        assert_eq!(ledger.lookup("tok").await.unwrap(), None);
        assert_eq!(
            ledger.mark_consumed("tok").await.unwrap(),
            Consumption::AlreadyConsumed
        );

        let record = ledger.record("tok").await.unwrap().unwrap();
        assert!(record.consumed);
        assert!(record.consumed_at.is_some());
        assert_eq!(record.file_name(), "song1.zip");
    }

    #[tokio::test]
    async fn test_duplicate_token_is_write_failure() {
        let (_dir, ledger) = open_temp().await;
        ledger.create(Path::new("a.zip"), "dup").await.unwrap();
        let err = ledger.create(Path::new("b.zip"), "dup").await.unwrap_err();
        assert!(matches!(err, StemdropError::WriteFailure(_)));

        assert_eq!(ledger.lookup("dup").await.unwrap(), Some(PathBuf::from("a.zip")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_single_claim() {
        let (_dir, ledger) = open_temp().await;
        ledger.create(Path::new("race.zip"), "race").await.unwrap();

        let ledger = Arc::new(ledger);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.mark_consumed("race").await.unwrap() })
            })
            .collect();

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_claimed() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_write_fault_leaves_token_unconsumed() {
        let (_dir, ledger) = open_temp().await;
        ledger.create(Path::new("keep.zip"), "keep").await.unwrap();

        inject_write_fault(&ledger).await;
        let err = ledger.mark_consumed("keep").await.unwrap_err();
        assert!(matches!(err, StemdropError::WriteFailure(_)));
        assert!(ledger.lookup("keep").await.unwrap().is_some());

        clear_write_fault(&ledger).await;
        assert_eq!(ledger.mark_consumed("keep").await.unwrap(), Consumption::Claimed);
    }

    #[tokio::test]
    async fn test_records_newest_first() {
        let (_dir, ledger) = open_temp().await;
        ledger.create(Path::new("old.zip"), "old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        ledger.create(Path::new("new.zip"), "new").await.unwrap();

        let tokens: Vec<_> = ledger
            .records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.token)
            .collect();
        assert_eq!(tokens, vec!["new".to_string(), "old".to_string()]);
    }
}

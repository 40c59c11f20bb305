//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding crawl jobs,
//! extraction results, brand snapshots, onboarding runs, and content drafts.
//!
//! **Access rules:**
//! - Every externally reachable read takes an explicit `brand_id`.
//! - Crawl job transitions are crate-private; callers go through [`JobStore`].
//! - Onboarding writes on a superseded run affect zero rows and return `false`.

mod crawl_jobs;
mod extraction;
pub mod jobs;
mod migrations;
mod onboarding;

use std::path::Path;
use std::time::Duration;

use brandpipe_shared::{BrandPipeError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};

pub use jobs::JobStore;

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BrandPipeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// A fresh connection for multi-statement transactions, so they never
    /// interleave with statements issued on the shared connection.
    pub(crate) fn tx_conn(&self) -> Result<Connection> {
        let conn = self.db.connect().map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        Ok(conn)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BrandPipeError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) fn db_err(e: libsql::Error) -> BrandPipeError {
    BrandPipeError::Storage(e.to_string())
}

/// Fixed-width RFC 3339 (microseconds, `Z`), so stored timestamps sort as text.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BrandPipeError::Storage(format!("invalid date '{s}': {e}")))
}

pub(crate) fn col_str(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(db_err)
}

pub(crate) fn col_opt_str(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

pub(crate) fn col_u32(row: &libsql::Row, idx: i32) -> Result<u32> {
    row.get::<u32>(idx).map_err(db_err)
}

pub(crate) fn col_ts(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    parse_ts(&col_str(row, idx)?)
}

pub(crate) fn col_opt_ts(row: &libsql::Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    col_opt_str(row, idx).map(|s| parse_ts(&s)).transpose()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| BrandPipeError::Storage(e.to_string()))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| BrandPipeError::Storage(format!("corrupt json: {e}")))
}


#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_support::test_storage().await;
        assert_eq!(storage.schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("bp_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.schema_version().await, 2);
    }

    #[test]
    fn timestamps_sort_as_text() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T09:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(ts(early) < ts(late));
        assert_eq!(ts(late).len(), ts(early).len());
        assert_eq!(parse_ts(&ts(early)).unwrap(), early);
    }
}

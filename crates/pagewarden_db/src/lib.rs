//! Unified database layer for Pagewarden.
//!
//! All persistence goes through [`WardenDb`]: the checkpoint store, the
//! append-only event log, severity counters, access audit rows, and the
//! reporting aggregates. No other crate issues SQL.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pagewarden_db::WardenDb;
//!
//! let db = WardenDb::open("~/.pagewarden/pagewarden.sqlite3").await?;
//! let checkpoint = db.find_checkpoint(&scan_id, &partition).await?;
//! ```

mod audit;
mod checkpoint;
mod counters;
mod error;
mod event_log;
mod reporting;
mod schema;

pub use audit::AuditRow;
pub use counters::CounterRow;
pub use error::{DbError, Result};
pub use event_log::StoredEvent;
pub use reporting::{LatestScan, PartitionReport, PartitionSummary};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Unified database handle. Cheap to clone; all methods take `&self`.
#[derive(Clone)]
pub struct WardenDb {
    pool: SqlitePool,
}

impl WardenDb {
    /// Open or create a database at the given path. Creates all tables.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let db = Self::connect(options).await?;
        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open a private in-memory database. Used by tests and demo mode.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // A single connection serializes writers, which is what gives the
        // event log its gapless per-scan sequence numbers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

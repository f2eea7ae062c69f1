//! Database schema creation for all Pagewarden tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::WardenDb;
use tracing::debug;

impl WardenDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(self.pool())
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(self.pool())
            .await?;

        // Checkpoints: authoritative progress/status per (scan, partition)
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS pw_scan_checkpoint (
                scan_id TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                last_unit_id TEXT,
                last_attachment TEXT,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scan_id, partition_key)
            )"#,
        )
        .execute(self.pool())
        .await?;

        // Event log: append-only, gapless seq per scan
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS pw_scan_event (
                scan_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                partition_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                unit_id TEXT,
                unit_title TEXT,
                attachment_name TEXT,
                attachment_kind TEXT,
                payload_enc TEXT,
                error TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (scan_id, seq)
            )"#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_scan_event_partition
             ON pw_scan_event(partition_key, scan_id)",
        )
        .execute(self.pool())
        .await?;

        // Severity counters: increment-only per (scan, partition)
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS pw_severity_counters (
                scan_id TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                critical INTEGER NOT NULL DEFAULT 0,
                moderate INTEGER NOT NULL DEFAULT 0,
                low INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (scan_id, partition_key)
            )"#,
        )
        .execute(self.pool())
        .await?;

        // Access audit: one row per decrypt-for-display of a unit's findings
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS pw_access_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                unit_id TEXT,
                purpose TEXT NOT NULL,
                findings_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(self.pool())
        .await?;

        debug!("Database schema verified");
        Ok(())
    }
}

//! Checkpoint store: the status state machine and merge-on-write persistence.

use crate::error::{DbError, Result};
use crate::{now_millis, WardenDb};
use pagewarden_protocol::{CheckpointRecord, PartitionKey, ScanId, ScanStatus};
use sqlx::Row;
use tracing::debug;

impl WardenDb {
    /// Persist a checkpoint write, subject to the state-machine guard.
    ///
    /// When the stored status is terminal the write is a silent no-op: no
    /// statement is issued, so a late-arriving event from a race cannot
    /// resurrect a finished partition. Incoming `None` values for the
    /// last-processed fields preserve stored values (merge, not overwrite).
    /// Returns whether the write was applied.
    pub async fn persist_checkpoint(&self, record: &CheckpointRecord) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let existing = sqlx::query(
            "SELECT status FROM pw_scan_checkpoint WHERE scan_id = ? AND partition_key = ?",
        )
        .bind(record.scan_id.as_str())
        .bind(record.partition_key.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let stored: String = row.get("status");
            let stored: ScanStatus = stored
                .parse()
                .map_err(|e: pagewarden_protocol::UnknownLabel| DbError::corrupt(e.to_string()))?;
            if !stored.accepts(record.status) {
                tx.rollback().await?;
                debug!(
                    scan_id = %record.scan_id,
                    partition = %record.partition_key,
                    stored = %stored,
                    incoming = %record.status,
                    "Checkpoint write rejected: terminal status is immutable"
                );
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO pw_scan_checkpoint
                (scan_id, partition_key, last_unit_id, last_attachment, status, progress, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scan_id, partition_key) DO UPDATE SET
                last_unit_id = COALESCE(excluded.last_unit_id, last_unit_id),
                last_attachment = COALESCE(excluded.last_attachment, last_attachment),
                status = excluded.status,
                progress = MAX(progress, excluded.progress),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.scan_id.as_str())
        .bind(record.partition_key.as_str())
        .bind(record.last_unit_id.as_deref())
        .bind(record.last_attachment.as_deref())
        .bind(record.status.as_str())
        .bind(record.progress)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Look up the checkpoint for one (scan, partition) pair.
    pub async fn find_checkpoint(
        &self,
        scan_id: &ScanId,
        partition_key: &PartitionKey,
    ) -> Result<Option<CheckpointRecord>> {
        let row = sqlx::query(
            "SELECT * FROM pw_scan_checkpoint WHERE scan_id = ? AND partition_key = ?",
        )
        .bind(scan_id.as_str())
        .bind(partition_key.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| row_to_checkpoint(&row)).transpose()
    }

    /// All checkpoints of one scan, ordered by partition key.
    pub async fn checkpoints_by_scan(&self, scan_id: &ScanId) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM pw_scan_checkpoint WHERE scan_id = ? ORDER BY partition_key ASC",
        )
        .bind(scan_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_checkpoint).collect()
    }

    /// Every scan's checkpoint for one partition, ordered by scan id.
    pub async fn checkpoints_by_partition(
        &self,
        partition_key: &PartitionKey,
    ) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM pw_scan_checkpoint WHERE partition_key = ? ORDER BY scan_id ASC",
        )
        .bind(partition_key.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_checkpoint).collect()
    }

    /// Delete every row belonging to a scan: checkpoints, log, counters.
    /// Audit rows are kept; they have their own retention window.
    pub async fn purge_scan(&self, scan_id: &ScanId) -> Result<u64> {
        let mut deleted = 0u64;
        for table in [
            "pw_scan_checkpoint",
            "pw_scan_event",
            "pw_severity_counters",
        ] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE scan_id = ?", table))
                .bind(scan_id.as_str())
                .execute(self.pool())
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<CheckpointRecord> {
    let status: String = row.get("status");
    Ok(CheckpointRecord {
        scan_id: ScanId(row.get("scan_id")),
        partition_key: PartitionKey(row.get("partition_key")),
        last_unit_id: row.get("last_unit_id"),
        last_attachment: row.get("last_attachment"),
        status: status
            .parse()
            .map_err(|e: pagewarden_protocol::UnknownLabel| DbError::corrupt(e.to_string()))?,
        progress: row.get("progress"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        scan: &str,
        partition: &str,
        status: ScanStatus,
        unit: Option<&str>,
        progress: i64,
    ) -> CheckpointRecord {
        let mut rec = CheckpointRecord::new(scan.into(), partition.into(), status);
        rec.last_unit_id = unit.map(String::from);
        rec.progress = progress;
        rec
    }

    #[tokio::test]
    async fn bootstrap_write_is_accepted() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let applied = db
            .persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, Some("p1"), 10))
            .await
            .unwrap();
        assert!(applied);

        let found = db
            .find_checkpoint(&"s1".into(), &"SPACE".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, ScanStatus::Running);
        assert_eq!(found.last_unit_id.as_deref(), Some("p1"));
        assert_eq!(found.progress, 10);
    }

    #[tokio::test]
    async fn terminal_status_is_immutable() {
        let db = WardenDb::open_in_memory().await.unwrap();
        db.persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, Some("p1"), 50))
            .await
            .unwrap();
        db.persist_checkpoint(&record("s1", "SPACE", ScanStatus::Completed, Some("p2"), 100))
            .await
            .unwrap();

        // Late event from a race: must not resurrect the partition.
        let applied = db
            .persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, Some("p3"), 60))
            .await
            .unwrap();
        assert!(!applied);

        let found = db
            .find_checkpoint(&"s1".into(), &"SPACE".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, ScanStatus::Completed);
        assert_eq!(found.last_unit_id.as_deref(), Some("p2"));
        assert_eq!(found.progress, 100);
    }

    #[tokio::test]
    async fn null_fields_merge_instead_of_overwriting() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let mut first = record("s1", "SPACE", ScanStatus::Running, Some("p1"), 20);
        first.last_attachment = Some("report.pdf".to_string());
        db.persist_checkpoint(&first).await.unwrap();

        // Unit-level event carries no attachment name.
        db.persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, None, 40))
            .await
            .unwrap();

        let found = db
            .find_checkpoint(&"s1".into(), &"SPACE".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.last_unit_id.as_deref(), Some("p1"));
        assert_eq!(found.last_attachment.as_deref(), Some("report.pdf"));
        assert_eq!(found.progress, 40);
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let db = WardenDb::open_in_memory().await.unwrap();
        db.persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, None, 60))
            .await
            .unwrap();

        // Out-of-order write with stale progress: accepted, but the stored
        // value stays at the high-water mark.
        db.persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, Some("p2"), 40))
            .await
            .unwrap();

        let found = db
            .find_checkpoint(&"s1".into(), &"SPACE".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.progress, 60);
        assert_eq!(found.last_unit_id.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn pause_then_resume_transitions() {
        let db = WardenDb::open_in_memory().await.unwrap();
        db.persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, Some("p1"), 30))
            .await
            .unwrap();
        assert!(db
            .persist_checkpoint(&record("s1", "SPACE", ScanStatus::Paused, None, 30))
            .await
            .unwrap());
        assert!(db
            .persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, None, 30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn listings_are_ordered() {
        let db = WardenDb::open_in_memory().await.unwrap();
        for partition in ["ZETA", "ALPHA", "MID"] {
            db.persist_checkpoint(&record("s1", partition, ScanStatus::Running, None, 0))
                .await
                .unwrap();
        }
        let list = db.checkpoints_by_scan(&"s1".into()).await.unwrap();
        let keys: Vec<_> = list.iter().map(|c| c.partition_key.as_str()).collect();
        assert_eq!(keys, vec!["ALPHA", "MID", "ZETA"]);
    }

    #[tokio::test]
    async fn purge_removes_scan_rows() {
        let db = WardenDb::open_in_memory().await.unwrap();
        db.persist_checkpoint(&record("s1", "SPACE", ScanStatus::Running, None, 0))
            .await
            .unwrap();
        let deleted = db.purge_scan(&"s1".into()).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(db
            .find_checkpoint(&"s1".into(), &"SPACE".into())
            .await
            .unwrap()
            .is_none());
    }
}

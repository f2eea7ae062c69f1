//! Access audit: one row per decrypt-for-display of a unit's findings.

use crate::error::Result;
use crate::{now_millis, WardenDb};
use pagewarden_protocol::{PartitionKey, ScanId};
use sqlx::Row;

/// Stored audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub id: i64,
    pub scan_id: ScanId,
    pub partition_key: PartitionKey,
    pub unit_id: Option<String>,
    pub purpose: String,
    pub findings_count: i64,
    pub created_at: i64,
}

impl WardenDb {
    /// Record one reveal of raw findings.
    pub async fn record_access(
        &self,
        scan_id: &ScanId,
        partition_key: &PartitionKey,
        unit_id: Option<&str>,
        purpose: &str,
        findings_count: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO pw_access_audit
                (scan_id, partition_key, unit_id, purpose, findings_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(scan_id.as_str())
        .bind(partition_key.as_str())
        .bind(unit_id)
        .bind(purpose)
        .bind(findings_count)
        .bind(now_millis())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Audit rows for one scan, newest first.
    pub async fn list_access(&self, scan_id: &ScanId, limit: i64) -> Result<Vec<AuditRow>> {
        let rows = sqlx::query(
            "SELECT * FROM pw_access_audit WHERE scan_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(scan_id.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| AuditRow {
                id: row.get("id"),
                scan_id: ScanId(row.get("scan_id")),
                partition_key: PartitionKey(row.get("partition_key")),
                unit_id: row.get("unit_id"),
                purpose: row.get("purpose"),
                findings_count: row.get("findings_count"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Delete audit rows older than the retention cutoff (unix ms).
    /// Returns the number of rows removed.
    pub async fn purge_access_before(&self, cutoff_millis: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pw_access_audit WHERE created_at < ?")
            .bind(cutoff_millis)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_lists() {
        let db = WardenDb::open_in_memory().await.unwrap();
        db.record_access(&"s1".into(), &"SPACE".into(), Some("p1"), "review", 3)
            .await
            .unwrap();
        db.record_access(&"s1".into(), &"SPACE".into(), Some("p2"), "export", 1)
            .await
            .unwrap();

        let rows = db.list_access(&"s1".into(), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].unit_id.as_deref(), Some("p2"));
        assert_eq!(rows[1].purpose, "review");
        assert_eq!(rows[1].findings_count, 3);
    }

    #[tokio::test]
    async fn retention_purge() {
        let db = WardenDb::open_in_memory().await.unwrap();
        db.record_access(&"s1".into(), &"SPACE".into(), None, "review", 1)
            .await
            .unwrap();
        let removed = db
            .purge_access_before(now_millis() + 1_000)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(db.list_access(&"s1".into(), 10).await.unwrap().is_empty());
    }
}

//! Severity counters: increment-only rollups per (scan, partition).

use crate::error::Result;
use crate::WardenDb;
use pagewarden_protocol::{PartitionKey, ScanId, SeverityDelta};
use sqlx::Row;

/// Stored counter row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterRow {
    pub critical: i64,
    pub moderate: i64,
    pub low: i64,
}

impl WardenDb {
    /// Apply a per-event delta as one atomic upsert. Concurrent dispatches
    /// for the same partition cannot lose increments because the addition
    /// happens inside the statement, not in the caller.
    pub async fn apply_severity_delta(
        &self,
        scan_id: &ScanId,
        partition_key: &PartitionKey,
        delta: SeverityDelta,
    ) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO pw_severity_counters (scan_id, partition_key, critical, moderate, low)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(scan_id, partition_key) DO UPDATE SET
                critical = critical + excluded.critical,
                moderate = moderate + excluded.moderate,
                low = low + excluded.low
            "#,
        )
        .bind(scan_id.as_str())
        .bind(partition_key.as_str())
        .bind(delta.critical)
        .bind(delta.moderate)
        .bind(delta.low)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Current counters for one (scan, partition) pair.
    pub async fn severity_counters(
        &self,
        scan_id: &ScanId,
        partition_key: &PartitionKey,
    ) -> Result<CounterRow> {
        let row = sqlx::query(
            "SELECT critical, moderate, low FROM pw_severity_counters
             WHERE scan_id = ? AND partition_key = ?",
        )
        .bind(scan_id.as_str())
        .bind(partition_key.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row
            .map(|row| CounterRow {
                critical: row.get("critical"),
                moderate: row.get("moderate"),
                low: row.get("low"),
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deltas_accumulate() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let scan: ScanId = "s1".into();
        let partition: PartitionKey = "SPACE".into();

        db.apply_severity_delta(
            &scan,
            &partition,
            SeverityDelta {
                critical: 1,
                moderate: 2,
                low: 0,
            },
        )
        .await
        .unwrap();
        db.apply_severity_delta(
            &scan,
            &partition,
            SeverityDelta {
                critical: 0,
                moderate: 1,
                low: 3,
            },
        )
        .await
        .unwrap();

        let counters = db.severity_counters(&scan, &partition).await.unwrap();
        assert_eq!(counters.critical, 1);
        assert_eq!(counters.moderate, 3);
        assert_eq!(counters.low, 3);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    db.apply_severity_delta(
                        &"s1".into(),
                        &"SPACE".into(),
                        SeverityDelta {
                            critical: 1,
                            moderate: 0,
                            low: 0,
                        },
                    )
                    .await
                    .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let counters = db
            .severity_counters(&"s1".into(), &"SPACE".into())
            .await
            .unwrap();
        assert_eq!(counters.critical, 80);
    }

    #[tokio::test]
    async fn missing_row_reads_as_zero() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let counters = db
            .severity_counters(&"none".into(), &"SPACE".into())
            .await
            .unwrap();
        assert_eq!(counters, CounterRow::default());
    }
}

//! Reporting queries consumed by the presentation boundary.
//!
//! Authority split: status and progress always come from the checkpoint,
//! unit/attachment counts always come from the log. The two can be briefly
//! inconsistent after a crash until the next checkpoint write; reporting
//! never recomputes one from the other.

use crate::error::{DbError, Result};
use crate::WardenDb;
use pagewarden_protocol::{PartitionKey, ScanId, ScanStatus};
use sqlx::Row;

/// Metadata of the most recently active scan.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestScan {
    pub scan_id: ScanId,
    /// Unix ms of the newest log row.
    pub last_updated: i64,
    pub partition_count: i64,
}

/// Log-derived aggregate for one (scan, partition).
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSummary {
    pub scan_id: ScanId,
    pub partition_key: PartitionKey,
    pub units_done: i64,
    pub attachments_done: i64,
    pub last_event_at: i64,
}

/// Full per-partition report row: checkpoint authority for status/progress,
/// log authority for counts, counters for severities.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionReport {
    pub scan_id: ScanId,
    pub partition_key: PartitionKey,
    pub status: ScanStatus,
    pub progress: i64,
    pub units_done: i64,
    pub attachments_done: i64,
    pub critical: i64,
    pub moderate: i64,
    pub low: i64,
    pub last_event_at: Option<i64>,
}

impl WardenDb {
    /// The scan with the newest log activity, if any.
    pub async fn latest_scan(&self) -> Result<Option<LatestScan>> {
        let row = sqlx::query(
            r#"
            SELECT scan_id,
                   MAX(created_at) AS last_updated,
                   COUNT(DISTINCT partition_key) AS partition_count
            FROM pw_scan_event
            GROUP BY scan_id
            ORDER BY last_updated DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| LatestScan {
            scan_id: ScanId(row.get("scan_id")),
            last_updated: row.get("last_updated"),
            partition_count: row.get("partition_count"),
        }))
    }

    /// Log aggregates per partition for one scan.
    pub async fn partition_summaries(&self, scan_id: &ScanId) -> Result<Vec<PartitionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT partition_key,
                   SUM(CASE WHEN kind = 'unit_complete' THEN 1 ELSE 0 END) AS units_done,
                   SUM(CASE WHEN attachment_name IS NOT NULL THEN 1 ELSE 0 END) AS attachments_done,
                   MAX(created_at) AS last_event_at
            FROM pw_scan_event
            WHERE scan_id = ?
            GROUP BY partition_key
            ORDER BY partition_key ASC
            "#,
        )
        .bind(scan_id.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| PartitionSummary {
                scan_id: scan_id.clone(),
                partition_key: PartitionKey(row.get("partition_key")),
                units_done: row.get("units_done"),
                attachments_done: row.get("attachments_done"),
                last_event_at: row.get("last_event_at"),
            })
            .collect())
    }

    /// Full report rows for one scan: checkpoint joined with log aggregates
    /// and severity counters.
    pub async fn partition_reports(&self, scan_id: &ScanId) -> Result<Vec<PartitionReport>> {
        let rows = sqlx::query(
            r#"
            SELECT c.partition_key,
                   c.status,
                   c.progress,
                   COALESCE(e.units_done, 0) AS units_done,
                   COALESCE(e.attachments_done, 0) AS attachments_done,
                   e.last_event_at,
                   COALESCE(s.critical, 0) AS critical,
                   COALESCE(s.moderate, 0) AS moderate,
                   COALESCE(s.low, 0) AS low
            FROM pw_scan_checkpoint c
            LEFT JOIN (
                SELECT scan_id, partition_key,
                       SUM(CASE WHEN kind = 'unit_complete' THEN 1 ELSE 0 END) AS units_done,
                       SUM(CASE WHEN attachment_name IS NOT NULL THEN 1 ELSE 0 END) AS attachments_done,
                       MAX(created_at) AS last_event_at
                FROM pw_scan_event
                GROUP BY scan_id, partition_key
            ) e ON e.scan_id = c.scan_id AND e.partition_key = c.partition_key
            LEFT JOIN pw_severity_counters s
                ON s.scan_id = c.scan_id AND s.partition_key = c.partition_key
            WHERE c.scan_id = ?
            ORDER BY c.partition_key ASC
            "#,
        )
        .bind(scan_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(PartitionReport {
                    scan_id: scan_id.clone(),
                    partition_key: PartitionKey(row.get("partition_key")),
                    status: status.parse().map_err(|e: pagewarden_protocol::UnknownLabel| DbError::corrupt(e.to_string()))?,
                    progress: row.get("progress"),
                    units_done: row.get("units_done"),
                    attachments_done: row.get("attachments_done"),
                    critical: row.get("critical"),
                    moderate: row.get("moderate"),
                    low: row.get("low"),
                    last_event_at: row.get("last_event_at"),
                })
            })
            .collect()
    }

    /// Cross-scan "latest per partition" view: for every partition key seen
    /// in any scan, the aggregate row from the most recently updated scan
    /// containing it. A global summary can therefore mix partition A from an
    /// older finished scan with partition B from the newest in-flight one.
    pub async fn latest_per_partition(&self) -> Result<Vec<PartitionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT partition_key, scan_id, units_done, attachments_done, last_event_at
            FROM (
                SELECT partition_key, scan_id,
                       SUM(CASE WHEN kind = 'unit_complete' THEN 1 ELSE 0 END) AS units_done,
                       SUM(CASE WHEN attachment_name IS NOT NULL THEN 1 ELSE 0 END) AS attachments_done,
                       MAX(created_at) AS last_event_at,
                       ROW_NUMBER() OVER (
                           PARTITION BY partition_key
                           ORDER BY MAX(created_at) DESC, scan_id DESC
                       ) AS rn
                FROM pw_scan_event
                GROUP BY partition_key, scan_id
            )
            WHERE rn = 1
            ORDER BY partition_key ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| PartitionSummary {
                scan_id: ScanId(row.get("scan_id")),
                partition_key: PartitionKey(row.get("partition_key")),
                units_done: row.get("units_done"),
                attachments_done: row.get("attachments_done"),
                last_event_at: row.get("last_event_at"),
            })
            .collect())
    }
}

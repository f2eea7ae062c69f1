//! Read-side facade over the persisted scan state.
//!
//! Authority split: status and progress are answered from the checkpoint
//! table only; unit and attachment counts are answered from the event log
//! only. Mixing the two is how reports drift, so neither query ever
//! second-guesses the other.

use anyhow::Result;
use chrono::Utc;
use pagewarden_db::{LatestScan, PartitionReport, PartitionSummary, WardenDb};
use pagewarden_protocol::defaults::DEFAULT_AUDIT_RETENTION_DAYS;
use pagewarden_protocol::{CheckpointRecord, ScanId};
use tracing::info;

pub struct ScanReporter {
    db: WardenDb,
}

impl ScanReporter {
    pub fn new(db: WardenDb) -> Self {
        Self { db }
    }

    /// Most recently updated scan, if any.
    pub async fn latest_scan(&self) -> Result<Option<LatestScan>> {
        Ok(self.db.latest_scan().await?)
    }

    /// Per-partition status and progress for one scan, straight from the
    /// checkpoint table.
    pub async fn status(&self, scan_id: &ScanId) -> Result<Vec<CheckpointRecord>> {
        Ok(self.db.checkpoints_by_scan(scan_id).await?)
    }

    /// Full per-partition report for one scan: checkpoint state joined with
    /// log-derived counts and severity totals.
    pub async fn report(&self, scan_id: &ScanId) -> Result<Vec<PartitionReport>> {
        Ok(self.db.partition_reports(scan_id).await?)
    }

    /// Cross-scan view: for every partition key ever scanned, the summary
    /// from the most recent scan that touched it.
    pub async fn global_overview(&self) -> Result<Vec<PartitionSummary>> {
        Ok(self.db.latest_per_partition().await?)
    }

    /// Delete all rows of one scan: checkpoints, log, counters.
    pub async fn purge_scan(&self, scan_id: &ScanId) -> Result<u64> {
        let removed = self.db.purge_scan(scan_id).await?;
        info!(%scan_id, removed, "Purged scan");
        Ok(removed)
    }

    /// Delete audit rows older than the retention window.
    pub async fn purge_audit(&self, retention_days: Option<i64>) -> Result<u64> {
        let days = retention_days.unwrap_or(DEFAULT_AUDIT_RETENTION_DAYS);
        let cutoff = Utc::now().timestamp_millis() - days * 24 * 60 * 60 * 1000;
        let removed = self.db.purge_access_before(cutoff).await?;
        info!(days, removed, "Purged expired audit rows");
        Ok(removed)
    }
}

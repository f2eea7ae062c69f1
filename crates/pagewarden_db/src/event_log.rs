//! Append-only event log with atomic per-scan sequence assignment.

use crate::error::{DbError, Result};
use crate::WardenDb;
use pagewarden_protocol::{PartitionKey, ScanEvent, ScanEventKind, ScanId};
use sqlx::Row;

/// One persisted log row. The payload stays encrypted here; decryption goes
/// through the audited reveal path in `pagewarden_security`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub scan_id: ScanId,
    pub seq: i64,
    pub partition_key: PartitionKey,
    pub kind: ScanEventKind,
    pub unit_id: Option<String>,
    pub unit_title: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_kind: Option<String>,
    pub payload_enc: Option<String>,
    pub error: Option<String>,
    pub progress: i64,
    pub created_at: i64,
}

impl WardenDb {
    /// Append one event to the log. The next sequence number for the scan is
    /// assigned inside the same transaction as the insert, which keeps
    /// sequences gapless and strictly increasing regardless of dispatch
    /// concurrency. Returns the assigned sequence number.
    ///
    /// `payload_enc` must already be encrypted; this layer never sees raw
    /// findings.
    pub async fn append_event(&self, event: &ScanEvent, payload_enc: Option<&str>) -> Result<i64> {
        debug_assert!(event.kind.is_persisted(), "keepalives are stream-only");

        let mut tx = self.pool().begin().await?;

        let seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq), 0) + 1 AS next FROM pw_scan_event WHERE scan_id = ?",
        )
        .bind(event.scan_id.as_str())
        .fetch_one(&mut *tx)
        .await?
        .get("next");

        sqlx::query(
            r#"
            INSERT INTO pw_scan_event
                (scan_id, seq, partition_key, kind, unit_id, unit_title,
                 attachment_name, attachment_kind, payload_enc, error, progress, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.scan_id.as_str())
        .bind(seq)
        .bind(event.partition_key.as_str())
        .bind(event.kind.as_str())
        .bind(event.unit_id.as_deref())
        .bind(event.unit_title.as_deref())
        .bind(event.attachment_name.as_deref())
        .bind(event.attachment_kind.as_deref())
        .bind(payload_enc)
        .bind(event.error.as_deref())
        .bind(event.progress)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(seq)
    }

    /// Events of one scan in sequence order, optionally restricted to a
    /// partition.
    pub async fn events_by_scan(
        &self,
        scan_id: &ScanId,
        partition_key: Option<&PartitionKey>,
    ) -> Result<Vec<StoredEvent>> {
        let rows = match partition_key {
            Some(partition) => {
                sqlx::query(
                    "SELECT * FROM pw_scan_event
                     WHERE scan_id = ? AND partition_key = ? ORDER BY seq ASC",
                )
                .bind(scan_id.as_str())
                .bind(partition.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM pw_scan_event WHERE scan_id = ? ORDER BY seq ASC")
                    .bind(scan_id.as_str())
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.iter().map(row_to_event).collect()
    }

    /// Fetch one event by (scan, seq).
    pub async fn get_event(&self, scan_id: &ScanId, seq: i64) -> Result<Option<StoredEvent>> {
        let row = sqlx::query("SELECT * FROM pw_scan_event WHERE scan_id = ? AND seq = ?")
            .bind(scan_id.as_str())
            .bind(seq)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_event).transpose()
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<StoredEvent> {
    let kind: String = row.get("kind");
    Ok(StoredEvent {
        scan_id: ScanId(row.get("scan_id")),
        seq: row.get("seq"),
        partition_key: PartitionKey(row.get("partition_key")),
        kind: kind.parse().map_err(|e: pagewarden_protocol::UnknownLabel| DbError::corrupt(e.to_string()))?,
        unit_id: row.get("unit_id"),
        unit_title: row.get("unit_title"),
        attachment_name: row.get("attachment_name"),
        attachment_kind: row.get("attachment_kind"),
        payload_enc: row.get("payload_enc"),
        error: row.get("error"),
        progress: row.get("progress"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(scan: &str, partition: &str, kind: ScanEventKind) -> ScanEvent {
        ScanEvent::new(scan.into(), partition.into(), kind)
    }

    #[tokio::test]
    async fn sequences_are_gapless_per_scan() {
        let db = WardenDb::open_in_memory().await.unwrap();
        for _ in 0..5 {
            db.append_event(&event("s1", "SPACE", ScanEventKind::Item), None)
                .await
                .unwrap();
        }
        // A second scan gets its own sequence.
        let other = db
            .append_event(&event("s2", "SPACE", ScanEventKind::Start), None)
            .await
            .unwrap();
        assert_eq!(other, 1);

        let events = db.events_by_scan(&"s1".into(), None).await.unwrap();
        let seqs: Vec<_> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn concurrent_appends_stay_gapless() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    db.append_event(&event("s1", "SPACE", ScanEventKind::Item), None)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let events = db.events_by_scan(&"s1".into(), None).await.unwrap();
        assert_eq!(events.len(), 40);
        for (i, stored) in events.iter().enumerate() {
            assert_eq!(stored.seq, i as i64 + 1);
        }
    }

    #[tokio::test]
    async fn payload_is_stored_opaquely() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let seq = db
            .append_event(
                &event("s1", "SPACE", ScanEventKind::Item),
                Some("pw1$opaque"),
            )
            .await
            .unwrap();
        let stored = db.get_event(&"s1".into(), seq).await.unwrap().unwrap();
        assert_eq!(stored.payload_enc.as_deref(), Some("pw1$opaque"));
    }
}

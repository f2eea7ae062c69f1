//! Event dispatch: the seam between the orchestrator loop and durability.
//!
//! Every dispatched event splits in two. The checkpoint write happens
//! inline and is awaited, so the durable resume point never runs ahead of
//! what the loop has actually finished; a write failure is logged and
//! swallowed so a flaky database cannot abort a scan. The rest of the work
//! (encrypt, append, count, publish) drains through a single worker task,
//! which is what makes log sequence order equal dispatch order.

use pagewarden_db::WardenDb;
use pagewarden_protocol::{CheckpointRecord, ScanEvent, SeverityDelta};
use pagewarden_security::{FindingsCipher, PayloadMeta};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::hub::StreamHub;

enum WorkerMsg {
    Event(ScanEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct EventDispatcher {
    db: WardenDb,
    tx: mpsc::UnboundedSender<WorkerMsg>,
}

/// Join handle for the dispatch worker. Held by whoever owns the engine;
/// awaited once every dispatcher clone is dropped.
pub struct DispatcherHandle {
    worker: JoinHandle<()>,
}

impl DispatcherHandle {
    pub async fn join(self) {
        let _ = self.worker.await;
    }
}

impl EventDispatcher {
    pub fn spawn(
        db: WardenDb,
        cipher: FindingsCipher,
        hub: StreamHub,
    ) -> (Self, DispatcherHandle) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker_db = db.clone();
        let worker = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WorkerMsg::Event(event) => {
                        persist_and_publish(&worker_db, &cipher, &hub, event).await;
                    }
                    WorkerMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        (Self { db, tx }, DispatcherHandle { worker })
    }

    /// Dispatch one event, optionally advancing the checkpoint first.
    ///
    /// The checkpoint write is awaited so resume points stay behind the
    /// loop; the log/counter/stream bundle is queued for the worker and
    /// completes in dispatch order.
    pub async fn dispatch(&self, checkpoint: Option<&CheckpointRecord>, event: ScanEvent) {
        if let Some(record) = checkpoint {
            match self.db.persist_checkpoint(record).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        scan_id = %record.scan_id,
                        partition = %record.partition_key,
                        "Checkpoint already terminal, write skipped"
                    );
                }
                Err(e) => {
                    warn!(
                        scan_id = %record.scan_id,
                        partition = %record.partition_key,
                        error = %e,
                        "Checkpoint write failed, scan continues"
                    );
                }
            }
        }
        if event.kind.is_persisted() && self.tx.send(WorkerMsg::Event(event)).is_err() {
            error!("Dispatch worker gone, event dropped");
        }
    }

    /// Wait until everything dispatched so far has been appended, counted
    /// and published. Called after a terminal event so callers observe a
    /// fully settled log.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WorkerMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn persist_and_publish(
    db: &WardenDb,
    cipher: &FindingsCipher,
    hub: &StreamHub,
    event: ScanEvent,
) {
    let payload_enc = if event.payload.is_empty() {
        None
    } else {
        let meta = PayloadMeta::new(event.scan_id.clone(), event.partition_key.clone());
        match serde_json::to_string(&event.payload) {
            Ok(json) => match cipher.encrypt(&json, &meta) {
                Ok(ciphertext) => Some(ciphertext),
                Err(e) => {
                    error!(
                        scan_id = %event.scan_id,
                        seq_kind = %event.kind,
                        error = %e,
                        "Payload encryption failed, findings withheld from log"
                    );
                    None
                }
            },
            Err(e) => {
                error!(scan_id = %event.scan_id, error = %e, "Payload serialization failed");
                None
            }
        }
    };

    if let Err(e) = db.append_event(&event, payload_enc.as_deref()).await {
        error!(
            scan_id = %event.scan_id,
            kind = %event.kind,
            error = %e,
            "Event log append failed"
        );
    }

    let delta = SeverityDelta::from_findings(&event.payload.findings);
    if let Err(e) = db
        .apply_severity_delta(&event.scan_id, &event.partition_key, delta)
        .await
    {
        warn!(scan_id = %event.scan_id, error = %e, "Severity counter update failed");
    }

    hub.publish(masked_for_stream(event));
}

/// Subscribers only ever see masked findings; the raw value lives solely
/// inside the encrypted log payload.
fn masked_for_stream(mut event: ScanEvent) -> ScanEvent {
    for finding in &mut event.payload.findings {
        finding.raw.clear();
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewarden_protocol::{EventPayload, Finding, ScanEventKind, ScanStatus};

    fn finding(kind: &str, raw: &str) -> Finding {
        Finding {
            kind: kind.to_string(),
            start: 0,
            end: raw.len(),
            score: 0.9,
            source: "test".to_string(),
            raw: raw.to_string(),
            masked: Finding::mask(raw),
        }
    }

    #[tokio::test]
    async fn bundle_lands_in_order_with_encrypted_payload() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let cipher = FindingsCipher::from_passphrase("dispatch-test");
        let hub = StreamHub::new();
        let mut stream = hub.subscribe_all();
        let (dispatcher, handle) = EventDispatcher::spawn(db.clone(), cipher, hub);

        let scan: pagewarden_protocol::ScanId = "scan-1".into();
        let mut item = ScanEvent::new(scan.clone(), "OPS".into(), ScanEventKind::Item);
        item.unit_id = Some("p1".to_string());
        item.payload = EventPayload {
            findings: vec![finding("EMAIL_ADDRESS", "a@b.example")],
            snippet: Some("mail a@b.example today".to_string()),
        };

        dispatcher
            .dispatch(None, ScanEvent::new(scan.clone(), "OPS".into(), ScanEventKind::Start))
            .await;
        dispatcher.dispatch(None, item).await;
        dispatcher.flush().await;

        let events = db.events_by_scan(&scan, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[0].kind, ScanEventKind::Start);
        assert_eq!(events[1].seq, 2);
        let stored = events[1].payload_enc.as_deref().unwrap();
        assert!(FindingsCipher::is_encrypted(stored));

        let counters = db.severity_counters(&scan, &"OPS".into()).await.unwrap();
        assert_eq!(counters.moderate, 1);

        // The streamed copy is masked.
        let _start = stream.recv().await.unwrap();
        let streamed = stream.recv().await.unwrap();
        assert!(streamed.payload.findings[0].raw.is_empty());
        assert_eq!(streamed.payload.findings[0].masked, Finding::mask("a@b.example"));

        drop(dispatcher);
        handle.join().await;
    }

    #[tokio::test]
    async fn checkpoint_failure_does_not_stop_dispatch() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let cipher = FindingsCipher::from_passphrase("dispatch-test");
        let (dispatcher, handle) = EventDispatcher::spawn(db.clone(), cipher, StreamHub::new());

        let scan: pagewarden_protocol::ScanId = "scan-2".into();
        // Drive the checkpoint terminal, then dispatch with a stale record:
        // the write is a no-op but the event still reaches the log.
        let mut record = CheckpointRecord::new(scan.clone(), "OPS".into(), ScanStatus::Completed);
        db.persist_checkpoint(&record).await.unwrap();
        record.status = ScanStatus::Running;

        dispatcher
            .dispatch(
                Some(&record),
                ScanEvent::new(scan.clone(), "OPS".into(), ScanEventKind::Error),
            )
            .await;
        dispatcher.flush().await;

        let stored = db
            .find_checkpoint(&scan, &"OPS".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ScanStatus::Completed);
        assert_eq!(db.events_by_scan(&scan, None).await.unwrap().len(), 1);

        drop(dispatcher);
        handle.join().await;
    }

    #[tokio::test]
    async fn keepalives_are_never_persisted() {
        let db = WardenDb::open_in_memory().await.unwrap();
        let cipher = FindingsCipher::from_passphrase("dispatch-test");
        let (dispatcher, handle) = EventDispatcher::spawn(db.clone(), cipher, StreamHub::new());

        let scan: pagewarden_protocol::ScanId = "scan-3".into();
        dispatcher
            .dispatch(None, ScanEvent::new(scan.clone(), "OPS".into(), ScanEventKind::Keepalive))
            .await;
        dispatcher.flush().await;

        assert!(db.events_by_scan(&scan, None).await.unwrap().is_empty());

        drop(dispatcher);
        handle.join().await;
    }
}

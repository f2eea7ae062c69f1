//! The scan orchestrator: walks a partition unit by unit, analyzes text,
//! and turns what it sees into checkpointed, logged, streamed events.

use anyhow::{bail, Result};
use pagewarden_db::WardenDb;
use pagewarden_detector::{Analysis, Detector, DetectorError};
use pagewarden_protocol::progress::percent;
use pagewarden_protocol::{
    defaults, Attachment, CheckpointRecord, ContentUnit, PartitionKey, ScanId, ScanStatus,
    WardenConfig,
};
use pagewarden_security::FindingsCipher;
use pagewarden_source::retry::with_retry;
use pagewarden_source::{ContentSource, RetryPolicy, SourceError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::dispatcher::{DispatcherHandle, EventDispatcher};
use crate::factory::{multi_complete, EventFactory};
use crate::hub::StreamHub;

/// Engine tuning knobs, lifted out of [`WardenConfig`] so tests can build
/// them directly.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub detector_threshold: f64,
    pub detector_deadline: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            detector_threshold: defaults::DEFAULT_DETECTOR_THRESHOLD,
            detector_deadline: Duration::from_millis(defaults::DEFAULT_DETECTOR_DEADLINE_MS),
            retry: RetryPolicy::new(
                Duration::from_millis(defaults::DEFAULT_RETRY_BASE_MS),
                defaults::DEFAULT_RETRY_MAX_ATTEMPTS,
            ),
        }
    }
}

impl From<&WardenConfig> for EngineSettings {
    fn from(config: &WardenConfig) -> Self {
        Self {
            detector_threshold: config.detector_threshold,
            detector_deadline: Duration::from_millis(config.detector_deadline_ms),
            retry: RetryPolicy::new(
                Duration::from_millis(config.retry_base_ms),
                config.retry_max_attempts,
            ),
        }
    }
}

/// One engine instance drives any number of scans over a shared source,
/// detector and database. Clones share the dispatcher and hub, which is how
/// `scan_all` fans partitions out as independent tasks while keeping one
/// ordered log writer.
#[derive(Clone)]
pub struct ScanEngine {
    db: WardenDb,
    source: Arc<dyn ContentSource>,
    detector: Arc<dyn Detector>,
    dispatcher: EventDispatcher,
    hub: StreamHub,
    settings: EngineSettings,
}

impl ScanEngine {
    /// Wire up an engine. The returned handle joins the dispatch worker
    /// once every engine clone is gone.
    pub fn new(
        db: WardenDb,
        source: Arc<dyn ContentSource>,
        detector: Arc<dyn Detector>,
        cipher: FindingsCipher,
        settings: EngineSettings,
    ) -> (Self, DispatcherHandle) {
        let hub = StreamHub::new();
        let (dispatcher, handle) = EventDispatcher::spawn(db.clone(), cipher, hub.clone());
        (
            Self {
                db,
                source,
                detector,
                dispatcher,
                hub,
                settings,
            },
            handle,
        )
    }

    pub fn hub(&self) -> &StreamHub {
        &self.hub
    }

    pub fn db(&self) -> &WardenDb {
        &self.db
    }

    /// Scan one partition to completion, pause, or failure.
    ///
    /// Resumable: when a checkpoint already records a last finished unit,
    /// scanning continues after it. A unit that was in flight when a pause
    /// hit is processed again, so delivery is at-least-once.
    pub async fn scan_partition(
        &self,
        scan_id: &ScanId,
        key: &PartitionKey,
        since: Option<i64>,
    ) -> Result<ScanStatus> {
        let factory = EventFactory::new(scan_id.clone(), key.clone());

        let existing = self.read_checkpoint(scan_id, key).await;
        if let Some(checkpoint) = &existing {
            if checkpoint.status.is_terminal() {
                info!(%scan_id, partition = %key, status = %checkpoint.status,
                    "Partition already terminal, nothing to scan");
                return Ok(checkpoint.status);
            }
        }
        let resume_after = existing.and_then(|c| c.last_unit_id);

        let mut record = CheckpointRecord::new(scan_id.clone(), key.clone(), ScanStatus::Running);
        self.dispatcher.dispatch(Some(&record), factory.start()).await;

        let units = match self.fetch_units(key, since).await {
            Ok(units) => units,
            Err(e) => {
                return self
                    .fail_partition(&factory, &mut record, format!("content source failure: {e}"))
                    .await;
            }
        };

        // Incremental runs restrict attachments in one partition-wide call,
        // grouped by unit so the loop stays per-unit.
        let recent_attachments = match since {
            Some(cutoff) => {
                let listed = with_retry("list_attachments_modified_since", self.settings.retry, || {
                    self.source.list_attachments_modified_since(key, cutoff)
                })
                .await;
                match listed {
                    Ok(attachments) => {
                        let mut by_unit: HashMap<String, Vec<Attachment>> = HashMap::new();
                        for attachment in attachments {
                            by_unit
                                .entry(attachment.unit_id.clone())
                                .or_default()
                                .push(attachment);
                        }
                        Some(by_unit)
                    }
                    Err(e) => {
                        return self
                            .fail_partition(
                                &factory,
                                &mut record,
                                format!("content source failure: {e}"),
                            )
                            .await;
                    }
                }
            }
            None => None,
        };

        let mut total = units.len();
        let mut done = 0usize;
        let mut pending = units.into_iter();
        if let Some(last) = &resume_after {
            let skipped: Vec<_> = pending.by_ref().take_while(|u| &u.id != last).collect();
            // take_while consumed the last finished unit as its stop marker
            done = skipped.len() + 1;
            if done > total {
                // last unit id no longer listed by the source, start over
                done = 0;
                let refetched = match self.fetch_units(key, since).await {
                    Ok(units) => units,
                    Err(e) => {
                        return self
                            .fail_partition(
                                &factory,
                                &mut record,
                                format!("content source failure: {e}"),
                            )
                            .await;
                    }
                };
                total = refetched.len();
                pending = refetched.into_iter();
            }
            info!(%scan_id, partition = %key, resumed_after = %last, done, total,
                "Resuming partition scan");
        }

        for unit in pending {
            match self.read_checkpoint(scan_id, key).await.map(|c| c.status) {
                Some(ScanStatus::Paused) => {
                    info!(%scan_id, partition = %key, "Pause observed, stopping scheduling");
                    self.dispatcher.flush().await;
                    return Ok(ScanStatus::Paused);
                }
                Some(status) if status.is_terminal() => {
                    self.dispatcher.flush().await;
                    return Ok(status);
                }
                _ => {}
            }

            let progress = percent(done, total);
            record.progress = progress;
            self.dispatcher
                .dispatch(Some(&record), factory.unit_start(&unit, progress))
                .await;

            match self.analyze(&unit.body).await {
                Ok(analysis) => {
                    self.dispatcher
                        .dispatch(None, factory.item(&unit, &analysis, progress))
                        .await;
                    let unit_attachments = recent_attachments
                        .as_ref()
                        .map(|by_unit| by_unit.get(&unit.id).cloned().unwrap_or_default());
                    if let Err(e) = self
                        .scan_attachments(&factory, &unit, unit_attachments, progress)
                        .await
                    {
                        return self
                            .fail_partition(
                                &factory,
                                &mut record,
                                format!("content source failure: {e}"),
                            )
                            .await;
                    }
                }
                Err(e) => {
                    // No detector retry: the unit is skipped and the scan
                    // moves on.
                    warn!(%scan_id, partition = %key, unit = %unit.id, error = %e,
                        "Detector failed for unit, skipping");
                    self.dispatcher
                        .dispatch(None, factory.unit_error(&unit, e.to_string(), progress))
                        .await;
                }
            }

            done += 1;
            let progress = percent(done, total);
            record.last_unit_id = Some(unit.id.clone());
            record.progress = progress;

            // A pause raised while this unit was in flight must survive the
            // unit_complete checkpoint write, so re-read before writing.
            let paused = matches!(
                self.read_checkpoint(scan_id, key).await.map(|c| c.status),
                Some(ScanStatus::Paused)
            );
            if paused {
                record.status = ScanStatus::Paused;
            }
            self.dispatcher
                .dispatch(Some(&record), factory.unit_complete(&unit, progress))
                .await;
            if paused {
                info!(%scan_id, partition = %key, unit = %unit.id,
                    "Pause observed after in-flight unit, stopping scheduling");
                self.dispatcher.flush().await;
                return Ok(ScanStatus::Paused);
            }
        }

        record.status = ScanStatus::Completed;
        record.progress = 100;
        self.dispatcher.dispatch(Some(&record), factory.complete()).await;
        self.dispatcher.flush().await;
        info!(%scan_id, partition = %key, units = total, "Partition scan complete");
        Ok(ScanStatus::Completed)
    }

    /// Scan every partition of the source as independent tasks, then emit
    /// one scan-level roll-up event.
    pub async fn scan_all(
        &self,
        scan_id: &ScanId,
        since: Option<i64>,
    ) -> Result<Vec<(PartitionKey, ScanStatus)>> {
        let partitions = with_retry("list_partitions", self.settings.retry, || {
            self.source.list_partitions()
        })
        .await?;

        let mut tasks = JoinSet::new();
        for partition in partitions {
            let engine = self.clone();
            let scan_id = scan_id.clone();
            tasks.spawn(async move {
                let status = engine
                    .scan_partition(&scan_id, &partition.key, since)
                    .await
                    .unwrap_or(ScanStatus::Failed);
                (partition.key, status)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => warn!(error = %e, "Partition scan task panicked"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));

        self.dispatcher
            .dispatch(None, multi_complete(scan_id.clone()))
            .await;
        self.dispatcher.flush().await;
        Ok(results)
    }

    /// Request a cooperative pause. Returns false when there is nothing to
    /// pause (no checkpoint, or the partition is already terminal).
    pub async fn pause(&self, scan_id: &ScanId, key: &PartitionKey) -> Result<bool> {
        request_pause(&self.db, scan_id, key).await
    }

    /// Flip a paused partition back to RUNNING and continue scanning after
    /// the last finished unit.
    pub async fn resume(&self, scan_id: &ScanId, key: &PartitionKey) -> Result<ScanStatus> {
        let Some(mut record) = self.db.find_checkpoint(scan_id, key).await? else {
            bail!("No checkpoint for scan {scan_id} partition {key}");
        };
        if record.status.is_terminal() {
            bail!(
                "Partition {key} of scan {scan_id} is already {}",
                record.status
            );
        }
        record.status = ScanStatus::Running;
        self.db.persist_checkpoint(&record).await?;
        self.scan_partition(scan_id, key, None).await
    }

    async fn read_checkpoint(
        &self,
        scan_id: &ScanId,
        key: &PartitionKey,
    ) -> Option<CheckpointRecord> {
        match self.db.find_checkpoint(scan_id, key).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(%scan_id, partition = %key, error = %e,
                    "Checkpoint read failed, treating as absent");
                None
            }
        }
    }

    async fn fetch_units(
        &self,
        key: &PartitionKey,
        since: Option<i64>,
    ) -> Result<Vec<ContentUnit>, SourceError> {
        match since {
            Some(cutoff) => {
                with_retry("list_units_modified_since", self.settings.retry, || {
                    self.source.list_units_modified_since(key, cutoff)
                })
                .await
            }
            None => {
                with_retry("list_units", self.settings.retry, || {
                    self.source.list_units(key)
                })
                .await
            }
        }
    }

    /// `prefetched` is Some on incremental runs, where the attachment set
    /// was already narrowed partition-wide; otherwise the unit's full list
    /// is fetched here.
    async fn scan_attachments(
        &self,
        factory: &EventFactory,
        unit: &ContentUnit,
        prefetched: Option<Vec<Attachment>>,
        progress: i64,
    ) -> Result<(), SourceError> {
        let attachments = match prefetched {
            Some(attachments) => attachments,
            None => {
                with_retry("list_attachments", self.settings.retry, || {
                    self.source.list_attachments(&unit.id)
                })
                .await?
            }
        };

        for attachment in attachments {
            let bytes = with_retry("download_attachment", self.settings.retry, || {
                self.source.download_attachment(&unit.id, &attachment.name)
            })
            .await?;
            let Some(bytes) = bytes else {
                warn!(unit = %unit.id, attachment = %attachment.name,
                    "Attachment listed but not downloadable, skipping");
                continue;
            };
            let text = String::from_utf8_lossy(&bytes).into_owned();
            match self.analyze(&text).await {
                Ok(analysis) => {
                    self.dispatcher
                        .dispatch(
                            None,
                            factory.attachment_item(unit, &attachment, &text, &analysis, progress),
                        )
                        .await;
                }
                Err(e) => {
                    self.dispatcher
                        .dispatch(
                            None,
                            factory.unit_error(
                                unit,
                                format!("attachment {}: {e}", attachment.name),
                                progress,
                            ),
                        )
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn analyze(&self, text: &str) -> Result<Analysis, DetectorError> {
        self.detector
            .analyze(
                text,
                self.settings.detector_threshold,
                self.settings.detector_deadline,
            )
            .await
    }

    async fn fail_partition(
        &self,
        factory: &EventFactory,
        record: &mut CheckpointRecord,
        reason: String,
    ) -> Result<ScanStatus> {
        warn!(scan_id = %record.scan_id, partition = %record.partition_key, %reason,
            "Partition scan failed");
        record.status = ScanStatus::Failed;
        self.dispatcher
            .dispatch(Some(record), factory.partition_error(reason, record.progress))
            .await;
        self.dispatcher.flush().await;
        Ok(ScanStatus::Failed)
    }
}

/// Checkpoint-only pause request, callable without a full engine (the CLI
/// pauses scans owned by another process this way). Returns false when the
/// partition has no checkpoint or is already terminal.
pub async fn request_pause(db: &WardenDb, scan_id: &ScanId, key: &PartitionKey) -> Result<bool> {
    let Some(mut record) = db.find_checkpoint(scan_id, key).await? else {
        return Ok(false);
    };
    if record.status.is_terminal() {
        return Ok(false);
    }
    record.status = ScanStatus::Paused;
    Ok(db.persist_checkpoint(&record).await?)
}

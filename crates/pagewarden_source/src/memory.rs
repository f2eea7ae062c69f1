//! In-memory content source for tests and demo mode.
//!
//! Faults can be scripted per call label, so tests can exercise the retry
//! wrapper and partition-failure paths deterministically.

use crate::error::{SourceError, SourceResult};
use crate::ContentSource;
use async_trait::async_trait;
use pagewarden_protocol::{Attachment, ContentUnit, Partition, PartitionKey};
use std::collections::HashMap;
use std::sync::Mutex;

/// Builder for [`MemorySource`].
#[derive(Default)]
pub struct MemorySourceBuilder {
    partitions: Vec<Partition>,
    units: HashMap<PartitionKey, Vec<ContentUnit>>,
    attachments: HashMap<String, Vec<Attachment>>,
    blobs: HashMap<(String, String), Vec<u8>>,
    faults: HashMap<String, u32>,
}

impl MemorySourceBuilder {
    pub fn partition(mut self, key: &str, name: &str) -> Self {
        self.partitions.push(Partition {
            key: key.into(),
            name: name.to_string(),
        });
        self.units.entry(key.into()).or_default();
        self
    }

    pub fn unit(mut self, partition: &str, id: &str, title: &str, body: &str) -> Self {
        self.units
            .entry(partition.into())
            .or_default()
            .push(ContentUnit {
                id: id.to_string(),
                title: title.to_string(),
                partition_key: partition.into(),
                body: body.to_string(),
                modified_at: None,
            });
        self
    }

    pub fn attachment(mut self, unit_id: &str, name: &str, kind: &str, bytes: &[u8]) -> Self {
        self.attachments
            .entry(unit_id.to_string())
            .or_default()
            .push(Attachment {
                unit_id: unit_id.to_string(),
                name: name.to_string(),
                kind: kind.to_string(),
                modified_at: None,
            });
        self.blobs
            .insert((unit_id.to_string(), name.to_string()), bytes.to_vec());
        self
    }

    /// Make the next `count` calls with the given label fail with a 500.
    /// Labels are method names, e.g. `"list_units"`.
    pub fn fail_next(mut self, label: &str, count: u32) -> Self {
        self.faults.insert(label.to_string(), count);
        self
    }

    pub fn build(self) -> MemorySource {
        MemorySource {
            partitions: self.partitions,
            units: self.units,
            attachments: self.attachments,
            blobs: self.blobs,
            faults: Mutex::new(self.faults),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Scriptable in-memory source.
pub struct MemorySource {
    partitions: Vec<Partition>,
    units: HashMap<PartitionKey, Vec<ContentUnit>>,
    attachments: HashMap<String, Vec<Attachment>>,
    blobs: HashMap<(String, String), Vec<u8>>,
    faults: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MemorySource {
    pub fn builder() -> MemorySourceBuilder {
        MemorySourceBuilder::default()
    }

    /// How many times a method has been called.
    pub fn call_count(&self, label: &str) -> u32 {
        self.calls
            .lock()
            .expect("call counter lock poisoned")
            .get(label)
            .copied()
            .unwrap_or(0)
    }

    fn check(&self, label: &str) -> SourceResult<()> {
        *self
            .calls
            .lock()
            .expect("call counter lock poisoned")
            .entry(label.to_string())
            .or_insert(0) += 1;

        let mut faults = self.faults.lock().expect("fault map lock poisoned");
        if let Some(remaining) = faults.get_mut(label) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Status {
                    status: 500,
                    message: "scripted failure".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    async fn get_partition(&self, key: &PartitionKey) -> SourceResult<Option<Partition>> {
        self.check("get_partition")?;
        Ok(self.partitions.iter().find(|p| &p.key == key).cloned())
    }

    async fn list_partitions(&self) -> SourceResult<Vec<Partition>> {
        self.check("list_partitions")?;
        Ok(self.partitions.clone())
    }

    async fn list_units(&self, key: &PartitionKey) -> SourceResult<Vec<ContentUnit>> {
        self.check("list_units")?;
        self.units
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(key.to_string()))
    }

    async fn list_attachments(&self, unit_id: &str) -> SourceResult<Vec<Attachment>> {
        self.check("list_attachments")?;
        Ok(self.attachments.get(unit_id).cloned().unwrap_or_default())
    }

    async fn download_attachment(
        &self,
        unit_id: &str,
        attachment_name: &str,
    ) -> SourceResult<Option<Vec<u8>>> {
        self.check("download_attachment")?;
        Ok(self
            .blobs
            .get(&(unit_id.to_string(), attachment_name.to_string()))
            .cloned())
    }

    async fn list_units_modified_since(
        &self,
        key: &PartitionKey,
        since_millis: i64,
    ) -> SourceResult<Vec<ContentUnit>> {
        self.check("list_units_modified_since")?;
        let units = self
            .units
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;
        Ok(units
            .into_iter()
            .filter(|u| u.modified_at.map_or(true, |m| m >= since_millis))
            .collect())
    }

    async fn list_attachments_modified_since(
        &self,
        key: &PartitionKey,
        since_millis: i64,
    ) -> SourceResult<Vec<Attachment>> {
        self.check("list_attachments_modified_since")?;
        let unit_ids: Vec<_> = self
            .units
            .get(key)
            .map(|units| units.iter().map(|u| u.id.clone()).collect())
            .unwrap_or_default();
        Ok(unit_ids
            .iter()
            .flat_map(|id| self.attachments.get(id).cloned().unwrap_or_default())
            .filter(|a| a.modified_at.map_or(true, |m| m >= since_millis))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{with_retry, RetryPolicy};
    use std::time::Duration;

    fn source() -> MemorySource {
        MemorySource::builder()
            .partition("SPACE", "Engineering")
            .unit("SPACE", "p1", "Onboarding", "welcome aboard")
            .unit("SPACE", "p2", "Runbook", "rotate the key")
            .attachment("p2", "creds.txt", "text/plain", b"aws key here")
            .build()
    }

    #[tokio::test]
    async fn walks_the_tree() {
        let source = source();
        let partition = source
            .get_partition(&"SPACE".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(partition.name, "Engineering");

        let units = source.list_units(&"SPACE".into()).await.unwrap();
        assert_eq!(units.len(), 2);

        let attachments = source.list_attachments("p2").await.unwrap();
        assert_eq!(attachments.len(), 1);
        let bytes = source
            .download_attachment("p2", "creds.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"aws key here");
    }

    #[tokio::test]
    async fn unknown_partition_is_not_found() {
        let source = source();
        assert!(source
            .get_partition(&"NOPE".into())
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            source.list_units(&"NOPE".into()).await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_faults_drive_the_retry_wrapper() {
        let source = MemorySource::builder()
            .partition("SPACE", "Engineering")
            .unit("SPACE", "p1", "Page", "text")
            .fail_next("list_units", 2)
            .build();

        let policy = RetryPolicy::new(Duration::from_secs(1), 4);
        let key = "SPACE".into();
        let units = with_retry("list_units", policy, || source.list_units(&key))
            .await
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(source.call_count("list_units"), 3);
    }
}

//! Content source contract: the hierarchical tree the engine walks.
//!
//! A source yields partitions (spaces), content units (pages) and their
//! attachments. Implementations: [`HttpContentSource`] against a REST API
//! and [`MemorySource`] for tests and demo mode. Every call is individually
//! retry-wrapped by [`retry::with_retry`] at the engine boundary.

mod error;
mod http;
mod memory;
pub mod retry;

pub use error::{SourceError, SourceResult};
pub use http::HttpContentSource;
pub use memory::{MemorySource, MemorySourceBuilder};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use pagewarden_protocol::{Attachment, ContentUnit, Partition, PartitionKey};

/// The content tree the orchestrator walks. All operations are async and may
/// fail transiently; callers decide retry behavior via the error's
/// classification.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Partition metadata, or `None` when the key is unknown.
    async fn get_partition(&self, key: &PartitionKey) -> SourceResult<Option<Partition>>;

    /// Every known partition, in source order.
    async fn list_partitions(&self) -> SourceResult<Vec<Partition>>;

    /// Content units of one partition, in the source's stable order.
    async fn list_units(&self, key: &PartitionKey) -> SourceResult<Vec<ContentUnit>>;

    /// Attachment descriptors of one content unit.
    async fn list_attachments(&self, unit_id: &str) -> SourceResult<Vec<Attachment>>;

    /// Raw attachment bytes, or `None` when the attachment disappeared
    /// between listing and download.
    async fn download_attachment(
        &self,
        unit_id: &str,
        attachment_name: &str,
    ) -> SourceResult<Option<Vec<u8>>>;

    /// Units modified at or after the given instant (unix ms).
    async fn list_units_modified_since(
        &self,
        key: &PartitionKey,
        since_millis: i64,
    ) -> SourceResult<Vec<ContentUnit>>;

    /// Attachments modified at or after the given instant (unix ms).
    async fn list_attachments_modified_since(
        &self,
        key: &PartitionKey,
        since_millis: i64,
    ) -> SourceResult<Vec<Attachment>>;
}

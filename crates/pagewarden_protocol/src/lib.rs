//! Canonical types shared across the Pagewarden workspace.
//!
//! Everything that crosses a crate boundary lives here: scan identifiers,
//! the checkpoint status state machine, event kinds, findings and their
//! severity classification, the progress calculator, and engine defaults.

pub mod config;
pub mod defaults;
pub mod events;
pub mod progress;
pub mod severity;
pub mod types;

pub use config::WardenConfig;
pub use events::{EventPayload, ScanEvent, ScanEventKind};
pub use severity::{Severity, SeverityDelta};
pub use types::{
    Attachment, CheckpointRecord, ContentUnit, Finding, Partition, PartitionKey, ScanId,
    ScanStatus, UnknownLabel,
};

//! Core value types: identifiers, content-source records, checkpoint rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A stored label that names no known variant. Surfaces when a database row
/// written by a newer (or corrupted) schema is read back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {what}: '{value}'")]
pub struct UnknownLabel {
    pub what: &'static str,
    pub value: String,
}

impl UnknownLabel {
    pub fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

/// Identifier for one scan run. Wraps a UUID string so it stays cheap to
/// pass through SQL and JSON without conversion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(pub String);

impl ScanId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ScanId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Key of one independently-scanned sub-tree of the content source
/// (a space in wiki terms).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(pub String);

impl PartitionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Checkpoint status - lifecycle of one (scan, partition) pair.
///
/// `Completed` and `Failed` are terminal: once a checkpoint reaches either,
/// every later write for that pair is a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    #[default]
    Running,
    Paused,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "RUNNING",
            ScanStatus::Paused => "PAUSED",
            ScanStatus::Completed => "COMPLETED",
            ScanStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Whether a checkpoint currently in `self` accepts a write carrying
    /// `incoming`. Terminal states accept nothing; every non-terminal state
    /// accepts any incoming status (covers bootstrap, RUNNING -> RUNNING,
    /// RUNNING -> PAUSED and PAUSED -> RUNNING on resume).
    pub fn accepts(&self, _incoming: ScanStatus) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RUNNING" => Ok(ScanStatus::Running),
            "PAUSED" => Ok(ScanStatus::Paused),
            "COMPLETED" | "COMPLETE" => Ok(ScanStatus::Completed),
            "FAILED" => Ok(ScanStatus::Failed),
            _ => Err(UnknownLabel::new("scan status", s)),
        }
    }
}

/// Durable progress record for one (scan, partition) pair.
///
/// `last_unit_id` / `last_attachment` advance monotonically under
/// merge-on-write: a later write carrying `None` never clears a stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub scan_id: ScanId,
    pub partition_key: PartitionKey,
    pub last_unit_id: Option<String>,
    pub last_attachment: Option<String>,
    pub status: ScanStatus,
    /// 0..=100, non-decreasing within one run.
    pub progress: i64,
    /// Unix milliseconds.
    pub updated_at: i64,
}

impl CheckpointRecord {
    pub fn new(scan_id: ScanId, partition_key: PartitionKey, status: ScanStatus) -> Self {
        Self {
            scan_id,
            partition_key,
            last_unit_id: None,
            last_attachment: None,
            status,
            progress: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Partition metadata as reported by the content source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub key: PartitionKey,
    pub name: String,
}

/// One scannable item within a partition (a page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: String,
    pub title: String,
    pub partition_key: PartitionKey,
    /// Extracted plain text, already stripped of markup by the source client.
    pub body: String,
    /// Unix milliseconds of the last modification, when the source knows it.
    pub modified_at: Option<i64>,
}

/// Descriptor of a file attached to a content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub unit_id: String,
    pub name: String,
    /// Media type as reported by the source (e.g. "application/pdf").
    pub kind: String,
    pub modified_at: Option<i64>,
}

/// One detected sensitive-data instance within a content unit's text.
///
/// `raw` is only ever persisted inside an encrypted event payload; `masked`
/// is what subscribers and reports see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Detector type taxonomy entry, e.g. "EMAIL_ADDRESS", "AWS_SECRET_KEY".
    pub kind: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
    /// Which detector produced this finding.
    pub source: String,
    pub raw: String,
    pub masked: String,
}

impl Finding {
    /// Mask a detected value: first character kept, the rest replaced with
    /// `*`, length preserved up to 16 characters.
    pub fn mask(value: &str) -> String {
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return String::new();
        };
        let rest = chars.count().min(15);
        let mut masked = String::with_capacity(rest + 1);
        masked.push(first);
        for _ in 0..rest {
            masked.push('*');
        }
        masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            ScanStatus::Running,
            ScanStatus::Paused,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ScanStatus>().unwrap(), status);
        }
        let err = "bogus".parse::<ScanStatus>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown scan status: 'bogus'");
    }

    #[test]
    fn terminal_states_accept_nothing() {
        assert!(!ScanStatus::Completed.accepts(ScanStatus::Running));
        assert!(!ScanStatus::Failed.accepts(ScanStatus::Completed));
        assert!(ScanStatus::Running.accepts(ScanStatus::Paused));
        assert!(ScanStatus::Paused.accepts(ScanStatus::Running));
        assert!(ScanStatus::Running.accepts(ScanStatus::Running));
    }

    #[test]
    fn masking_preserves_first_char_and_caps_length() {
        assert_eq!(Finding::mask("alice@example.com"), "a***************");
        assert_eq!(Finding::mask("ab"), "a*");
        assert_eq!(Finding::mask(""), "");
    }
}

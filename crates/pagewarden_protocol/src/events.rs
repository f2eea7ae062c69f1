//! Scan event model: the typed records appended to the event log and pushed
//! to live subscribers.

use crate::types::{Finding, PartitionKey, ScanId, UnknownLabel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a scan event.
///
/// `Keepalive` is stream-only: the hub emits it on a timer for idle
/// subscribers and it is never written to the log, so log sequences stay
/// gapless without bookkeeping for timer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanEventKind {
    Start,
    UnitStart,
    Item,
    UnitComplete,
    Complete,
    Error,
    MultiComplete,
    Keepalive,
}

impl ScanEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanEventKind::Start => "start",
            ScanEventKind::UnitStart => "unit_start",
            ScanEventKind::Item => "item",
            ScanEventKind::UnitComplete => "unit_complete",
            ScanEventKind::Complete => "complete",
            ScanEventKind::Error => "error",
            ScanEventKind::MultiComplete => "multi_complete",
            ScanEventKind::Keepalive => "keepalive",
        }
    }

    /// Whether events of this kind are appended to the durable log.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, ScanEventKind::Keepalive)
    }
}

impl fmt::Display for ScanEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanEventKind {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ScanEventKind::Start),
            "unit_start" => Ok(ScanEventKind::UnitStart),
            "item" => Ok(ScanEventKind::Item),
            "unit_complete" => Ok(ScanEventKind::UnitComplete),
            "complete" => Ok(ScanEventKind::Complete),
            "error" => Ok(ScanEventKind::Error),
            "multi_complete" => Ok(ScanEventKind::MultiComplete),
            "keepalive" => Ok(ScanEventKind::Keepalive),
            _ => Err(UnknownLabel::new("event kind", s)),
        }
    }
}

/// Findings plus the contextual snippet that surrounds them. This is the
/// part of an event that gets encrypted before it touches the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub findings: Vec<Finding>,
    /// Short plain-text excerpt around the first finding, for display.
    pub snippet: Option<String>,
}

impl EventPayload {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.snippet.is_none()
    }
}

/// One typed result record produced during a scan.
///
/// The dispatcher splits each event into the synchronous checkpoint write
/// and the asynchronous log/counter/publish bundle; the log assigns `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub scan_id: ScanId,
    pub partition_key: PartitionKey,
    pub kind: ScanEventKind,
    pub unit_id: Option<String>,
    pub unit_title: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_kind: Option<String>,
    /// Cleartext payload while the event is in flight; encrypted at append.
    pub payload: EventPayload,
    /// Human-readable reason for `Error` events.
    pub error: Option<String>,
    /// Progress snapshot, 0..=100.
    pub progress: i64,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl ScanEvent {
    pub fn new(scan_id: ScanId, partition_key: PartitionKey, kind: ScanEventKind) -> Self {
        Self {
            scan_id,
            partition_key,
            kind,
            unit_id: None,
            unit_title: None,
            attachment_name: None,
            attachment_kind: None,
            payload: EventPayload::default(),
            error: None,
            progress: 0,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ScanEventKind::Complete | ScanEventKind::MultiComplete
        ) || (self.kind == ScanEventKind::Error && self.unit_id.is_none())
    }
}

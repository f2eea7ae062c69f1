//! Event construction for one (scan, partition) run.

use pagewarden_detector::Analysis;
use pagewarden_protocol::defaults::SNIPPET_CONTEXT_CHARS;
use pagewarden_protocol::{
    Attachment, ContentUnit, EventPayload, PartitionKey, ScanEvent, ScanEventKind, ScanId,
};

/// Stamps scan and partition identity onto every event of a run.
pub struct EventFactory {
    scan_id: ScanId,
    partition_key: PartitionKey,
}

impl EventFactory {
    pub fn new(scan_id: ScanId, partition_key: PartitionKey) -> Self {
        Self {
            scan_id,
            partition_key,
        }
    }

    fn event(&self, kind: ScanEventKind) -> ScanEvent {
        ScanEvent::new(self.scan_id.clone(), self.partition_key.clone(), kind)
    }

    pub fn start(&self) -> ScanEvent {
        self.event(ScanEventKind::Start)
    }

    pub fn unit_start(&self, unit: &ContentUnit, progress: i64) -> ScanEvent {
        let mut event = self.event(ScanEventKind::UnitStart);
        event.unit_id = Some(unit.id.clone());
        event.unit_title = Some(unit.title.clone());
        event.progress = progress;
        event
    }

    /// Findings for a unit's own text.
    pub fn item(&self, unit: &ContentUnit, analysis: &Analysis, progress: i64) -> ScanEvent {
        let mut event = self.event(ScanEventKind::Item);
        event.unit_id = Some(unit.id.clone());
        event.unit_title = Some(unit.title.clone());
        event.payload = payload_for(&unit.body, analysis);
        event.progress = progress;
        event
    }

    /// Findings for one attachment of a unit.
    pub fn attachment_item(
        &self,
        unit: &ContentUnit,
        attachment: &Attachment,
        text: &str,
        analysis: &Analysis,
        progress: i64,
    ) -> ScanEvent {
        let mut event = self.item(unit, analysis, progress);
        event.payload = payload_for(text, analysis);
        event.attachment_name = Some(attachment.name.clone());
        event.attachment_kind = Some(attachment.kind.clone());
        event
    }

    pub fn unit_complete(&self, unit: &ContentUnit, progress: i64) -> ScanEvent {
        let mut event = self.event(ScanEventKind::UnitComplete);
        event.unit_id = Some(unit.id.clone());
        event.unit_title = Some(unit.title.clone());
        event.progress = progress;
        event
    }

    /// Unit-level failure; the scan continues with the next unit.
    pub fn unit_error(&self, unit: &ContentUnit, reason: String, progress: i64) -> ScanEvent {
        let mut event = self.event(ScanEventKind::Error);
        event.unit_id = Some(unit.id.clone());
        event.unit_title = Some(unit.title.clone());
        event.error = Some(reason);
        event.progress = progress;
        event
    }

    /// Partition-level failure; terminal for this partition.
    pub fn partition_error(&self, reason: String, progress: i64) -> ScanEvent {
        let mut event = self.event(ScanEventKind::Error);
        event.error = Some(reason);
        event.progress = progress;
        event
    }

    pub fn complete(&self) -> ScanEvent {
        let mut event = self.event(ScanEventKind::Complete);
        event.progress = 100;
        event
    }
}

/// Scan-level roll-up emitted once after an all-partition run.
pub fn multi_complete(scan_id: ScanId) -> ScanEvent {
    let mut event = ScanEvent::new(scan_id, "*".into(), ScanEventKind::MultiComplete);
    event.progress = 100;
    event
}

fn payload_for(text: &str, analysis: &Analysis) -> EventPayload {
    EventPayload {
        findings: analysis.findings.clone(),
        snippet: snippet_around_first(text, analysis),
    }
}

/// Plain-text excerpt around the first finding, for display next to the
/// masked value. Bounds are snapped to char boundaries so multi-byte text
/// cannot panic the slice.
fn snippet_around_first(text: &str, analysis: &Analysis) -> Option<String> {
    let first = analysis.findings.first()?;
    let start = first.start.saturating_sub(SNIPPET_CONTEXT_CHARS);
    let end = (first.end + SNIPPET_CONTEXT_CHARS).min(text.len());
    let start = snap_to_char_boundary(text, start);
    let end = snap_to_char_boundary(text, end);
    if start >= end {
        return None;
    }
    Some(text[start..end].to_string())
}

fn snap_to_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewarden_protocol::Finding;

    fn unit(body: &str) -> ContentUnit {
        ContentUnit {
            id: "p1".to_string(),
            title: "Runbook".to_string(),
            partition_key: "OPS".into(),
            body: body.to_string(),
            modified_at: None,
        }
    }

    fn analysis_at(text: &str, start: usize, end: usize) -> Analysis {
        Analysis::from_findings(vec![Finding {
            kind: "EMAIL_ADDRESS".to_string(),
            start,
            end,
            score: 0.9,
            source: "test".to_string(),
            raw: text[start..end].to_string(),
            masked: Finding::mask(&text[start..end]),
        }])
    }

    #[test]
    fn snippet_surrounds_the_first_finding() {
        let body = format!("{}ops@example.com{}", "x".repeat(200), "y".repeat(200));
        let analysis = analysis_at(&body, 200, 215);
        let event = EventFactory::new("s".into(), "OPS".into()).item(&unit(&body), &analysis, 50);
        let snippet = event.payload.snippet.unwrap();
        assert!(snippet.contains("ops@example.com"));
        assert_eq!(snippet.len(), 15 + 2 * SNIPPET_CONTEXT_CHARS);
    }

    #[test]
    fn snippet_respects_multibyte_boundaries() {
        let body = format!("{}a@b.de", "\u{00e9}".repeat(50));
        let start = body.len() - 6;
        let analysis = analysis_at(&body, start, body.len());
        let event = EventFactory::new("s".into(), "OPS".into()).item(&unit(&body), &analysis, 10);
        assert!(event.payload.snippet.unwrap().ends_with("a@b.de"));
    }

    #[test]
    fn unit_error_is_not_terminal_for_the_scan() {
        let body = "plain";
        let event = EventFactory::new("s".into(), "OPS".into()).unit_error(
            &unit(body),
            "detector deadline exceeded".to_string(),
            30,
        );
        assert!(!event.is_terminal());
        assert!(event.error.unwrap().contains("deadline"));
    }
}

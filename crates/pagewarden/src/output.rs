//! Table and line rendering for command output.

use chrono::{TimeZone, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use pagewarden_db::{PartitionReport, PartitionSummary, StoredEvent};
use pagewarden_protocol::{CheckpointRecord, Finding, PartitionKey, ScanStatus};

fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table
}

fn timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub fn status_table(checkpoints: &[CheckpointRecord]) -> Table {
    let mut table = table();
    table.set_header(vec!["Partition", "Status", "Progress", "Last unit", "Updated"]);
    for checkpoint in checkpoints {
        table.add_row(vec![
            checkpoint.partition_key.to_string(),
            checkpoint.status.to_string(),
            format!("{}%", checkpoint.progress),
            checkpoint.last_unit_id.clone().unwrap_or_else(|| "-".to_string()),
            timestamp(checkpoint.updated_at),
        ]);
    }
    table
}

pub fn report_table(rows: &[PartitionReport]) -> Table {
    let mut table = table();
    table.set_header(vec![
        "Partition",
        "Status",
        "Progress",
        "Units",
        "Attachments",
        "Critical",
        "Moderate",
        "Low",
    ]);
    for row in rows {
        table.add_row(vec![
            row.partition_key.to_string(),
            row.status.to_string(),
            format!("{}%", row.progress),
            row.units_done.to_string(),
            row.attachments_done.to_string(),
            row.critical.to_string(),
            row.moderate.to_string(),
            row.low.to_string(),
        ]);
    }
    table
}

pub fn global_overview_table(rows: &[PartitionSummary]) -> Table {
    let mut table = table();
    table.set_header(vec!["Partition", "Scan", "Units", "Attachments", "Last event"]);
    for row in rows {
        table.add_row(vec![
            row.partition_key.to_string(),
            row.scan_id.to_string(),
            row.units_done.to_string(),
            row.attachments_done.to_string(),
            timestamp(row.last_event_at),
        ]);
    }
    table
}

pub fn scan_results_table(results: &[(PartitionKey, ScanStatus)]) -> Table {
    let mut table = table();
    table.set_header(vec!["Partition", "Outcome"]);
    for (key, status) in results {
        table.add_row(vec![key.to_string(), status.to_string()]);
    }
    table
}

/// True shows raw values (reveal path); false shows masked renderings.
pub fn findings_table(findings: &[Finding], raw: bool) -> Table {
    let mut table = table();
    table.set_header(vec!["Type", "Score", "Value", "Source"]);
    for finding in findings {
        let value = if raw {
            finding.raw.clone()
        } else {
            finding.masked.clone()
        };
        table.add_row(vec![
            finding.kind.clone(),
            format!("{:.2}", finding.score),
            value,
            finding.source.clone(),
        ]);
    }
    table
}

/// One log row rendered for `watch`.
pub fn event_line(event: &StoredEvent) -> String {
    let mut line = format!(
        "{} seq={:<4} {:<14} {}",
        timestamp(event.created_at),
        event.seq,
        event.kind.as_str(),
        event.partition_key,
    );
    if let Some(unit) = &event.unit_id {
        line.push_str(&format!(" unit={unit}"));
    }
    if let Some(attachment) = &event.attachment_name {
        line.push_str(&format!(" attachment={attachment}"));
    }
    if let Some(error) = &event.error {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line.push_str(&format!(" progress={}%", event.progress));
    line
}

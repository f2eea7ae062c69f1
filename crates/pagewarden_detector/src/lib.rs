//! Detector contract: the external sensitive-data analyzer.
//!
//! The engine calls [`Detector::analyze`] once per content unit under a
//! caller-supplied deadline. Deadline failures are distinguishable from
//! other service failures; neither is retried against the detector.

mod http;
mod local;
mod scripted;

pub use http::HttpDetector;
pub use local::LocalDetector;
pub use scripted::ScriptedDetector;

use async_trait::async_trait;
use pagewarden_protocol::Finding;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Detector failure taxonomy.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// The call did not finish within the caller's deadline.
    #[error("Detector deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The service answered with a failure.
    #[error("Detector service error: {0}")]
    Service(String),
}

pub type DetectorResult<T> = Result<T, DetectorError>;

/// Result of one analyze call: findings plus a per-type count summary.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub findings: Vec<Finding>,
    pub summary: HashMap<String, usize>,
}

impl Analysis {
    pub fn from_findings(findings: Vec<Finding>) -> Self {
        let mut summary: HashMap<String, usize> = HashMap::new();
        for finding in &findings {
            *summary.entry(finding.kind.clone()).or_insert(0) += 1;
        }
        Self { findings, summary }
    }
}

/// The external sensitive-data detector.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Analyze `text`, dropping findings below `threshold`. Implementations
    /// must respect `deadline` and fail with
    /// [`DetectorError::DeadlineExceeded`] when it elapses.
    async fn analyze(
        &self,
        text: &str,
        threshold: f64,
        deadline: Duration,
    ) -> DetectorResult<Analysis>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_per_kind() {
        let findings = vec![
            Finding {
                kind: "EMAIL_ADDRESS".to_string(),
                start: 0,
                end: 5,
                score: 0.9,
                source: "t".to_string(),
                raw: "a@b.c".to_string(),
                masked: "a****".to_string(),
            },
            Finding {
                kind: "EMAIL_ADDRESS".to_string(),
                start: 10,
                end: 15,
                score: 0.8,
                source: "t".to_string(),
                raw: "d@e.f".to_string(),
                masked: "d****".to_string(),
            },
        ];
        let analysis = Analysis::from_findings(findings);
        assert_eq!(analysis.summary.get("EMAIL_ADDRESS"), Some(&2));
    }
}

//! Scripted detector for engine tests: every call pops the next scripted
//! outcome, keyed by a substring of the analyzed text.

use crate::{Analysis, Detector, DetectorError, DetectorResult};
use async_trait::async_trait;
use pagewarden_protocol::Finding;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

enum Outcome {
    Findings(Vec<Finding>),
    Deadline,
    Failure(String),
}

#[derive(Default)]
pub struct ScriptedDetector {
    outcomes: Mutex<HashMap<String, Vec<Outcome>>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the analyzed text contains `needle`, answer with `findings`.
    pub fn findings_for(self, needle: &str, findings: Vec<Finding>) -> Self {
        self.push(needle, Outcome::Findings(findings));
        self
    }

    /// When the analyzed text contains `needle`, report a deadline overrun.
    pub fn deadline_for(self, needle: &str) -> Self {
        self.push(needle, Outcome::Deadline);
        self
    }

    /// When the analyzed text contains `needle`, fail with `message`.
    pub fn failure_for(self, needle: &str, message: &str) -> Self {
        self.push(needle, Outcome::Failure(message.to_string()));
        self
    }

    fn push(&self, needle: &str, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(needle.to_string())
            .or_default()
            .push(outcome);
    }

    /// Build a one-finding script entry.
    pub fn finding(kind: &str, raw: &str, score: f64) -> Finding {
        Finding {
            kind: kind.to_string(),
            start: 0,
            end: raw.len(),
            score,
            source: "scripted".to_string(),
            raw: raw.to_string(),
            masked: Finding::mask(raw),
        }
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn analyze(
        &self,
        text: &str,
        _threshold: f64,
        deadline: Duration,
    ) -> DetectorResult<Analysis> {
        let outcome = {
            let mut outcomes = self.outcomes.lock().unwrap();
            let key = outcomes
                .keys()
                .find(|needle| text.contains(needle.as_str()))
                .cloned();
            key.and_then(|key| {
                let queue = outcomes.get_mut(&key)?;
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            })
        };
        match outcome {
            Some(Outcome::Findings(findings)) => Ok(Analysis::from_findings(findings)),
            Some(Outcome::Deadline) => Err(DetectorError::DeadlineExceeded(deadline)),
            Some(Outcome::Failure(message)) => Err(DetectorError::Service(message)),
            None => Ok(Analysis::default()),
        }
    }
}

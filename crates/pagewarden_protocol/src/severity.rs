//! Severity classification for detector finding types.

use crate::types::Finding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity bucket of one finding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Moderate,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Moderate => "moderate",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed classification table mapping detector types to severity buckets.
///
/// Credentials and financial/government identifiers are critical; direct
/// personal identifiers are moderate; everything else (locations, dates,
/// URLs, ...) is low.
pub fn classify(kind: &str) -> Severity {
    match kind {
        "AWS_ACCESS_KEY" | "AWS_SECRET_KEY" | "API_KEY" | "PASSWORD" | "PRIVATE_KEY"
        | "CREDIT_CARD" | "IBAN" | "BANK_ACCOUNT" | "US_SSN" | "UK_NINO" | "PASSPORT"
        | "DRIVER_LICENSE" | "MEDICAL_RECORD" => Severity::Critical,
        "PERSON" | "EMAIL_ADDRESS" | "PHONE_NUMBER" | "ADDRESS" | "DATE_OF_BIRTH"
        | "IP_ADDRESS" | "USERNAME" => Severity::Moderate,
        _ => Severity::Low,
    }
}

/// Per-event counter delta derived from its findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityDelta {
    pub critical: i64,
    pub moderate: i64,
    pub low: i64,
}

impl SeverityDelta {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut delta = Self::default();
        for finding in findings {
            match classify(&finding.kind) {
                Severity::Critical => delta.critical += 1,
                Severity::Moderate => delta.moderate += 1,
                Severity::Low => delta.low += 1,
            }
        }
        delta
    }

    pub fn is_zero(&self) -> bool {
        self.critical == 0 && self.moderate == 0 && self.low == 0
    }

    pub fn total(&self) -> i64 {
        self.critical + self.moderate + self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(kind: &str) -> Finding {
        Finding {
            kind: kind.to_string(),
            start: 0,
            end: 1,
            score: 0.9,
            source: "test".to_string(),
            raw: "x".to_string(),
            masked: "x".to_string(),
        }
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify("AWS_SECRET_KEY"), Severity::Critical);
        assert_eq!(classify("US_SSN"), Severity::Critical);
        assert_eq!(classify("EMAIL_ADDRESS"), Severity::Moderate);
        assert_eq!(classify("URL"), Severity::Low);
        assert_eq!(classify("SOMETHING_NEW"), Severity::Low);
    }

    #[test]
    fn delta_sums_per_bucket() {
        let findings = vec![
            finding("CREDIT_CARD"),
            finding("EMAIL_ADDRESS"),
            finding("EMAIL_ADDRESS"),
            finding("URL"),
        ];
        let delta = SeverityDelta::from_findings(&findings);
        assert_eq!(delta.critical, 1);
        assert_eq!(delta.moderate, 2);
        assert_eq!(delta.low, 1);
        assert_eq!(delta.total(), 4);
        assert!(!delta.is_zero());
        assert!(SeverityDelta::default().is_zero());
    }
}

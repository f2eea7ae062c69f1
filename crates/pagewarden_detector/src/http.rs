//! HTTP detector client.

use crate::{Analysis, Detector, DetectorError, DetectorResult};
use async_trait::async_trait;
use pagewarden_protocol::Finding;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Client for a remote analyzer exposing `POST /analyze`.
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    score_threshold: f64,
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    findings: Vec<FindingDto>,
}

#[derive(Deserialize)]
struct FindingDto {
    entity_type: String,
    start: usize,
    end: usize,
    score: f64,
    #[serde(default)]
    analysis_source: Option<String>,
}

impl HttpDetector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn call(&self, text: &str, threshold: f64) -> DetectorResult<Analysis> {
        let url = format!("{}/analyze", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&AnalyzeRequest {
                text,
                score_threshold: threshold,
            })
            .send()
            .await
            .map_err(|e| DetectorError::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectorError::Service(format!(
                "analyze returned {status}: {body}"
            )));
        }

        // A malformed body is treated as "no findings" rather than a unit
        // failure, so one bad response does not poison a whole partition.
        let parsed: AnalyzeResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, "malformed detector response, treating as empty");
                AnalyzeResponse { findings: vec![] }
            }
        };

        let findings = parsed
            .findings
            .into_iter()
            .filter(|dto| dto.score >= threshold)
            .map(|dto| {
                let raw = text
                    .get(dto.start..dto.end)
                    .unwrap_or_default()
                    .to_string();
                let masked = Finding::mask(&raw);
                Finding {
                    kind: dto.entity_type,
                    start: dto.start,
                    end: dto.end,
                    score: dto.score,
                    source: dto.analysis_source.unwrap_or_else(|| "remote".to_string()),
                    raw,
                    masked,
                }
            })
            .collect();

        Ok(Analysis::from_findings(findings))
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn analyze(
        &self,
        text: &str,
        threshold: f64,
        deadline: Duration,
    ) -> DetectorResult<Analysis> {
        match tokio::time::timeout(deadline, self.call(text, threshold)).await {
            Ok(result) => result,
            Err(_) => Err(DetectorError::DeadlineExceeded(deadline)),
        }
    }
}

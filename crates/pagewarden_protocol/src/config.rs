//! Runtime configuration assembled by the CLI and handed to the engine.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Canonical system configuration used by the `pagewarden` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Content source base URL (e.g. `https://wiki.example.com/api`).
    pub source_url: Option<String>,
    /// Bearer token for the content source.
    pub source_token: Option<String>,
    /// Detector service base URL.
    pub detector_url: Option<String>,
    /// Passphrase the findings key is derived from.
    pub encryption_key: String,
    pub detector_threshold: f64,
    pub detector_deadline_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_attempts: u32,
    pub keepalive_secs: u64,
}

impl WardenConfig {
    pub fn new(db_path: PathBuf, encryption_key: String) -> Self {
        Self {
            db_path,
            source_url: None,
            source_token: None,
            detector_url: None,
            encryption_key,
            detector_threshold: defaults::DEFAULT_DETECTOR_THRESHOLD,
            detector_deadline_ms: defaults::DEFAULT_DETECTOR_DEADLINE_MS,
            retry_base_ms: defaults::DEFAULT_RETRY_BASE_MS,
            retry_max_attempts: defaults::DEFAULT_RETRY_MAX_ATTEMPTS,
            keepalive_secs: defaults::DEFAULT_KEEPALIVE_SECS,
        }
    }
}

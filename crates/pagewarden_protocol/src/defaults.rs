//! Canonical default values shared across the engine and CLI.

/// Default database path relative to the Pagewarden home directory.
pub const DEFAULT_DB_FILE: &str = "pagewarden.sqlite3";

/// Detector confidence threshold below which findings are dropped.
pub const DEFAULT_DETECTOR_THRESHOLD: f64 = 0.5;

/// Deadline for one detector call, in milliseconds.
pub const DEFAULT_DETECTOR_DEADLINE_MS: u64 = 30_000;

/// Base delay for content-source retry backoff, in milliseconds (1s, 2s, 4s, ...).
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;

/// Maximum content-source attempts (initial call + retries).
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;

/// Interval between keepalive events on idle stream subscriptions, in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Characters of context captured around the first finding of a unit.
pub const SNIPPET_CONTEXT_CHARS: usize = 80;

/// Audit rows older than this many days are eligible for purge.
pub const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;

//! Content-source error taxonomy with retry classification.

use thiserror::Error;

pub type SourceResult<T> = Result<T, SourceError>;

/// Errors from the content source.
///
/// The variants carry enough to decide retries without downcasting:
/// server errors and rate limits are transient, not-found is terminal,
/// everything else is permanent.
#[derive(Error, Debug)]
pub enum SourceError {
    /// HTTP-level failure with a status code.
    #[error("Source returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Transport failure before any status was received.
    #[error("Source transport error: {0}")]
    Transport(String),

    /// The requested partition/unit does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body could not be parsed.
    #[error("Malformed source response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether a retry may succeed. Server errors (5xx), rate limits (429)
    /// and transport failures are transient; not-found and malformed
    /// responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Status { status, .. } => *status >= 500 || *status == 429,
            SourceError::Transport(_) => true,
            SourceError::NotFound(_) | SourceError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.as_u16() == 404 {
                return SourceError::NotFound(err.to_string());
            }
            return SourceError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return SourceError::Malformed(err.to_string());
        }
        SourceError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(SourceError::Status {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(SourceError::Status {
            status: 429,
            message: String::new()
        }
        .is_transient());
        assert!(SourceError::Transport("reset".to_string()).is_transient());
        assert!(!SourceError::Status {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!SourceError::NotFound("SPACE".to_string()).is_transient());
        assert!(!SourceError::Malformed("bad json".to_string()).is_transient());
    }
}

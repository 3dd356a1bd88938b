use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal pipeline errors. Everything else is absorbed and reported as a
/// [`BackendFailure`] inside the aggregate report.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no backend responded ({attempted} attempted)")]
    NoBackendsResponded {
        attempted: usize,
        failures: Vec<BackendFailure>,
    },
}

/// Error from a single backend call.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{backend} timed out after {}s", after.as_secs())]
    Timeout { backend: String, after: Duration },

    #[error("{backend} query failed: {source:#}")]
    QueryFailed {
        backend: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{backend} returned an empty response")]
    EmptyResponse { backend: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::Timeout { .. } => FailureKind::Timeout,
            BackendError::EmptyResponse { .. } => FailureKind::EmptyResponse,
            BackendError::QueryFailed { .. } | BackendError::UnknownBackend(_) => {
                FailureKind::QueryFailed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    QueryFailed,
    EmptyResponse,
    DeadlineExceeded,
}

/// Pipeline stage in which an absorbed failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Query,
    Extraction,
    Sentiment,
}

/// A failure that was absorbed: the backend simply contributes nothing for
/// that stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend: String,
    pub stage: FailureStage,
    pub kind: FailureKind,
    pub message: String,
}

impl BackendFailure {
    pub fn from_error(backend: &str, stage: FailureStage, err: &BackendError) -> Self {
        Self {
            backend: backend.to_string(),
            stage,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn deadline(backend: &str, stage: FailureStage) -> Self {
        Self {
            backend: backend.to_string(),
            stage,
            kind: FailureKind::DeadlineExceeded,
            message: "pipeline deadline reached before this backend finished".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_kinds() {
        let timeout = BackendError::Timeout {
            backend: "openai".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(timeout.kind(), FailureKind::Timeout);
        assert_eq!(timeout.to_string(), "openai timed out after 30s");

        let failed = BackendError::QueryFailed {
            backend: "google".into(),
            source: anyhow::anyhow!("HTTP 500"),
        };
        assert_eq!(failed.kind(), FailureKind::QueryFailed);
        assert!(failed.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_failure_from_error_keeps_message() {
        let err = BackendError::EmptyResponse {
            backend: "anthropic".into(),
        };
        let failure = BackendFailure::from_error("anthropic", FailureStage::Query, &err);
        assert_eq!(failure.kind, FailureKind::EmptyResponse);
        assert_eq!(failure.stage, FailureStage::Query);
        assert!(failure.message.contains("empty response"));
    }

    #[test]
    fn test_no_backends_message() {
        let err = PipelineError::NoBackendsResponded {
            attempted: 3,
            failures: vec![],
        };
        assert_eq!(err.to_string(), "no backend responded (3 attempted)");
    }
}

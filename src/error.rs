//! Error types for a3s-sentinel

use crate::types::{ApprovalStatus, SourceKind};
use thiserror::Error;

/// Errors that can occur in the sentinel
#[derive(Debug, Error)]
pub enum SentinelError {
    /// Raw event is missing a required field or carries an invalid one
    #[error("Malformed {source_kind} event: {reason}")]
    MalformedEvent {
        source_kind: SourceKind,
        reason: String,
    },

    /// Approval id is unknown to the workflow
    #[error("Approval not found: {0}")]
    ApprovalNotFound(String),

    /// Approval was already resolved and cannot change again
    #[error("Approval '{id}' already resolved as {status}")]
    ApprovalAlreadyResolved { id: String, status: ApprovalStatus },

    /// External lookup did not answer within its deadline
    #[error("Lookup timed out: {0}")]
    LookupTimeout(String),

    /// External lookup returned an error
    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse failure
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SentinelError {
    /// Shorthand for a malformed-event rejection
    pub fn malformed(source_kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            source_kind,
            reason: reason.into(),
        }
    }
}

/// Result type alias for sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;

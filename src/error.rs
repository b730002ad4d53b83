//! Error types for the Storage Container Manager
//!
//! Metadata errors (unknown node, pipeline or container) are local and
//! final. Only `InsufficientNodes` depends on cluster health and may succeed
//! later once more datanodes register; the core never retries on its own.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Metadata Errors
    // =========================================================================
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Pipeline not found: {pipeline_id}")]
    PipelineNotFound { pipeline_id: String },

    #[error("Container not found: {container_id}")]
    ContainerNotFound { container_id: u64 },

    // =========================================================================
    // Placement Errors
    // =========================================================================
    #[error("Insufficient nodes: requested {requested}, eligible {available}")]
    InsufficientNodes { requested: usize, available: usize },

    #[error("Invalid replication: {0}")]
    InvalidReplication(String),

    #[error("Invalid state for {entity}: {reason}")]
    InvalidState { entity: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a caller may do after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry once cluster state changes, no sooner than the given delay
    RetryAfter(Duration),
    /// The request cannot succeed as issued
    NoRetry,
}

impl Error {
    /// Determine what a caller should do about this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // More datanodes may register in the meantime
            Error::InsufficientNodes { .. } => ErrorAction::RetryAfter(Duration::from_secs(30)),
            _ => ErrorAction::NoRetry,
        }
    }

    /// Check if this error is retryable from the caller's perspective
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRetry)
    }

    /// Check if this error reports an unknown entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NodeNotFound { .. }
                | Error::PipelineNotFound { .. }
                | Error::ContainerNotFound { .. }
        )
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::InsufficientNodes {
            requested: 3,
            available: 1,
        };
        assert_eq!(err.action(), ErrorAction::RetryAfter(Duration::from_secs(30)));
        assert!(err.is_retryable());

        let err = Error::PipelineNotFound {
            pipeline_id: "5c1b0d4e-0000-4000-8000-000000000000".into(),
        };
        assert_eq!(err.action(), ErrorAction::NoRetry);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_family() {
        assert!(Error::ContainerNotFound { container_id: 7 }.is_not_found());
        assert!(Error::NodeNotFound { node_id: "n".into() }.is_not_found());
        assert!(!Error::Configuration("bad".into()).is_not_found());
    }

    #[test]
    fn test_config_parse_errors_are_yaml() {
        let err = crate::config::ScmConfig::from_yaml("placement: [unclosed").unwrap_err();
        assert!(matches!(err, Error::YamlParse(_)));
        assert_eq!(err.action(), ErrorAction::NoRetry);
    }
}

//! Error types for query evaluation and mutation.

use std::fmt;
use thiserror::Error;

/// Failure classes reported by a [`GraphBackend`](crate::backend::GraphBackend).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The store rejected the request for exceeding provisioned throughput.
    ThroughputExceeded,
    /// A conditional write lost an optimistic-concurrency race.
    ConcurrencyConflict,
    /// The request never reached the store or the response was lost.
    Transport,
    /// The store rejected the request as malformed.
    Validation,
    /// Any other store-side failure.
    Internal,
}

impl BackendErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ThroughputExceeded | Self::ConcurrencyConflict | Self::Transport
        )
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ThroughputExceeded => "throughput exceeded",
            Self::ConcurrencyConflict => "concurrency conflict",
            Self::Transport => "transport",
            Self::Validation => "validation",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors raised while building, evaluating or mutating a graph query.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Invariant violation reachable only through caller misuse.
    #[error("operation error: {0}")]
    Operation(String),

    /// A structural shape the evaluator cannot express.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A cursor string that does not decode.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A failure reported by the backend store.
    #[error("backend error ({kind}): {message}")]
    Backend {
        /// Classification used for retry decisions.
        kind: BackendErrorKind,
        /// Store-provided detail.
        message: String,
    },

    /// The request was cancelled cooperatively.
    #[error("operation was cancelled")]
    Cancelled,

    /// The table schema could not be loaded.
    #[error("schema unavailable: {0}")]
    Schema(String),

    /// Errors surfaced from caller-supplied code such as predicates.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GraphError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported(message.into())
    }

    pub fn backend(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self::Backend {
            kind,
            message: message.into(),
        }
    }

    /// Whether the mutation orchestrator may retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend { kind, .. } => kind.is_transient(),
            _ => false,
        }
    }
}

/// Result type for evaluator operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = GraphError::operation("missing result");
        assert_eq!(err.to_string(), "operation error: missing result");

        let err = GraphError::backend(BackendErrorKind::ThroughputExceeded, "slow down");
        assert!(err.to_string().contains("throughput exceeded"));
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn transient_classification() {
        assert!(GraphError::backend(BackendErrorKind::ThroughputExceeded, "").is_transient());
        assert!(GraphError::backend(BackendErrorKind::ConcurrencyConflict, "").is_transient());
        assert!(GraphError::backend(BackendErrorKind::Transport, "").is_transient());
        assert!(!GraphError::backend(BackendErrorKind::Validation, "").is_transient());
        assert!(!GraphError::operation("x").is_transient());
        assert!(!GraphError::Cancelled.is_transient());
    }

    #[test]
    fn anyhow_is_wrapped_transparently() {
        let err: GraphError = anyhow::anyhow!("predicate blew up").into();
        assert_eq!(err.to_string(), "predicate blew up");
    }
}

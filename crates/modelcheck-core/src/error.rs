//! Error types for modelcheck

use std::time::Duration;

/// Result type alias using modelcheck's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for modelcheck operations
///
/// Every variant is recoverable at the request boundary: the orchestrator turns
/// it into an invalid [`ValidationResult`](crate::ValidationResult) whose
/// message is the variant's `Display` text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Scratch storage could not be created
    #[error("failed to allocate scratch directory: {0}")]
    Allocation(String),

    /// Download failed (DNS, connect, HTTP status, body read)
    #[error("failed to download model artifact: {0}")]
    Network(String),

    /// Downloaded byte count differs from the declared size
    #[error("downloaded model file size {actual} does not match declared size {declared}")]
    SizeMismatch { actual: u64, declared: u64 },

    /// Download was cut short because it already exceeded the declared size
    #[error(
        "downloaded model file size exceeds declared size {declared} (received at least {received} bytes)"
    )]
    SizeExceeded { received: u64, declared: u64 },

    /// Archive cannot be unpacked
    #[error("corrupt model archive: {0}")]
    CorruptArchive(String),

    /// No validator is registered for the requested family
    #[error("unsupported model family: {0}")]
    UnsupportedFamily(String),

    /// Family-specific validator rejected the content
    #[error("{0}")]
    ModelStructure(String),

    /// Worker process could not be created or did not report back
    #[error("graph worker failure: {0}")]
    WorkerSpawn(String),

    /// Releasing a resource failed
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// URL rejected by the egress policy
    #[error("artifact url rejected: {0}")]
    EgressDenied(String),

    /// Request fields are unusable before any work starts
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A stage exceeded its deadline
    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    /// The caller went away
    #[error("validation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new allocation error
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Create a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new corrupt archive error
    pub fn corrupt_archive(msg: impl Into<String>) -> Self {
        Self::CorruptArchive(msg.into())
    }

    /// Create a new model structure error
    pub fn model_structure(msg: impl Into<String>) -> Self {
        Self::ModelStructure(msg.into())
    }

    /// Create a new worker spawn error
    pub fn worker_spawn(msg: impl Into<String>) -> Self {
        Self::WorkerSpawn(msg.into())
    }

    /// Create a new cleanup error
    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::Cleanup(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable snake_case label for logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Allocation(_) => "allocation",
            Self::Network(_) => "network",
            Self::SizeMismatch { .. } | Self::SizeExceeded { .. } => "size_mismatch",
            Self::CorruptArchive(_) => "corrupt_archive",
            Self::UnsupportedFamily(_) => "unsupported_family",
            Self::ModelStructure(_) => "model_structure",
            Self::WorkerSpawn(_) => "worker_spawn",
            Self::Cleanup(_) => "cleanup",
            Self::EgressDenied(_) => "egress_denied",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_cites_both_sizes() {
        let err = Error::SizeMismatch {
            actual: 117_614,
            declared: 62_623_947,
        };
        let msg = err.to_string();
        assert!(msg.contains("117614"));
        assert!(msg.contains("62623947"));
        assert_eq!(err.kind(), "size_mismatch");
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout {
            stage: "fetch",
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "fetch timed out after 30s");
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_model_structure_is_verbatim() {
        let err = Error::model_structure("missing required companion file");
        assert_eq!(err.to_string(), "missing required companion file");
    }

    #[test]
    fn test_io_errors_convert() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), "io");
        assert_eq!(Error::config("bad").kind(), "config");
        assert_eq!(Error::internal("oops").kind(), "internal");
    }
}

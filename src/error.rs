//! Crate-wide error type with stable string codes.
//!
//! Every fallible public API returns [`EngineError`]. Each variant maps to a
//! stable code via [`EngineError::code`] so hosts can dispatch on errors
//! without parsing messages.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument `{field}` = `{value}`: {reason}")]
    InvalidArgument {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no snapshot is loaded; index the vault first")]
    NotIndexed,

    #[error("an index build is already running (started {build_started_at})")]
    IndexBusy { build_started_at: DateTime<Utc> },

    #[error("snapshot {snapshot_id} is corrupt: {reason}")]
    IndexCorrupt {
        snapshot_id: String,
        reason: String,
        missing_files: Vec<String>,
    },

    #[error("{operation} failed for {path}: {source}")]
    IoOp {
        path: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding model unavailable: {reason} ({url})")]
    ModelDownloadFailed { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Attach a path and operation name to an I/O failure.
    pub fn io_op(path: impl Into<String>, operation: &'static str, source: std::io::Error) -> Self {
        Self::IoOp {
            path: path.into(),
            operation,
            source,
        }
    }

    #[must_use]
    pub fn invalid_argument(
        field: &'static str,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for host-side dispatch.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotIndexed => "NOT_INDEXED",
            Self::IndexBusy { .. } => "INDEX_BUSY",
            Self::IndexCorrupt { .. } => "INDEX_CORRUPT",
            Self::IoOp { .. } | Self::Io(_) => "IO_ERROR",
            Self::ModelDownloadFailed { .. } => "MODEL_DOWNLOAD_FAILED",
            Self::Sqlite(_) | Self::Json(_) | Self::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            EngineError::invalid_argument("top_k", 0, "must be >= 1").code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(EngineError::NotIndexed.code(), "NOT_INDEXED");
        assert_eq!(
            EngineError::IndexCorrupt {
                snapshot_id: "s1".into(),
                reason: "missing shard".into(),
                missing_files: vec!["shards/shard_001.ann".into()],
            }
            .code(),
            "INDEX_CORRUPT"
        );
        let io = EngineError::io_op("/tmp/x", "read", std::io::Error::other("boom"));
        assert_eq!(io.code(), "IO_ERROR");
    }

    #[test]
    fn test_messages_carry_context() {
        let err = EngineError::invalid_argument("max_excerpt_chars", 7, "below minimum of 200");
        let msg = err.to_string();
        assert!(msg.contains("max_excerpt_chars"));
        assert!(msg.contains("below minimum"));
    }
}

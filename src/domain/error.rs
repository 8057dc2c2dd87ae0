use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed execution.
///
/// `RowCountMismatch` is a correctness violation, not a performance failure:
/// the query succeeded but returned a different number of rows than the
/// partition keys or sibling strategies promised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectivityFailure,
    TimeoutFailure,
    ResourceExhaustion,
    ProtocolFailure,
    /// Server rejected the statement (syntax, missing relation, permissions).
    QueryFailure,
    RowCountMismatch,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectivityFailure => "ConnectivityFailure",
            Self::TimeoutFailure => "TimeoutFailure",
            Self::ResourceExhaustion => "ResourceExhaustion",
            Self::ProtocolFailure => "ProtocolFailure",
            Self::QueryFailure => "QueryFailure",
            Self::RowCountMismatch => "RowCountMismatch",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StrategyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StrategyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectivityFailure, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutFailure, message)
    }

    pub fn resource_exhaustion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhaustion, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolFailure, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueryFailure, message)
    }

    pub fn row_count_mismatch(expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorKind::RowCountMismatch,
            format!("expected {} rows, got {}", expected, actual),
        )
    }

    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

/// Serializable form of a [`StrategyError`] stored on a result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = StrategyError::timeout("canceling statement due to statement timeout");
        assert_eq!(
            err.to_string(),
            "TimeoutFailure: canceling statement due to statement timeout"
        );
    }

    #[test]
    fn row_count_mismatch_reports_both_counts() {
        let err = StrategyError::row_count_mismatch(1000, 998);
        assert_eq!(err.kind, ErrorKind::RowCountMismatch);
        assert!(err.message.contains("1000"));
        assert!(err.message.contains("998"));
    }

    #[test]
    fn descriptor_preserves_kind_and_message() {
        let err = StrategyError::connectivity("connection refused");
        let descriptor = err.descriptor();
        assert_eq!(descriptor.kind, ErrorKind::ConnectivityFailure);
        assert_eq!(descriptor.message, "connection refused");
    }

    #[test]
    fn descriptor_serializes_kind_as_snake_case() {
        let descriptor = StrategyError::resource_exhaustion("out of memory").descriptor();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["kind"], "resource_exhaustion");
        assert_eq!(json["message"], "out of memory");
    }
}

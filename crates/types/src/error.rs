use thiserror::Error;

/// Failures shared by the ingest and retrieval paths.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Input could not be parsed as JSON after repair.
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    /// The content store could not be reached or rejected the call.
    #[error("content store unavailable: {0}")]
    StoreUnavailable(String),
    /// The announcement transport could not be reached or rejected the call.
    #[error("announcement channel unavailable: {0}")]
    ChannelUnavailable(String),
    /// The content store has no document for the requested identifier.
    #[error("content not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RelayError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        RelayError::MalformedDocument(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        RelayError::StoreUnavailable(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        RelayError::ChannelUnavailable(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RelayError::NotFound(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        RelayError::InvalidInput(msg.into())
    }

    /// Stable label used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::MalformedDocument(_) => "malformed_document",
            RelayError::StoreUnavailable(_) => "store_unavailable",
            RelayError::ChannelUnavailable(_) => "channel_unavailable",
            RelayError::NotFound(_) => "not_found",
            RelayError::InvalidInput(_) => "invalid_input",
        }
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(RelayError::malformed("x").kind(), "malformed_document");
        assert_eq!(RelayError::store("x").kind(), "store_unavailable");
        assert_eq!(RelayError::channel("x").kind(), "channel_unavailable");
        assert_eq!(RelayError::not_found("x").kind(), "not_found");
        assert_eq!(RelayError::invalid("x").kind(), "invalid_input");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = RelayError::not_found("QmMissing");
        assert_eq!(err.to_string(), "content not found: QmMissing");
    }
}

//! Error types for storage and the aggregation pipeline.

use thiserror::Error;

/// Failure talking to the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode document {document}: {reason}")]
    Decode { document: String, reason: String },

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("in-memory store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of an aggregation pass.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// The classifier request failed or returned an error payload.
    #[error("classifier call failed: {0}")]
    ClassifierCall(String),

    /// The classifier answered with something unusable.
    #[error("classifier response invalid: {0}")]
    ClassifierResponse(String),

    /// A candidate violated the output contract.
    #[error("candidate {disaster_id} rejected: {reason}")]
    Validation { disaster_id: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The report window cannot be computed from the configured length.
    #[error("invalid report window: {0}")]
    Window(String),

    #[error("aggregation already in progress (lease held by {holder})")]
    AlreadyRunning { holder: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_is_transparent() {
        let err = AggregateError::from(StoreError::Status {
            status: 503,
            body: "unavailable".to_string(),
        });
        assert_eq!(err.to_string(), "store returned 503: unavailable");
    }

    #[test]
    fn test_validation_message_names_candidate() {
        let err = AggregateError::Validation {
            disaster_id: "disaster_flood_x".to_string(),
            reason: "unknown severity 'low'".to_string(),
        };
        assert!(err.to_string().contains("disaster_flood_x"));
    }
}

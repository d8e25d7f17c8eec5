//! Error types for the simple store.

use thiserror::Error;

/// Result type for simple store operations.
pub type Result<T> = std::result::Result<T, SimpleStoreError>;

/// Errors specific to the simple store implementation.
#[derive(Error, Debug, Clone)]
pub enum SimpleStoreError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Failed to query: {0}")]
    Query(String),

    #[error("Failed to get distinct values: {0}")]
    Distinct(String),

    #[error("Failed to count: {0}")]
    Count(String),

    #[error("Failed to update: {0}")]
    Update(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SimpleStoreError::Query("injected failure".to_string()).to_string(),
            "Failed to query: injected failure"
        );
        assert_eq!(
            SimpleStoreError::Update("missing key task_id".to_string()).to_string(),
            "Failed to update: missing key task_id"
        );
    }
}

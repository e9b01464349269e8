//! Failure taxonomy for the request path.
//!
//! None of these reach the HTTP caller as a status code except
//! [`BridgeError::MalformedRequest`]. Backend failures become sentinel text
//! inside a normal completion, retrieval failures shrink the context block.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The backend process exceeded its wall-clock budget.
    #[error("Request timed out after {}s", .0.as_secs())]
    BackendTimeout(Duration),

    /// Launch failure, I/O failure, or non-zero exit of the backend.
    #[error("{0}")]
    BackendExecution(String),

    /// The store is not open, or one collection lookup failed.
    #[error("retrieval unavailable for '{collection}': {reason}")]
    RetrievalUnavailable { collection: String, reason: String },

    /// The request body is not JSON, or a field has the wrong type.
    #[error("{0}")]
    MalformedRequest(String),
}

impl BridgeError {
    /// Text shown to the caller in place of a completion.
    pub fn sentinel(&self) -> String {
        format!("[Error: {}]", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_sentinel_matches_wire_text() {
        let err = BridgeError::BackendTimeout(Duration::from_secs(300));
        assert_eq!(err.sentinel(), "[Error: Request timed out after 300s]");
    }

    #[test]
    fn execution_sentinel_embeds_detail() {
        let err = BridgeError::BackendExecution("No such file or directory (os error 2)".into());
        assert_eq!(
            err.sentinel(),
            "[Error: No such file or directory (os error 2)]"
        );
    }
}

//! Error types for the domain layer

use thiserror::Error;

/// Errors raised while building workflow documents
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The job graph is not a JSON object keyed by node id
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    /// The workflow JSON could not be parsed
    #[error("Workflow JSON parse error: {0}")]
    Parse(String),
}

impl DomainError {
    pub fn invalid_graph(msg: impl Into<String>) -> Self {
        Self::InvalidGraph(msg.into())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

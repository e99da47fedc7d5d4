//! Error types for the update orchestrator.

use crate::config::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Registry error: {0}")]
    Registry(String),
    #[error("Update store error: {operation} - {reason}")]
    Store { operation: String, reason: String },
    #[error("Entity catalog error: {0}")]
    Catalog(String),
    #[error("Persistence error for {data_kind}: {reason}")]
    Persistence { data_kind: String, reason: String },
    #[error("Upstream error from {upstream}: {reason}")]
    Upstream { upstream: String, reason: String },
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn store(operation: impl Into<String>, reason: impl ToString) -> Self {
        OrchestratorError::Store {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ConfigurationError> for OrchestratorError {
    fn from(error: ConfigurationError) -> Self {
        OrchestratorError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::Internal(format!("JSON serialization error: {error}"))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::store("sql", err)
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

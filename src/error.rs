//! Error types for the orchestration core.
//!
//! `AreaError` is reserved for infrastructure faults (store, catalog,
//! configuration, invalid transitions). Expected pipeline outcomes such as
//! duplicates, unmatched events or lost claims are plain values, not errors.

use crate::config::ConfigurationError;
use crate::state_machine::errors::StateMachineError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AreaError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Catalog error: {0}")]
    CatalogError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AreaError {
    fn from(err: sqlx::Error) -> Self {
        AreaError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AreaError {
    fn from(error: serde_json::Error) -> Self {
        AreaError::SerializationError(format!("JSON serialization error: {error}"))
    }
}

impl From<StateMachineError> for AreaError {
    fn from(error: StateMachineError) -> Self {
        AreaError::StateTransitionError(error.to_string())
    }
}

impl From<ConfigurationError> for AreaError {
    fn from(error: ConfigurationError) -> Self {
        AreaError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AreaError>;

//! Error type for store, dataset and node operations.
//!
//! Every variant maps onto a terminal [`StatusCode`]; its `Display` text is
//! the diagnostic message handed to callbacks.

use thiserror::Error;

use crate::status::StatusCode;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("block not found: {digest}")]
    NotFound { digest: String },

    #[error("manifest not found: {cid}")]
    ManifestNotFound { cid: String },

    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("storage quota exceeded: {needed} bytes needed, {available} bytes available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("corrupt block {digest}: content hashes to {actual}")]
    Corrupt { digest: String, actual: String },

    #[error("invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("session error: {message}")]
    Session { message: String },

    #[error("operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("cannot {operation}: node is {state}")]
    NodeState { operation: String, state: String },

    #[error("operation failed: {message}")]
    Failed { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("index error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(digest: impl ToString) -> Self {
        StoreError::NotFound {
            digest: digest.to_string(),
        }
    }

    pub fn manifest_not_found(cid: impl Into<String>) -> Self {
        StoreError::ManifestNotFound { cid: cid.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
        }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        StoreError::Session {
            message: message.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        StoreError::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn node_state(operation: impl Into<String>, state: impl ToString) -> Self {
        StoreError::NodeState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        StoreError::Failed {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        StoreError::Config {
            message: message.into(),
        }
    }

    /// Terminal status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::Cancelled { .. } => StatusCode::Cancelled,
            _ => StatusCode::Err,
        }
    }
}

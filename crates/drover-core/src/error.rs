//! Unified error types for Drover

use thiserror::Error;

/// Unified error type for all Drover operations
#[derive(Error, Debug)]
pub enum DroverError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Task lifecycle errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition for task {task_id}: cannot {action} while {state}")]
    InvalidTransition {
        task_id: String,
        state: String,
        action: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Model provider errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Model API error: {0}")]
    Api(String),

    #[error("Model API limit: {0}")]
    ApiLimit(String),

    // Outbound HTTP errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Rate limited after {attempts} attempts: {last_error}")]
    RateLimited { attempts: u32, last_error: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl DroverError {
    /// Whether this error came from the network layer rather than the caller
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DroverError::Network(_) | DroverError::Http { .. } | DroverError::RateLimited { .. }
        )
    }
}

/// Result type alias using DroverError
pub type Result<T> = std::result::Result<T, DroverError>;

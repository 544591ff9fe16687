//! WolfBalance Error Types

use thiserror::Error;

/// Result type alias for WolfBalance operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfBalance error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid replica list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid connection string segment '{0}'")]
    ConnectionSpec(String),

    #[error("Unknown strategy type: {0}")]
    UnknownStrategy(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    // Connectivity errors
    #[error("Connection failed to {replica}: {reason}")]
    ConnectionFailed { replica: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error means the replica could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::ConnectionFailed { .. } => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Check if this error is fatal at startup
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::Json(_)
                | Error::ConnectionSpec(_)
                | Error::UnknownStrategy(_)
        )
    }
}

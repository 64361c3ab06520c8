use thiserror::Error;

/// Main error type for the governance engine
#[derive(Error, Debug)]
pub enum QuorumError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // Round errors
    #[error("No quorum: {responded} agents responded, {required} required")]
    NoQuorum { responded: usize, required: usize },

    // Policy gate errors
    #[error("Ruleset integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Ruleset amendment is disabled outside amendment mode")]
    AmendmentDisabled,

    // Market data errors
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl QuorumError {
    /// Failures of a data source that a bounded retry may clear.
    ///
    /// Logic errors are never transient: retrying them only repeats the bug.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QuorumError::DataUnavailable(_) | QuorumError::Database(_) | QuorumError::Io(_)
        )
    }

    /// The only error class allowed to halt the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuorumError::IntegrityViolation(_))
    }
}

/// Result type alias for QuorumError
pub type Result<T> = std::result::Result<T, QuorumError>;

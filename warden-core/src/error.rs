//! Error types for warden core operations

/// Result type for warden core operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Error types for the descriptor table, protocol and configuration layers
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A descriptor table entry is inconsistent
    #[error("Invalid agent descriptor: {0}")]
    InvalidDescriptor(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for WardenError {
    fn from(s: String) -> Self {
        WardenError::Other(s)
    }
}

impl From<&str> for WardenError {
    fn from(s: &str) -> Self {
        WardenError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for WardenError {
    fn from(err: anyhow::Error) -> Self {
        WardenError::Other(err.to_string())
    }
}

impl From<figment::Error> for WardenError {
    fn from(err: figment::Error) -> Self {
        WardenError::Configuration(err.to_string())
    }
}

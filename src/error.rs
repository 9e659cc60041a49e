//! myconverge Error Types

use thiserror::Error;

/// Result type alias for myconverge operations
pub type Result<T> = std::result::Result<T, Error>;

/// myconverge error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Master host must be specified when configuring a slave")]
    MissingMasterHost,

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    // Host errors
    #[error("Command `{program}` failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Host error: {0}")]
    Host(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error is worth retrying in a later convergence pass
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::QueryExecution(_) | Error::CommandFailed { .. }
        )
    }

    /// Check if this error comes from missing or invalid input rather than
    /// from the host or the database
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ConfigParse(_) | Error::MissingMasterHost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::MissingMasterHost.is_input_error());
        assert!(!Error::MissingMasterHost.is_retryable());

        let failed = Error::CommandFailed {
            program: "mysql".into(),
            status: "exit status: 1".into(),
            stderr: "ERROR 2002".into(),
        };
        assert!(failed.is_retryable());
        assert!(!failed.is_input_error());
        assert!(failed.to_string().contains("ERROR 2002"));
    }
}

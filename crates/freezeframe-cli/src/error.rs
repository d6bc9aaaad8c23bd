//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// At least one scenario failed
    #[error("{failed} of {total} scenario(s) failed")]
    ScenariosFailed {
        /// Failed scenarios
        failed: usize,
        /// Scenarios run
        total: usize,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Freezeframe library error
    #[error("{0}")]
    Freeze(#[from] freezeframe::FreezeError),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            CliError::config("no browser").to_string(),
            "Configuration error: no browser"
        );
        assert_eq!(
            CliError::ScenariosFailed { failed: 1, total: 6 }.to_string(),
            "1 of 6 scenario(s) failed"
        );
    }

    #[test]
    fn test_library_error_passes_through() {
        let err: CliError = freezeframe::FreezeError::config("unknown scenario \"x\"").into();
        assert!(err.to_string().contains("unknown scenario"));
    }
}

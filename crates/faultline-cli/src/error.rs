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

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Library error
    #[error("{0}")]
    Faultline(#[from] faultline::FaultlineError),

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// Summary could not be serialized
    #[error("Report generation failed: {message}")]
    ReportGeneration {
        /// Error message
        message: String,
    },
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a report generation error
    #[must_use]
    pub fn report_generation(message: impl Into<String>) -> Self {
        Self::ReportGeneration {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::report_generation(e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_config_error() {
        let err = CliError::config("bad yaml");
        assert_eq!(err.to_string(), "Configuration error: bad yaml");
    }

    #[test]
    fn test_invalid_argument_error() {
        let err = CliError::invalid_argument("--top must be positive");
        assert!(err.to_string().contains("--top must be positive"));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CliError = io.into();
        assert!(matches!(err, CliError::Io(_)));
    }

    #[test]
    fn test_from_library_error_keeps_message() {
        let err: CliError = faultline::FaultlineError::NoTestsFound {
            root: PathBuf::from("/proj"),
        }
        .into();
        assert_eq!(err.to_string(), "No tests found under /proj");
    }

    #[test]
    fn test_from_json_error() {
        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: CliError = json.into();
        assert!(matches!(err, CliError::ReportGeneration { .. }));
    }
}

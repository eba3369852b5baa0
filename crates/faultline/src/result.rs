//! Result and error types for faultline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for faultline operations
pub type FaultlineResult<T> = Result<T, FaultlineError>;

/// Errors that can occur while instrumenting, running or ranking
#[derive(Debug, Error)]
pub enum FaultlineError {
    /// Source text could not be parsed
    #[error("Failed to parse {file}: {message}")]
    Parse {
        /// File (or label) being parsed
        file: String,
        /// Parser message, with line and column
        message: String,
    },

    /// No function matched a method selector
    #[error("Method `{selector}` not found in {file}")]
    MethodNotFound {
        /// Selector that was searched for
        selector: String,
        /// File that was searched
        file: String,
    },

    /// A test process outlived its timeout and was killed
    #[error("Test `{test}` timed out after {secs}s")]
    ProcessTimeout {
        /// Test id
        test: String,
        /// Timeout in seconds
        secs: u64,
    },

    /// Filesystem failure with the path involved
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A test process could not be started
    #[error("Failed to spawn `{command}`: {message}")]
    Spawn {
        /// Command line
        command: String,
        /// Error message
        message: String,
    },

    /// The instrumented package's tests did not compile
    #[error("Failed to build tests: {message}")]
    Build {
        /// Compiler output, or the reason cargo could not run
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Report could not be produced
    #[error("Report generation failed: {message}")]
    Report {
        /// Error message
        message: String,
    },

    /// Test discovery found nothing to run
    #[error("No tests found under {}", root.display())]
    NoTestsFound {
        /// Project root that was searched
        root: PathBuf,
    },

    /// No production sources to instrument
    #[error("No Rust source files found under {}", root.display())]
    NoSourceFiles {
        /// Project root that was searched
        root: PathBuf,
    },
}

impl FaultlineError {
    /// Create a parse error
    #[must_use]
    pub fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error bound to a path
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a report error
    #[must_use]
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }

    /// Whether the pipeline must stop on this error
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoTestsFound { .. }
                | Self::NoSourceFiles { .. }
                | Self::Config { .. }
                | Self::Build { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_names_file() {
        let err = FaultlineError::parse("src/lib.rs", "expected `;` at 3:7");
        let msg = err.to_string();
        assert!(msg.contains("src/lib.rs"));
        assert!(msg.contains("3:7"));
    }

    #[test]
    fn test_method_not_found_message() {
        let err = FaultlineError::MethodNotFound {
            selector: "Calc::add".to_string(),
            file: "calc.rs".to_string(),
        };
        assert!(err.to_string().contains("Calc::add"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = FaultlineError::io("/tmp/x.coverage", inner);
        assert!(err.to_string().contains("x.coverage"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FaultlineError::NoTestsFound {
            root: PathBuf::from(".")
        }
        .is_fatal());
        assert!(FaultlineError::NoSourceFiles {
            root: PathBuf::from(".")
        }
        .is_fatal());
        assert!(FaultlineError::config("bad").is_fatal());
        assert!(FaultlineError::Build {
            message: "error[E0425]".to_string()
        }
        .is_fatal());
        assert!(!FaultlineError::parse("a.rs", "oops").is_fatal());
        assert!(!FaultlineError::ProcessTimeout {
            test: "t".to_string(),
            secs: 1
        }
        .is_fatal());
    }
}

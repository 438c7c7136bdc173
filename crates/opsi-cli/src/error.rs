//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to the exit codes in [`crate::exit_codes`].

use miette::Diagnostic;
use opsi_core::CoreError;
use opsi_engine::EngineError;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Invalid command line usage
    #[error("Bad usage: {message}")]
    #[diagnostic(code(opsi::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Required input directory or control file is missing
    #[error("{message}")]
    #[diagnostic(code(opsi::cli::missing_input))]
    MissingInput { message: String },

    /// Control file template could not be resolved
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] EngineError),

    /// Parsing, assembly or inspection failed
    #[error(transparent)]
    #[diagnostic(code(opsi::cli::package))]
    Package(#[from] CoreError),

    /// IO error outside of package assembly
    #[error("IO error: {message}")]
    #[diagnostic(code(opsi::cli::io))]
    Io { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::MissingInput { .. } => exit_codes::MISSING_INPUT,
            CliError::Template(_) | CliError::Package(_) | CliError::Io { .. } => {
                exit_codes::ERROR
            }
        }
    }

    /// Create a usage error with help text
    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a missing input error
    pub fn missing_input(message: impl Into<String>) -> Self {
        Self::MissingInput {
            message: message.into(),
        }
    }

    /// Create an IO error with the path it concerns
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{context}: {err}"),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

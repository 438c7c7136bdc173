//! Core error types

use std::path::PathBuf;

use thiserror::Error;

use crate::archive::AssemblyStep;
use crate::control::SkipReason;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid argument: want key=value, got {arg:?}")]
    InvalidOverride { arg: String },

    #[error("Missing required value for key {key:?} in metadata")]
    MissingMetadata { key: String },

    #[error("Control file line {line}: {reason}")]
    ControlSyntax { line: usize, reason: SkipReason },

    #[error("{step} failed for {}: {source}", path.display())]
    Assembly {
        step: AssemblyStep,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Entry {entry:?} not found in {}", archive.display())]
    EntryNotFound { archive: PathBuf, entry: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap an IO error with the assembly step and the path being handled
    pub fn assembly(step: AssemblyStep, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Assembly {
            step,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

//! Run-level error taxonomy.
//!
//! These are the only failures that abort a batch before any target is
//! attempted. Per-target failures never surface here; they become
//! [`crate::report::Outcome::Failure`] entries instead.

use std::path::PathBuf;

/// Errors that stop a run before it starts.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("cannot read target list {path}: {source}")]
    TargetList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("target list name must be a plain file name inside the data directory: {0}")]
    TargetListOutsideDataDir(String),

    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("wiki client setup failed: {0}")]
    Client(#[from] mw_api::ApiError),
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, RollbackError>;

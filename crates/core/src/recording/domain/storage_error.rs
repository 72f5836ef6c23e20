use std::path::PathBuf;

use thiserror::Error;

/// Failure writing a recording or photo. Stops the recording only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("cannot open {path} for writing: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("failed to write frame {sequence}: {reason}")]
    Write { sequence: u64, reason: String },
    #[error("failed to finalize {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
}

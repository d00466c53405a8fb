//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for hosts-file operations.
pub type Result<T> = std::result::Result<T, HostsdError>;

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum HostsdError {
    /// Reading the hosts file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The atomic write sequence failed before or during the rename.
    /// The original file is never left partially written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Target hosts file.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The container runtime could not be reached for a snapshot or
    /// event subscription.
    #[error("container runtime unavailable: {0}")]
    Runtime(String),
}

impl HostsdError {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Io(e) | Self::Write { source: e, .. }
                if e.kind() == std::io::ErrorKind::PermissionDenied
        )
    }
}

//! Error types for maillog-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by mutating [`crate::EventBuffer`] operations.
///
/// A corrupt or unreadable buffer file is deliberately absent here: it is
/// logged and treated as an empty buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Writing the buffer file (or its temporary sibling) failed.
    #[error("failed to persist event buffer at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The event sequence could not be serialized.
    #[error("failed to encode event buffer: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Convenience constructor for [`BufferError::Persist`].
pub(crate) fn persist_err(path: impl Into<PathBuf>, source: std::io::Error) -> BufferError {
    BufferError::Persist {
        path: path.into(),
        source,
    }
}

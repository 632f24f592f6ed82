//! Error and Result types for archive operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// The error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive definition was configured with an empty filename template.
    #[error("empty filename template")]
    EmptyTemplate,

    /// A formatted filename, key, or search pattern exceeded the maximum length.
    #[error("formatted path length {len} exceeds maximum {max}")]
    PathTooLong {
        /// Length the builder reached.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Underlying I/O error, with the path the operation failed on.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path of the file or directory involved.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A record write could not be completed within the retry budget.
    #[error("write to {} interrupted {attempts} times, giving up", .path.display())]
    WriteExhausted {
        /// Path of the stream file.
        path: PathBuf,
        /// Number of attempts made.
        attempts: usize,
    },

    /// Registry invariant violation, fatal for the archive definition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ArchiveError {
    /// Wraps an I/O error together with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

//! Error types for the zipbloat-core library.
//!
//! This module provides error handling using the `thiserror` crate, with one
//! variant per failure mode of the generation pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for zipbloat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all zipbloat operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A generator setting is outside the range the ZIP format can carry
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// An entry name was used twice
    #[error("entry name '{name}' is already used in the archive")]
    NameCollision {
        /// The name that collided
        name: String,
    },

    /// The archive would hold more entries than the trailer can count
    #[error("too many entries: requested {requested}, the archive can hold at most {max}")]
    TooManyEntries {
        /// Total number of entries requested
        requested: usize,
        /// Maximum number of entries
        max: usize,
    },

    /// The archive buffer violates a structural invariant
    #[error("malformed archive at offset {offset}: {details}")]
    MalformedArchive {
        /// Byte offset where the problem was found
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// An entry name does not fit the 16-bit name-length field
    #[error("entry name is {len} bytes long, the limit is {max}")]
    NameTooLong {
        /// Length of the offending name in bytes
        len: usize,
        /// Maximum name length
        max: usize,
    },

    /// A size or offset does not fit its 32-bit field
    #[error("{field} overflows its 32-bit field ({value})")]
    ArchiveOverflow {
        /// Which field overflowed
        field: &'static str,
        /// The value that did not fit
        value: u64,
    },

    /// The compressor failed
    #[error("compression failed: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Creates a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a new name collision error
    pub fn name_collision(name: impl Into<String>) -> Self {
        Self::NameCollision { name: name.into() }
    }

    /// Creates a new malformed archive error
    pub fn malformed(offset: usize, details: impl Into<String>) -> Self {
        Self::MalformedArchive {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new overflow error
    pub fn overflow(field: &'static str, value: u64) -> Self {
        Self::ArchiveOverflow { field, value }
    }

    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error was caused by caller input rather than by
    /// a broken pipeline stage
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::NameCollision { .. }
                | Self::TooManyEntries { .. }
                | Self::NameTooLong { .. }
                | Self::FileRead { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::name_collision("T-0.class");
        assert!(err.to_string().contains("already used"));
        assert!(err.to_string().contains("T-0.class"));

        let err = Error::malformed(42, "expected local file header");
        assert!(err.to_string().contains("offset 42"));
    }

    #[test]
    fn test_is_caller_error() {
        assert!(Error::configuration("test").is_caller_error());
        assert!(Error::name_collision("a").is_caller_error());
        assert!(!Error::malformed(0, "test").is_caller_error());
        assert!(!Error::overflow("central directory size", 1 << 33).is_caller_error());
    }
}

//! Error types for extracting files from a cabinet set.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Ways that extracting a file from a cabinet set can fail.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A volume file that holds (part of) the requested data could not be
    /// opened or is not a cabinet volume.
    #[error("Volume {volume} is unavailable ({})", path.display())]
    VolumeUnavailable {
        /// The 1-based volume id.
        volume: u32,
        /// The path that was probed.
        path: PathBuf,
    },

    /// Fewer bytes were available than a chunk or volume declared.
    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead {
        /// Bytes required.
        expected: u64,
        /// Bytes actually available.
        actual: u64,
    },

    /// The inflate engine rejected a chunk.
    #[error("Decompression failed: {0}")]
    DecompressionError(String),

    /// The decompressed length differed from the descriptor's expanded
    /// size.  This is reported as a diagnostic only; it never fails an
    /// extraction.
    #[error("Size mismatch: expected {expected} bytes, produced {actual}")]
    SizeMismatch {
        /// The descriptor's expanded size.
        expected: u64,
        /// The number of bytes produced.
        actual: u64,
    },

    /// The MD5 of the extracted data does not match the stored hash.
    #[error("MD5 checksum failure for file {index}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The descriptor index.
        index: usize,
        /// The stored hash, as lowercase hex.
        expected: String,
        /// The computed hash, as lowercase hex.
        actual: String,
    },

    /// The descriptor is flagged invalid or has no name or data.
    #[error("File {0} is not a valid file entry")]
    InvalidDescriptor(usize),

    /// A header or descriptor table is malformed.
    #[error("Invalid cabinet header: {0}")]
    InvalidHeader(String),

    /// The caller cancelled the extraction.
    #[error("Extraction cancelled")]
    Cancelled,

    /// Any other I/O failure.
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for ExtractError {
    fn from(error: io::Error) -> ExtractError {
        // Unwrap errors that passed through an `io::Read` boundary.
        if error.get_ref().map_or(false, |inner| inner.is::<ExtractError>()) {
            if let Some(Ok(inner)) =
                error.into_inner().map(|inner| inner.downcast::<ExtractError>())
            {
                return *inner;
            }
            return ExtractError::Io(io::Error::new(
                io::ErrorKind::Other,
                "lost wrapped extraction error",
            ));
        }
        ExtractError::Io(error)
    }
}

impl From<ExtractError> for io::Error {
    fn from(error: ExtractError) -> io::Error {
        match error {
            ExtractError::Io(error) => error,
            ExtractError::TruncatedRead { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, error)
            }
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

impl ExtractError {
    pub(crate) fn truncated(expected: u64, actual: u64) -> ExtractError {
        ExtractError::TruncatedRead { expected, actual }
    }
}

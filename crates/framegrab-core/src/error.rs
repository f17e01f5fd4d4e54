//! Unified error type for the framegrab readers.
//!
//! Structural tolerances (reads past the end of a buffer, unknown tags) never
//! become an [`Error`]. Everything that does surface carries enough context
//! for callers to derive a [`ResultCode`] via [`Error::code`].

use std::fmt;
use std::path::PathBuf;

/// Coarse result codes surfaced to callers of the readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    FileNotFound,
    IllegalArgument,
    FileFormat,
    Eof,
    Fail,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::Ok => "OK",
            ResultCode::FileNotFound => "FILE_NOT_FOUND",
            ResultCode::IllegalArgument => "ILLEGAL_ARGUMENT",
            ResultCode::FileFormat => "FILE_FORMAT",
            ResultCode::Eof => "EOF",
            ResultCode::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

/// Error type covering all failure modes of the demuxers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The caller asked for an impossible combination of options.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// The container or stream is structurally invalid.
    #[error("File format error: {0}")]
    FileFormat(String),

    /// The stream uses a feature this reader does not implement.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Clean end of stream.
    #[error("End of stream")]
    Eof,

    /// Generic operation failure (seek out of range, etc.).
    #[error("Operation failed: {0}")]
    Fail(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A decode backend rejected compressed data.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A persisted frame index could not be read or written.
    #[error("Index error: {0}")]
    Index(String),
}

impl Error {
    /// Map this error to the caller-facing result code.
    pub fn code(&self) -> ResultCode {
        match self {
            Error::FileNotFound(_) => ResultCode::FileNotFound,
            Error::IllegalArgument(_) => ResultCode::IllegalArgument,
            Error::FileFormat(_) | Error::Unsupported(_) => ResultCode::FileFormat,
            Error::Eof => ResultCode::Eof,
            Error::Fail(_) | Error::Io { .. } | Error::Decode(_) | Error::Index(_) => {
                ResultCode::Fail
            }
        }
    }

    /// Whether this error is a clean end of stream rather than a failure.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }

    /// Convenience constructor for [`Error::FileFormat`].
    pub fn format(msg: impl Into<String>) -> Self {
        Error::FileFormat(msg.into())
    }

    /// Convenience constructor for [`Error::Unsupported`].
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Convenience constructor for [`Error::IllegalArgument`].
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Error::IllegalArgument(msg.into())
    }

    /// Convenience constructor for [`Error::Fail`].
    pub fn fail(msg: impl Into<String>) -> Self {
        Error::Fail(msg.into())
    }

    /// Convenience constructor for [`Error::Decode`].
    pub fn decode(msg: impl fmt::Display) -> Self {
        Error::Decode(msg.to_string())
    }

    /// Open-time I/O errors become [`Error::FileNotFound`] when the path is missing.
    pub fn from_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound(path.into())
        } else {
            Error::Io { source }
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

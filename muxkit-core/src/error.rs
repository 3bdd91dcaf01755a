//! Error types for the muxkit library.
//!
//! The muxer contract reports failures through [`MuxerError`]; everything
//! else in the library uses the crate-wide [`Error`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the muxkit library.
#[derive(Error, Debug)]
pub enum Error {
    /// Muxer lifecycle errors (open/add track/write/close).
    #[error("Muxer error: {0}")]
    Muxer(#[from] MuxerError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed container data encountered while reading a file back.
    #[error("Container error: {0}")]
    Container(String),
}

/// Errors raised by a muxer backend.
///
/// None of these are retried internally. After a [`MuxerError::WriteFailed`]
/// caused by the output, the instance should be treated as unusable.
#[derive(Error, Debug)]
pub enum MuxerError {
    /// The backing output could not be created or opened for writing.
    #[error("Failed to open output {}: {source}", path.display())]
    OpenFailed {
        /// The requested output path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The track format is not supported, or the muxer is no longer open.
    #[error("Failed to add track: {0}")]
    AddTrackFailed(String),

    /// A sample could not be written.
    #[error("Failed to write sample for presentation_time_us={presentation_time_us}, size={size}: {reason}")]
    WriteFailed {
        /// Presentation timestamp of the rejected sample.
        presentation_time_us: i64,
        /// Payload size of the rejected sample.
        size: usize,
        /// What went wrong.
        reason: String,
    },

    /// The container could not be finalized; the output may be truncated.
    #[error("Failed to finish writing output: {0}")]
    CloseFailed(String),
}

impl MuxerError {
    /// Create an add-track error.
    pub fn add_track(msg: impl Into<String>) -> Self {
        MuxerError::AddTrackFailed(msg.into())
    }

    /// Create a write error for the sample described by the arguments.
    pub fn write(presentation_time_us: i64, size: usize, reason: impl Into<String>) -> Self {
        MuxerError::WriteFailed {
            presentation_time_us,
            size,
            reason: reason.into(),
        }
    }

    /// Create a close error.
    pub fn close(msg: impl Into<String>) -> Self {
        MuxerError::CloseFailed(msg.into())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for the muxer contract.
pub type MuxerResult<T> = std::result::Result<T, MuxerError>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Check if this error originated in a muxer backend.
    #[must_use]
    pub fn is_muxer_error(&self) -> bool {
        matches!(self, Error::Muxer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidParameter("test parameter".into());
        assert_eq!(err.to_string(), "Invalid parameter: test parameter");
    }

    #[test]
    fn test_write_failed_display() {
        let err = MuxerError::write(33_333, 1024, "muxer is closed");
        assert_eq!(
            err.to_string(),
            "Failed to write sample for presentation_time_us=33333, size=1024: muxer is closed"
        );
    }

    #[test]
    fn test_open_failed_keeps_source() {
        let err = MuxerError::OpenFailed {
            path: PathBuf::from("/nonexistent/out.mp4"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("Failed to open output /nonexistent/out.mp4"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_muxer_error_conversion() {
        let err: Error = MuxerError::close("truncated").into();
        assert!(err.is_muxer_error());
        assert!(matches!(err, Error::Muxer(MuxerError::CloseFailed(_))));
    }
}

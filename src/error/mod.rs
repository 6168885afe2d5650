//! # Error Module
//!
//! One error taxonomy shared by the whole write/read pipeline.
//!
//! The write path latches the first non-OK status it observes: once a
//! [`TableLogger`](crate::table::TableLogger) or
//! [`DirLogger`](crate::writer::DirLogger) has failed, every subsequent
//! operation on the same instance is a no-op returning the latched error.
//! That requires errors to be cloneable, so I/O errors are stored behind an
//! [`Arc`].
//!
//! [`Error::BufferFull`] is the only recoverable kind — it signals that the
//! non-blocking write path would otherwise have to wait for buffer space,
//! and the caller may retry later. Everything else is terminal for the
//! current writer instance.
//!
//! A missing key is not an error: reads report it as an empty result.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by directory writers, readers, and log files.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Underlying storage failed.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// On-disk data failed validation: block checksum mismatch, truncated
    /// read, bad footer, or an undecodable handle.
    #[error("corruption: {0}")]
    Corruption(String),

    /// An internal invariant was violated, e.g. out-of-order keys or too
    /// many epochs.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// Both write buffers are occupied and the caller asked not to block.
    #[error("write buffer full")]
    BufferFull,

    /// Operation on a finalized writer or a closed log.
    #[error("log already closed")]
    AlreadyClosed,
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new assertion failure.
    pub fn assertion_failed(msg: impl Into<String>) -> Self {
        Error::AssertionFailed(msg.into())
    }

    /// True when the operation may succeed if retried after buffer space
    /// frees up.
    pub fn is_buffer_full(&self) -> bool {
        matches!(self, Error::BufferFull)
    }

    /// True when the error indicates damaged on-disk state.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::corruption("bad footer");
        assert_eq!(err.to_string(), "corruption: bad footer");

        let err = Error::assertion_failed("too many epochs");
        assert_eq!(err.to_string(), "assertion failed: too many epochs");

        assert_eq!(Error::BufferFull.to_string(), "write buffer full");
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_buffer_full());
    }

    #[test]
    fn test_latched_errors_are_cloneable() {
        let err: Error = io::Error::new(io::ErrorKind::WriteZero, "short write").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_predicates() {
        assert!(Error::BufferFull.is_buffer_full());
        assert!(Error::corruption("x").is_corruption());
        assert!(!Error::AlreadyClosed.is_corruption());
    }
}

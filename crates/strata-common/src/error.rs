//! Error types for Strata.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in Strata operations.
///
/// Invariant violations (double-release of a page handle, node counts past
/// capacity, inconsistent comparators) are programming errors and panic
/// instead of being represented here.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer is full, all resident pages are pinned")]
    BufferFull,
}

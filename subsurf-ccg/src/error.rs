//! Error types for the subsurf-ccg crate.

use thiserror::Error;

/// Main error type for subsurf-ccg operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The input mesh is degenerate or internally inconsistent.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// A `sync_*()` or `process_sync()` call was made outside of a sync
    /// generation.
    #[error("No sync generation in progress; call `init_full_sync()` first")]
    SyncNotStarted,

    /// The last synchronization was aborted and the store holds the
    /// previous generation.
    #[error("The last synchronization did not complete")]
    SyncIncomplete,

    /// Index out of bounds.
    #[error("Index {index} out of bounds (max: {max})")]
    IndexOutOfBounds { index: usize, max: usize },

    /// Invalid buffer size.
    #[error("Invalid buffer size: expected {expected}, got {actual}")]
    InvalidBufferSize { expected: usize, actual: usize },

    /// Attribute layers do not line up.
    #[error("Attribute layer mismatch: {0}")]
    AttributeMismatch(String),

    /// Reserving storage for grid or weight data failed.
    #[error("Failed to allocate {bytes} bytes for {context}")]
    Allocation { bytes: usize, context: &'static str },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an [`Error::Allocation`] for `len` elements of `T`.
    pub(crate) fn allocation<T>(len: usize, context: &'static str) -> Self {
        Error::Allocation {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
            context,
        }
    }

    /// Check that a buffer has the expected length.
    pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Error::InvalidBufferSize { expected, actual })
        }
    }
}

/// Reserve `additional` elements in `vec` or fail with
/// [`Error::Allocation`].
pub(crate) fn try_reserve<T>(vec: &mut Vec<T>, additional: usize, context: &'static str) -> Result<()> {
    #[cfg(test)]
    if failing::matches(context) {
        return Err(Error::allocation::<T>(additional, context));
    }
    vec.try_reserve_exact(additional)
        .map_err(|_| Error::allocation::<T>(additional, context))
}

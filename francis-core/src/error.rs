//! Error types for francis

use std::time::Duration;
use thiserror::Error;

/// Result type alias using francis' Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decomposing a matrix
#[derive(Error, Debug)]
pub enum Error {
    /// The operation requires a square matrix
    #[error("Expected a square matrix, got {nrows}x{ncols}")]
    NotSquare {
        /// Number of rows
        nrows: usize,
        /// Number of columns
        ncols: usize,
    },

    /// A secondary matrix does not have the dimensions the operation requires
    #[error("Dimension mismatch: expected {expected:?}, got {found:?}")]
    DimensionMismatch {
        /// Expected `(nrows, ncols)`
        expected: (usize, usize),
        /// Actual `(nrows, ncols)`
        found: (usize, usize),
    },

    /// An argument combination or parameter value is not supported
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// The iteration cap was reached before the active block deflated
    #[error("QR iteration did not converge on rows {begin}..{end} after {iterations} iterations")]
    NoConvergence {
        /// First row of the active block
        begin: usize,
        /// One past the last row of the active block
        end: usize,
        /// Number of QR steps performed so far
        iterations: usize,
    },

    /// The decomposition ran for longer than the configured limit
    #[error("Decomposition exceeded its time limit of {limit:?}")]
    Timeout {
        /// The configured limit
        limit: Duration,
    },

    /// The worker thread pool could not be created
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

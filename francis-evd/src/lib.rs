//! The real Schur decomposition of a square matrix $M$ of shape $(n, n)$ is a decomposition into
//! two components $Z$, $T$:
//!
//! - $Z$ has shape $(n, n)$ and is orthogonal,
//! - $T$ has shape $(n, n)$ and is quasi upper triangular, with $1 \times 1$ and $2 \times 2$
//!   blocks on its diagonal,
//! - and finally:
//!
//! $$M = Z T Z^\top.$$
//!
//! The $2 \times 2$ diagonal blocks of $T$ hold the complex conjugate eigenvalue pairs of $M$.
//! If $M$ is symmetric, $T$ is diagonal.
//!
//! The decomposition reduces $M$ to Hessenberg form with Householder reflectors, then runs
//! implicitly shifted QR steps on the active diagonal blocks until every subdiagonal entry is
//! either negligible or part of a standardized $2 \times 2$ block.

#![allow(clippy::too_many_arguments)]

use francis_core::{Error, Result};
use std::time::Duration;

#[doc(hidden)]
pub mod bulge;
#[doc(hidden)]
pub mod hessenberg;
#[doc(hidden)]
pub mod multishift;
pub mod schur;
#[doc(hidden)]
pub mod shift;
pub mod step;
#[doc(hidden)]
pub mod tridiag_qr;

pub use schur::{compute_schur, schur_eigenvalues};
pub use step::{QrStep, StepContext, StepOutcome};

/// Indicates which parts of the matrix are kept up to date during the QR iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchurMode {
    /// The whole quasi triangular matrix is computed.
    Full,
    /// Only the diagonal blocks are maintained. The eigenvalues can be read from them, but the
    /// entries above the diagonal blocks are left in an unspecified state.
    BlocksOnly,
}

/// Tuning parameters of the Schur decomposition.
#[derive(Copy, Clone, Debug)]
pub struct SchurParams {
    /// Relative precision used by the deflation and standardization tests.
    pub epsilon: f64,
    /// Absolute magnitude below which values are treated as zero.
    pub zero_threshold: f64,
    /// Work size, in row-elements, above which row updates are parallelized.
    pub parallel_threshold: usize,
    /// The iteration cap is `iteration_cap_factor * max(n, 10)` QR steps.
    pub iteration_cap_factor: usize,
    /// Number of steps without deflation after which an exceptional shift is used.
    pub exceptional_shift_period: usize,
    /// Relative tolerance of the symmetric tridiagonal check.
    pub symmetry_tolerance: f64,
    /// Whether symmetric matrices take the packed tridiagonal path.
    pub symmetric_fast_path: bool,
    /// Active block size from which several bulges are chased in lock-step.
    pub multishift_threshold: usize,
    /// Function that returns the number of bulges to chase for a given active block size.
    pub bulge_count: fn(active_block_dimension: usize) -> usize,
    /// Hard limit on the wall clock time of a decomposition.
    pub timeout: Option<Duration>,
}

/// Number of bulges chased simultaneously on an active block of the given size.
pub fn default_bulge_count(active_block_dimension: usize) -> usize {
    let shifts = if active_block_dimension < 30 {
        2
    } else if active_block_dimension < 60 {
        4
    } else if active_block_dimension < 150 {
        12
    } else if active_block_dimension < 590 {
        32
    } else if active_block_dimension < 3000 {
        64
    } else if active_block_dimension < 6000 {
        128
    } else {
        256
    };
    shifts / 2
}

impl Default for SchurParams {
    fn default() -> Self {
        Self {
            epsilon: f64::EPSILON,
            zero_threshold: f64::MIN_POSITIVE,
            parallel_threshold: francis_core::DEFAULT_PARALLEL_THRESHOLD,
            iteration_cap_factor: 30,
            exceptional_shift_period: 10,
            symmetry_tolerance: 1e-13,
            symmetric_fast_path: true,
            multishift_threshold: 128,
            bulge_count: default_bulge_count,
            timeout: None,
        }
    }
}

impl SchurParams {
    /// Checks that every parameter is in its valid range.
    pub fn validate(&self) -> Result<()> {
        fn invalid(arg: &'static str, reason: &str) -> Result<()> {
            Err(Error::InvalidArgument {
                arg,
                reason: reason.to_string(),
            })
        }

        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return invalid("epsilon", "must lie in (0, 1)");
        }
        if !(self.zero_threshold >= 0.0 && self.zero_threshold.is_finite()) {
            return invalid("zero_threshold", "must be finite and non-negative");
        }
        if self.iteration_cap_factor == 0 {
            return invalid("iteration_cap_factor", "must be positive");
        }
        if self.exceptional_shift_period == 0 {
            return invalid("exceptional_shift_period", "must be positive");
        }
        if !(self.symmetry_tolerance >= 0.0 && self.symmetry_tolerance.is_finite()) {
            return invalid("symmetry_tolerance", "must be finite and non-negative");
        }
        if self.timeout == Some(Duration::ZERO) {
            return invalid("timeout", "must be non-zero");
        }
        Ok(())
    }
}

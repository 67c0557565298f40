//! Householder QR decomposition of dense real matrices.
//!
//! The QR decomposition of a matrix $A$ is a factorization of the form
//! $$A = QR,$$
//! where $Q$ is orthogonal and $R$ is upper trapezoidal. The factorization is computed with one
//! Householder reflector per column, and $Q$ is accumulated explicitly.

use francis_core::Mat;

pub mod compute;

pub use compute::{compute_qr, qr_in_place};

/// Explicit factors of a QR decomposition.
#[derive(Clone, Debug)]
pub struct QrDecomposition {
    /// Orthogonal `m×m` factor.
    pub q: Mat,
    /// Upper trapezoidal `m×n` factor.
    pub r: Mat,
}

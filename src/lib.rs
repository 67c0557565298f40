//! `francis` computes the real Schur decomposition of dense square matrices with the shifted QR
//! algorithm.
//!
//! The matrix is reduced to Hessenberg form with Householder reflectors, then implicitly
//! shifted QR steps (Francis double shift steps, and specialized steps for small blocks and
//! symmetric tridiagonal matrices) are run until it is quasi upper triangular.
//!
//! # Example
//!
//! ```
//! use francis::{mat, Schur};
//!
//! let a = mat![[2.0, 1.0], [1.0, 2.0]];
//! let schur = Schur::new(a.as_ref()).unwrap();
//!
//! let t = schur.t();
//! assert!((t.read(0, 0) - 3.0).abs() < 1e-12);
//! assert!((t.read(1, 1) - 1.0).abs() < 1e-12);
//! ```
//!
//! The lower level routines are re-exported from the [`francis_core`], [`francis_qr`] and
//! [`francis_evd`] crates.

#![allow(clippy::too_many_arguments)]

use core::sync::atomic::AtomicUsize;
use num_complex::Complex64;

pub use francis_core;
pub use francis_evd;
pub use francis_qr;

pub use francis_core::{mat, Error, Mat, MatMut, MatRef, Parallelism, Result};
pub use francis_evd::{compute_schur, schur_eigenvalues, SchurMode, SchurParams};
pub use francis_qr::{compute_qr, QrDecomposition};

static GLOBAL_PARALLELISM: AtomicUsize = AtomicUsize::new(2);

/// Sets the parallelism used by [`Schur::new`] and [`Qr::new`].
pub fn set_global_parallelism(parallelism: Parallelism) {
    let value = match parallelism {
        Parallelism::None => 1,
        Parallelism::Rayon(n) => n.saturating_add(2),
    };
    GLOBAL_PARALLELISM.store(value, core::sync::atomic::Ordering::Relaxed);
}

/// Gets the parallelism used by [`Schur::new`] and [`Qr::new`]. Defaults to
/// `Parallelism::Rayon(0)`.
pub fn get_global_parallelism() -> Parallelism {
    match GLOBAL_PARALLELISM.load(core::sync::atomic::Ordering::Relaxed) {
        0 | 1 => Parallelism::None,
        n => Parallelism::Rayon(n - 2),
    }
}

/// Real Schur decomposition `A = Z T Zᵀ`.
#[derive(Clone, Debug)]
pub struct Schur {
    t: Mat,
    z: Option<Mat>,
}

impl Schur {
    /// Computes the full Schur decomposition of `matrix` with the default parameters.
    pub fn new(matrix: MatRef<'_>) -> Result<Self> {
        Self::new_with(
            matrix,
            SchurMode::Full,
            get_global_parallelism(),
            SchurParams::default(),
        )
    }

    /// Computes the Schur decomposition of `matrix`.
    ///
    /// The orthogonal factor is only accumulated in [`SchurMode::Full`].
    pub fn new_with(
        matrix: MatRef<'_>,
        mode: SchurMode,
        parallelism: Parallelism,
        params: SchurParams,
    ) -> Result<Self> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(Error::NotSquare {
                nrows: n,
                ncols: matrix.ncols(),
            });
        }

        let mut t = matrix.to_owned();
        let mut z = match mode {
            SchurMode::Full => Some(Mat::identity(n)),
            SchurMode::BlocksOnly => None,
        };
        compute_schur(
            t.as_mut(),
            z.as_mut().map(Mat::as_mut),
            mode,
            parallelism,
            params,
        )?;
        Ok(Self { t, z })
    }

    /// Returns the quasi upper triangular factor `T`.
    ///
    /// Only its diagonal blocks are meaningful if the decomposition was computed in
    /// [`SchurMode::BlocksOnly`].
    pub fn t(&self) -> MatRef<'_> {
        self.t.as_ref()
    }

    /// Returns the orthogonal factor `Z`, if it was computed.
    pub fn z(&self) -> Option<MatRef<'_>> {
        self.z.as_ref().map(Mat::as_ref)
    }

    /// Returns `(T, Z)`.
    pub fn into_parts(self) -> (Mat, Option<Mat>) {
        (self.t, self.z)
    }

    /// Returns the eigenvalues of the decomposed matrix, in the order of the diagonal blocks of
    /// `T`.
    pub fn eigenvalues(&self) -> Vec<Complex64> {
        schur_eigenvalues(self.t.as_ref())
    }

    /// Multiplies the factors back together, if the orthogonal factor was computed.
    pub fn reconstruct(&self) -> Option<Mat> {
        let z = self.z.as_ref()?;
        Some(z * &self.t * z.transpose())
    }
}

/// QR decomposition `A = Q R`.
#[derive(Clone, Debug)]
pub struct Qr {
    inner: QrDecomposition,
}

impl Qr {
    /// Computes the QR decomposition of `matrix`.
    pub fn new(matrix: MatRef<'_>) -> Self {
        Self {
            inner: compute_qr(matrix, get_global_parallelism()),
        }
    }

    /// Returns the orthogonal factor `Q`.
    pub fn q(&self) -> MatRef<'_> {
        self.inner.q.as_ref()
    }

    /// Returns the upper trapezoidal factor `R`.
    pub fn r(&self) -> MatRef<'_> {
        self.inner.r.as_ref()
    }

    pub fn into_parts(self) -> (Mat, Mat) {
        (self.inner.q, self.inner.r)
    }
}

use crate::QrDecomposition;
use francis_core::{
    householder::HouseholderReflector, parallelism_above, Mat, MatMut, MatRef, Parallelism,
    Reborrow, ReborrowMut, DEFAULT_PARALLEL_THRESHOLD,
};

/// Overwrites `r` with the upper trapezoidal factor of its QR decomposition.
///
/// If `q` is provided, every reflector is multiplied into it from the right, so that starting
/// from the identity it ends up holding the orthogonal factor.
///
/// # Panics
///
/// Panics if `q` is provided and its column count differs from the row count of `r`.
#[track_caller]
pub fn qr_in_place(mut r: MatMut<'_>, mut q: Option<MatMut<'_>>, parallelism: Parallelism) {
    let m = r.nrows();
    let n = r.ncols();
    if let Some(q) = q.rb() {
        assert2::assert!(q.ncols() == m);
    }

    for k in 0..n.min(m.saturating_sub(1)) {
        let mut householder = HouseholderReflector::from_col(r.rb(), k, k);
        let beta = householder.normalize(f64::MIN_POSITIVE);
        if householder.is_identity() {
            continue;
        }

        let par = parallelism_above(parallelism, (m - k) * (n - k), DEFAULT_PARALLEL_THRESHOLD);
        householder.apply_on_the_left(r.rb_mut(), k + 1, par);
        r.write(k, k, beta);
        for i in k + 1..m {
            r.write(i, k, 0.0);
        }

        if let Some(q) = q.rb_mut() {
            let par =
                parallelism_above(parallelism, q.nrows() * (m - k), DEFAULT_PARALLEL_THRESHOLD);
            householder.apply_on_the_right(q, par);
        }
    }
}

/// Computes the QR decomposition of `a`.
pub fn compute_qr(a: MatRef<'_>, parallelism: Parallelism) -> QrDecomposition {
    let mut r = a.to_owned();
    let mut q = Mat::identity(a.nrows());
    qr_in_place(r.as_mut(), Some(q.as_mut()), parallelism);
    QrDecomposition { q, r }
}

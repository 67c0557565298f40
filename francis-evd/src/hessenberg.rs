use crate::SchurParams;
use francis_core::{
    householder::HouseholderReflector, parallelism_above, MatMut, Parallelism, Reborrow,
    ReborrowMut,
};

/// Reduces `a` to upper Hessenberg form with a similarity transform `a := Qᵀ a Q`, and
/// multiplies `z` by `Q` from the right if it is provided.
///
/// Every entry strictly below the subdiagonal of `a` is exactly zero on return.
#[track_caller]
pub fn make_hessenberg_in_place(
    mut a: MatMut<'_>,
    mut z: Option<MatMut<'_>>,
    parallelism: Parallelism,
    params: &SchurParams,
) {
    let n = a.nrows();
    assert2::assert!(a.ncols() == n);

    for j in 0..n.saturating_sub(2) {
        let mut householder = HouseholderReflector::from_col(a.rb(), j, j + 1);
        let beta = householder.normalize(params.zero_threshold);
        if householder.is_identity() {
            continue;
        }

        let active = n - j - 1;
        householder.apply_on_the_left(
            a.rb_mut(),
            j + 1,
            parallelism_above(parallelism, active * active, params.parallel_threshold),
        );
        a.write(j + 1, j, beta);

        let par = parallelism_above(parallelism, n * active, params.parallel_threshold);
        householder.apply_on_the_right(a.rb_mut(), par);
        if let Some(z) = z.rb_mut() {
            householder.apply_on_the_right(z, par);
        }
    }

    for i in 2..n {
        a.row_mut(i)[..i - 1].fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use francis_core::{mat, Mat};
    use rand::prelude::*;

    fn check_similarity(original: &Mat, h: &Mat, z: &Mat, tol: f64) {
        let n = original.nrows();
        let reconstructed = z * h * z.transpose();
        for i in 0..n {
            for j in 0..n {
                assert_approx_eq!(reconstructed.read(i, j), original.read(i, j), tol);
            }
        }
    }

    #[test]
    fn test_hessenberg_3x3() {
        let a = mat![[4.0, 1.0, -2.0], [1.0, 2.0, 0.0], [-2.0, 0.0, 3.0]];
        let mut h = a.clone();
        let mut z = Mat::identity(3);
        let params = SchurParams::default();
        make_hessenberg_in_place(h.as_mut(), Some(z.as_mut()), Parallelism::None, &params);
        assert2::assert!(h.read(2, 0) == 0.0);
        assert_approx_eq!(h.read(1, 0).abs(), 5.0f64.sqrt());
        check_similarity(&a, &h, &z, 1e-12);
    }

    #[test]
    fn test_hessenberg_n() {
        let mut rng = StdRng::seed_from_u64(0);
        for n in [0, 1, 2, 3, 4, 5, 8, 16, 33, 64] {
            let a = Mat::with_dims(n, n, |_, _| rng.gen::<f64>() - 0.5);
            let mut h = a.clone();
            let mut z = Mat::identity(n);
            let params = SchurParams::default();
        make_hessenberg_in_place(h.as_mut(), Some(z.as_mut()), Parallelism::None, &params);
            assert2::assert!(h.is_upper_hessenberg(0.0));
            check_similarity(&a, &h, &z, 1e-10);
        }
    }

    #[test]
    fn test_hessenberg_parallel() {
        let mut rng = StdRng::seed_from_u64(1);
        let n = 150;
        let a = Mat::with_dims(n, n, |_, _| rng.gen::<f64>());
        let params = SchurParams {
            parallel_threshold: 64,
            ..Default::default()
        };

        let mut h_seq = a.clone();
        let mut h_par = a.clone();
        let mut z = Mat::identity(n);
        make_hessenberg_in_place(h_seq.as_mut(), None, Parallelism::None, &params);
        make_hessenberg_in_place(h_par.as_mut(), Some(z.as_mut()), Parallelism::Rayon(4), &params);

        assert2::assert!(h_par.is_upper_hessenberg(0.0));
        for i in 0..n {
            for j in 0..n {
                assert_approx_eq!(h_seq.read(i, j), h_par.read(i, j), 1e-10);
            }
        }
        check_similarity(&a, &h_par, &z, 1e-9);
    }
}

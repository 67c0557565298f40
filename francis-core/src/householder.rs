//! Householder reflectors `H = I - 2vvᵀ` with unit `v`.
//!
//! A reflector is built from a column segment `x[from..]` and maps it onto a multiple of the
//! first unit vector. Rows and columns below `from` are left untouched.

use crate::{par_split_indices, parallelism_degree, MatMut, MatRef, Parallelism, Reborrow};
use assert2::assert;

#[derive(Clone, Debug)]
pub struct HouseholderReflector {
    v: Vec<f64>,
    from: usize,
    usable: bool,
}

impl HouseholderReflector {
    /// Creates an unnormalized reflector from a full length vector. Entries below `from` are
    /// ignored.
    #[track_caller]
    pub fn new(mut v: Vec<f64>, from: usize) -> Self {
        assert!(from < v.len());
        v[..from].fill(0.0);
        Self {
            v,
            from,
            usable: false,
        }
    }

    /// Creates an unnormalized reflector from the entries `from..` of column `col` of `a`.
    #[track_caller]
    pub fn from_col(a: MatRef<'_>, col: usize, from: usize) -> Self {
        let v = (0..a.nrows())
            .map(|i| if i < from { 0.0 } else { a.read(i, col) })
            .collect();
        Self::new(v, from)
    }

    #[inline]
    pub fn from(&self) -> usize {
        self.from
    }

    #[inline]
    pub fn essential(&self) -> &[f64] {
        &self.v[self.from..]
    }

    /// Returns `true` if the reflector was not normalized, or if the column it was built from
    /// was already reduced. Such a reflector must not be applied.
    #[inline]
    pub fn is_identity(&self) -> bool {
        !self.usable
    }

    /// Turns `v` into the unit reflection vector and returns the value the head of the column
    /// takes after reflection.
    ///
    /// Returns `0.0` and leaves the reflector unusable when the tail below `from` has a norm
    /// not exceeding `zero_threshold`.
    pub fn normalize(&mut self, zero_threshold: f64) -> f64 {
        let from = self.from;
        let head = self.v[from];
        let tail_norm = self.v[from + 1..]
            .iter()
            .fold(0.0f64, |acc, &x| acc.hypot(x));

        if !(tail_norm > zero_threshold) {
            self.usable = false;
            return 0.0;
        }

        let norm = head.hypot(tail_norm);
        let signed_norm = if head < 0.0 { -norm } else { norm };
        self.v[from] += signed_norm;

        // the squared norm of `v` is `2 norm (norm + |head|)`, which over- or underflows long
        // before its entries do
        let inv = self.v[from..]
            .iter()
            .fold(0.0f64, |acc, &x| acc.hypot(x))
            .recip();
        self.v[from..].iter_mut().for_each(|x| *x *= inv);
        self.usable = true;

        -signed_norm
    }

    /// Computes `A[from.., start_col..] := H A[from.., start_col..]`.
    #[track_caller]
    pub fn apply_on_the_left(&self, a: MatMut<'_>, start_col: usize, parallelism: Parallelism) {
        assert!(self.usable);
        assert!(a.nrows() == self.v.len());
        assert!(start_col <= a.ncols());
        if start_col == a.ncols() {
            return;
        }

        let from = self.from;
        let count = a.nrows() - from;
        let rows = a.subrows_mut(from, count);
        let w = self.combine_rows(rows.rb(), start_col, parallelism);

        let v = self.essential();
        rows.for_each_row(parallelism, |i, row| {
            let factor = 2.0 * v[i];
            if factor == 0.0 {
                return;
            }
            for (x, w) in row[start_col..].iter_mut().zip(&w) {
                *x -= factor * w;
            }
        });
    }

    /// Computes `A := A H` over the rows of `a`.
    #[track_caller]
    pub fn apply_on_the_right(&self, a: MatMut<'_>, parallelism: Parallelism) {
        assert!(self.usable);
        assert!(a.ncols() == self.v.len());

        let from = self.from;
        let v = self.essential();
        a.for_each_row(parallelism, |_, row| {
            let row = &mut row[from..];
            let dot = row.iter().zip(v).map(|(x, v)| x * v).sum::<f64>();
            let factor = 2.0 * dot;
            if factor == 0.0 {
                return;
            }
            for (x, v) in row.iter_mut().zip(v) {
                *x -= factor * v;
            }
        });
    }

    /// `w = vᵀ A[.., start_col..]`, accumulated row by row. With parallelism enabled the rows
    /// are split into chunks whose partial sums are added afterwards.
    fn combine_rows(
        &self,
        rows: MatRef<'_>,
        start_col: usize,
        parallelism: Parallelism,
    ) -> Vec<f64> {
        let v = self.essential();
        let width = rows.ncols() - start_col;
        let nrows = rows.nrows();

        let accumulate = |begin: usize, len: usize| {
            let mut w = vec![0.0; width];
            for i in begin..begin + len {
                let vi = v[i];
                if vi == 0.0 {
                    continue;
                }
                for (w, x) in w.iter_mut().zip(&rows.row(i)[start_col..]) {
                    *w += vi * x;
                }
            }
            w
        };

        let n_chunks = parallelism_degree(parallelism).min(nrows).max(1);
        if n_chunks == 1 {
            return accumulate(0, nrows);
        }

        use rayon::prelude::*;
        (0..n_chunks)
            .into_par_iter()
            .map(|idx| {
                let (begin, len) = par_split_indices(nrows, idx, n_chunks);
                accumulate(begin, len)
            })
            .reduce(
                || vec![0.0; width],
                |mut acc, partial| {
                    acc.iter_mut().zip(&partial).for_each(|(a, b)| *a += b);
                    acc
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mat;
    use assert2::assert;
    use assert_approx_eq::assert_approx_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn reflector_zeroes_column() {
        let mut rng = StdRng::seed_from_u64(0);
        for n in [2, 3, 5, 17, 64] {
            let mut a = Mat::with_dims(n, n, |_, _| rng.gen::<f64>() - 0.5);
            let col_norm = (0..n).fold(0.0f64, |acc, i| acc.hypot(a.read(i, 0)));

            let mut h = HouseholderReflector::from_col(a.as_ref(), 0, 0);
            let beta = h.normalize(f64::MIN_POSITIVE);
            assert!(!h.is_identity());
            assert_approx_eq!(h.essential().iter().map(|x| x * x).sum::<f64>(), 1.0);
            assert_approx_eq!(beta.abs(), col_norm);

            h.apply_on_the_left(a.as_mut(), 0, Parallelism::None);
            assert_approx_eq!(a.read(0, 0), beta);
            for i in 1..n {
                assert_approx_eq!(a.read(i, 0), 0.0);
            }
        }
    }

    #[test]
    fn extreme_magnitudes() {
        for scale in [1e154, 1e300, 1e-160, 1e-300] {
            let mut a = Mat::with_dims(3, 3, |i, j| (1 + i + j) as f64 * scale);
            let mut h = HouseholderReflector::from_col(a.as_ref(), 0, 0);
            let beta = h.normalize(f64::MIN_POSITIVE);
            assert!(!h.is_identity());
            let v_norm = h.essential().iter().fold(0.0f64, |acc, &x| acc.hypot(x));
            assert_approx_eq!(v_norm, 1.0, 1e-14);
            assert_approx_eq!(beta.abs() / scale, 14.0f64.sqrt(), 1e-12);

            h.apply_on_the_left(a.as_mut(), 0, Parallelism::None);
            assert_approx_eq!(a.read(0, 0) / scale, beta / scale, 1e-12);
            for i in 1..3 {
                assert_approx_eq!(a.read(i, 0) / scale, 0.0, 1e-12);
            }
        }
    }

    #[test]
    fn reduced_column_is_identity() {
        let a = Mat::with_dims(4, 4, |i, j| if i <= j { 1.0 + (i + j) as f64 } else { 0.0 });
        let mut h = HouseholderReflector::from_col(a.as_ref(), 0, 0);
        assert!(h.normalize(f64::MIN_POSITIVE) == 0.0);
        assert!(h.is_identity());
    }

    #[test]
    fn two_sided_application_is_similarity() {
        let mut rng = StdRng::seed_from_u64(1);
        let n = 12;
        let a = Mat::with_dims(n, n, |_, _| rng.gen::<f64>());
        let mut b = a.clone();

        let mut h = HouseholderReflector::from_col(b.as_ref(), 0, 1);
        h.normalize(f64::MIN_POSITIVE);
        h.apply_on_the_left(b.as_mut(), 0, Parallelism::None);
        h.apply_on_the_right(b.as_mut(), Parallelism::None);

        let trace = |m: &Mat| (0..n).map(|i| m.read(i, i)).sum::<f64>();
        assert_approx_eq!(trace(&a), trace(&b), 1e-12);
        for i in 2..n {
            assert_approx_eq!(b.read(i, 0), 0.0);
        }
        assert_approx_eq!(a.read(0, 0), b.read(0, 0), 1e-12);
    }

    #[test]
    fn parallel_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(2);
        let n = 200;
        let a = Mat::with_dims(n, n, |_, _| rng.gen::<f64>());
        let mut seq = a.clone();
        let mut par = a.clone();

        let mut h = HouseholderReflector::from_col(a.as_ref(), 3, 4);
        h.normalize(f64::MIN_POSITIVE);
        h.apply_on_the_left(seq.as_mut(), 3, Parallelism::None);
        h.apply_on_the_left(par.as_mut(), 3, Parallelism::Rayon(4));
        h.apply_on_the_right(seq.as_mut(), Parallelism::None);
        h.apply_on_the_right(par.as_mut(), Parallelism::Rayon(4));

        for i in 0..n {
            for j in 0..n {
                assert_approx_eq!(seq.read(i, j), par.read(i, j), 1e-12);
            }
        }
    }
}

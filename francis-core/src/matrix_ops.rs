//! Products, sums and scalar reductions of dense matrices.

use crate::{parallelism_above, Mat, MatMut, MatRef, Parallelism, DEFAULT_PARALLEL_THRESHOLD};
use assert2::assert;
use core::ops::{Add, Mul, Sub};

/// Computes `dst := lhs * rhs`.
#[track_caller]
pub fn matmul(dst: MatMut<'_>, lhs: MatRef<'_>, rhs: MatRef<'_>, parallelism: Parallelism) {
    assert!(lhs.ncols() == rhs.nrows());
    assert!(dst.nrows() == lhs.nrows());
    assert!(dst.ncols() == rhs.ncols());

    dst.for_each_row(parallelism, |i, dst_row| {
        dst_row.fill(0.0);
        for (k, &l) in lhs.row(i).iter().enumerate() {
            if l == 0.0 {
                continue;
            }
            for (d, r) in dst_row.iter_mut().zip(rhs.row(k)) {
                *d += l * r;
            }
        }
    });
}

fn zip_with(lhs: MatRef<'_>, rhs: MatRef<'_>, f: impl Fn(f64, f64) -> f64) -> Mat {
    assert!(lhs.nrows() == rhs.nrows());
    assert!(lhs.ncols() == rhs.ncols());
    Mat::with_dims(lhs.nrows(), lhs.ncols(), |i, j| f(lhs.read(i, j), rhs.read(i, j)))
}

impl<'a> MatRef<'a> {
    /// Largest absolute value of the entries, `0.0` for an empty matrix.
    pub fn norm_max(self) -> f64 {
        self.as_slice().iter().fold(0.0f64, |acc, x| acc.max(x.abs()))
    }

    /// Frobenius norm.
    pub fn norm_l2(self) -> f64 {
        self.as_slice().iter().fold(0.0f64, |acc, &x| acc.hypot(x))
    }

    #[track_caller]
    pub fn trace(self) -> f64 {
        assert!(self.nrows() == self.ncols());
        (0..self.nrows()).map(|i| self.read(i, i)).sum()
    }

    /// Determinant through an LU factorization with partial pivoting.
    #[track_caller]
    pub fn determinant(self) -> f64 {
        assert!(self.nrows() == self.ncols());
        let n = self.nrows();
        let mut lu = self.to_owned();
        let mut det = 1.0;

        for k in 0..n {
            let pivot = (k..n)
                .max_by(|&i, &j| lu.read(i, k).abs().total_cmp(&lu.read(j, k).abs()))
                .unwrap_or(k);
            let p = lu.read(pivot, k);
            if p == 0.0 {
                return 0.0;
            }
            if pivot != k {
                let mut view = lu.as_mut();
                let (a, b) = view.two_rows_mut(k, pivot);
                a.swap_with_slice(b);
                det = -det;
            }
            det *= p;

            for i in k + 1..n {
                let factor = lu.read(i, k) / p;
                if factor == 0.0 {
                    continue;
                }
                let mut view = lu.as_mut();
                let (pivot_row, row) = view.two_rows_mut(k, i);
                for (x, y) in row[k..].iter_mut().zip(&pivot_row[k..]) {
                    *x -= factor * y;
                }
            }
        }
        det
    }

    /// Returns `true` if every entry below the first subdiagonal has magnitude at most `tol`.
    pub fn is_upper_hessenberg(self, tol: f64) -> bool {
        (0..self.nrows()).all(|i| (0..i.saturating_sub(1)).all(|j| self.read(i, j).abs() <= tol))
    }
}

impl Mat {
    pub fn norm_max(&self) -> f64 {
        self.as_ref().norm_max()
    }

    pub fn norm_l2(&self) -> f64 {
        self.as_ref().norm_l2()
    }

    pub fn trace(&self) -> f64 {
        self.as_ref().trace()
    }

    pub fn determinant(&self) -> f64 {
        self.as_ref().determinant()
    }

    pub fn is_upper_hessenberg(&self, tol: f64) -> bool {
        self.as_ref().is_upper_hessenberg(tol)
    }
}

impl<'a, 'b> Mul<MatRef<'b>> for MatRef<'a> {
    type Output = Mat;

    #[track_caller]
    fn mul(self, rhs: MatRef<'b>) -> Self::Output {
        let mut out = Mat::zeros(self.nrows(), rhs.ncols());
        let parallelism = parallelism_above(
            Parallelism::Rayon(0),
            self.nrows() * self.ncols(),
            DEFAULT_PARALLEL_THRESHOLD,
        );
        matmul(out.as_mut(), self, rhs, parallelism);
        out
    }
}

impl<'a, 'b> Add<MatRef<'b>> for MatRef<'a> {
    type Output = Mat;

    #[track_caller]
    fn add(self, rhs: MatRef<'b>) -> Self::Output {
        zip_with(self, rhs, |a, b| a + b)
    }
}

impl<'a, 'b> Sub<MatRef<'b>> for MatRef<'a> {
    type Output = Mat;

    #[track_caller]
    fn sub(self, rhs: MatRef<'b>) -> Self::Output {
        zip_with(self, rhs, |a, b| a - b)
    }
}

macro_rules! impl_binop {
    ($trait: ident, $op: ident) => {
        impl<'a> $trait<&'a Mat> for &Mat {
            type Output = Mat;

            #[track_caller]
            fn $op(self, rhs: &'a Mat) -> Self::Output {
                self.as_ref().$op(rhs.as_ref())
            }
        }

        impl $trait<Mat> for Mat {
            type Output = Mat;

            #[track_caller]
            fn $op(self, rhs: Mat) -> Self::Output {
                self.as_ref().$op(rhs.as_ref())
            }
        }

        impl<'a> $trait<&'a Mat> for Mat {
            type Output = Mat;

            #[track_caller]
            fn $op(self, rhs: &'a Mat) -> Self::Output {
                self.as_ref().$op(rhs.as_ref())
            }
        }

        impl $trait<Mat> for &Mat {
            type Output = Mat;

            #[track_caller]
            fn $op(self, rhs: Mat) -> Self::Output {
                self.as_ref().$op(rhs.as_ref())
            }
        }
    };
}

impl_binop!(Mul, mul);
impl_binop!(Add, add);
impl_binop!(Sub, sub);

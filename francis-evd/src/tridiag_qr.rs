//! Implicit symmetric QR on a packed tridiagonal matrix.

use crate::{
    bulge::{BandMut, Batch, Rotation},
    step::StepContext,
    SchurMode, SchurParams,
};
use francis_core::{
    givens::Givens, parallelism_above, Error, MatMut, MatRef, Parallelism, Reborrow, ReborrowMut,
    Result,
};
use std::time::Instant;

/// Returns `true` if `a` is square and symmetric tridiagonal, up to `tol * ‖a‖max`.
pub fn is_symmetric_tridiagonal(a: MatRef<'_>, tol: f64) -> bool {
    let n = a.nrows();
    if a.ncols() != n {
        return false;
    }
    let bound = tol * a.norm_max();
    for i in 0..n {
        let row = a.row(i);
        for (j, &value) in row.iter().enumerate() {
            let far = j > i + 1 || i > j + 1;
            if far && value.abs() > bound {
                return false;
            }
        }
        if i + 1 < n && (row[i + 1] - a.read(i + 1, i)).abs() > bound {
            return false;
        }
    }
    true
}

/// Diagonal and subdiagonal of a symmetric tridiagonal matrix, interleaved as
/// `[d0, e0, d1, e1, ..., d(n-1)]`.
#[derive(Clone, Debug, PartialEq)]
pub struct PackedTridiagonal {
    data: Vec<f64>,
}

impl PackedTridiagonal {
    /// Packs the block `begin..end` of `a`. Each off-diagonal value is the mean of the
    /// subdiagonal and superdiagonal entries.
    pub fn from_block(a: MatRef<'_>, begin: usize, end: usize) -> Self {
        let len = end - begin;
        let mut data = Vec::with_capacity((2 * len).saturating_sub(1));
        for i in begin..end {
            data.push(a.read(i, i));
            if i + 1 < end {
                data.push(0.5 * (a.read(i + 1, i) + a.read(i, i + 1)));
            }
        }
        Self { data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.data.len() + 1) / 2
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn diag(&self, i: usize) -> f64 {
        self.data[2 * i]
    }

    #[inline]
    pub fn sub(&self, i: usize) -> f64 {
        self.data[2 * i + 1]
    }

    #[inline]
    fn set_diag(&mut self, i: usize, value: f64) {
        self.data[2 * i] = value;
    }

    #[inline]
    fn set_sub(&mut self, i: usize, value: f64) {
        self.data[2 * i + 1] = value;
    }

    /// Eigenvalue of the trailing 2×2 block of `..=hi` closest to its last diagonal entry.
    fn wilkinson_shift(&self, hi: usize) -> f64 {
        let td = 0.5 * (self.diag(hi - 1) - self.diag(hi));
        let e = self.sub(hi - 1);
        let mu = self.diag(hi);
        if td == 0.0 {
            return mu - e.abs();
        }
        if e == 0.0 {
            return mu;
        }
        let h = td.hypot(e);
        let denom = if td > 0.0 { td + h } else { td - h };
        // `e²` over- or underflows long before `e` does
        mu - e / (denom / e)
    }

    /// Zeroes every negligible off-diagonal value.
    fn deflate(&mut self, params: &SchurParams) {
        for i in 0..self.len().saturating_sub(1) {
            let e = self.sub(i).abs();
            let tst = self.diag(i).abs() + self.diag(i + 1).abs();
            if e <= params.zero_threshold || e <= params.epsilon * tst {
                self.set_sub(i, 0.0);
            }
        }
    }

    /// Runs one implicit QR sweep on the unreduced block `lo..=hi`. `record` is called with
    /// the local index and the rotation of every plane the sweep acts on.
    fn sweep(&mut self, lo: usize, hi: usize, mut record: impl FnMut(usize, Givens)) {
        let mu = self.wilkinson_shift(hi);
        let mut x = self.diag(lo) - mu;
        let mut z = self.sub(lo);

        for k in lo..hi {
            if z == 0.0 {
                break;
            }
            let (g, magnitude) = Givens::of(x, z);
            let (c, s) = (g.c, g.s);
            if k > lo {
                self.set_sub(k - 1, magnitude);
            }

            let (dk, ek, dk1) = (self.diag(k), self.sub(k), self.diag(k + 1));
            let cs = c * s;
            self.set_diag(k, c * c * dk + 2.0 * cs * ek + s * s * dk1);
            self.set_diag(k + 1, s * s * dk - 2.0 * cs * ek + c * c * dk1);
            self.set_sub(k, cs * (dk1 - dk) + (c * c - s * s) * ek);

            // the bulge moves to (k + 2, k)
            if k + 1 < hi {
                let ek1 = self.sub(k + 1);
                z = s * ek1;
                self.set_sub(k + 1, c * ek1);
            }
            x = self.sub(k);
            record(k, g);
        }
    }
}

/// Diagonalizes the symmetric tridiagonal block `begin..end` of `a`.
///
/// On return the block is diagonal. The rotations are applied to `z` from the right, and in
/// [`SchurMode::Full`] to the rows above the block and the columns right of it.
///
/// [`Error::Timeout`] is returned if `deadline` passes between two sweeps.
pub fn compute_tridiag_in_place(
    a: MatMut<'_>,
    mut z: Option<MatMut<'_>>,
    begin: usize,
    end: usize,
    mode: SchurMode,
    parallelism: Parallelism,
    params: &SchurParams,
    deadline: Option<Instant>,
) -> Result<()> {
    let n = a.ncols();
    let len = end - begin;
    assert2::assert!(end <= a.nrows());
    if len < 2 {
        return Ok(());
    }

    let mut packed = PackedTridiagonal::from_block(a.rb(), begin, end);
    let (mut above, rest) = a.split_at_row_mut(begin);
    let mut band = BandMut::new(rest.subrows_mut(0, len), begin);

    let max_sweeps = params.iteration_cap_factor * len.max(10);
    let mut sweeps = 0;
    let mut hi = len - 1;
    loop {
        packed.deflate(params);
        while hi > 0 && packed.sub(hi - 1) == 0.0 {
            hi -= 1;
        }
        if hi == 0 {
            break;
        }
        let mut lo = hi - 1;
        while lo > 0 && packed.sub(lo - 1) != 0.0 {
            lo -= 1;
        }

        sweeps += 1;
        if sweeps > max_sweeps {
            return Err(Error::NoConvergence {
                begin: begin + lo,
                end: begin + hi + 1,
                iterations: sweeps - 1,
            });
        }
        StepContext::with_deadline(deadline).check_deadline(params)?;

        let mut batch = Batch::default();
        packed.sweep(lo, hi, |k, givens| {
            batch.intermediate.push(Rotation::Single {
                index: begin + k,
                givens,
            })
        });

        let par = parallelism_above(parallelism, batch.len() * n, params.parallel_threshold);
        if let Some(z) = z.rb_mut() {
            batch.apply_on_the_right(z, par);
        }
        if mode == SchurMode::Full {
            batch.apply_on_the_right(above.rb_mut(), par);
            batch.apply_on_the_left(&mut band, end..n);
        }
    }

    log::debug!(
        target: "francis",
        "tridiagonal block {begin}..{end} diagonalized after {sweeps} sweeps",
    );

    for i in 0..len {
        let row = band.row_mut(begin + i);
        row[begin..end].fill(0.0);
        row[begin + i] = packed.diag(i);
    }
    Ok(())
}

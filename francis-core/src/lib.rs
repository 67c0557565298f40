//! Dense row-major `f64` matrices, parallelism helpers and the elementary orthogonal
//! transformations (Householder reflectors, Givens rotations) used by the francis
//! eigenvalue engine.
//!
//! Matrices are stored row by row with a row stride equal to the column count. The borrowed
//! views [`MatRef`] and [`MatMut`] always cover whole rows, so a row can be handed out as a
//! plain slice and disjoint row bands can be given to independent writers.

use assert2::assert;
use core::fmt::Debug;
use core::ops::{Index, IndexMut};

pub use reborrow::{IntoConst, Reborrow, ReborrowMut};

pub mod error;
pub mod givens;
pub mod householder;
pub mod matrix_ops;

pub use error::{Error, Result};

/// Work size, in row-elements, above which row-parallel updates are requested.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 8192;

/// Parallelism strategy that can be passed to most of the routines in the library.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parallelism {
    /// No parallelism.
    ///
    /// The code is executed sequentially on the same thread that calls a function
    /// and passes this parameter.
    None,
    /// Rayon parallelism.
    ///
    /// The code is possibly executed in parallel on the current thread, as well as the
    /// currently active rayon thread pool.
    ///
    /// The contained value represents a hint about the number of threads an implementation
    /// should use, but there is no way to enforce this in practice. `0` means the thread
    /// count of the active pool.
    Rayon(usize),
}

#[inline]
#[doc(hidden)]
pub fn parallelism_degree(parallelism: Parallelism) -> usize {
    match parallelism {
        Parallelism::None => 1,
        Parallelism::Rayon(0) => rayon::current_num_threads(),
        Parallelism::Rayon(n_threads) => n_threads,
    }
}

/// Returns `parallelism` if `work` reaches `threshold`, and [`Parallelism::None`] otherwise.
#[inline]
pub fn parallelism_above(parallelism: Parallelism, work: usize, threshold: usize) -> Parallelism {
    if work >= threshold {
        parallelism
    } else {
        Parallelism::None
    }
}

/// Splits `n` items into `chunk_count` nearly equal chunks and returns the start and length of
/// chunk `idx`.
#[inline]
#[doc(hidden)]
pub fn par_split_indices(n: usize, idx: usize, chunk_count: usize) -> (usize, usize) {
    let chunk_size = n / chunk_count;
    let rem = n % chunk_count;

    let idx_to_start = move |idx| {
        if idx < rem {
            idx * (chunk_size + 1)
        } else {
            rem + idx * chunk_size
        }
    };

    let start = idx_to_start(idx);
    let end = idx_to_start(idx + 1);
    (start, end - start)
}

/// Heap allocated row-major matrix.
#[derive(Clone, PartialEq)]
pub struct Mat {
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

/// Immutable view over whole rows of a matrix.
#[derive(Copy, Clone)]
pub struct MatRef<'a> {
    data: &'a [f64],
    nrows: usize,
    ncols: usize,
}

/// Mutable view over whole rows of a matrix.
pub struct MatMut<'a> {
    data: &'a mut [f64],
    nrows: usize,
    ncols: usize,
}

impl Mat {
    /// Returns a matrix of dimensions `(nrows, ncols)` filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![0.0; nrows * ncols],
            nrows,
            ncols,
        }
    }

    /// Returns the `n×n` identity matrix.
    pub fn identity(n: usize) -> Self {
        Self::with_dims(n, n, |i, j| if i == j { 1.0 } else { 0.0 })
    }

    /// Returns a matrix of dimensions `(nrows, ncols)` whose element `(i, j)` is `f(i, j)`.
    pub fn with_dims(nrows: usize, ncols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(nrows * ncols);
        for i in 0..nrows {
            for j in 0..ncols {
                data.push(f(i, j));
            }
        }
        Self { data, nrows, ncols }
    }

    /// Builds a matrix from a list of rows of equal length.
    #[track_caller]
    pub fn from_rows(rows: &[&[f64]]) -> Self {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, |row| row.len());
        let mut data = Vec::with_capacity(nrows * ncols);
        for row in rows {
            assert!(row.len() == ncols);
            data.extend_from_slice(row);
        }
        Self { data, nrows, ncols }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    #[track_caller]
    pub fn read(&self, i: usize, j: usize) -> f64 {
        self.as_ref().read(i, j)
    }

    #[inline]
    #[track_caller]
    pub fn write(&mut self, i: usize, j: usize, value: f64) {
        self.as_mut().write(i, j, value)
    }

    #[inline]
    #[track_caller]
    pub fn row(&self, i: usize) -> &[f64] {
        self.as_ref().row(i)
    }

    #[inline]
    #[track_caller]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        self.as_mut().row_mut_owned(i)
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_> {
        MatRef {
            data: &self.data,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    #[inline]
    pub fn as_mut(&mut self) -> MatMut<'_> {
        MatMut {
            data: &mut self.data,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Returns the transpose of `self`.
    pub fn transpose(&self) -> Mat {
        self.as_ref().transpose()
    }
}

impl<'a> MatRef<'a> {
    /// Creates a view over `data`, interpreted as `nrows` rows of `ncols` elements.
    #[track_caller]
    pub fn from_slice(data: &'a [f64], nrows: usize, ncols: usize) -> Self {
        assert!(data.len() == nrows * ncols);
        Self { data, nrows, ncols }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    #[track_caller]
    pub fn read(&self, i: usize, j: usize) -> f64 {
        assert!(i < self.nrows);
        assert!(j < self.ncols);
        self.data[i * self.ncols + j]
    }

    #[inline]
    #[track_caller]
    pub fn row(self, i: usize) -> &'a [f64] {
        assert!(i < self.nrows);
        &self.data[i * self.ncols..(i + 1) * self.ncols]
    }

    pub fn to_owned(self) -> Mat {
        Mat {
            data: self.data.to_vec(),
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    pub fn transpose(self) -> Mat {
        Mat::with_dims(self.ncols, self.nrows, |i, j| self.read(j, i))
    }

    #[inline]
    pub fn as_slice(self) -> &'a [f64] {
        self.data
    }
}

impl<'a> MatMut<'a> {
    /// Creates a mutable view over `data`, interpreted as `nrows` rows of `ncols` elements.
    #[track_caller]
    pub fn from_slice(data: &'a mut [f64], nrows: usize, ncols: usize) -> Self {
        assert!(data.len() == nrows * ncols);
        Self { data, nrows, ncols }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    #[track_caller]
    pub fn read(&self, i: usize, j: usize) -> f64 {
        self.rb().read(i, j)
    }

    #[inline]
    #[track_caller]
    pub fn write(&mut self, i: usize, j: usize, value: f64) {
        assert!(i < self.nrows);
        assert!(j < self.ncols);
        self.data[i * self.ncols + j] = value;
    }

    #[inline]
    #[track_caller]
    pub fn row(&self, i: usize) -> &[f64] {
        self.rb().row(i)
    }

    #[inline]
    #[track_caller]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        self.rb_mut().row_mut_owned(i)
    }

    #[inline]
    #[track_caller]
    fn row_mut_owned(self, i: usize) -> &'a mut [f64] {
        assert!(i < self.nrows);
        &mut self.data[i * self.ncols..(i + 1) * self.ncols]
    }

    /// Returns mutable borrows of two distinct rows, in the order they were requested.
    #[track_caller]
    pub fn two_rows_mut(&mut self, i: usize, k: usize) -> (&mut [f64], &mut [f64]) {
        assert!(i != k);
        assert!(i.max(k) < self.nrows);
        let ncols = self.ncols;
        let (lo, hi) = (i.min(k), i.max(k));
        let (head, tail) = self.data.split_at_mut(hi * ncols);
        let lo_row = &mut head[lo * ncols..(lo + 1) * ncols];
        let hi_row = &mut tail[..ncols];
        if i < k {
            (lo_row, hi_row)
        } else {
            (hi_row, lo_row)
        }
    }

    /// Returns mutable borrows of the three consecutive rows starting at `i`.
    #[track_caller]
    pub fn three_rows_mut(&mut self, i: usize) -> [&mut [f64]; 3] {
        assert!(i + 3 <= self.nrows);
        let ncols = self.ncols;
        let block = &mut self.data[i * ncols..(i + 3) * ncols];
        let (r0, rest) = block.split_at_mut(ncols);
        let (r1, r2) = rest.split_at_mut(ncols);
        [r0, r1, r2]
    }

    /// Returns the rows `start..start + count`.
    #[inline]
    #[track_caller]
    pub fn subrows_mut(self, start: usize, count: usize) -> MatMut<'a> {
        assert!(start + count <= self.nrows);
        let ncols = self.ncols;
        MatMut {
            data: &mut self.data[start * ncols..(start + count) * ncols],
            nrows: count,
            ncols,
        }
    }

    /// Splits the view into the rows above `i` and the rows starting at `i`.
    #[inline]
    #[track_caller]
    pub fn split_at_row_mut(self, i: usize) -> (MatMut<'a>, MatMut<'a>) {
        assert!(i <= self.nrows);
        let (nrows, ncols) = (self.nrows, self.ncols);
        let (top, bot) = self.data.split_at_mut(i * ncols);
        (
            MatMut {
                data: top,
                nrows: i,
                ncols,
            },
            MatMut {
                data: bot,
                nrows: nrows - i,
                ncols,
            },
        )
    }

    /// Splits the view into disjoint row bands. `bands` holds `(start, end)` row ranges
    /// sorted in increasing order and must not overlap.
    #[track_caller]
    pub fn row_bands_mut(self, bands: &[(usize, usize)]) -> Vec<MatMut<'a>> {
        let (nrows, ncols) = (self.nrows, self.ncols);
        let mut rest = self.data;
        let mut consumed = 0;
        let mut out = Vec::with_capacity(bands.len());
        for &(start, end) in bands {
            assert!(start >= consumed);
            assert!(start <= end);
            assert!(end <= nrows);
            let tail = core::mem::take(&mut rest);
            let (_, tail) = tail.split_at_mut((start - consumed) * ncols);
            let (band, tail) = tail.split_at_mut((end - start) * ncols);
            rest = tail;
            consumed = end;
            out.push(MatMut {
                data: band,
                nrows: end - start,
                ncols,
            });
        }
        out
    }

    /// Calls `op(i, row)` on every row of the view, possibly in parallel.
    pub fn for_each_row(
        self,
        parallelism: Parallelism,
        op: impl Fn(usize, &mut [f64]) + Send + Sync,
    ) {
        let (nrows, ncols) = (self.nrows, self.ncols);
        if ncols == 0 || nrows == 0 {
            return;
        }
        match parallelism {
            Parallelism::None => self
                .data
                .chunks_exact_mut(ncols)
                .enumerate()
                .for_each(|(i, row)| op(i, row)),
            Parallelism::Rayon(_) => {
                use rayon::prelude::*;
                let min_len = (nrows / parallelism_degree(parallelism)).max(1);
                self.data
                    .par_chunks_exact_mut(ncols)
                    .enumerate()
                    .with_min_len(min_len)
                    .for_each(|(i, row)| op(i, row));
            }
        }
    }

    #[track_caller]
    pub fn copy_from(&mut self, other: MatRef<'_>) {
        assert!(self.nrows == other.nrows);
        assert!(self.ncols == other.ncols);
        self.data.copy_from_slice(other.data);
    }

    #[inline]
    pub fn as_slice_mut(self) -> &'a mut [f64] {
        self.data
    }
}

impl<'b, 'a> Reborrow<'b> for MatRef<'a> {
    type Target = MatRef<'b>;

    #[inline]
    fn rb(&'b self) -> Self::Target {
        *self
    }
}

impl<'b, 'a> ReborrowMut<'b> for MatRef<'a> {
    type Target = MatRef<'b>;

    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        *self
    }
}

impl<'a> IntoConst for MatRef<'a> {
    type Target = MatRef<'a>;

    #[inline]
    fn into_const(self) -> Self::Target {
        self
    }
}

impl<'b, 'a> Reborrow<'b> for MatMut<'a> {
    type Target = MatRef<'b>;

    #[inline]
    fn rb(&'b self) -> Self::Target {
        MatRef {
            data: &*self.data,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }
}

impl<'b, 'a> ReborrowMut<'b> for MatMut<'a> {
    type Target = MatMut<'b>;

    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        MatMut {
            data: &mut *self.data,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }
}

impl<'a> IntoConst for MatMut<'a> {
    type Target = MatRef<'a>;

    #[inline]
    fn into_const(self) -> Self::Target {
        MatRef {
            data: self.data,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }
}

impl<'a> Debug for MatRef<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        struct DebugRow<'a>(&'a [f64]);

        impl<'a> Debug for DebugRow<'a> {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.debug_list().entries(self.0.iter()).finish()
            }
        }

        writeln!(f, "[")?;
        for i in 0..self.nrows {
            DebugRow(self.row(i)).fmt(f)?;
            f.write_str(",\n")?;
        }
        write!(f, "]")
    }
}

impl<'a> Debug for MatMut<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.rb().fmt(f)
    }
}

impl Debug for Mat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl Index<(usize, usize)> for Mat {
    type Output = f64;

    #[inline]
    #[track_caller]
    fn index(&self, (i, j): (usize, usize)) -> &Self::Output {
        assert!(i < self.nrows);
        assert!(j < self.ncols);
        &self.data[i * self.ncols + j]
    }
}

impl IndexMut<(usize, usize)> for Mat {
    #[inline]
    #[track_caller]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut Self::Output {
        assert!(i < self.nrows);
        assert!(j < self.ncols);
        &mut self.data[i * self.ncols + j]
    }
}

/// Creates a [`Mat`] containing the arguments.
///
/// ```
/// use francis_core::mat;
///
/// let matrix = mat![
///     [1.0, 5.0, 9.0],
///     [2.0, 6.0, 10.0],
///     [3.0, 7.0, 11.0],
///     [4.0, 8.0, 12.0f64],
/// ];
///
/// assert_eq!(matrix.read(0, 0), 1.0);
/// assert_eq!(matrix.read(1, 0), 2.0);
/// assert_eq!(matrix.read(2, 0), 3.0);
/// assert_eq!(matrix.read(3, 0), 4.0);
///
/// assert_eq!(matrix.read(0, 1), 5.0);
/// assert_eq!(matrix.read(1, 1), 6.0);
/// assert_eq!(matrix.read(2, 1), 7.0);
/// assert_eq!(matrix.read(3, 1), 8.0);
///
/// assert_eq!(matrix.read(0, 2), 9.0);
/// assert_eq!(matrix.read(1, 2), 10.0);
/// assert_eq!(matrix.read(2, 2), 11.0);
/// assert_eq!(matrix.read(3, 2), 12.0);
/// ```
#[macro_export]
macro_rules! mat {
    () => {
        $crate::Mat::zeros(0, 0)
    };
    ($([$($v:expr),* $(,)?]),+ $(,)?) => {
        $crate::Mat::from_rows(&[$(&[$(($v) as f64),*][..]),+])
    };
}

//! Bulge creation and chasing on an active diagonal block `begin..end` of a Hessenberg matrix.
//!
//! Every chase is a sequence of steps. Each step computes one rotation from the current bulge,
//! applies it to the rows of the block (left half), then to the columns of the block (right
//! half). The rotations are recorded in a [`Batch`] so that the parts of the matrix outside the
//! block can be updated afterwards, one pass per row.

use crate::shift::DoubleShift;
use francis_core::{
    givens::{Givens, GivensPair},
    MatMut, Parallelism, Reborrow, ReborrowMut,
};
use core::ops::Range;

/// Element access used by the chasing code.
pub trait BulgeTarget {
    fn read(&self, i: usize, j: usize) -> f64;
    fn write(&mut self, i: usize, j: usize, value: f64);
}

/// Band of consecutive rows of a matrix, addressed with the row indices of the full matrix.
pub struct BandMut<'a> {
    rows: MatMut<'a>,
    offset: usize,
}

impl<'a> BandMut<'a> {
    /// `rows` holds the rows `offset..offset + rows.nrows()` of the full matrix.
    #[inline]
    pub fn new(rows: MatMut<'a>, offset: usize) -> Self {
        Self { rows, offset }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.rows.ncols()
    }

    #[inline]
    #[track_caller]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        self.rows.row_mut(i - self.offset)
    }

    #[inline]
    pub fn rb_mut(&mut self) -> BandMut<'_> {
        BandMut {
            rows: self.rows.rb_mut(),
            offset: self.offset,
        }
    }

    #[inline]
    pub fn rows_mut(&mut self) -> MatMut<'_> {
        self.rows.rb_mut()
    }
}

impl BulgeTarget for BandMut<'_> {
    #[inline]
    #[track_caller]
    fn read(&self, i: usize, j: usize) -> f64 {
        self.rows.rb().read(i - self.offset, j)
    }

    #[inline]
    #[track_caller]
    fn write(&mut self, i: usize, j: usize, value: f64) {
        self.rows.write(i - self.offset, j, value)
    }
}

/// Rotation tagged with the first row and column it acts on.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Rotation {
    /// Acts on `index` and `index + 1`.
    Single { index: usize, givens: Givens },
    /// Acts on `index`, `index + 1` and `index + 2`.
    Pair { index: usize, pair: GivensPair },
}

impl Rotation {
    #[inline]
    pub fn index(&self) -> usize {
        match *self {
            Rotation::Single { index, .. } | Rotation::Pair { index, .. } => index,
        }
    }

    /// One past the last row of a Hessenberg block ending at `end` whose columns are touched
    /// when the rotation is applied on the right.
    #[inline]
    pub fn right_extent(&self, end: usize) -> usize {
        match *self {
            Rotation::Single { index, .. } => (index + 3).min(end),
            Rotation::Pair { index, .. } => (index + 4).min(end),
        }
    }

    /// Applies the rotation to the rows it acts on, over the column range `cols`.
    pub fn rotate_rows(&self, a: &mut impl BulgeTarget, cols: Range<usize>) {
        fn rotate(g: &Givens, a: &mut impl BulgeTarget, i: usize, cols: Range<usize>) {
            if g.is_identity() {
                return;
            }
            for j in cols {
                let (x, y) = (a.read(i, j), a.read(i + 1, j));
                a.write(i, j, g.rotate_x(x, y));
                a.write(i + 1, j, g.rotate_y(x, y));
            }
        }

        match self {
            Rotation::Single { index, givens } => rotate(givens, a, *index, cols),
            Rotation::Pair { index, pair } => {
                rotate(&pair.low, a, index + 1, cols.clone());
                rotate(&pair.high, a, *index, cols);
            }
        }
    }

    /// Applies the transposed rotation from the right to the columns it acts on, over the row
    /// range `rows`.
    pub fn rotate_cols(&self, a: &mut impl BulgeTarget, rows: Range<usize>) {
        fn rotate(g: &Givens, a: &mut impl BulgeTarget, j: usize, rows: Range<usize>) {
            if g.is_identity() {
                return;
            }
            for i in rows {
                let (x, y) = (a.read(i, j), a.read(i, j + 1));
                a.write(i, j, g.rotate_x(x, y));
                a.write(i, j + 1, g.rotate_y(x, y));
            }
        }

        match self {
            Rotation::Single { index, givens } => rotate(givens, a, *index, rows),
            Rotation::Pair { index, pair } => {
                rotate(&pair.low, a, index + 1, rows.clone());
                rotate(&pair.high, a, *index, rows);
            }
        }
    }

    #[inline]
    pub fn apply_on_the_right_row(&self, row: &mut [f64]) {
        match self {
            Rotation::Single { index, givens } => {
                givens.apply_on_the_right_row(row, *index, index + 1)
            }
            Rotation::Pair { index, pair } => pair.apply_on_the_right_row(row, *index),
        }
    }
}

/// Rotations recorded while chasing bulges through one active block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    /// Rotation creating the bulge.
    pub implicit: Option<Rotation>,
    pub intermediate: Vec<Rotation>,
    /// Rotation restoring the Hessenberg form on the last two rows.
    pub terminal: Option<Rotation>,
}

impl Batch {
    pub fn single(rotation: Rotation) -> Self {
        Self {
            terminal: Some(rotation),
            ..Default::default()
        }
    }

    /// Iterates over the rotations in the order they were applied.
    pub fn iter(&self) -> impl Iterator<Item = &Rotation> + '_ {
        self.implicit
            .iter()
            .chain(self.intermediate.iter())
            .chain(self.terminal.iter())
    }

    pub fn len(&self) -> usize {
        self.intermediate.len()
            + self.implicit.is_some() as usize
            + self.terminal.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies every rotation to the rows it acts on, over the column range `cols`.
    pub fn apply_on_the_left(&self, a: &mut impl BulgeTarget, cols: Range<usize>) {
        if cols.is_empty() {
            return;
        }
        for rotation in self.iter() {
            rotation.rotate_rows(a, cols.clone());
        }
    }

    #[inline]
    pub fn apply_on_the_right_row(&self, row: &mut [f64]) {
        for rotation in self.iter() {
            rotation.apply_on_the_right_row(row);
        }
    }

    /// Applies every transposed rotation from the right to all the rows of `a`.
    pub fn apply_on_the_right(&self, a: MatMut<'_>, parallelism: Parallelism) {
        if self.is_empty() {
            return;
        }
        a.for_each_row(parallelism, |_, row| self.apply_on_the_right_row(row));
    }
}

/// Implicit double-shift chase over `begin..end`, with `end - begin >= 4`.
#[derive(Copy, Clone, Debug)]
pub struct DoubleShiftChase {
    pub begin: usize,
    pub end: usize,
    pub shift: DoubleShift,
}

impl DoubleShiftChase {
    #[inline]
    pub fn steps(&self) -> usize {
        self.end - self.begin - 1
    }

    /// Computes the rotation of step `s` and applies it to the rows of the block.
    ///
    /// Step `0` creates the bulge, steps `1..steps - 1` fold it one row down, and the last
    /// step restores the Hessenberg form on the last two rows.
    pub fn left(&self, a: &mut impl BulgeTarget, s: usize) -> Rotation {
        let (begin, end) = (self.begin, self.end);
        let len = end - begin;

        if s == 0 {
            let [x, y, z] = self.shift.bulge_column(a, begin);
            let (pair, _) = GivensPair::of(x, y, z);
            let rotation = Rotation::Pair { index: begin, pair };
            rotation.rotate_rows(a, begin..end);
            return rotation;
        }

        let k = begin + s - 1;
        let rotation = if s + 2 < len {
            let (pair, anchor) =
                GivensPair::of(a.read(k + 1, k), a.read(k + 2, k), a.read(k + 3, k));
            a.write(k + 1, k, anchor);
            a.write(k + 2, k, 0.0);
            a.write(k + 3, k, 0.0);
            Rotation::Pair { index: k + 1, pair }
        } else {
            let (givens, anchor) = Givens::of(a.read(k + 1, k), a.read(k + 2, k));
            a.write(k + 1, k, anchor);
            a.write(k + 2, k, 0.0);
            Rotation::Single { index: k + 1, givens }
        };
        rotation.rotate_rows(a, k + 1..end);
        rotation
    }

    /// Applies the rotation of a step to the columns of the block.
    #[inline]
    pub fn right(&self, a: &mut impl BulgeTarget, rotation: &Rotation) {
        rotation.rotate_cols(a, self.begin..rotation.right_extent(self.end));
    }
}

/// Implicit single-shift chase over `begin..end`, with `end - begin >= 3`.
#[derive(Copy, Clone, Debug)]
pub struct SingleShiftChase {
    pub begin: usize,
    pub end: usize,
    pub shift: f64,
}

impl SingleShiftChase {
    #[inline]
    pub fn steps(&self) -> usize {
        self.end - self.begin - 1
    }

    pub fn left(&self, a: &mut impl BulgeTarget, s: usize) -> Rotation {
        let (begin, end) = (self.begin, self.end);

        let rotation = if s == 0 {
            let (givens, _) = Givens::of(
                a.read(begin, begin) - self.shift,
                a.read(begin + 1, begin),
            );
            Rotation::Single {
                index: begin,
                givens,
            }
        } else {
            let k = begin + s - 1;
            let (givens, anchor) = Givens::of(a.read(k + 1, k), a.read(k + 2, k));
            a.write(k + 1, k, anchor);
            a.write(k + 2, k, 0.0);
            Rotation::Single { index: k + 1, givens }
        };
        rotation.rotate_rows(a, rotation.index()..end);
        rotation
    }

    #[inline]
    pub fn right(&self, a: &mut impl BulgeTarget, rotation: &Rotation) {
        rotation.rotate_cols(a, self.begin..rotation.right_extent(self.end));
    }
}

/// Creates a double-shift bulge at the top of `begin..end` and chases it to the bottom.
/// `listener` is called with the row of the anchor after every fold.
pub fn chase_double(
    a: &mut impl BulgeTarget,
    begin: usize,
    end: usize,
    shift: DoubleShift,
    mut listener: impl FnMut(usize),
) -> Batch {
    let chase = DoubleShiftChase { begin, end, shift };
    let steps = chase.steps();
    let mut batch = Batch {
        intermediate: Vec::with_capacity(steps.saturating_sub(2)),
        ..Default::default()
    };

    for s in 0..steps {
        let rotation = chase.left(a, s);
        chase.right(a, &rotation);
        if s == 0 {
            batch.implicit = Some(rotation);
        } else if s + 1 == steps {
            batch.terminal = Some(rotation);
        } else {
            batch.intermediate.push(rotation);
            listener(rotation.index());
        }
    }
    batch
}

/// Creates a single-shift bulge at the top of `begin..end` and chases it to the bottom.
pub fn chase_single(a: &mut impl BulgeTarget, begin: usize, end: usize, shift: f64) -> Batch {
    let chase = SingleShiftChase { begin, end, shift };
    let steps = chase.steps();
    let mut batch = Batch {
        intermediate: Vec::with_capacity(steps.saturating_sub(1)),
        ..Default::default()
    };

    for s in 0..steps {
        let rotation = chase.left(a, s);
        chase.right(a, &rotation);
        if s == 0 {
            batch.implicit = Some(rotation);
        } else {
            batch.intermediate.push(rotation);
        }
    }
    batch
}

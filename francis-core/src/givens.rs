use crate::MatMut;
use assert2::assert;
use core::ops::Range;

/// Plane rotation `[[c, s], [-s, c]]`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Givens {
    pub c: f64,
    pub s: f64,
}

impl Givens {
    pub const IDENTITY: Self = Self { c: 1.0, s: 0.0 };

    /// Returns the rotation mapping `(a, b)` to `(magnitude, 0)`, together with `magnitude`.
    ///
    /// The magnitude carries the sign of `a`. When both inputs are zero the identity is
    /// returned with a zero magnitude.
    #[inline]
    pub fn of(a: f64, b: f64) -> (Self, f64) {
        if b == 0.0 {
            return (Self::IDENTITY, a);
        }
        let r = a.hypot(b);
        let magnitude = if a < 0.0 { -r } else { r };
        (
            Self {
                c: a / magnitude,
                s: b / magnitude,
            },
            magnitude,
        )
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.c == 1.0 && self.s == 0.0
    }

    #[inline]
    pub fn rotate_x(&self, x: f64, y: f64) -> f64 {
        self.c * x + self.s * y
    }

    #[inline]
    pub fn rotate_y(&self, x: f64, y: f64) -> f64 {
        self.c * y - self.s * x
    }

    #[inline]
    pub fn transpose(&self) -> Self {
        Self {
            c: self.c,
            s: -self.s,
        }
    }

    #[inline]
    pub fn apply_on_slices(&self, x: &mut [f64], y: &mut [f64]) {
        if self.is_identity() {
            return;
        }
        for (x, y) in x.iter_mut().zip(y.iter_mut()) {
            let (x_, y_) = (*x, *y);
            *x = self.rotate_x(x_, y_);
            *y = self.rotate_y(x_, y_);
        }
    }

    /// Rotates rows `i` and `k` of `a` over the column range `cols`.
    #[inline]
    #[track_caller]
    pub fn apply_on_the_left(&self, mut a: MatMut<'_>, i: usize, k: usize, cols: Range<usize>) {
        let (x, y) = a.two_rows_mut(i, k);
        self.apply_on_slices(&mut x[cols.clone()], &mut y[cols]);
    }

    /// Rotates entries `i` and `k` of a single row. Applied to every row this is the right
    /// multiplication by the transpose that completes the similarity `G A Gᵀ`.
    #[inline]
    pub fn apply_on_the_right_row(&self, row: &mut [f64], i: usize, k: usize) {
        let (x, y) = (row[i], row[k]);
        row[i] = self.rotate_x(x, y);
        row[k] = self.rotate_y(x, y);
    }

    /// Rotates columns `i` and `k` of `a` over the row range `rows`.
    #[inline]
    #[track_caller]
    pub fn apply_on_the_right(&self, mut a: MatMut<'_>, i: usize, k: usize, rows: Range<usize>) {
        assert!(rows.end <= a.nrows());
        if self.is_identity() {
            return;
        }
        for r in rows {
            self.apply_on_the_right_row(a.row_mut(r), i, k);
        }
    }
}

/// Two cascaded rotations folding a 3-vector `(a, b, c)` into `(anchor, 0, 0)`.
///
/// `low` acts on the last two entries, `high` on the first two.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GivensPair {
    pub high: Givens,
    pub low: Givens,
}

impl GivensPair {
    /// Returns the pair and the anchor value.
    #[inline]
    pub fn of(a: f64, b: f64, c: f64) -> (Self, f64) {
        let (low, folded) = Givens::of(b, c);
        let (high, anchor) = Givens::of(a, folded);
        (Self { high, low }, anchor)
    }

    /// Rotates the three consecutive rows starting at `i` over the column range `cols`.
    #[track_caller]
    pub fn apply_on_the_left(&self, mut a: MatMut<'_>, i: usize, cols: Range<usize>) {
        let [r0, r1, r2] = a.three_rows_mut(i);
        self.low
            .apply_on_slices(&mut r1[cols.clone()], &mut r2[cols.clone()]);
        self.high.apply_on_slices(&mut r0[cols.clone()], &mut r1[cols]);
    }

    /// Rotates entries `i`, `i + 1` and `i + 2` of a single row.
    #[inline]
    pub fn apply_on_the_right_row(&self, row: &mut [f64], i: usize) {
        self.low.apply_on_the_right_row(row, i + 1, i + 2);
        self.high.apply_on_the_right_row(row, i, i + 1);
    }

    /// Rotates the three consecutive columns starting at `i` over the row range `rows`.
    #[track_caller]
    pub fn apply_on_the_right(&self, mut a: MatMut<'_>, i: usize, rows: Range<usize>) {
        assert!(rows.end <= a.nrows());
        for r in rows {
            self.apply_on_the_right_row(a.row_mut(r), i);
        }
    }
}

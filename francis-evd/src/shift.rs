use crate::bulge::BulgeTarget;
use francis_core::givens::Givens;
use num_complex::Complex64;

/// Implicit double shift, represented by the trace and determinant of the 2×2 matrix whose
/// eigenvalues are the two shifts.
///
/// Both are stored relative to `scale`, so that shifts of any finite magnitude can be
/// represented: the actual trace is `scale * trace` and the actual determinant is
/// `scale² * determinant`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DoubleShift {
    trace: f64,
    determinant: f64,
    scale: f64,
}

impl DoubleShift {
    /// Shift pair with the given trace and determinant.
    pub fn new(trace: f64, determinant: f64) -> Self {
        Self {
            trace,
            determinant,
            scale: 1.0,
        }
    }

    /// Shift pair equal to the eigenvalues of the 2×2 matrix `[[p, q], [r, s]]`.
    pub fn from_entries(p: f64, q: f64, r: f64, s: f64) -> Self {
        let scale = max_abs(&[p, q, r, s]);
        if scale == 0.0 {
            return Self::new(0.0, 0.0);
        }
        let inv = scale.recip();
        let (p, q, r, s) = (p * inv, q * inv, r * inv, s * inv);
        Self {
            trace: p + s,
            determinant: p * s - q * r,
            scale,
        }
    }

    /// Shift pair made of the two given eigenvalues, which are either both real or complex
    /// conjugates.
    pub fn from_eigenvalues(l1: Complex64, l2: Complex64) -> Self {
        let scale = max_abs(&[l1.re, l1.im, l2.re, l2.im]);
        if scale == 0.0 {
            return Self::new(0.0, 0.0);
        }
        let (l1, l2) = (l1.unscale(scale), l2.unscale(scale));
        Self {
            trace: (l1 + l2).re,
            determinant: (l1 * l2).re,
            scale,
        }
    }

    /// Shift pair equal to the eigenvalues of the 2×2 block starting at `(i, i)`.
    pub fn from_block(a: &impl BulgeTarget, i: usize) -> Self {
        Self::from_entries(
            a.read(i, i),
            a.read(i, i + 1),
            a.read(i + 1, i),
            a.read(i + 1, i + 1),
        )
    }

    /// Shift pair taken from the trailing 2×2 block of `begin..end`. When its eigenvalues are
    /// real, the one closest to the last diagonal entry is used twice.
    pub fn wilkinson(a: &impl BulgeTarget, end: usize) -> Self {
        let block = Self::from_block(a, end - 2);
        let delta = block.delta();
        if delta < 0.0 {
            return block;
        }

        let last = a.read(end - 1, end - 1) / block.scale;
        let half_trace = block.trace * 0.5;
        let root = delta.sqrt() * 0.5;
        let (l1, l2) = (half_trace + root, half_trace - root);
        let shift = if (l1 - last).abs() <= (l2 - last).abs() {
            l1
        } else {
            l2
        };
        Self {
            trace: 2.0 * shift,
            determinant: shift * shift,
            scale: block.scale,
        }
    }

    /// Ad hoc shift pair used to break cycles when an active block fails to deflate. `top`
    /// selects whether the shift is built from the leading or the trailing subdiagonal
    /// entries.
    pub fn exceptional(a: &impl BulgeTarget, begin: usize, end: usize, top: bool) -> Self {
        let (s, diag) = if top {
            (
                a.read(begin + 1, begin).abs() + a.read(begin + 2, begin + 1).abs(),
                a.read(begin, begin),
            )
        } else {
            (
                a.read(end - 1, end - 2).abs() + a.read(end - 2, end - 3).abs(),
                a.read(end - 1, end - 1),
            )
        };
        let h11 = 0.75 * s + diag;
        Self::from_entries(h11, -0.4375 * s, s, h11)
    }

    /// Discriminant of the characteristic polynomial, relative to `scale²`. Negative for a
    /// complex conjugate pair.
    #[inline]
    pub fn delta(&self) -> f64 {
        self.trace * self.trace - 4.0 * self.determinant
    }

    /// Sum of the two shifts.
    #[inline]
    pub fn trace(&self) -> f64 {
        self.trace * self.scale
    }

    /// Product of the two shifts. Overflows for shifts above the square root of the largest
    /// finite value.
    #[inline]
    pub fn determinant(&self) -> f64 {
        self.determinant * self.scale * self.scale
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.trace.is_finite() && self.determinant.is_finite() && self.scale.is_finite()
    }

    /// Both shifts, the one with the larger real or imaginary part first.
    pub fn eigenvalues(&self) -> (Complex64, Complex64) {
        let delta = self.delta();
        let half_trace = self.trace * 0.5;
        let (l1, l2) = if delta >= 0.0 {
            let root = delta.sqrt() * 0.5;
            (
                Complex64::new(half_trace + root, 0.0),
                Complex64::new(half_trace - root, 0.0),
            )
        } else {
            let root = (-delta).sqrt() * 0.5;
            (
                Complex64::new(half_trace, root),
                Complex64::new(half_trace, -root),
            )
        };
        (l1.scale(self.scale), l2.scale(self.scale))
    }

    /// First column of `H² - trace·H + determinant·I` restricted to rows `begin..begin + 3`,
    /// up to a positive scaling factor.
    pub fn bulge_column(&self, a: &impl BulgeTarget, begin: usize) -> [f64; 3] {
        let b = begin;
        let h00 = a.read(b, b);
        let h01 = a.read(b, b + 1);
        let h10 = a.read(b + 1, b);
        let h11 = a.read(b + 1, b + 1);
        let h21 = a.read(b + 2, b + 1);

        let scale = max_abs(&[h00, h01, h10, h11, h21]);
        if scale == 0.0 {
            return [0.0; 3];
        }
        let inv = scale.recip();
        let (h00, h01, h10, h11, h21) = (h00 * inv, h01 * inv, h10 * inv, h11 * inv, h21 * inv);
        let ratio = self.scale * inv;
        let t = self.trace * ratio;
        let d = self.determinant * ratio * ratio;

        [
            h00 * h00 + h01 * h10 - t * h00 + d,
            h10 * (h00 + h11 - t),
            h10 * h21,
        ]
    }
}

#[inline]
fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0f64, |acc, x| acc.max(x.abs()))
}

/// Standardized form of a real 2×2 block.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Standardized2x2 {
    /// `[a, b, c, d]`, the block in row-major order. Either `c == 0`, or `a == d` and
    /// `b * c < 0`.
    pub block: [f64; 4],
    pub eigenvalues: (Complex64, Complex64),
    /// Rotation `R` such that the standardized block is `Rᵀ A R` when applied on both sides
    /// as a [`Givens`] rotation.
    pub rotation: Givens,
}

/// Computes the Schur factorization of the real 2×2 block `[[a, b], [c, d]]`.
///
/// Real eigenvalues give an upper triangular block, a complex conjugate pair gives a block with
/// equal diagonal entries and off-diagonal entries of opposite signs.
pub fn standardize_2x2(
    mut a: f64,
    mut b: f64,
    mut c: f64,
    mut d: f64,
    eps: f64,
    zero_threshold: f64,
) -> Standardized2x2 {
    let sign = |x: f64| 1.0f64.copysign(x);
    let multpl = 4.0;

    let safmin = zero_threshold;
    let safmn2 = (safmin / eps).sqrt();
    let safmx2 = safmn2.recip();

    let mut cs;
    let mut sn;

    if c == 0.0 {
        cs = 1.0;
        sn = 0.0;
    } else if b == 0.0 {
        // swapping rows and columns gives an upper triangular block
        cs = 0.0;
        sn = 1.0;
        core::mem::swap(&mut a, &mut d);
        b = -c;
        c = 0.0;
    } else if a - d == 0.0 && sign(b) != sign(c) {
        cs = 1.0;
        sn = 0.0;
    } else {
        let mut temp = a - d;
        let mut p = 0.5 * temp;

        let bcmax = b.abs().max(c.abs());
        let bcmin = b.abs().min(c.abs()) * sign(b) * sign(c);

        let mut scale = p.abs().max(bcmax);
        let mut z = (p / scale) * p + (bcmax / scale) * bcmin;

        // a small positive z postpones the decision to the complex branch
        if z >= multpl * eps {
            // real eigenvalues
            z = p + sign(p) * scale.sqrt() * z.sqrt();
            a = d + z;
            d -= (bcmax / z) * bcmin;
            let tau = c.hypot(z);
            cs = z / tau;
            sn = c / tau;
            b -= c;
            c = 0.0;
        } else {
            // complex or almost equal real eigenvalues, make the diagonal entries equal
            let mut sigma = b + c;
            for _ in 0..20 {
                scale = temp.abs().max(sigma.abs());
                if scale >= safmx2 {
                    sigma *= safmn2;
                    temp *= safmn2;
                    continue;
                }
                if scale <= safmn2 {
                    sigma *= safmx2;
                    temp *= safmx2;
                    continue;
                }
                break;
            }

            p = 0.5 * temp;
            let mut tau = sigma.hypot(temp);
            cs = (0.5 * (1.0 + sigma.abs() / tau)).sqrt();
            sn = -(p / (tau * cs)) * sign(sigma);

            // [aa bb] = [a b] [cs -sn]
            // [cc dd]   [c d] [sn  cs]
            let aa = a * cs + b * sn;
            let bb = -a * sn + b * cs;
            let cc = c * cs + d * sn;
            let dd = -c * sn + d * cs;

            // [a b] = [ cs sn] [aa bb]
            // [c d]   [-sn cs] [cc dd]
            a = aa * cs + cc * sn;
            b = bb * cs + dd * sn;
            c = -aa * sn + cc * cs;
            d = -bb * sn + dd * cs;

            temp = 0.5 * (a + d);
            a = temp;
            d = temp;

            if c != 0.0 && b != 0.0 && sign(b) == sign(c) {
                // real eigenvalues, reduce to upper triangular form
                let sab = b.abs().sqrt();
                let sac = c.abs().sqrt();
                p = if c > 0.0 { sab * sac } else { -sab * sac };
                tau = (b + c).abs().sqrt().recip();
                a = temp + p;
                d = temp - p;
                b -= c;
                c = 0.0;
                let cs1 = sab * tau;
                let sn1 = sac * tau;
                temp = cs * cs1 - sn * sn1;
                sn = cs * sn1 + sn * cs1;
                cs = temp;
            }
        }
    }

    let eigenvalues = if c != 0.0 {
        let im = b.abs().sqrt() * c.abs().sqrt();
        (Complex64::new(a, im), Complex64::new(d, -im))
    } else {
        (Complex64::new(a, 0.0), Complex64::new(d, 0.0))
    };

    Standardized2x2 {
        block: [a, b, c, d],
        eigenvalues,
        rotation: Givens { c: cs, s: sn },
    }
}

/// Real eigenvalue of the 3×3 block starting at `(begin, begin)`, closest to its last
/// diagonal entry when all three eigenvalues are real.
pub fn cubic_real_root(a: &impl BulgeTarget, begin: usize) -> f64 {
    let mut block = [[0.0; 3]; 3];
    for (i, row) in block.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = a.read(begin + i, begin + j);
        }
    }
    let scale = block
        .iter()
        .flatten()
        .fold(0.0f64, |acc, x| acc.max(x.abs()));
    if scale == 0.0 {
        return 0.0;
    }
    // the coefficients are cubic in the entries
    let inv = scale.recip();
    let m = |i: usize, j: usize| block[i][j] * inv;

    let trace = m(0, 0) + m(1, 1) + m(2, 2);
    let minors = (m(0, 0) * m(1, 1) - m(0, 1) * m(1, 0))
        + (m(0, 0) * m(2, 2) - m(0, 2) * m(2, 0))
        + (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1));
    let det = m(0, 0) * (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1))
        - m(0, 1) * (m(1, 0) * m(2, 2) - m(1, 2) * m(2, 0))
        + m(0, 2) * (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0));

    // λ = t + trace / 3 turns λ³ - trace λ² + minors λ - det into t³ + p t + q
    let third = trace / 3.0;
    let p = minors - trace * third;
    let q = -2.0 * third * third * third + third * minors - det;
    let target = m(2, 2) - third;

    let discriminant = 0.25 * q * q + p * p * p / 27.0;
    let t = if p == 0.0 {
        (-q).cbrt()
    } else if discriminant > 0.0 {
        let root = discriminant.sqrt();
        (-0.5 * q + root).cbrt() + (-0.5 * q - root).cbrt()
    } else {
        let r = 2.0 * (-p / 3.0).sqrt();
        let cos = ((3.0 * q) / (p * r)).clamp(-1.0, 1.0);
        let phi = cos.acos() / 3.0;
        (0..3)
            .map(|k| r * (phi - 2.0 * core::f64::consts::PI * k as f64 / 3.0).cos())
            .min_by(|x, y| (x - target).abs().total_cmp(&(y - target).abs()))
            .unwrap_or(0.0)
    };

    let mut lambda = t + third;
    for _ in 0..2 {
        let f = ((lambda - trace) * lambda + minors) * lambda - det;
        let df = (3.0 * lambda - 2.0 * trace) * lambda + minors;
        if df == 0.0 {
            break;
        }
        let next = lambda - f / df;
        if !next.is_finite() {
            break;
        }
        lambda = next;
    }
    lambda * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulge::BandMut;
    use assert2::assert;
    use assert_approx_eq::assert_approx_eq;
    use francis_core::{mat, Mat};

    const EPS: f64 = f64::EPSILON;
    const MIN: f64 = f64::MIN_POSITIVE;

    fn check_standardized(a: f64, b: f64, c: f64, d: f64) -> Standardized2x2 {
        let s = standardize_2x2(a, b, c, d, EPS, MIN);
        let [sa, sb, sc, sd] = s.block;
        assert!(sc == 0.0 || (sa == sd && sb * sc < 0.0));

        // rotating the original block must give the standardized one
        let mut m = mat![[a, b], [c, d]];
        s.rotation.apply_on_the_left(m.as_mut(), 0, 1, 0..2);
        s.rotation.apply_on_the_right(m.as_mut(), 0, 1, 0..2);
        let scale = a.abs().max(b.abs()).max(c.abs()).max(d.abs()).max(1.0);
        assert_approx_eq!(m.read(0, 0), sa, 1e-12 * scale);
        assert_approx_eq!(m.read(0, 1), sb, 1e-12 * scale);
        assert_approx_eq!(m.read(1, 0), sc, 1e-12 * scale);
        assert_approx_eq!(m.read(1, 1), sd, 1e-12 * scale);
        assert_approx_eq!(sa + sd, a + d, 1e-12 * scale);
        s
    }

    #[test]
    fn symmetric_2x2_becomes_diagonal() {
        let s = check_standardized(2.0, 1.0, 1.0, 2.0);
        assert_approx_eq!(s.block[0], 3.0);
        assert_approx_eq!(s.block[1], 0.0);
        assert_approx_eq!(s.block[3], 1.0);
    }

    #[test]
    fn rotation_2x2_stays_complex() {
        let s = check_standardized(0.0, -1.0, 1.0, 0.0);
        assert!(s.block == [0.0, -1.0, 1.0, 0.0]);
        assert_approx_eq!(s.eigenvalues.0.im.abs(), 1.0);
        assert!(s.eigenvalues.0 == s.eigenvalues.1.conj());
    }

    #[test]
    fn standardization_cases() {
        for (a, b, c, d) in [
            (1.0, 2.0, 0.0, 3.0),
            (1.0, 0.0, 2.0, 3.0),
            (4.0, -3.0, 2.0, 1.0),
            (1.0, 5.0, -3.0, 2.0),
            (-1.0, 1e-8, 1e-8, -1.0),
            (3.0, 1.0, 1.0, 3.0 + 1e-15),
            (1e10, 3e9, -2e9, -5e9),
        ] {
            check_standardized(a, b, c, d);
        }
    }

    #[test]
    fn standardization_is_idempotent() {
        let s = standardize_2x2(1.0, 5.0, -3.0, 2.0, EPS, MIN);
        let [a, b, c, d] = s.block;
        let again = standardize_2x2(a, b, c, d, EPS, MIN);
        assert!(again.block == s.block);
        assert!(again.rotation == Givens::IDENTITY);

        let s = standardize_2x2(4.0, -3.0, 2.0, 1.0, EPS, MIN);
        let [a, b, c, d] = s.block;
        let again = standardize_2x2(a, b, c, d, EPS, MIN);
        assert!(again.block == s.block);
    }

    #[test]
    fn double_shift_eigenvalues() {
        let mut a = mat![[0.0, -2.0], [2.0, 0.0]];
        let shift = DoubleShift::from_block(&BandMut::new(a.as_mut(), 0), 0);
        assert!(shift.delta() < 0.0);
        let (l1, l2) = shift.eigenvalues();
        assert_approx_eq!(l1.im, 2.0);
        assert_approx_eq!(l2.im, -2.0);

        let mut a = mat![[1.0, 0.0, 0.0], [0.0, 4.0, 1.0], [0.0, 0.0, 2.0]];
        let shift = DoubleShift::wilkinson(&BandMut::new(a.as_mut(), 0), 3);
        assert_approx_eq!(shift.trace(), 4.0);
        assert_approx_eq!(shift.determinant(), 4.0);
    }

    #[test]
    fn bulge_column_matches_explicit_polynomial() {
        let mut h = mat![
            [1.0, 2.0, 0.5, -1.0],
            [3.0, -1.0, 2.0, 0.0],
            [0.0, 0.5, 1.5, 2.0],
            [0.0, 0.0, -2.0, 1.0],
        ];
        let target = BandMut::new(h.as_mut(), 0);
        let shift = DoubleShift::new(0.7, 1.3);
        let column = shift.bulge_column(&target, 0);

        let h2 = &h * &h;
        let explicit = [
            h2.read(0, 0) - 0.7 * h.read(0, 0) + 1.3,
            h2.read(1, 0) - 0.7 * h.read(1, 0),
            h2.read(2, 0) - 0.7 * h.read(2, 0),
        ];
        let ratio = explicit[0] / column[0];
        assert!(ratio > 0.0);
        for k in 0..3 {
            assert_approx_eq!(column[k] * ratio, explicit[k], 1e-12);
        }
    }

    #[test]
    fn cubic_root_is_an_eigenvalue() {
        for m in [
            mat![[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]],
            mat![[0.0, 0.0, 0.0], [1.0, 0.0, -1.0], [0.0, 1.0, 0.0]],
            mat![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [0.0, 7.0, 8.0]],
            mat![[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]],
        ] {
            let mut m: Mat = m;
            let lambda = cubic_real_root(&BandMut::new(m.as_mut(), 0), 0);
            let shifted = Mat::with_dims(3, 3, |i, j| {
                m.read(i, j) - if i == j { lambda } else { 0.0 }
            });
            assert_approx_eq!(shifted.determinant(), 0.0, 1e-9 * (1.0 + m.norm_max().powi(3)));
        }
    }

    #[test]
    fn cubic_root_prefers_trailing_entry() {
        let mut m = mat![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 3.0]];
        let lambda = cubic_real_root(&BandMut::new(m.as_mut(), 0), 0);
        assert_approx_eq!(lambda, 3.0, 1e-12);
    }

    #[test]
    fn large_entries() {
        let big = 1e200;

        let mut a = mat![[0.0, -2.0 * big], [2.0 * big, 0.0]];
        let shift = DoubleShift::from_block(&BandMut::new(a.as_mut(), 0), 0);
        assert!(shift.is_finite());
        assert!(shift.delta() < 0.0);
        let (l1, _) = shift.eigenvalues();
        assert_approx_eq!(l1.im / big, 2.0, 1e-12);

        let mut a = mat![[big, 0.0, 0.0], [0.0, 4.0 * big, big], [0.0, 0.0, 2.0 * big]];
        let shift = DoubleShift::wilkinson(&BandMut::new(a.as_mut(), 0), 3);
        assert!(shift.is_finite());
        assert_approx_eq!(shift.trace() / big, 4.0, 1e-12);

        let h = mat![
            [1.0, 2.0, 0.5, -1.0],
            [3.0, -1.0, 2.0, 0.0],
            [0.0, 0.5, 1.5, 2.0],
            [0.0, 0.0, -2.0, 1.0],
        ];
        let mut small = h.clone();
        let mut large = Mat::with_dims(4, 4, |i, j| h.read(i, j) * big);
        let root = Complex64::new(0.35, (1.3f64 - 0.35 * 0.35).sqrt());
        let expected = DoubleShift::from_eigenvalues(root, root.conj())
            .bulge_column(&BandMut::new(small.as_mut(), 0), 0);
        let scaled = DoubleShift::from_eigenvalues(root * big, root.conj() * big)
            .bulge_column(&BandMut::new(large.as_mut(), 0), 0);
        for k in 0..3 {
            assert!(scaled[k].is_finite());
            assert_approx_eq!(scaled[k], expected[k], 1e-12);
        }

        let mut m = mat![[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]];
        let lambda = cubic_real_root(&BandMut::new(m.as_mut(), 0), 0);
        let mut m = Mat::with_dims(3, 3, |i, j| m.read(i, j) * big);
        let scaled = cubic_real_root(&BandMut::new(m.as_mut(), 0), 0);
        assert_approx_eq!(scaled / big, lambda, 1e-12);
    }
}

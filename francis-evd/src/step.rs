//! QR step strategies applied to one active diagonal block.

use crate::{
    bulge::{chase_double, chase_single, BandMut, Batch, BulgeTarget, Rotation},
    multishift,
    shift::{cubic_real_root, standardize_2x2, DoubleShift},
    tridiag_qr, SchurMode, SchurParams,
};
use francis_core::{
    par_split_indices, parallelism_above, parallelism_degree, Error, Mat, MatMut, Parallelism,
    ReborrowMut, Result,
};
use std::time::Instant;

/// Strategy used for one QR step on an active block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QrStep {
    /// 1×1 block, nothing to do.
    Trivial,
    /// Closed form Schur factorization of a 2×2 block.
    Standardize2x2,
    /// Single-shift step on a 3×3 block, with a real eigenvalue of the block as the shift.
    CubicShift,
    /// Implicit double-shift step.
    Francis,
    /// Several double-shift bulges chased in lock-step by one thread each.
    MultiBulge { bulges: usize },
    /// Single-shift step with a zero shift.
    Unshifted,
    /// Implicit QR on the packed diagonal and subdiagonal of a symmetric tridiagonal block,
    /// run until the block is diagonal.
    SymmetricTridiagonal,
}

/// Result of a QR step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No subdiagonal entry of the block became negligible.
    NoDeflation,
    /// The subdiagonal entry `(k, k - 1)` is negligible, the block splits into `begin..k` and
    /// `k..end`.
    Split(usize),
    /// The block is fully reduced.
    Converged,
}

/// Iteration state of an active block that persists across steps.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StepContext {
    pub steps_since_deflation: usize,
    /// Instant after which the decomposition gives up with [`Error::Timeout`].
    pub deadline: Option<Instant>,
}

impl StepContext {
    /// Context of a block that was just split off, under the given deadline.
    pub fn with_deadline(deadline: Option<Instant>) -> Self {
        Self {
            steps_since_deflation: 0,
            deadline,
        }
    }

    /// Returns [`Error::Timeout`] once the deadline has passed.
    pub fn check_deadline(&self, params: &SchurParams) -> Result<()> {
        match (self.deadline, params.timeout) {
            (Some(deadline), Some(limit)) if Instant::now() > deadline => {
                Err(Error::Timeout { limit })
            }
            _ => Ok(()),
        }
    }

    /// Returns `Some(top)` if this step should use an exceptional shift, built from the top of
    /// the block if `top` is `true` and from its bottom otherwise.
    pub fn exceptional_shift(&self, period: usize) -> Option<bool> {
        let steps = self.steps_since_deflation;
        if steps > 0 && steps % period == 0 {
            Some((steps / period) % 2 == 1)
        } else {
            None
        }
    }
}

/// Returns `true` if the subdiagonal entry `(k, k - 1)` of the block `begin..end` can be set to
/// zero.
///
/// The entry must be small relative to the neighboring diagonal entries. It is then compared
/// against the 2×2 block around it, so that small entries of a block whose eigenvalues are
/// well separated are not dropped prematurely.
pub fn is_negligible(
    a: &impl BulgeTarget,
    k: usize,
    begin: usize,
    end: usize,
    params: &SchurParams,
) -> bool {
    let eps = params.epsilon;
    let small_num = params.zero_threshold;

    let sub = a.read(k, k - 1).abs();
    if sub <= small_num {
        return true;
    }

    let mut tst = a.read(k - 1, k - 1).abs() + a.read(k, k).abs();
    if tst == 0.0 {
        if k >= begin + 2 {
            tst += a.read(k - 1, k - 2).abs();
        }
        if k + 1 < end {
            tst += a.read(k + 1, k).abs();
        }
    }
    if sub > eps * tst {
        return false;
    }

    let sup = a.read(k - 1, k).abs();
    let ab = sub.max(sup);
    let ba = sub.min(sup);
    let diff = (a.read(k - 1, k - 1) - a.read(k, k)).abs();
    let kk = a.read(k, k).abs();
    let aa = kk.max(diff);
    let bb = kk.min(diff);
    let s = aa + ab;
    ba * (ab / s) <= small_num.max(eps * (bb * (aa / s)))
}

/// Returns the largest `k` in `begin + 1..end` whose subdiagonal entry is negligible.
pub fn find_deflation(
    a: &impl BulgeTarget,
    begin: usize,
    end: usize,
    params: &SchurParams,
) -> Option<usize> {
    (begin + 1..end)
        .rev()
        .find(|&k| is_negligible(a, k, begin, end, params))
}

impl QrStep {
    /// Chooses the strategy for an active block of size `len`. `symmetric` tells whether the
    /// block is symmetric tridiagonal.
    pub fn select(
        len: usize,
        symmetric: bool,
        parallelism: Parallelism,
        params: &SchurParams,
    ) -> Self {
        match len {
            0 | 1 => QrStep::Trivial,
            _ if symmetric => QrStep::SymmetricTridiagonal,
            2 => QrStep::Standardize2x2,
            3 => QrStep::CubicShift,
            _ => {
                if parallelism != Parallelism::None && len >= params.multishift_threshold {
                    let bulges = (params.bulge_count)(len).min((len - 4) / 4);
                    if bulges >= 2 {
                        return QrStep::MultiBulge { bulges };
                    }
                }
                QrStep::Francis
            }
        }
    }

    /// Runs the step on the block `begin..end` of `a`, and applies the same similarity
    /// transform to the rest of `a` (in [`SchurMode::Full`]) and to `z` from the right.
    pub fn compute(
        self,
        a: MatMut<'_>,
        mut z: Option<MatMut<'_>>,
        begin: usize,
        end: usize,
        mode: SchurMode,
        ctx: &StepContext,
        parallelism: Parallelism,
        params: &SchurParams,
    ) -> Result<StepOutcome> {
        if self == QrStep::SymmetricTridiagonal {
            tridiag_qr::compute_tridiag_in_place(
                a,
                z,
                begin,
                end,
                mode,
                parallelism,
                params,
                ctx.deadline,
            )?;
            return Ok(StepOutcome::Converged);
        }

        let n = a.ncols();
        let (above, rest) = a.split_at_row_mut(begin);
        let mut band = BandMut::new(rest.subrows_mut(0, end - begin), begin);
        let (outcome, batch) =
            self.run_in_band(&mut band, begin, end, mode, ctx, parallelism, params);

        let par = parallelism_above(
            parallelism,
            batch.len() * 3 * n,
            params.parallel_threshold,
        );
        if mode == SchurMode::Full {
            batch.apply_on_the_right(above, par);
        }
        if let Some(z) = z.rb_mut() {
            batch.apply_on_the_right(z, par);
        }
        Ok(outcome)
    }

    /// Runs the step on the block `begin..end`, whose rows are held by `band`.
    ///
    /// In [`SchurMode::Full`] the columns right of the block are updated as well. The rows above
    /// the block and the partner matrix are left to the caller, through the returned batch.
    pub fn run_in_band(
        self,
        band: &mut BandMut<'_>,
        begin: usize,
        end: usize,
        mode: SchurMode,
        ctx: &StepContext,
        parallelism: Parallelism,
        params: &SchurParams,
    ) -> (StepOutcome, Batch) {
        let exceptional = ctx.exceptional_shift(params.exceptional_shift_period);

        let batch = match self {
            QrStep::Trivial => return (StepOutcome::Converged, Batch::default()),
            QrStep::SymmetricTridiagonal => {
                unreachable!("the tridiagonal path runs on the whole block through `compute`")
            }
            QrStep::Standardize2x2 => {
                let b = begin;
                let s = standardize_2x2(
                    band.read(b, b),
                    band.read(b, b + 1),
                    band.read(b + 1, b),
                    band.read(b + 1, b + 1),
                    params.epsilon,
                    params.zero_threshold,
                );
                let [sa, sb, sc, sd] = s.block;
                band.write(b, b, sa);
                band.write(b, b + 1, sb);
                band.write(b + 1, b, sc);
                band.write(b + 1, b + 1, sd);

                let rotation = Rotation::Single {
                    index: b,
                    givens: s.rotation,
                };
                let batch = Batch::single(rotation);
                if mode == SchurMode::Full {
                    batch.apply_on_the_left(band, end..band.ncols());
                }
                return (StepOutcome::Converged, batch);
            }
            QrStep::CubicShift => {
                let shift = match exceptional {
                    Some(_) => {
                        let last = band.read(end - 1, end - 1);
                        last + 0.75 * band.read(end - 1, end - 2).abs()
                    }
                    None => cubic_real_root(&*band, begin),
                };
                if !shift.is_finite() {
                    log::warn!(
                        target: "francis_perf",
                        "non-finite cubic shift on rows {begin}..{end}, running unshifted",
                    );
                    return QrStep::Unshifted
                        .run_in_band(band, begin, end, mode, ctx, parallelism, params);
                }
                chase_single(band, begin, end, shift)
            }
            QrStep::Francis => match francis_step(band, begin, end, exceptional) {
                Some(batch) => batch,
                None => {
                    return QrStep::Unshifted
                        .run_in_band(band, begin, end, mode, ctx, parallelism, params)
                }
            },
            QrStep::MultiBulge { bulges } => {
                let shifts = if exceptional.is_some() {
                    None
                } else {
                    multishift::compute_shifts(&*band, begin, end, bulges, params)
                };
                match shifts {
                    Some(shifts) => {
                        log::trace!(
                            target: "francis",
                            "chasing {} bulges on rows {begin}..{end}",
                            shifts.len(),
                        );
                        multishift::chase_lockstep(band, begin, end, &shifts)
                    }
                    None => {
                        if exceptional.is_none() {
                            log::warn!(
                                target: "francis_perf",
                                "no shifts for {bulges} bulges on {begin}..{end}, using one bulge",
                            );
                        }
                        return QrStep::Francis
                            .run_in_band(band, begin, end, mode, ctx, parallelism, params);
                    }
                }
            }
            QrStep::Unshifted => chase_single(band, begin, end, 0.0),
        };

        if mode == SchurMode::Full {
            let n = band.ncols();
            let par = parallelism_above(
                parallelism,
                batch.len() * 3 * (n - end),
                params.parallel_threshold,
            );
            apply_left_outside(band, &batch, end, par);
        }

        let outcome = match find_deflation(&*band, begin, end, params) {
            Some(k) => StepOutcome::Split(k),
            None => StepOutcome::NoDeflation,
        };
        (outcome, batch)
    }
}

/// Double-shift step, or `None` if the shift is not finite.
fn francis_step(
    band: &mut BandMut<'_>,
    begin: usize,
    end: usize,
    exceptional: Option<bool>,
) -> Option<Batch> {
    let shift = match exceptional {
        Some(top) => {
            log::debug!(target: "francis", "exceptional shift on rows {begin}..{end}");
            DoubleShift::exceptional(&*band, begin, end, top)
        }
        None => DoubleShift::wilkinson(&*band, end),
    };

    if !shift.is_finite() {
        log::warn!(
            target: "francis_perf",
            "non-finite double shift on rows {begin}..{end}, running unshifted",
        );
        return None;
    }
    Some(chase_double(band, begin, end, shift, |row| {
        log::trace!(target: "francis", "bulge folded into row {row}")
    }))
}

/// Applies the rotations of `batch` to the columns `end..` of the rows of `band`.
///
/// Each rotation only mixes the rows it acts on, so the columns can be split into chunks that
/// are updated independently.
fn apply_left_outside(
    band: &mut BandMut<'_>,
    batch: &Batch,
    end: usize,
    parallelism: Parallelism,
) {
    let n = band.ncols();
    if end >= n || batch.is_empty() {
        return;
    }
    match parallelism {
        Parallelism::None => batch.apply_on_the_left(band, end..n),
        Parallelism::Rayon(_) => {
            let offset = band.offset();
            let mut rows = band.rows_mut();
            let nrows = rows.nrows();
            let width = n - end;
            let n_chunks = parallelism_degree(parallelism).min(width).max(1);

            // the outside columns of each chunk are copied into a contiguous scratch block
            let chunks: Vec<(usize, usize)> = (0..n_chunks)
                .map(|idx| par_split_indices(width, idx, n_chunks))
                .collect();
            let mut blocks: Vec<Mat> = chunks
                .iter()
                .map(|&(start, len)| {
                    Mat::with_dims(nrows, len, |i, j| {
                        rows.read(i, end + start + j)
                    })
                })
                .collect();

            use rayon::prelude::*;
            blocks.par_iter_mut().for_each(|block| {
                let len = block.ncols();
                let mut local = BandMut::new(block.as_mut(), offset);
                batch.apply_on_the_left(&mut local, 0..len);
            });

            for (block, &(start, _)) in blocks.iter().zip(&chunks) {
                for i in 0..nrows {
                    rows.row_mut(i)[end + start..end + start + block.ncols()]
                        .copy_from_slice(block.row(i));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use assert_approx_eq::assert_approx_eq;
    use francis_core::mat;
    use rand::prelude::*;
    use std::time::Duration;

    #[test]
    fn selection_by_size() {
        let params = SchurParams::default();
        let none = Parallelism::None;
        assert!(QrStep::select(1, false, none, &params) == QrStep::Trivial);
        assert!(QrStep::select(2, false, none, &params) == QrStep::Standardize2x2);
        assert!(QrStep::select(2, true, none, &params) == QrStep::SymmetricTridiagonal);
        assert!(QrStep::select(3, false, none, &params) == QrStep::CubicShift);
        assert!(QrStep::select(3, true, none, &params) == QrStep::SymmetricTridiagonal);
        assert!(QrStep::select(4, false, none, &params) == QrStep::Francis);
        assert!(QrStep::select(500, false, none, &params) == QrStep::Francis);
        let rayon = Parallelism::Rayon(4);
        assert!(QrStep::select(500, false, rayon, &params) == QrStep::MultiBulge { bulges: 16 });
        assert!(QrStep::select(500, true, rayon, &params) == QrStep::SymmetricTridiagonal);
        assert!(QrStep::select(100, false, rayon, &params) == QrStep::Francis);
    }

    #[test]
    fn deadline() {
        let params = SchurParams {
            timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let now = Instant::now();
        let ctx = StepContext::with_deadline(Some(now));
        std::thread::sleep(Duration::from_millis(2));
        assert!(let Err(Error::Timeout { .. }) = ctx.check_deadline(&params));

        let ctx = StepContext::with_deadline(now.checked_add(Duration::from_secs(3600)));
        assert!(ctx.check_deadline(&params).is_ok());
        assert!(StepContext::default().check_deadline(&params).is_ok());
    }

    #[test]
    fn exceptional_shift_schedule() {
        let ctx = |steps| StepContext {
            steps_since_deflation: steps,
            ..Default::default()
        };
        assert!(ctx(0).exceptional_shift(10) == None);
        assert!(ctx(9).exceptional_shift(10) == None);
        assert!(ctx(10).exceptional_shift(10) == Some(true));
        assert!(ctx(20).exceptional_shift(10) == Some(false));
        assert!(ctx(30).exceptional_shift(10) == Some(true));
    }

    #[test]
    fn negligible_subdiagonal() {
        let params = SchurParams::default();
        let mut a = mat![[1.0, 2.0, 3.0], [1e-20, 2.0, 1.0], [0.0, 0.5, 3.0]];
        let band = BandMut::new(a.as_mut(), 0);
        assert!(is_negligible(&band, 1, 0, 3, &params));
        assert!(!is_negligible(&band, 2, 0, 3, &params));
        assert!(find_deflation(&band, 0, 3, &params) == Some(1));

        let mut b = mat![[0.0, 1.0], [0.0, 0.0]];
        let band = BandMut::new(b.as_mut(), 0);
        assert!(find_deflation(&band, 0, 2, &params) == Some(1));
    }

    #[test]
    fn two_by_two_step_converges() {
        let mut a = mat![[2.0, 1.0], [1.0, 2.0]];
        let mut z = Mat::identity(2);
        let outcome = QrStep::Standardize2x2
            .compute(
                a.as_mut(),
                Some(z.as_mut()),
                0,
                2,
                SchurMode::Full,
                &StepContext::default(),
                Parallelism::None,
                &SchurParams::default(),
            )
            .unwrap();
        assert!(outcome == StepOutcome::Converged);
        assert_approx_eq!(a.read(0, 0), 3.0);
        assert_approx_eq!(a.read(1, 1), 1.0);
        assert!(a.read(1, 0) == 0.0);
        assert_approx_eq!(a.read(0, 1), 0.0);
    }

    #[test]
    fn francis_steps_preserve_similarity() {
        let mut rng = StdRng::seed_from_u64(0);
        let n = 10;
        let (begin, end) = (3, 9);
        let mut original = Mat::with_dims(n, n, |i, j| {
            if i <= j + 1 {
                rng.gen::<f64>() - 0.5
            } else {
                0.0
            }
        });
        original.write(begin, begin - 1, 0.0);
        original.write(end, end - 1, 0.0);

        let params = SchurParams::default();
        for step in [QrStep::Francis, QrStep::Unshifted] {
            let mut a = original.clone();
            let mut z = Mat::identity(n);
            for steps in 0..12 {
                let ctx = StepContext {
                    steps_since_deflation: steps,
                    ..Default::default()
                };
                step.compute(
                    a.as_mut(),
                    Some(z.as_mut()),
                    begin,
                    end,
                    SchurMode::Full,
                    &ctx,
                    Parallelism::None,
                    &params,
                )
                .unwrap();
                assert!(a.is_upper_hessenberg(0.0));
            }
            let reconstructed = &z * &a * z.transpose();
            for i in 0..n {
                for j in 0..n {
                    assert_approx_eq!(reconstructed.read(i, j), original.read(i, j), 1e-12);
                }
            }
        }
    }

    #[test]
    fn cubic_step_deflates() {
        let original = mat![[4.0, 1.0, 2.0], [1.0, 3.0, 1.0], [0.0, 2.0, -1.0]];
        let mut a = original.clone();
        let mut z = Mat::identity(3);
        let params = SchurParams::default();
        let mut outcome = StepOutcome::NoDeflation;
        for steps in 0..5 {
            outcome = QrStep::CubicShift
                .compute(
                    a.as_mut(),
                    Some(z.as_mut()),
                    0,
                    3,
                    SchurMode::Full,
                    &StepContext {
                        steps_since_deflation: steps,
                        ..Default::default()
                    },
                    Parallelism::None,
                    &params,
                )
                .unwrap();
            if outcome != StepOutcome::NoDeflation {
                break;
            }
        }
        assert!(let StepOutcome::Split(_) = outcome);
        let reconstructed = &z * &a * z.transpose();
        for i in 0..3 {
            for j in 0..3 {
                assert_approx_eq!(reconstructed.read(i, j), original.read(i, j), 1e-12);
            }
        }
    }

    #[test]
    fn parallel_outside_update_matches_sequential() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 40;
        let (begin, end) = (0, 12);
        let mut original = Mat::with_dims(n, n, |i, j| {
            if i <= j + 1 {
                rng.gen::<f64>()
            } else {
                0.0
            }
        });
        original.write(end, end - 1, 0.0);
        let params = SchurParams {
            parallel_threshold: 1,
            ..Default::default()
        };

        let mut seq = original.clone();
        let mut par = original.clone();
        for (a, parallelism) in [(&mut seq, Parallelism::None), (&mut par, Parallelism::Rayon(3))] {
            QrStep::Francis
                .compute(
                    a.as_mut(),
                    None,
                    begin,
                    end,
                    SchurMode::Full,
                    &StepContext::default(),
                    parallelism,
                    &params,
                )
                .unwrap();
        }
        for i in 0..n {
            for j in 0..n {
                assert_approx_eq!(seq.read(i, j), par.read(i, j), 1e-14);
            }
        }
    }
}

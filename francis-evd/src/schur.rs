//! Real Schur decomposition driver.
//!
//! The matrix is first reduced to Hessenberg form. The active diagonal blocks are then kept in
//! an explicit worklist: every round, each block is split at its negligible subdiagonal entries
//! and a QR step is run on every remaining block. Blocks that don't overlap are processed
//! concurrently when parallelism is enabled, each on its own band of rows.

use crate::{
    bulge::{BandMut, Batch, BulgeTarget},
    hessenberg::make_hessenberg_in_place,
    shift::DoubleShift,
    step::{is_negligible, QrStep, StepContext, StepOutcome},
    tridiag_qr::is_symmetric_tridiagonal,
    SchurMode, SchurParams,
};
use francis_core::{
    parallelism_above, Error, MatMut, MatRef, Parallelism, Reborrow, ReborrowMut, Result,
};
use num_complex::Complex64;
use std::time::Instant;

/// Active diagonal block `begin..end` of the matrix being decomposed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct ActiveRange {
    begin: usize,
    end: usize,
    ctx: StepContext,
}

impl ActiveRange {
    #[inline]
    fn new(begin: usize, end: usize, deadline: Option<Instant>) -> Self {
        Self {
            begin,
            end,
            ctx: StepContext::with_deadline(deadline),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.end - self.begin
    }
}

/// Computes the real Schur decomposition of `a` in place.
///
/// On return `a` holds the quasi upper triangular factor `T`. If `z` is provided, it is
/// multiplied from the right by the orthogonal factor, so that `z` holds `Z` if it was
/// initialized to the identity, and `original = Z T Zᵀ`.
///
/// In [`SchurMode::BlocksOnly`] only the diagonal blocks of `a` are meaningful on return, and `z`
/// must be `None`.
///
/// # Errors
///
/// The arguments are checked before `a` or `z` is modified. A non converging iteration is
/// reported with [`Error::NoConvergence`], and [`Error::Timeout`] is returned if
/// [`SchurParams::timeout`] elapses.
pub fn compute_schur(
    a: MatMut<'_>,
    z: Option<MatMut<'_>>,
    mode: SchurMode,
    parallelism: Parallelism,
    params: SchurParams,
) -> Result<()> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(Error::NotSquare {
            nrows: n,
            ncols: a.ncols(),
        });
    }
    if let Some(z) = &z {
        if (z.nrows(), z.ncols()) != (n, n) {
            return Err(Error::DimensionMismatch {
                expected: (n, n),
                found: (z.nrows(), z.ncols()),
            });
        }
        if mode == SchurMode::BlocksOnly {
            return Err(Error::InvalidArgument {
                arg: "z",
                reason: "the Schur vectors can only be computed in full mode".to_string(),
            });
        }
    }
    params.validate()?;

    match parallelism {
        Parallelism::None => schur_impl(a, z, mode, parallelism, &params),
        Parallelism::Rayon(n_threads) => {
            let n_threads = if n_threads == 0 {
                4 * std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            } else {
                n_threads
            };
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .thread_name(|idx| format!("francis-worker-{idx}"))
                .build()?;
            pool.install(|| schur_impl(a, z, mode, Parallelism::Rayon(n_threads), &params))
        }
    }
}

fn schur_impl(
    mut a: MatMut<'_>,
    mut z: Option<MatMut<'_>>,
    mode: SchurMode,
    parallelism: Parallelism,
    params: &SchurParams,
) -> Result<()> {
    let n = a.nrows();
    if n == 0 {
        return Ok(());
    }
    let start = Instant::now();
    log::debug!(target: "francis", "schur decomposition of size {n}, {mode:?}, {parallelism:?}");

    make_hessenberg_in_place(a.rb_mut(), z.rb_mut(), parallelism, params);

    // pieces of a symmetric tridiagonal matrix stay symmetric tridiagonal
    let symmetric = params.symmetric_fast_path
        && n >= 3
        && is_symmetric_tridiagonal(a.rb(), params.symmetry_tolerance);
    if symmetric {
        log::debug!(target: "francis", "symmetric input, using the tridiagonal path");
    }

    let deadline = params.timeout.and_then(|limit| start.checked_add(limit));
    let max_iterations = params.iteration_cap_factor * n.max(10);
    let mut iterations = 0;
    let mut worklist = vec![ActiveRange::new(0, n, deadline)];

    loop {
        let mut ready = Vec::with_capacity(worklist.len());
        for range in worklist.drain(..) {
            split_range(a.rb_mut(), range, symmetric, params, &mut ready);
        }
        if ready.is_empty() {
            break;
        }
        ready.sort_unstable_by_key(|range| range.begin);

        iterations += ready.len();
        if iterations > max_iterations {
            let stuck = ready
                .iter()
                .max_by_key(|range| range.ctx.steps_since_deflation)
                .copied()
                .unwrap_or(ready[0]);
            return Err(Error::NoConvergence {
                begin: stuck.begin,
                end: stuck.end,
                iterations,
            });
        }

        // the tridiagonal path works on whole rows of `a`, so it never runs on a band
        let outcomes = if ready.len() == 1 || parallelism == Parallelism::None || symmetric {
            ready
                .iter()
                .map(|range| {
                    let step = QrStep::select(range.len(), symmetric, parallelism, params);
                    step.compute(
                        a.rb_mut(),
                        z.rb_mut(),
                        range.begin,
                        range.end,
                        mode,
                        &range.ctx,
                        parallelism,
                        params,
                    )
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            parallel_round(a.rb_mut(), z.rb_mut(), &ready, mode, parallelism, params)
        };

        for (range, outcome) in ready.into_iter().zip(outcomes) {
            match outcome {
                StepOutcome::Converged => {
                    log::trace!(
                        target: "francis",
                        "rows {}..{} converged",
                        range.begin,
                        range.end,
                    );
                }
                StepOutcome::Split(k) => {
                    log::trace!(
                        target: "francis",
                        "rows {}..{} split at {k}",
                        range.begin,
                        range.end,
                    );
                    a.write(k, k - 1, 0.0);
                    worklist.push(ActiveRange::new(range.begin, k, deadline));
                    worklist.push(ActiveRange::new(k, range.end, deadline));
                }
                StepOutcome::NoDeflation => {
                    worklist.push(ActiveRange {
                        ctx: StepContext {
                            steps_since_deflation: range.ctx.steps_since_deflation + 1,
                            ..range.ctx
                        },
                        ..range
                    });
                }
            }
        }

        StepContext::with_deadline(deadline).check_deadline(params)?;
    }

    log::debug!(
        target: "francis",
        "schur decomposition of size {n} done after {iterations} steps in {:?}",
        start.elapsed(),
    );
    Ok(())
}

/// Zeroes the negligible subdiagonal entries of `range`, and pushes the pieces that still
/// need work to `ready`. If `symmetric` is set the matching superdiagonal entries are zeroed
/// too.
fn split_range(
    a: MatMut<'_>,
    range: ActiveRange,
    symmetric: bool,
    params: &SchurParams,
    ready: &mut Vec<ActiveRange>,
) {
    let ActiveRange { begin, end, ctx } = range;
    let mut band = BandMut::new(a, 0);
    let mut pieces = Vec::new();
    let mut piece_begin = begin;
    for k in begin + 1..end {
        if is_negligible(&band, k, begin, end, params) {
            band.write(k, k - 1, 0.0);
            if symmetric {
                band.write(k - 1, k, 0.0);
            }
            pieces.push((piece_begin, k));
            piece_begin = k;
        }
    }
    pieces.push((piece_begin, end));

    if pieces.len() == 1 {
        if end - begin > 1 {
            ready.push(ActiveRange { begin, end, ctx });
        }
        return;
    }
    ready.extend(
        pieces
            .into_iter()
            .filter(|&(b, e)| e - b > 1)
            .map(|(b, e)| ActiveRange::new(b, e, ctx.deadline)),
    );
}

/// Runs one step on each of the non overlapping `ranges` concurrently, then applies the
/// recorded rotations to the rows above each block and to `z`.
fn parallel_round(
    mut a: MatMut<'_>,
    z: Option<MatMut<'_>>,
    ranges: &[ActiveRange],
    mode: SchurMode,
    parallelism: Parallelism,
    params: &SchurParams,
) -> Vec<StepOutcome> {
    use rayon::prelude::*;

    let n = a.ncols();
    let bounds: Vec<(usize, usize)> = ranges.iter().map(|r| (r.begin, r.end)).collect();

    let bands = a.rb_mut().row_bands_mut(&bounds);
    let results: Vec<(StepOutcome, Batch)> = bands
        .into_par_iter()
        .zip(ranges.par_iter())
        .map(|(rows, range)| {
            let mut band = BandMut::new(rows, range.begin);
            // symmetric matrices stay on the sequential branch
            let step = QrStep::select(range.len(), false, Parallelism::None, params);
            step.run_in_band(
                &mut band,
                range.begin,
                range.end,
                mode,
                &range.ctx,
                Parallelism::None,
                params,
            )
        })
        .collect();

    let rotations = results.iter().map(|(_, batch)| batch.len()).sum::<usize>();
    let par = parallelism_above(parallelism, rotations * 3 * n, params.parallel_threshold);

    // the batches act on disjoint columns, so they can be applied in any order
    if mode == SchurMode::Full {
        a.for_each_row(par, |i, row| {
            for (range, (_, batch)) in ranges.iter().zip(&results) {
                if range.begin > i {
                    batch.apply_on_the_right_row(row);
                }
            }
        });
    }
    if let Some(z) = z {
        z.for_each_row(par, |_, row| {
            for (_, batch) in &results {
                batch.apply_on_the_right_row(row);
            }
        });
    }

    results.into_iter().map(|(outcome, _)| outcome).collect()
}

/// Eigenvalues of a quasi upper triangular matrix, read from its 1×1 and 2×2 diagonal
/// blocks. Complex conjugate pairs are adjacent, the one with the positive imaginary part
/// first.
pub fn schur_eigenvalues(t: MatRef<'_>) -> Vec<Complex64> {
    let n = t.nrows();
    let mut eigenvalues = Vec::with_capacity(n);
    let mut i = 0;
    while i < n {
        if i + 1 < n && t.read(i + 1, i) != 0.0 {
            let (p, q) = (t.read(i, i), t.read(i, i + 1));
            let (r, s) = (t.read(i + 1, i), t.read(i + 1, i + 1));
            let (l1, l2) = if p == s && q * r < 0.0 {
                let im = q.abs().sqrt() * r.abs().sqrt();
                (Complex64::new(p, im), Complex64::new(p, -im))
            } else {
                DoubleShift::from_entries(p, q, r, s).eigenvalues()
            };
            eigenvalues.push(l1);
            eigenvalues.push(l2);
            i += 2;
        } else {
            eigenvalues.push(Complex64::new(t.read(i, i), 0.0));
            i += 1;
        }
    }
    eigenvalues
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use assert_approx_eq::assert_approx_eq;
    use francis_core::{mat, Mat};
    use rand::prelude::*;

    fn check_schur(original: &Mat, t: &Mat, z: &Mat, tol: f64) {
        let n = original.nrows();
        let reconstructed = z * t * z.transpose();
        for i in 0..n {
            for j in 0..n {
                assert_approx_eq!(reconstructed.read(i, j), original.read(i, j), tol);
            }
        }
        let identity = z.transpose() * z;
        for i in 0..n {
            for j in 0..n {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_approx_eq!(identity.read(i, j), expected, tol);
            }
        }
        assert_quasi_triangular(t);
    }

    fn assert_quasi_triangular(t: &Mat) {
        let n = t.nrows();
        assert!(t.is_upper_hessenberg(0.0));
        for i in 1..n {
            if t.read(i, i - 1) != 0.0 {
                // 2×2 blocks don't overlap and are standardized
                assert!(i == 1 || t.read(i - 1, i - 2) == 0.0);
                assert!(i + 1 == n || t.read(i + 1, i) == 0.0);
                assert!(t.read(i, i) == t.read(i - 1, i - 1));
                assert!(t.read(i, i - 1) * t.read(i - 1, i) < 0.0);
            }
        }
    }

    fn random(n: usize, seed: u64) -> Mat {
        let mut rng = StdRng::seed_from_u64(seed);
        Mat::with_dims(n, n, |_, _| rng.gen::<f64>() - 0.5)
    }

    #[test]
    fn small_sizes() {
        for n in 0..12 {
            let original = random(n, n as u64);
            let mut t = original.clone();
            let mut z = Mat::identity(n);
            compute_schur(
                t.as_mut(),
                Some(z.as_mut()),
                SchurMode::Full,
                Parallelism::None,
                Default::default(),
            )
            .unwrap();
            check_schur(&original, &t, &z, 1e-10);
        }
    }

    #[test]
    fn rotation_matrix() {
        let original = mat![[0.0, -1.0], [1.0, 0.0]];
        let mut t = original.clone();
        let mut z = Mat::identity(2);
        compute_schur(
            t.as_mut(),
            Some(z.as_mut()),
            SchurMode::Full,
            Parallelism::None,
            Default::default(),
        )
        .unwrap();
        check_schur(&original, &t, &z, 1e-14);

        let eigenvalues = schur_eigenvalues(t.as_ref());
        assert_approx_eq!(eigenvalues[0].re, 0.0);
        assert_approx_eq!(eigenvalues[0].im, 1.0);
        assert_approx_eq!(eigenvalues[1].im, -1.0);
    }

    #[test]
    fn blocks_only_keeps_the_eigenvalues() {
        let n = 30;
        let original = random(n, 7);

        let mut full = original.clone();
        compute_schur(
            full.as_mut(),
            None,
            SchurMode::Full,
            Parallelism::None,
            Default::default(),
        )
        .unwrap();
        let mut blocks = original.clone();
        compute_schur(
            blocks.as_mut(),
            None,
            SchurMode::BlocksOnly,
            Parallelism::None,
            Default::default(),
        )
        .unwrap();

        let sort = |mut v: Vec<Complex64>| {
            v.sort_by(|x, y| x.re.total_cmp(&y.re).then(x.im.total_cmp(&y.im)));
            v
        };
        let full = sort(schur_eigenvalues(full.as_ref()));
        let blocks = sort(schur_eigenvalues(blocks.as_ref()));
        for (x, y) in full.iter().zip(&blocks) {
            assert_approx_eq!(x.re, y.re, 1e-10);
            assert_approx_eq!(x.im, y.im, 1e-10);
        }
    }

    #[test]
    fn parallel_rounds_match_sequential() {
        let n = 60;
        let original = random(n, 11);
        let params = SchurParams {
            parallel_threshold: 1,
            ..Default::default()
        };

        let mut t = original.clone();
        let mut z = Mat::identity(n);
        compute_schur(
            t.as_mut(),
            Some(z.as_mut()),
            SchurMode::Full,
            Parallelism::Rayon(4),
            params,
        )
        .unwrap();
        check_schur(&original, &t, &z, 1e-10);
    }

    #[test]
    fn argument_errors() {
        let mut a = Mat::zeros(3, 4);
        assert!(let Err(Error::NotSquare { nrows: 3, ncols: 4 }) = compute_schur(
            a.as_mut(),
            None,
            SchurMode::Full,
            Parallelism::None,
            Default::default(),
        ));

        let mut a = Mat::identity(3);
        let mut z = Mat::identity(2);
        assert!(let Err(Error::DimensionMismatch { .. }) = compute_schur(
            a.as_mut(),
            Some(z.as_mut()),
            SchurMode::Full,
            Parallelism::None,
            Default::default(),
        ));

        let mut z = Mat::identity(3);
        assert!(let Err(Error::InvalidArgument { arg: "z", .. }) = compute_schur(
            a.as_mut(),
            Some(z.as_mut()),
            SchurMode::BlocksOnly,
            Parallelism::None,
            Default::default(),
        ));
        assert!(a == Mat::identity(3));
    }

    #[test]
    fn iteration_cap() {
        let original = random(20, 3);
        let mut t = original.clone();
        let params = SchurParams {
            iteration_cap_factor: 1,
            epsilon: 1e-300,
            zero_threshold: 0.0,
            symmetric_fast_path: false,
            ..Default::default()
        };
        let result = compute_schur(t.as_mut(), None, SchurMode::Full, Parallelism::None, params);
        assert!(let Err(Error::NoConvergence { .. }) = result);
    }
}

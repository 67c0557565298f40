//! Several double-shift bulges chased through the same active block in lock-step.
//!
//! Bulge `j` is created `4 * j` ticks after the first one, so consecutive bulges stay four rows
//! apart. Every tick has a left half, where each worker rotates the rows of its bulge, and a
//! right half, where each worker rotates the columns of its bulge. Within a half the workers
//! touch disjoint rows (or columns), and the halves are separated by a barrier.

use crate::{
    bulge::{BandMut, Batch, BulgeTarget, DoubleShiftChase, Rotation},
    schur::{compute_schur, schur_eigenvalues},
    shift::DoubleShift,
    SchurMode, SchurParams,
};
use francis_core::{Mat, Parallelism};
use std::{
    marker::PhantomData,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Barrier,
    },
};

/// Distance, in rows, between two consecutive bulges.
pub const BULGE_SPACING: usize = 4;

/// Computes `bulges` shift pairs from the eigenvalues of the trailing `2 * bulges` square block
/// of `begin..end`. Returns `None` if the eigenvalues could not be computed.
pub fn compute_shifts(
    a: &impl BulgeTarget,
    begin: usize,
    end: usize,
    bulges: usize,
    params: &SchurParams,
) -> Option<Vec<DoubleShift>> {
    let size = (2 * bulges).min(end - begin);
    let start = end - size;
    let mut block = Mat::with_dims(size, size, |i, j| a.read(start + i, start + j));

    let inner = SchurParams {
        symmetric_fast_path: false,
        multishift_threshold: usize::MAX,
        timeout: None,
        ..*params
    };
    if let Err(err) = compute_schur(
        block.as_mut(),
        None,
        SchurMode::BlocksOnly,
        Parallelism::None,
        inner,
    ) {
        log::debug!(target: "francis", "shift block of size {size} failed: {err}");
        return None;
    }

    let eigenvalues = schur_eigenvalues(block.as_ref());
    let mut shifts = Vec::with_capacity(bulges);
    let mut pending_real = None;
    let mut i = 0;
    while i < eigenvalues.len() {
        let eigenvalue = eigenvalues[i];
        if eigenvalue.im != 0.0 {
            // conjugate pairs are adjacent
            shifts.push(DoubleShift::from_eigenvalues(eigenvalue, eigenvalue.conj()));
            i += 2;
        } else {
            match pending_real.take() {
                Some(other) => shifts.push(DoubleShift::from_eigenvalues(other, eigenvalue)),
                None => pending_real = Some(eigenvalue),
            }
            i += 1;
        }
    }

    shifts.truncate(bulges);
    if shifts.len() < 2 || !shifts.iter().all(DoubleShift::is_finite) {
        return None;
    }
    Some(shifts)
}

/// Raw view of a band of rows, shared by the lock-step workers.
#[derive(Copy, Clone)]
struct SharedBand<'a> {
    ptr: *mut f64,
    nrows: usize,
    ncols: usize,
    offset: usize,
    __marker: PhantomData<&'a mut [f64]>,
}

// SAFETY: workers only access disjoint elements between two barrier waits.
unsafe impl Send for SharedBand<'_> {}

impl<'a> SharedBand<'a> {
    fn new(band: &'a mut BandMut<'_>) -> Self {
        let offset = band.offset();
        let rows = band.rows_mut();
        let (nrows, ncols) = (rows.nrows(), rows.ncols());
        Self {
            ptr: rows.as_slice_mut().as_mut_ptr(),
            nrows,
            ncols,
            offset,
            __marker: PhantomData,
        }
    }

    #[inline]
    #[track_caller]
    fn index(&self, i: usize, j: usize) -> usize {
        let i = i - self.offset;
        assert2::assert!(i < self.nrows);
        assert2::assert!(j < self.ncols);
        i * self.ncols + j
    }
}

impl BulgeTarget for SharedBand<'_> {
    #[inline]
    fn read(&self, i: usize, j: usize) -> f64 {
        let idx = self.index(i, j);
        // SAFETY: `idx` is in bounds, and no other worker writes this element during the
        // current half tick.
        unsafe { *self.ptr.add(idx) }
    }

    #[inline]
    fn write(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.index(i, j);
        // SAFETY: `idx` is in bounds, and no other worker accesses this element during the
        // current half tick.
        unsafe { *self.ptr.add(idx) = value }
    }
}

/// Chases one bulge per shift pair through `begin..end`, each on its own thread.
///
/// Returns the rotations of all the bulges in an order that is valid for updating the parts of
/// the matrix outside the block.
pub fn chase_lockstep(
    band: &mut BandMut<'_>,
    begin: usize,
    end: usize,
    shifts: &[DoubleShift],
) -> Batch {
    let bulges = shifts.len();
    assert2::assert!(bulges > 0);
    assert2::assert!(end - begin >= 4);

    let chases: Vec<DoubleShiftChase> = shifts
        .iter()
        .map(|&shift| DoubleShiftChase { begin, end, shift })
        .collect();
    let steps = end - begin - 1;
    let total_ticks = BULGE_SPACING * (bulges - 1) + steps;

    let barrier = Barrier::new(bulges);
    let done = AtomicBool::new(false);
    let shared = SharedBand::new(band);

    // a panicking worker keeps taking part in the barriers until every worker has seen `done`,
    // and only then rethrows
    let logs: Vec<Vec<(usize, Rotation)>> = std::thread::scope(|scope| {
        let handles: Vec<_> = chases
            .iter()
            .enumerate()
            .map(|(j, chase)| {
                let barrier = &barrier;
                let done = &done;
                let mut target = shared;
                scope.spawn(move || {
                    let mut log = Vec::with_capacity(steps);
                    let mut panic = None;
                    let mut tick = 0usize;
                    loop {
                        let step = tick
                            .checked_sub(BULGE_SPACING * j)
                            .filter(|&s| s < steps && panic.is_none());

                        let rotation = match step
                            .map(|s| catch_unwind(AssertUnwindSafe(|| chase.left(&mut target, s))))
                        {
                            Some(Ok(rotation)) => Some(rotation),
                            Some(Err(payload)) => {
                                panic = Some(payload);
                                done.store(true, Ordering::Release);
                                None
                            }
                            None => None,
                        };
                        barrier.wait();

                        if let Some(rotation) = rotation {
                            match catch_unwind(AssertUnwindSafe(|| {
                                chase.right(&mut target, &rotation)
                            })) {
                                Ok(()) => log.push((tick, rotation)),
                                Err(payload) => {
                                    panic = Some(payload);
                                    done.store(true, Ordering::Release);
                                }
                            }
                        }
                        if j == 0 && tick + 1 >= total_ticks {
                            done.store(true, Ordering::Release);
                        }
                        barrier.wait();

                        if done.load(Ordering::Acquire) {
                            break;
                        }
                        tick += 1;
                    }
                    match panic {
                        Some(payload) => resume_unwind(payload),
                        None => log,
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(log) => log,
                Err(payload) => resume_unwind(payload),
            })
            .collect()
    });

    let mut merged: Vec<(usize, Rotation)> = logs.into_iter().flatten().collect();
    merged.sort_by_key(|&(tick, _)| tick);

    Batch {
        implicit: None,
        intermediate: merged.into_iter().map(|(_, rotation)| rotation).collect(),
        terminal: None,
    }
}

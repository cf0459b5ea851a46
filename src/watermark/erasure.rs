// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Erasure-tolerant payload reconstruction.
//!
//! Each decoded keystream bit is a linear equation `row(p) . payload = bit`
//! over GF(2). [`PayloadRecovery`] keeps those equations in echelon form
//! (one pivot per column) as they arrive, so observations can be fed in any
//! order and with arbitrary gaps. Once the rank reaches the payload length
//! the system has a unique solution.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::watermark::context::SamplingContext;
use crate::watermark::distribution::ActionDistribution;
use crate::watermark::error::WatermarkError;
use crate::watermark::keystream::{CoefficientRow, KeystreamCursor, RowGenerator};
use crate::watermark::payload::PayloadBits;
use crate::watermark::sampler::DifferentialSampler;

/// What a single observation contributed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// Raised the rank by one.
    Innovative,
    /// Implied by earlier observations and consistent with them.
    Redundant,
    /// Implied by earlier observations but with the opposite bit.
    Conflicting,
}

/// Online GF(2) elimination over keystream observations.
#[derive(Clone, Debug)]
pub struct PayloadRecovery {
    rows: RowGenerator,
    /// `pivots[c]` holds the reduced equation whose leading column is `c`.
    pivots: Vec<Option<(CoefficientRow, u8)>>,
    rank: usize,
    conflicts: usize,
    observed: usize,
}

impl PayloadRecovery {
    /// # Errors
    /// [`WatermarkError::InvalidPayload`] for a zero-length payload.
    pub fn new(payload_len: usize) -> Result<Self, WatermarkError> {
        if payload_len == 0 {
            return Err(WatermarkError::InvalidPayload("payload length must be positive"));
        }
        Ok(Self {
            rows: RowGenerator::new(payload_len),
            pivots: vec![None; payload_len],
            rank: 0,
            conflicts: 0,
            observed: 0,
        })
    }

    pub fn payload_len(&self) -> usize {
        self.pivots.len()
    }

    /// Record the keystream bit observed at absolute `position`.
    pub fn add(&mut self, position: KeystreamCursor, bit: u8) -> ObservationOutcome {
        let row = self.rows.row(position);
        self.add_row(row, bit)
    }

    /// Record an arbitrary equation `row . payload = bit`.
    ///
    /// # Panics
    /// Debug builds assert that `row` has the payload length.
    pub fn add_row(&mut self, mut row: CoefficientRow, bit: u8) -> ObservationOutcome {
        debug_assert_eq!(row.len(), self.pivots.len(), "row length mismatch");
        self.observed += 1;
        let mut bit = bit & 1;

        while let Some(col) = row.leading_one() {
            match &self.pivots[col] {
                Some((pivot, pivot_bit)) => {
                    row.xor_assign(pivot);
                    bit ^= pivot_bit;
                }
                None => {
                    self.pivots[col] = Some((row, bit));
                    self.rank += 1;
                    return ObservationOutcome::Innovative;
                }
            }
        }

        if bit == 0 {
            ObservationOutcome::Redundant
        } else {
            self.conflicts += 1;
            ObservationOutcome::Conflicting
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn is_complete(&self) -> bool {
        self.rank == self.pivots.len()
    }

    /// Number of observations that contradicted earlier ones.
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    /// Number of observations fed so far.
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Solve for the payload by back substitution.
    ///
    /// # Errors
    /// - [`WatermarkError::InconsistentObservations`] if any observation
    ///   conflicted.
    /// - [`WatermarkError::RankDeficient`] if the system is
    ///   under-determined.
    pub fn solve(&self) -> Result<PayloadBits, WatermarkError> {
        if self.conflicts > 0 {
            return Err(WatermarkError::InconsistentObservations);
        }
        let n = self.pivots.len();
        if self.rank < n {
            return Err(WatermarkError::RankDeficient { rank: self.rank, needed: n });
        }

        // Every pivot row has its leading one at its own column and zeros
        // before it, so solving from the last column backwards only needs
        // already-known values.
        let mut solution = CoefficientRow::zero(n);
        for col in (0..n).rev() {
            let Some((row, bit)) = &self.pivots[col] else {
                return Err(WatermarkError::RankDeficient { rank: self.rank, needed: n });
            };
            // `solution` is zero at `col` so far, so the dot product only
            // covers the later columns.
            let value = bit ^ row.dot(&solution);
            if value == 1 {
                solution.xor_assign(&CoefficientRow::unit(n, col));
            }
        }
        PayloadBits::new(solution.to_bits())
    }
}

/// One decision as seen by a verifier.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedStep {
    pub distribution: ActionDistribution,
    pub chosen: String,
    pub context: SamplingContext,
    /// Absolute keystream position the step started reading at.
    pub cursor: KeystreamCursor,
}

/// Decode every step and reconstruct the payload from whatever positions
/// they cover. Steps may be missing or out of order.
///
/// # Errors
/// Decode errors from the sampler, plus the errors of
/// [`PayloadRecovery::solve`].
pub fn recover_payload(
    sampler: &DifferentialSampler,
    steps: &[ObservedStep],
    payload_len: usize,
) -> Result<PayloadBits, WatermarkError> {
    let mut recovery = PayloadRecovery::new(payload_len)?;

    let decode = |step: &ObservedStep| {
        sampler
            .recover(&step.distribution, &step.chosen, &step.context)
            .map(|bits| (step.cursor, bits))
    };

    #[cfg(feature = "parallel")]
    let decoded: Vec<(KeystreamCursor, Vec<u8>)> =
        steps.par_iter().map(decode).collect::<Result<_, _>>()?;
    #[cfg(not(feature = "parallel"))]
    let decoded: Vec<(KeystreamCursor, Vec<u8>)> = steps.iter().map(decode).collect::<Result<_, _>>()?;

    for (cursor, bits) in decoded {
        let length = bits.len() as u64;
        for (i, bit) in bits.into_iter().enumerate() {
            let position = cursor
                .checked_add(i as u64)
                .ok_or(WatermarkError::InvalidRange { start: cursor, length })?;
            recovery.add(position, bit);
        }
    }

    tracing::debug!(
        steps = steps.len(),
        observed = recovery.observed(),
        rank = recovery.rank(),
        conflicts = recovery.conflicts(),
        "payload recovery"
    );
    recovery.solve()
}

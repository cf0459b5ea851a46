// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Differential sampling: pick an action with keystream bits so that the
//! pick is both faithful to the distribution and recoverable from it.
//!
//! # Layout
//!
//! Candidates are ranked by descending probability (ties by id) and packed
//! into `2^k` bins with the longest-processing-time greedy rule: each
//! candidate goes to the currently lightest bin. `k` is the largest value
//! (up to `max_bits` and `floor(log2 n)`) for which every bin mass lands
//! within `balance_tolerance` of the ideal `2^-k`; otherwise `k = 0`. The
//! layout, and therefore the number of bits consumed, is a pure function
//! of the distribution.
//!
//! The unit interval is then cut into `2^k` equal cells; cell `b` is split
//! among bin `b`'s candidates (lexicographic order) in proportion to their
//! probabilities.
//!
//! # Draw
//!
//! The `k` consumed keystream bits, XOR-ed with a context mask, name the
//! cell. A context-keyed hash of the following look-ahead bits gives the
//! offset inside the cell. Those look-ahead bits are not consumed.
//!
//! # Inverse
//!
//! Every candidate lives in exactly one bin, so the chosen candidate names
//! its cell, and un-masking the cell index yields the consumed bits. Since
//! keystream bits are uniform, each cell is hit with probability `2^-k`,
//! and a candidate is chosen with probability `p / (2^k * m_bin)`, which
//! is within the balance tolerance of `p`.

use serde::{Deserialize, Serialize};

use crate::watermark::context::SamplingContext;
use crate::watermark::distribution::ActionDistribution;
use crate::watermark::error::WatermarkError;

/// Default cap on bits consumed per decision.
pub const DEFAULT_MAX_BITS: u32 = 8;

/// Hard cap on `max_bits`.
pub const MAX_EMBED_BITS: u32 = 16;

/// Default allowed relative deviation of a bin from its ideal mass.
pub const DEFAULT_BALANCE_TOLERANCE: f64 = 0.2;

/// Default number of look-ahead bits hashed into the within-cell offset.
pub const DEFAULT_LOOKAHEAD_BITS: usize = 32;

/// Sampler parameters. Encoder and decoder must use the same values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub max_bits: u32,
    pub balance_tolerance: f64,
    pub lookahead_bits: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_bits: DEFAULT_MAX_BITS,
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            lookahead_bits: DEFAULT_LOOKAHEAD_BITS,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), WatermarkError> {
        if self.max_bits > MAX_EMBED_BITS {
            return Err(WatermarkError::InvalidConfig(format!(
                "sampler.max_bits must be at most {MAX_EMBED_BITS}, got {}",
                self.max_bits
            )));
        }
        if !(0.0..1.0).contains(&self.balance_tolerance) {
            return Err(WatermarkError::InvalidConfig(format!(
                "sampler.balance_tolerance must be in [0, 1), got {}",
                self.balance_tolerance
            )));
        }
        Ok(())
    }
}

/// One cell of the layout: the candidates that share a `k`-bit pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct Bin<'a> {
    /// Members in lexicographic id order with normalized probabilities.
    pub members: Vec<(&'a str, f64)>,
    /// Sum of member probabilities.
    pub mass: f64,
}

impl<'a> Bin<'a> {
    /// Pick the member whose share of the cell holds `offset` in `[0, 1)`.
    fn pick(&self, offset: f64) -> &'a str {
        let target = offset * self.mass;
        let mut acc = 0.0;
        for &(id, p) in &self.members {
            acc += p;
            if target < acc {
                return id;
            }
        }
        // Rounding can leave target == mass; the last member owns the edge.
        self.members.last().map_or("", |&(id, _)| id)
    }

    fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|&(m, _)| m == id)
    }
}

/// The partition of a distribution into `2^bits` cells.
#[derive(Clone, Debug, PartialEq)]
pub struct BinLayout<'a> {
    pub bits: usize,
    pub bins: Vec<Bin<'a>>,
}

impl BinLayout<'_> {
    /// Index of the cell holding `candidate`.
    pub fn cell_of(&self, candidate: &str) -> Option<usize> {
        self.bins.iter().position(|b| b.contains(candidate))
    }

    /// Largest relative deviation of a cell from its ideal mass `2^-bits`.
    pub fn imbalance(&self) -> f64 {
        let scale = (1u64 << self.bits) as f64;
        self.bins.iter().map(|b| (b.mass * scale - 1.0).abs()).fold(0.0, f64::max)
    }
}

/// Outcome of [`DifferentialSampler::select`].
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub chosen: String,
    pub bits_consumed: usize,
    /// The consumed keystream bits.
    pub bits: Vec<u8>,
    /// Cell index after masking.
    pub cell: usize,
    /// The draw position in `[0, 1)`.
    pub draw: f64,
}

/// Keystream-driven selector with an exact inverse.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DifferentialSampler {
    config: SamplerConfig,
}

impl DifferentialSampler {
    pub fn new(config: SamplerConfig) -> Result<Self, WatermarkError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Compute the bin layout of `distribution`.
    ///
    /// # Errors
    /// [`WatermarkError::EmptyCandidates`] or
    /// [`WatermarkError::InvalidProbability`] if the distribution breaks the
    /// full-support invariant.
    pub fn layout<'a>(&self, distribution: &'a ActionDistribution) -> Result<BinLayout<'a>, WatermarkError> {
        distribution.validate()?;
        let total = distribution.total();

        // Lexicographic from the map, then a stable sort by probability.
        let mut ranked: Vec<(&'a str, f64)> =
            distribution.iter().map(|(id, w)| (id, w / total)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let n = ranked.len();
        let floor_log2 = (usize::BITS - 1 - n.leading_zeros()) as usize;
        let k_max = floor_log2.min(self.config.max_bits as usize);

        for k in (1..=k_max).rev() {
            let layout = pack(&ranked, k);
            if layout.imbalance() <= self.config.balance_tolerance {
                return Ok(layout);
            }
        }
        Ok(pack(&ranked, 0))
    }

    /// Number of keystream bits a selection from `distribution` consumes.
    pub fn bits_for(&self, distribution: &ActionDistribution) -> Result<usize, WatermarkError> {
        Ok(self.layout(distribution)?.bits)
    }

    /// Select one candidate using `bit_slice[cursor_in_slice..]`.
    ///
    /// # Errors
    /// - Distribution errors as in [`layout`](Self::layout).
    /// - [`WatermarkError::InvalidRange`] if the slice holds fewer than
    ///   `cursor_in_slice + bits_for(distribution)` bits.
    pub fn select(
        &self,
        distribution: &ActionDistribution,
        bit_slice: &[u8],
        cursor_in_slice: usize,
        context: &SamplingContext,
    ) -> Result<Selection, WatermarkError> {
        let layout = self.layout(distribution)?;
        let k = layout.bits;

        let end = cursor_in_slice
            .checked_add(k)
            .filter(|&end| end <= bit_slice.len())
            .ok_or(WatermarkError::InvalidRange {
                start: cursor_in_slice as u64,
                length: k as u64,
            })?;
        let consumed: Vec<u8> = bit_slice[cursor_in_slice..end].iter().map(|b| b & 1).collect();

        let mask = context.mask(k);
        let cell = consumed
            .iter()
            .zip(&mask)
            .fold(0usize, |acc, (b, m)| (acc << 1) | usize::from(b ^ m));

        let lookahead_end = end.saturating_add(self.config.lookahead_bits).min(bit_slice.len());
        let offset = context.unit_offset(&bit_slice[end..lookahead_end]);

        let chosen = layout.bins[cell].pick(offset);
        let draw = (cell as f64 + offset) / (1u64 << k) as f64;

        Ok(Selection { chosen: chosen.to_string(), bits_consumed: k, bits: consumed, cell, draw })
    }

    /// Recompute the bits a selection of `chosen` must have consumed.
    ///
    /// Exact inverse of [`select`](Self::select): for every slice `s`,
    /// `recover(d, select(d, s, 0, c).chosen, c) == s[..bits_consumed]`.
    ///
    /// # Errors
    /// Distribution errors as in [`layout`](Self::layout), or
    /// [`WatermarkError::UnknownCandidate`] if `chosen` is not in the
    /// distribution.
    pub fn recover(
        &self,
        distribution: &ActionDistribution,
        chosen: &str,
        context: &SamplingContext,
    ) -> Result<Vec<u8>, WatermarkError> {
        let layout = self.layout(distribution)?;
        let cell = layout
            .cell_of(chosen)
            .ok_or_else(|| WatermarkError::UnknownCandidate(chosen.to_string()))?;

        let k = layout.bits;
        let mask = context.mask(k);
        Ok((0..k).map(|i| (((cell >> (k - 1 - i)) & 1) as u8) ^ mask[i]).collect())
    }
}

/// Pack ranked candidates into `2^k` bins, lightest bin first.
fn pack<'a>(ranked: &[(&'a str, f64)], k: usize) -> BinLayout<'a> {
    let count = 1usize << k;
    let mut bins: Vec<Bin<'a>> = (0..count).map(|_| Bin { members: Vec::new(), mass: 0.0 }).collect();

    for &(id, p) in ranked {
        let mut lightest = 0;
        for (i, bin) in bins.iter().enumerate().skip(1) {
            if bin.mass < bins[lightest].mass {
                lightest = i;
            }
        }
        bins[lightest].members.push((id, p));
        bins[lightest].mass += p;
    }

    for bin in bins.iter_mut() {
        bin.members.sort_by(|a, b| a.0.cmp(b.0));
    }
    BinLayout { bits: k, bins }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::keystream::KeystreamCodec;

    fn dist(pairs: &[(&str, f64)]) -> ActionDistribution {
        ActionDistribution::normalized(pairs.iter().map(|&(k, v)| (k, v))).unwrap()
    }

    fn sampler() -> DifferentialSampler {
        DifferentialSampler::default()
    }

    #[test]
    fn single_candidate_consumes_nothing() {
        let d = dist(&[("only", 1.0)]);
        let ctx = SamplingContext::new("ctx", 0);
        let sel = sampler().select(&d, &[1, 0, 1], 0, &ctx).unwrap();
        assert_eq!(sel.chosen, "only");
        assert_eq!(sel.bits_consumed, 0);
        assert!(sampler().recover(&d, "only", &ctx).unwrap().is_empty());
    }

    #[test]
    fn balanced_distribution_gets_one_bit() {
        // {a, d} and {b, c} both weigh exactly 0.5.
        let d = dist(&[("a", 0.4), ("b", 0.3), ("c", 0.2), ("d", 0.1)]);
        let layout = sampler().layout(&d).unwrap();
        assert_eq!(layout.bits, 1);
        assert_eq!(layout.cell_of("a"), layout.cell_of("d"));
        assert_eq!(layout.cell_of("b"), layout.cell_of("c"));
        assert_ne!(layout.cell_of("a"), layout.cell_of("b"));
    }

    #[test]
    fn uniform_power_of_two_uses_full_width() {
        let ids = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let d = ActionDistribution::uniform(&ids).unwrap();
        assert_eq!(sampler().bits_for(&d).unwrap(), 3);
    }

    #[test]
    fn max_bits_caps_width() {
        let ids = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let d = ActionDistribution::uniform(&ids).unwrap();
        let s = DifferentialSampler::new(SamplerConfig { max_bits: 1, ..SamplerConfig::default() }).unwrap();
        assert_eq!(s.bits_for(&d).unwrap(), 1);
    }

    #[test]
    fn peaked_distribution_embeds_nothing() {
        let d = dist(&[("A", 0.95), ("B", 0.05)]);
        assert_eq!(sampler().bits_for(&d).unwrap(), 0);
    }

    #[test]
    fn roundtrip_over_many_slices() {
        let codec = KeystreamCodec::from_bit_str("1011001110001111").unwrap();
        let dists = [
            dist(&[("a", 0.4), ("b", 0.3), ("c", 0.2), ("d", 0.1)]),
            dist(&[("x", 0.55), ("y", 0.45)]),
            ActionDistribution::uniform(&["p", "q", "r", "s", "t", "u", "v", "w"]).unwrap(),
            dist(&[("A", 0.95), ("B", 0.05)]),
        ];
        for (i, d) in dists.iter().enumerate() {
            for step in 0..64u64 {
                let ctx = SamplingContext::new(format!("task||step{step}"), step);
                let slice = codec.stream(step * 7, 48).unwrap();
                let sel = sampler().select(d, &slice, 0, &ctx).unwrap();
                let bits = sampler().recover(d, &sel.chosen, &ctx).unwrap();
                assert_eq!(bits, slice[..sel.bits_consumed].to_vec(), "dist {i} step {step}");
            }
        }
    }

    #[test]
    fn cursor_in_slice_offsets_the_read() {
        let d = dist(&[("a", 0.4), ("b", 0.3), ("c", 0.2), ("d", 0.1)]);
        let ctx = SamplingContext::new("ctx", 1);
        let slice = [0, 0, 0, 1, 1, 0, 1, 0, 0, 1];
        let sel = sampler().select(&d, &slice, 3, &ctx).unwrap();
        assert_eq!(sel.bits, vec![1]);
        assert_eq!(sampler().recover(&d, &sel.chosen, &ctx).unwrap(), vec![1]);
    }

    #[test]
    fn short_slice_is_a_range_error() {
        let d = ActionDistribution::uniform(&["a", "b", "c", "d"]).unwrap();
        let ctx = SamplingContext::new("ctx", 0);
        assert!(matches!(
            sampler().select(&d, &[1], 0, &ctx),
            Err(WatermarkError::InvalidRange { .. })
        ));
    }

    #[test]
    fn unknown_candidate_rejected() {
        let d = dist(&[("a", 0.5), ("b", 0.5)]);
        let ctx = SamplingContext::new("ctx", 0);
        assert_eq!(
            sampler().recover(&d, "zzz", &ctx),
            Err(WatermarkError::UnknownCandidate("zzz".into()))
        );
    }

    #[test]
    fn invalid_distribution_rejected() {
        let d = ActionDistribution::from_weights([("a", 1.0), ("b", 0.0)]);
        let ctx = SamplingContext::new("ctx", 0);
        assert!(matches!(
            sampler().select(&d, &[0; 8], 0, &ctx),
            Err(WatermarkError::InvalidProbability { .. })
        ));
        let empty = ActionDistribution::default();
        assert_eq!(sampler().bits_for(&empty), Err(WatermarkError::EmptyCandidates));
    }

    #[test]
    fn context_changes_the_mapping() {
        // Same bits, different rounds: the mask must move at least one draw.
        let d = ActionDistribution::uniform(&["a", "b", "c", "d"]).unwrap();
        let slice = [0u8; 40];
        let picks: Vec<String> = (0..16)
            .map(|r| sampler().select(&d, &slice, 0, &SamplingContext::new("ctx", r)).unwrap().chosen)
            .collect();
        assert!(picks.iter().any(|p| p != &picks[0]));
    }

    #[test]
    fn unnormalized_input_matches_normalized() {
        let raw = ActionDistribution::from_weights([("a", 4.0), ("b", 3.0), ("c", 2.0), ("d", 1.0)]);
        let norm = raw.normalize().unwrap();
        assert_eq!(sampler().bits_for(&raw).unwrap(), sampler().bits_for(&norm).unwrap());
    }

    #[test]
    fn config_validation() {
        assert!(DifferentialSampler::new(SamplerConfig { max_bits: 17, ..Default::default() }).is_err());
        assert!(DifferentialSampler::new(SamplerConfig { balance_tolerance: 1.5, ..Default::default() }).is_err());
        assert!(DifferentialSampler::new(SamplerConfig { balance_tolerance: f64::NAN, ..Default::default() }).is_err());
    }
}

// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Action distributions: candidate id to probability.
//!
//! Candidates are kept in a `BTreeMap`, so iteration is lexicographic by
//! id and never depends on insertion order. Encoder and decoder therefore
//! agree on every ordering without transmitting one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::watermark::error::WatermarkError;

/// Sums within this distance of 1.0 count as normalized.
pub const NORMALIZATION_TOLERANCE: f64 = 1e-9;

/// A mapping from candidate action id to a non-negative weight.
///
/// Serializes as a plain JSON object (`{"A": 0.7, "B": 0.3}`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionDistribution {
    weights: BTreeMap<String, f64>,
}

impl ActionDistribution {
    /// Build a distribution without validating or normalizing the weights.
    ///
    /// Duplicate ids keep the last weight.
    pub fn from_weights<I, K>(weights: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self { weights: weights.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }

    /// Build, validate and normalize a distribution.
    ///
    /// # Errors
    /// - [`WatermarkError::EmptyCandidates`] if no weights are given.
    /// - [`WatermarkError::InvalidProbability`] if any weight is non-finite
    ///   or not strictly positive.
    pub fn normalized<I, K>(weights: I) -> Result<Self, WatermarkError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self::from_weights(weights).normalize()
    }

    /// Equal mass on every candidate.
    pub fn uniform<S: AsRef<str>>(candidates: &[S]) -> Result<Self, WatermarkError> {
        Self::normalized(candidates.iter().map(|c| (c.as_ref().to_string(), 1.0)))
    }

    /// Check the full-support invariant: non-empty, every weight finite and
    /// strictly positive.
    pub fn validate(&self) -> Result<(), WatermarkError> {
        if self.weights.is_empty() {
            return Err(WatermarkError::EmptyCandidates);
        }
        for (candidate, &value) in &self.weights {
            if !value.is_finite() || value <= 0.0 {
                return Err(WatermarkError::InvalidProbability {
                    candidate: candidate.clone(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Scale weights to sum to 1.
    ///
    /// Idempotent: an already-normalized distribution is returned
    /// unchanged, bit for bit.
    ///
    /// # Errors
    /// [`WatermarkError::InvalidProbability`] if a weight is invalid before
    /// scaling, or no longer strictly positive after it.
    pub fn normalize(&self) -> Result<Self, WatermarkError> {
        self.validate()?;
        let total = self.total();
        if !total.is_finite() {
            return Err(WatermarkError::InvalidProbability {
                candidate: "<total>".to_string(),
                value: total,
            });
        }
        if (total - 1.0).abs() <= NORMALIZATION_TOLERANCE {
            return Ok(self.clone());
        }
        let scaled = Self {
            weights: self.weights.iter().map(|(k, &v)| (k.clone(), v / total)).collect(),
        };
        // A weight far below the total can underflow to zero.
        scaled.validate()?;
        Ok(scaled)
    }

    /// Sum of all weights, accumulated in id order.
    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn is_normalized(&self) -> bool {
        (self.total() - 1.0).abs() <= NORMALIZATION_TOLERANCE
    }

    pub fn get(&self, candidate: &str) -> Option<f64> {
        self.weights.get(candidate).copied()
    }

    pub fn contains(&self, candidate: &str) -> bool {
        self.weights.contains_key(candidate)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// `(id, weight)` pairs in lexicographic id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    /// The most likely candidate. Ties go to the lexicographically first id.
    pub fn top(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (k, v) in self.iter() {
            if best.map_or(true, |(_, bv)| v > bv) {
                best = Some((k, v));
            }
        }
        best
    }

    pub fn max_probability(&self) -> f64 {
        self.top().map_or(0.0, |(_, p)| p)
    }

    /// `alpha * self + (1 - alpha) * other` over the union of candidates,
    /// renormalized. `alpha` is clamped to `[0, 1]`.
    pub fn mix(&self, other: &ActionDistribution, alpha: f64) -> Result<Self, WatermarkError> {
        let alpha = alpha.clamp(0.0, 1.0);
        let mut mixed: BTreeMap<String, f64> = BTreeMap::new();
        for (k, v) in self.iter() {
            *mixed.entry(k.to_string()).or_insert(0.0) += alpha * v;
        }
        for (k, v) in other.iter() {
            *mixed.entry(k.to_string()).or_insert(0.0) += (1.0 - alpha) * v;
        }
        Self { weights: mixed }.normalize()
    }

    /// Per-candidate difference `self - other` over the union of ids.
    pub fn delta(&self, other: &ActionDistribution) -> BTreeMap<String, f64> {
        let mut out: BTreeMap<String, f64> = BTreeMap::new();
        for (k, v) in self.iter() {
            *out.entry(k.to_string()).or_insert(0.0) += v;
        }
        for (k, v) in other.iter() {
            *out.entry(k.to_string()).or_insert(0.0) -= v;
        }
        out
    }

    /// Total-variation distance: half the L1 norm of [`delta`](Self::delta).
    pub fn total_variation(&self, other: &ActionDistribution) -> f64 {
        0.5 * self.delta(other).values().map(|d| d.abs()).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn normalizes_unscaled_weights() {
        let d = ActionDistribution::normalized([("A", 3.0), ("B", 1.0)]).unwrap();
        assert!(close(d.get("A").unwrap(), 0.75));
        assert!(close(d.get("B").unwrap(), 0.25));
        assert!(d.is_normalized());
    }

    #[test]
    fn normalize_is_idempotent() {
        let d = ActionDistribution::normalized([("x", 0.3), ("y", 0.2), ("z", 0.5)]).unwrap();
        let again = d.normalize().unwrap();
        assert_eq!(d, again);
    }

    #[test]
    fn insertion_order_irrelevant() {
        let a = ActionDistribution::normalized([("B", 1.0), ("A", 2.0)]).unwrap();
        let b = ActionDistribution::normalized([("A", 2.0), ("B", 1.0)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.candidates().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn rejects_bad_weights() {
        assert_eq!(
            ActionDistribution::normalized(Vec::<(String, f64)>::new()),
            Err(WatermarkError::EmptyCandidates)
        );
        assert!(matches!(
            ActionDistribution::normalized([("A", 1.0), ("B", 0.0)]),
            Err(WatermarkError::InvalidProbability { .. })
        ));
        assert!(matches!(
            ActionDistribution::normalized([("A", f64::NAN)]),
            Err(WatermarkError::InvalidProbability { .. })
        ));
        assert!(matches!(
            ActionDistribution::normalized([("A", -0.5), ("B", 1.5)]),
            Err(WatermarkError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn underflow_to_zero_is_rejected() {
        let err = ActionDistribution::normalized([("A", 1e10), ("B", 1e10), ("C", 5e-324)]).unwrap_err();
        assert_eq!(err, WatermarkError::InvalidProbability { candidate: "C".into(), value: 0.0 });
    }

    #[test]
    fn top_breaks_ties_lexicographically() {
        let d = ActionDistribution::normalized([("b", 0.4), ("a", 0.4), ("c", 0.2)]).unwrap();
        assert_eq!(d.top().unwrap().0, "a");
    }

    #[test]
    fn mix_blends_and_renormalizes() {
        let a = ActionDistribution::normalized([("A", 1.0), ("B", 1e-9)]).unwrap();
        let b = ActionDistribution::normalized([("A", 0.5), ("B", 0.5)]).unwrap();
        let m = a.mix(&b, 0.6).unwrap();
        assert!(m.is_normalized());
        assert!((m.get("A").unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn uniform_and_total_variation() {
        let u = ActionDistribution::uniform(&["a", "b", "c", "d"]).unwrap();
        assert!(close(u.get("c").unwrap(), 0.25));
        let p = ActionDistribution::normalized([("a", 0.5), ("b", 0.5)]).unwrap();
        assert!(close(u.total_variation(&p), 0.5));
        assert!(close(p.total_variation(&p), 0.0));
    }

    #[test]
    fn serializes_as_plain_object() {
        let d = ActionDistribution::normalized([("A", 0.25), ("B", 0.75)]).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"A":0.25,"B":0.75}"#);
        let back: ActionDistribution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}

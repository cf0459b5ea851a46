// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Synthetic fallback distributions and entropy mixing.
//!
//! When the model's self-report cannot be used, [`FallbackPolicy`]
//! synthesizes a full-support distribution: the reported top choice gets a
//! fixed, non-saturating share and the remaining candidates decay
//! geometrically in candidate-list order. When the report is valid but too
//! peaked to carry bits, the policy blends it with that synthetic
//! distribution instead of replacing it.

use serde::{Deserialize, Serialize};

use crate::watermark::distribution::ActionDistribution;
use crate::watermark::error::WatermarkError;

pub const DEFAULT_TOP_MASS: f64 = 0.4;
pub const DEFAULT_DECAY_RATIO: f64 = 0.75;
pub const DEFAULT_PEAK_THRESHOLD: f64 = 0.9;
pub const DEFAULT_MIX_ALPHA: f64 = 0.6;

/// Parameters for fallback synthesis and mixing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    /// Minimum share given to the top-known choice.
    pub top_mass: f64,
    /// Ratio between consecutive non-top candidates.
    pub decay_ratio: f64,
    /// Above this maximum probability a reported distribution is degenerate.
    pub peak_threshold: f64,
    /// Weight of the reported distribution when mixing.
    pub mix_alpha: f64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            top_mass: DEFAULT_TOP_MASS,
            decay_ratio: DEFAULT_DECAY_RATIO,
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
            mix_alpha: DEFAULT_MIX_ALPHA,
        }
    }
}

impl FallbackPolicy {
    pub fn validate(&self) -> Result<(), WatermarkError> {
        let open_unit = |name: &str, v: f64| {
            if v > 0.0 && v < 1.0 {
                Ok(())
            } else {
                Err(WatermarkError::InvalidConfig(format!("fallback.{name} must be in (0, 1), got {v}")))
            }
        };
        open_unit("top_mass", self.top_mass)?;
        open_unit("decay_ratio", self.decay_ratio)?;
        open_unit("mix_alpha", self.mix_alpha)?;
        if !(self.peak_threshold > 0.0 && self.peak_threshold <= 1.0) {
            return Err(WatermarkError::InvalidConfig(format!(
                "fallback.peak_threshold must be in (0, 1], got {}",
                self.peak_threshold
            )));
        }
        Ok(())
    }

    /// Build the fallback distribution over `candidates`.
    ///
    /// `candidates` is in plausibility order and must be free of
    /// duplicates. With a known `top` (that is a candidate), it receives
    /// `max(top_mass, geometric leader share)` so it never ranks below
    /// another candidate; the rest decay by `decay_ratio`. Without one, all
    /// candidates decay geometrically from the first.
    ///
    /// # Errors
    /// [`WatermarkError::EmptyCandidates`] if `candidates` is empty.
    pub fn synthesize<S: AsRef<str>>(
        &self,
        candidates: &[S],
        top: Option<&str>,
    ) -> Result<ActionDistribution, WatermarkError> {
        if candidates.is_empty() {
            return Err(WatermarkError::EmptyCandidates);
        }
        let n = candidates.len();
        let geometric_total: f64 = (0..n).map(|i| self.decay_ratio.powi(i as i32)).sum();

        let top = top.filter(|t| candidates.iter().any(|c| c.as_ref() == *t));
        let Some(top) = top else {
            return ActionDistribution::normalized(
                candidates
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.as_ref().to_string(), self.decay_ratio.powi(i as i32) / geometric_total)),
            );
        };

        if n == 1 {
            return ActionDistribution::normalized([(top.to_string(), 1.0)]);
        }

        let top_share = self.top_mass.max(1.0 / geometric_total);
        let remainder = 1.0 - top_share;
        let rest_total: f64 = (0..n - 1).map(|i| self.decay_ratio.powi(i as i32)).sum();

        let mut weights = Vec::with_capacity(n);
        weights.push((top.to_string(), top_share));
        let others = candidates.iter().map(AsRef::as_ref).filter(|c| *c != top);
        for (i, c) in others.enumerate() {
            weights.push((c.to_string(), remainder * self.decay_ratio.powi(i as i32) / rest_total));
        }
        ActionDistribution::normalized(weights)
    }

    /// `true` if one candidate holds more than `peak_threshold`.
    pub fn is_degenerate(&self, distribution: &ActionDistribution) -> bool {
        distribution.len() > 1 && distribution.max_probability() > self.peak_threshold
    }

    /// Blend a peaked distribution with the fallback anchored at its top
    /// choice: `mix_alpha * reported + (1 - mix_alpha) * fallback`.
    pub fn repair<S: AsRef<str>>(
        &self,
        reported: &ActionDistribution,
        candidates: &[S],
    ) -> Result<ActionDistribution, WatermarkError> {
        let top = reported.top().map(|(id, _)| id.to_string());
        let fallback = self.synthesize(candidates, top.as_deref())?;
        reported.mix(&fallback, self.mix_alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DINNER: [&str; 4] = ["点外卖", "做炒饭", "煮面", "不吃"];

    #[test]
    fn top_gets_fixed_share() {
        let d = FallbackPolicy::default().synthesize(&DINNER, Some("煮面")).unwrap();
        assert!((d.get("煮面").unwrap() - 0.4).abs() < 1e-12);
        assert!(d.is_normalized());
        // Remaining candidates decay in list order.
        let a = d.get("点外卖").unwrap();
        let b = d.get("做炒饭").unwrap();
        let c = d.get("不吃").unwrap();
        assert!(a > b && b > c);
        assert!((b / a - 0.75).abs() < 1e-12);
    }

    #[test]
    fn top_never_below_others() {
        let d = FallbackPolicy::default().synthesize(&["A", "B"], Some("A")).unwrap();
        assert!(d.get("A").unwrap() >= d.get("B").unwrap());
        assert!(d.is_normalized());
    }

    #[test]
    fn unknown_top_uses_pure_geometric() {
        let d = FallbackPolicy::default().synthesize(&DINNER, Some("Finish")).unwrap();
        assert_eq!(d.top().unwrap().0, "点外卖");
        assert_eq!(d.len(), 4);
        assert!(d.iter().all(|(_, p)| p > 0.0));
    }

    #[test]
    fn single_candidate() {
        let d = FallbackPolicy::default().synthesize(&["only"], Some("only")).unwrap();
        assert_eq!(d.get("only"), Some(1.0));
    }

    #[test]
    fn empty_candidates_rejected() {
        let none: [&str; 0] = [];
        assert_eq!(FallbackPolicy::default().synthesize(&none, None), Err(WatermarkError::EmptyCandidates));
    }

    #[test]
    fn repair_keeps_preference_and_adds_entropy() {
        let policy = FallbackPolicy::default();
        let peaked = ActionDistribution::normalized([("A", 0.95), ("B", 0.05)]).unwrap();
        assert!(policy.is_degenerate(&peaked));
        let fixed = policy.repair(&peaked, &["A", "B"]).unwrap();
        assert!(!policy.is_degenerate(&fixed));
        assert!(fixed.get("A").unwrap() > fixed.get("B").unwrap());
        assert!(fixed.get("B").unwrap() > 0.05);
    }

    #[test]
    fn validation() {
        assert!(FallbackPolicy::default().validate().is_ok());
        let bad = FallbackPolicy { decay_ratio: 1.0, ..FallbackPolicy::default() };
        assert!(matches!(bad.validate(), Err(WatermarkError::InvalidConfig(_))));
        let bad = FallbackPolicy { peak_threshold: 0.0, ..FallbackPolicy::default() };
        assert!(bad.validate().is_err());
    }
}

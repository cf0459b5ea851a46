// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Encode/decode surface: raw model text in, watermarked action out.
//!
//! Encode pipeline:
//! 1. Deduplicate the candidate set (first occurrence wins).
//! 2. Parse the model's self-reported distribution with the parser chain.
//! 3. Resolve a usable distribution: the report as-is, the report blended
//!    with the fallback when too peaked, or the fallback alone when the
//!    report is missing or malformed.
//! 4. Fetch a keystream window at the caller's cursor.
//! 5. Select an action with the differential sampler.
//!
//! Decode needs only the distribution that was used, the chosen action and
//! the context. It never sees the raw text or the payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::watermark::config::WatermarkConfig;
use crate::watermark::context::SamplingContext;
use crate::watermark::distribution::ActionDistribution;
use crate::watermark::error::{ParseIssue, WatermarkError};
use crate::watermark::fallback::FallbackPolicy;
use crate::watermark::keystream::{KeystreamCodec, KeystreamCursor};
use crate::watermark::parse::{ParsedOutput, ParserChain};
use crate::watermark::payload::{bit_string, PayloadBits};
use crate::watermark::sampler::{DifferentialSampler, SamplerConfig};

/// Where the sampled distribution came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionSource {
    /// The model's report, normalized.
    Reported,
    /// The model's report blended with the fallback.
    Mixed,
    /// Synthesized; the report was missing or unusable.
    Fallback,
    /// Single candidate; nothing to choose.
    Forced,
}

/// A distribution ready for sampling plus how it was obtained.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDistribution {
    pub distribution: ActionDistribution,
    pub source: DistributionSource,
    pub issue: Option<ParseIssue>,
    /// The model's own distribution, when it reported a valid one.
    pub reported: Option<ActionDistribution>,
    pub parsed: Option<ParsedOutput>,
}

/// Observability record for one embedding. Derived data only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingTrace {
    pub round: u64,
    pub bits_embedded: usize,
    pub source: DistributionSource,
    /// Parse strategy that produced the report, if any.
    pub strategy: Option<String>,
    pub issue: Option<ParseIssue>,
    pub reported: Option<ActionDistribution>,
    /// `used - reported` per candidate; empty without a report.
    pub delta: BTreeMap<String, f64>,
    pub total_variation: f64,
    pub action_args: Option<Value>,
    pub thought: Option<String>,
    /// Sampler parameters the step was embedded with; a decoder must use
    /// the same values.
    pub sampler: SamplerConfig,
}

/// Outcome of one [`WatermarkOrchestrator::encode`] call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub chosen: String,
    /// The consumed keystream bits, serialized as `"0101"`.
    #[serde(with = "bit_string")]
    pub bits: Vec<u8>,
    pub bits_count: usize,
    pub distribution_used: ActionDistribution,
    /// Cursor the step started reading at.
    pub cursor: KeystreamCursor,
    pub trace: EmbeddingTrace,
}

impl EmbeddingResult {
    /// Where the next step's read starts.
    pub fn next_cursor(&self) -> KeystreamCursor {
        self.cursor + self.bits_count as u64
    }
}

/// Ties a payload to the parse, fallback and sampling machinery.
///
/// Immutable after construction; share it freely across threads.
#[derive(Debug)]
pub struct WatermarkOrchestrator {
    codec: KeystreamCodec,
    sampler: DifferentialSampler,
    policy: FallbackPolicy,
    parsers: ParserChain,
    window: usize,
}

impl WatermarkOrchestrator {
    /// # Errors
    /// [`WatermarkError::InvalidConfig`] if `config` does not validate.
    pub fn new(codec: KeystreamCodec, config: &WatermarkConfig) -> Result<Self, WatermarkError> {
        config.validate()?;
        Ok(Self {
            codec,
            sampler: DifferentialSampler::new(config.sampler)?,
            policy: config.fallback,
            parsers: ParserChain::default(),
            window: config.keystream_window,
        })
    }

    /// Default configuration for `payload`.
    pub fn with_defaults(payload: PayloadBits) -> Result<Self, WatermarkError> {
        Self::new(KeystreamCodec::new(payload), &WatermarkConfig::default())
    }

    /// Replace the parser chain.
    pub fn with_parsers(mut self, parsers: ParserChain) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn codec(&self) -> &KeystreamCodec {
        &self.codec
    }

    pub fn sampler(&self) -> &DifferentialSampler {
        &self.sampler
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Turn raw model output into a full-support distribution over the
    /// candidates. Malformed output never fails here; only an empty
    /// candidate set does.
    pub fn resolve_distribution<S: AsRef<str>>(
        &self,
        raw_output: &str,
        candidates: &[S],
    ) -> Result<ResolvedDistribution, WatermarkError> {
        let mut unique: Vec<&str> = Vec::with_capacity(candidates.len());
        for c in candidates {
            if !unique.contains(&c.as_ref()) {
                unique.push(c.as_ref());
            }
        }
        if unique.is_empty() {
            return Err(WatermarkError::EmptyCandidates);
        }

        let parsed = self.parsers.parse(raw_output);

        if let [only] = unique[..] {
            return Ok(ResolvedDistribution {
                distribution: ActionDistribution::normalized([(only, 1.0)])?,
                source: DistributionSource::Forced,
                issue: None,
                reported: None,
                parsed,
            });
        }

        let report = parsed.as_ref().map(|p| p.output.distribution_for(&unique));
        let resolved = match report {
            Some(Ok(reported)) if self.policy.is_degenerate(&reported) => ResolvedDistribution {
                distribution: self.policy.repair(&reported, &unique)?,
                source: DistributionSource::Mixed,
                issue: Some(ParseIssue::DegenerateDistribution),
                reported: Some(reported),
                parsed,
            },
            Some(Ok(reported)) => ResolvedDistribution {
                distribution: reported.clone(),
                source: DistributionSource::Reported,
                issue: None,
                reported: Some(reported),
                parsed,
            },
            Some(Err(issue)) => {
                let top = parsed.as_ref().and_then(|p| p.output.action.as_deref());
                ResolvedDistribution {
                    distribution: self.policy.synthesize(&unique, top)?,
                    source: DistributionSource::Fallback,
                    issue: Some(issue),
                    reported: None,
                    parsed,
                }
            }
            None => ResolvedDistribution {
                distribution: self.policy.synthesize(&unique, None)?,
                source: DistributionSource::Fallback,
                issue: Some(ParseIssue::ParseFailure),
                reported: None,
                parsed: None,
            },
        };
        Ok(resolved)
    }

    /// Pick an action for one decision point, embedding keystream bits
    /// from `cursor` onwards.
    ///
    /// # Errors
    /// [`WatermarkError::EmptyCandidates`], or
    /// [`WatermarkError::InvalidRange`] if the window at `cursor` overflows.
    pub fn encode<S: AsRef<str>>(
        &self,
        raw_output: &str,
        candidates: &[S],
        context: &SamplingContext,
        cursor: KeystreamCursor,
    ) -> Result<EmbeddingResult, WatermarkError> {
        let resolved = self.resolve_distribution(raw_output, candidates)?;
        let slice = self.codec.stream(cursor, self.window)?;
        let selection = self.sampler.select(&resolved.distribution, &slice, 0, context)?;

        let (delta, total_variation) = match &resolved.reported {
            Some(reported) => (
                resolved.distribution.delta(reported),
                resolved.distribution.total_variation(reported),
            ),
            None => (BTreeMap::new(), 0.0),
        };
        let (strategy, action_args, thought) = match &resolved.parsed {
            Some(p) => (
                Some(p.strategy.to_string()),
                p.output.args_for(&selection.chosen),
                p.output.thought.clone(),
            ),
            None => (None, None, None),
        };

        debug!(
            context = %context,
            cursor,
            source = ?resolved.source,
            issue = ?resolved.issue,
            chosen = %selection.chosen,
            bits = selection.bits_consumed,
            "watermark encode"
        );

        Ok(EmbeddingResult {
            trace: EmbeddingTrace {
                round: context.round,
                bits_embedded: selection.bits_consumed,
                source: resolved.source,
                strategy,
                issue: resolved.issue,
                reported: resolved.reported,
                delta,
                total_variation,
                action_args,
                thought,
                sampler: *self.sampler.config(),
            },
            chosen: selection.chosen,
            bits_count: selection.bits_consumed,
            bits: selection.bits,
            distribution_used: resolved.distribution,
            cursor,
        })
    }

    /// The bits an [`encode`](Self::encode) call that chose `chosen` from
    /// `distribution_used` at `context` consumed.
    pub fn decode(
        &self,
        distribution_used: &ActionDistribution,
        chosen: &str,
        context: &SamplingContext,
    ) -> Result<Vec<u8>, WatermarkError> {
        self.sampler.recover(distribution_used, chosen, context)
    }
}

/// Decode with the default sampler configuration. Needs no payload.
///
/// Only matches steps embedded with [`SamplerConfig::default`]. For any
/// other configuration, build a [`DifferentialSampler`] from the step's
/// [`EmbeddingTrace::sampler`] and call its `recover`.
pub fn decode(
    distribution_used: &ActionDistribution,
    chosen: &str,
    context: &SamplingContext,
) -> Result<Vec<u8>, WatermarkError> {
    DifferentialSampler::default().recover(distribution_used, chosen, context)
}

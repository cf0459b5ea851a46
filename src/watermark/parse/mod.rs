// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Reading a self-reported action distribution out of free-form model text.
//!
//! Models are asked to answer with a JSON object such as
//!
//! ```text
//! {"action_weights": {"A": 0.7, "B": 0.3}, "action": "A",
//!  "action_args": {"A": {...}}, "thought": "..."}
//! ```
//!
//! but in practice wrap it in a code fence, surround it with prose, or
//! print a Python-style dictionary. Each rendering is handled by one
//! [`ParseStrategy`]; [`ParserChain`] tries them in order and keeps the
//! first object found. Nothing here fails loudly: a miss is `None`, and the
//! orchestrator turns it into a fallback distribution.

mod json;
mod loose;

use serde_json::{Map, Value};

use crate::watermark::distribution::ActionDistribution;
use crate::watermark::error::ParseIssue;

pub use json::{EmbeddedObject, FencedBlock, PlainJson};
pub use loose::{loose_to_json, LooseDict};

/// Keys that may carry the action-weight map, in lookup order.
const WEIGHT_KEYS: [&str; 3] = ["action_weights", "probabilities", "weights"];

/// One textual rendering of the distribution object.
pub trait ParseStrategy: Send + Sync {
    /// Short tag recorded in the embedding trace.
    fn name(&self) -> &'static str;

    /// Extract a JSON object from `raw`, or `None` if this rendering does
    /// not apply.
    fn extract(&self, raw: &str) -> Option<Map<String, Value>>;
}

/// The fields of the model's answer that the engine uses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportedOutput {
    /// The model's single top choice.
    pub action: Option<String>,
    /// The raw weight value: an object keyed by candidate or a positional list.
    pub weights: Option<Value>,
    pub action_args: Option<Value>,
    pub thought: Option<String>,
}

impl ReportedOutput {
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let action = object
            .get("action")
            .or_else(|| object.get("tool"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let weights = WEIGHT_KEYS.iter().find_map(|k| object.get(*k)).cloned();
        let thought = object
            .get("thought")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self { action, weights, action_args: object.get("action_args").cloned(), thought }
    }

    /// Turn the reported weights into a normalized distribution over
    /// exactly `candidates`.
    ///
    /// Weight keys outside the candidate set are ignored. A positional list
    /// must have one entry per candidate.
    ///
    /// # Errors
    /// - [`ParseIssue::ParseFailure`] if no weights were reported, or a
    ///   weight is not a finite number.
    /// - [`ParseIssue::CandidateMismatch`] if a candidate is missing or has
    ///   a non-positive weight.
    pub fn distribution_for<S: AsRef<str>>(&self, candidates: &[S]) -> Result<ActionDistribution, ParseIssue> {
        let mut weights = Vec::with_capacity(candidates.len());
        match self.weights.as_ref() {
            Some(Value::Object(map)) => {
                for c in candidates {
                    let value = map.get(c.as_ref()).ok_or(ParseIssue::CandidateMismatch)?;
                    weights.push((c.as_ref().to_string(), coerce_weight(value)?));
                }
            }
            Some(Value::Array(list)) => {
                if list.len() != candidates.len() {
                    return Err(ParseIssue::CandidateMismatch);
                }
                for (c, value) in candidates.iter().zip(list) {
                    weights.push((c.as_ref().to_string(), coerce_weight(value)?));
                }
            }
            _ => return Err(ParseIssue::ParseFailure),
        }

        if weights.iter().any(|&(_, w)| w <= 0.0) {
            return Err(ParseIssue::CandidateMismatch);
        }
        ActionDistribution::normalized(weights).map_err(|_| ParseIssue::ParseFailure)
    }

    /// Arguments for `chosen`: the per-action entry when `action_args` is
    /// keyed by action, otherwise the whole value.
    pub fn args_for(&self, chosen: &str) -> Option<Value> {
        match self.action_args.as_ref()? {
            Value::Object(map) if map.contains_key(chosen) => map.get(chosen).cloned(),
            Value::Null => None,
            other => Some(other.clone()),
        }
    }
}

/// Numbers, or strings holding numbers. Negative values are returned as-is
/// so the caller can classify them.
fn coerce_weight(value: &Value) -> Result<f64, ParseIssue> {
    let v = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    v.filter(|x| x.is_finite()).ok_or(ParseIssue::ParseFailure)
}

/// A successful parse and the strategy that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedOutput {
    pub strategy: &'static str,
    pub output: ReportedOutput,
}

/// Ordered list of parse strategies.
pub struct ParserChain {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for ParserChain {
    /// Plain JSON, fenced block, object embedded in prose, loose dictionary.
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(PlainJson),
                Box::new(FencedBlock),
                Box::new(EmbeddedObject),
                Box::new(LooseDict),
            ],
        }
    }
}

impl ParserChain {
    /// A chain with no strategies; every parse misses.
    pub fn empty() -> Self {
        Self { strategies: Vec::new() }
    }

    /// Append a strategy to the end of the chain.
    pub fn with(mut self, strategy: impl ParseStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First object any strategy extracts, interpreted as a report.
    pub fn parse(&self, raw: &str) -> Option<ParsedOutput> {
        self.strategies.iter().find_map(|s| {
            s.extract(raw).map(|object| ParsedOutput {
                strategy: s.name(),
                output: ReportedOutput::from_object(&object),
            })
        })
    }
}

impl core::fmt::Debug for ParserChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.strategy_names()).finish()
    }
}

// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Error types for the watermarking engine.
//!
//! [`WatermarkError`] covers the conditions that terminate a call: misuse
//! of the keystream (bad payloads, bad ranges), distributions that must
//! never reach the sampler, and verifier-side reconstruction failures.
//!
//! [`ParseIssue`] is the non-fatal counterpart. Malformed model output is
//! never an error: the orchestrator records what went wrong in the trace
//! and continues with a fallback distribution.

use core::fmt;

/// Errors that can terminate an encode, decode, or recovery call.
#[derive(Debug, Clone, PartialEq)]
pub enum WatermarkError {
    /// The payload is empty or contains a symbol other than 0/1.
    InvalidPayload(&'static str),
    /// A keystream or slice range is out of bounds.
    InvalidRange { start: u64, length: u64 },
    /// The candidate set (or distribution) has no members.
    EmptyCandidates,
    /// A probability reaching the sampler is non-finite or not positive.
    InvalidProbability { candidate: String, value: f64 },
    /// The chosen action is not part of the distribution it was drawn from.
    UnknownCandidate(String),
    /// Too few independent observations to reconstruct the payload.
    RankDeficient { rank: usize, needed: usize },
    /// Two observations disagree about the same linear combination.
    InconsistentObservations,
    /// CRC check failed on a reconstructed message frame.
    FrameCorrupted,
    /// The reconstructed message is not valid UTF-8.
    InvalidUtf8,
    /// A configuration parameter is out of range.
    InvalidConfig(String),
}

impl fmt::Display for WatermarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload(why) => write!(f, "invalid payload: {why}"),
            Self::InvalidRange { start, length } => {
                write!(f, "invalid keystream range (start {start}, length {length})")
            }
            Self::EmptyCandidates => write!(f, "candidate set is empty"),
            Self::InvalidProbability { candidate, value } => {
                write!(f, "invalid probability {value} for candidate {candidate:?}")
            }
            Self::UnknownCandidate(c) => write!(f, "candidate {c:?} is not in the distribution"),
            Self::RankDeficient { rank, needed } => {
                write!(f, "not enough independent observations (rank {rank} of {needed})")
            }
            Self::InconsistentObservations => write!(f, "observations are inconsistent"),
            Self::FrameCorrupted => write!(f, "payload frame CRC mismatch"),
            Self::InvalidUtf8 => write!(f, "recovered text is not valid UTF-8"),
            Self::InvalidConfig(why) => write!(f, "invalid configuration: {why}"),
        }
    }
}

impl std::error::Error for WatermarkError {}

/// Recoverable problems with a model's self-reported distribution.
///
/// Each one resolves to a usable distribution; they only surface in the
/// embedding trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseIssue {
    /// No structured distribution could be read from the raw output.
    ParseFailure,
    /// Weights were present but did not cover every candidate with a
    /// positive value.
    CandidateMismatch,
    /// Weights were valid but one candidate dominated, so the distribution
    /// was blended with the fallback.
    DegenerateDistribution,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFailure => write!(f, "no distribution found in model output"),
            Self::CandidateMismatch => write!(f, "reported weights do not cover the candidate set"),
            Self::DegenerateDistribution => write!(f, "reported distribution too peaked to embed"),
        }
    }
}

// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Behavioral watermarking for tool-using agents.
//!
//! The engine has three layers:
//!
//! - **Keystream** ([`KeystreamCodec`]): expands the secret payload into an
//!   unbounded bit stream whose every bit is a GF(2) parity check on the
//!   payload.
//! - **Sampler** ([`DifferentialSampler`]): spends keystream bits to pick
//!   an action, faithfully to the action distribution, with an exact
//!   inverse that recovers the bits from the choice alone.
//! - **Orchestrator** ([`WatermarkOrchestrator`]): turns raw model text into
//!   a usable distribution (parse chain, fallback synthesis, mixing) and
//!   exposes `encode` / `decode`.
//!
//! Sessions ([`WatermarkSession`], [`SessionStore`]) own the cursor and
//! round counter. Verifiers reconstruct the payload from any sufficiently
//! informative subset of steps with [`recover_payload`].

pub mod config;
pub mod context;
pub mod distribution;
pub mod erasure;
pub mod error;
pub mod fallback;
pub mod keystream;
pub mod orchestrator;
pub mod parse;
pub mod payload;
pub mod prompt;
pub mod sampler;
pub mod session;

pub use config::WatermarkConfig;
pub use context::SamplingContext;
pub use distribution::ActionDistribution;
pub use erasure::{recover_payload, ObservationOutcome, ObservedStep, PayloadRecovery};
pub use error::{ParseIssue, WatermarkError};
pub use fallback::FallbackPolicy;
pub use keystream::{CoefficientRow, KeystreamCodec, KeystreamCursor, RowGenerator};
pub use orchestrator::{
    decode, DistributionSource, EmbeddingResult, EmbeddingTrace, ResolvedDistribution, WatermarkOrchestrator,
};
pub use parse::{ParseStrategy, ParserChain, ReportedOutput};
pub use payload::PayloadBits;
pub use prompt::{inject_instruction, ChatMessage, SCORING_INSTRUCTION};
pub use sampler::{DifferentialSampler, SamplerConfig, Selection};
pub use session::{SessionStore, WatermarkSession};

/// Reconstruct a framed text message of `message_bytes` bytes from
/// observed steps.
///
/// # Errors
/// Everything [`recover_payload`] reports, plus
/// [`WatermarkError::FrameCorrupted`] or [`WatermarkError::InvalidUtf8`]
/// if the solved bits are not a valid frame.
pub fn recover_message(
    sampler: &DifferentialSampler,
    steps: &[ObservedStep],
    message_bytes: usize,
) -> Result<String, WatermarkError> {
    let payload = recover_payload(sampler, steps, PayloadBits::message_len_bits(message_bytes))?;
    payload.to_message()
}

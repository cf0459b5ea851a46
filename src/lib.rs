// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! # agentmark-core
//!
//! Pure-Rust behavioral watermarking engine for LLM agents. A secret bit
//! payload is hidden in *which action* an agent takes at each step, not in
//! the text it writes:
//!
//! - The model self-reports a probability for every candidate action.
//! - A keystream derived from the payload drives the choice, so the chosen
//!   action follows the reported distribution while carrying payload bits.
//! - Anyone holding the public trace (distribution used, chosen action,
//!   context) recovers those bits without the raw model text.
//!
//! All processing is deterministic and in-process. Keyed draws use
//! ChaCha20 seeded through SHA-256, so encoder and verifier agree across
//! platforms.
//!
//! # Quick start
//!
//! ```rust
//! use agentmark_core::{PayloadBits, SamplingContext, WatermarkOrchestrator, decode};
//!
//! let wm = WatermarkOrchestrator::with_defaults(PayloadBits::from_bit_str("1101").unwrap()).unwrap();
//! let raw = r#"{"action_weights": {"search": 0.5, "answer": 0.3, "ask": 0.2}}"#;
//! let ctx = SamplingContext::new("task||step0", 0);
//!
//! let result = wm.encode(raw, &["search", "answer", "ask"], &ctx, 0).unwrap();
//! let bits = decode(&result.distribution_used, &result.chosen, &ctx).unwrap();
//! assert_eq!(bits, result.bits);
//! ```

pub mod watermark;

pub use watermark::{decode, recover_message, recover_payload};
pub use watermark::{ActionDistribution, PayloadBits, SamplingContext};
pub use watermark::{DifferentialSampler, KeystreamCodec, WatermarkOrchestrator};
pub use watermark::{EmbeddingResult, EmbeddingTrace, ParseIssue, WatermarkError};
pub use watermark::{SessionStore, WatermarkConfig, WatermarkSession};

// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Cross-platform determinism tests.
//!
//! Encoder and verifier usually run on different machines, so every keyed
//! draw is pinned here:
//!
//! 1. **Context salt**: SHA-256 over the domain tag, the length-prefixed
//!    context string and the big-endian round.
//! 2. **Keystream rows**: ChaCha20 keyed by the row seed, one stream id per
//!    position, words assembled from `u32` draws.
//! 3. **Context mask**: ChaCha20 keyed by the salt, bits taken MSB-first.
//!
//! If any pinned value changes, previously embedded traces no longer decode.

use agentmark_core::watermark::keystream::RowGenerator;
use agentmark_core::watermark::payload::bits_to_string;
use agentmark_core::{KeystreamCodec, SamplingContext};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn pin_context_salt() {
    let ctx = SamplingContext::new("task||step0", 0);
    assert_eq!(hex(&ctx.salt()), "86d29cafeb4151de0ae03da8a34b14ffc782f241b9583d0f1c34e2c37481deae");
}

#[test]
fn pin_context_mask() {
    let ctx = SamplingContext::new("task||step0", 0);
    assert_eq!(ctx.mask(8), vec![1, 0, 0, 0, 0, 0, 0, 1]);
    // Shorter masks are prefixes of longer ones.
    assert_eq!(ctx.mask(3), vec![1, 0, 0]);
}

#[test]
fn pin_keystream_prefix() {
    let codec = KeystreamCodec::from_bit_str("1101").unwrap();
    assert_eq!(bits_to_string(&codec.stream(0, 24).unwrap()), "110100011101100010001011");
}

#[test]
fn rows_depend_only_on_length() {
    let a = RowGenerator::new(37);
    let b = RowGenerator::new(37);
    let c = RowGenerator::new(38);
    for p in [0u64, 36, 37, 1_000, u64::MAX] {
        assert_eq!(a.row(p), b.row(p));
    }
    // A different length reseeds every coded row.
    let short: Vec<Vec<u8>> = (40..60).map(|p| a.row(p).to_bits()).collect();
    let long: Vec<Vec<u8>> = (40..60).map(|p| c.row(p).to_bits()[..37].to_vec()).collect();
    assert_ne!(short, long);
}

#[test]
fn coded_rows_are_never_zero() {
    let rows = RowGenerator::new(1);
    // With one coefficient, every coded row must be [1].
    for p in 1..200u64 {
        assert_eq!(rows.row(p).to_bits(), vec![1]);
    }
}

// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Sampling context keys and the salt-derived draws they drive.
//!
//! A [`SamplingContext`] binds one embedding event to one decision point:
//! the caller's context string (typically task plus step or last
//! observation) and the round number. The salt is a SHA-256 digest over a
//! domain tag, the length-prefixed context string and the round, so two
//! decision points with identical distributions still produce unrelated
//! draws and bits cannot be replayed across steps.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::watermark::payload::bits_to_bytes;

const CONTEXT_DOMAIN: &[u8] = b"agentmark-context-v1";
const OFFSET_DOMAIN: &[u8] = b"agentmark-offset-v1";

/// Composite key of (context string, round number).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplingContext {
    pub key: String,
    pub round: u64,
}

impl SamplingContext {
    pub fn new(key: impl Into<String>, round: u64) -> Self {
        Self { key: key.into(), round }
    }

    /// 32-byte salt for this decision point.
    pub fn salt(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(CONTEXT_DOMAIN);
        hasher.update((self.key.len() as u64).to_be_bytes());
        hasher.update(self.key.as_bytes());
        hasher.update(self.round.to_be_bytes());
        hasher.finalize().into()
    }

    /// `k` mask bits (MSB first) drawn from ChaCha20 seeded by the salt.
    ///
    /// XOR-ing keystream bits with this mask decorrelates the observed cell
    /// from the raw keystream while staying invertible.
    pub fn mask(&self, k: usize) -> Vec<u8> {
        let mut rng = ChaCha20Rng::from_seed(self.salt());
        let mut bits = Vec::with_capacity(k);
        while bits.len() < k {
            let word = rng.next_u32();
            let take = (k - bits.len()).min(32);
            for i in 0..take {
                bits.push(((word >> (31 - i)) & 1) as u8);
            }
        }
        bits
    }

    /// A deterministic offset in `[0, 1)` keyed by the salt and the given
    /// look-ahead bits.
    ///
    /// Uses the top 53 bits of the digest so every representable value is
    /// an exact multiple of 2^-53.
    pub fn unit_offset(&self, lookahead: &[u8]) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(OFFSET_DOMAIN);
        hasher.update(self.salt());
        hasher.update((lookahead.len() as u64).to_be_bytes());
        hasher.update(bits_to_bytes(lookahead));
        let digest = hasher.finalize();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let x = u64::from_be_bytes(head) >> 11;
        x as f64 / (1u64 << 53) as f64
    }
}

impl core::fmt::Display for SamplingContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.key, self.round)
    }
}

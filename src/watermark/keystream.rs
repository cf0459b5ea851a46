// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Deterministic keystream expansion with linear coding rows.
//!
//! Every keystream position `p` carries one bit: the GF(2) inner product of
//! a coefficient row `row(p)` with the payload. The first `L` positions
//! (`L` = payload length) use unit rows, so the stream starts with the
//! payload itself. Later positions use pseudo-random non-zero rows, which
//! makes every observed bit an independent-looking parity check on the
//! payload. Any set of observations whose rows reach rank `L` reconstructs
//! the payload regardless of order or gaps (see [`super::erasure`]).
//!
//! Rows depend only on `L` and `p`. Each position has its own ChaCha20
//! stream id, so any row is reachable in O(L) without walking the stream
//! from the start, and a verifier who knows `L` regenerates every row
//! without the payload.
//!
//! # Cross-platform portability
//!
//! Row words are assembled from two `next_u32()` draws (low half first)
//! rather than `next_u64()`, matching the u32-only PRNG discipline used for
//! all other keyed draws in this crate.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::watermark::error::WatermarkError;
use crate::watermark::payload::PayloadBits;

/// Domain tag for the coefficient-row seed.
const ROW_DOMAIN: &[u8] = b"agentmark-rlnc-rows-v1";

/// Largest number of bits a single `stream` call may return.
pub const MAX_STREAM_REQUEST: usize = 1 << 24;

/// Absolute position in the keystream, owned by the calling session.
pub type KeystreamCursor = u64;

/// A GF(2) coefficient vector of fixed length, packed into `u64` words.
///
/// Bit `i` lives in word `i / 64` at bit `i % 64`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoefficientRow {
    words: Vec<u64>,
    len: usize,
}

impl CoefficientRow {
    /// The all-zero row of length `len`.
    pub fn zero(len: usize) -> Self {
        Self { words: vec![0u64; len.div_ceil(64)], len }
    }

    /// The unit row `e_index` of length `len`.
    pub fn unit(len: usize, index: usize) -> Self {
        let mut row = Self::zero(len);
        row.words[index / 64] |= 1u64 << (index % 64);
        row
    }

    /// Pack a sequence of 0/1 values.
    pub fn from_bits(bits: &[u8]) -> Self {
        let mut row = Self::zero(bits.len());
        for (i, &b) in bits.iter().enumerate() {
            if b & 1 == 1 {
                row.words[i / 64] |= 1u64 << (i % 64);
            }
        }
        row
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Coefficient at `index` (0 or 1).
    pub fn get(&self, index: usize) -> u8 {
        ((self.words[index / 64] >> (index % 64)) & 1) as u8
    }

    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Index of the first non-zero coefficient.
    pub fn leading_one(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, &w)| i * 64 + w.trailing_zeros() as usize)
    }

    /// Row addition over GF(2).
    pub fn xor_assign(&mut self, other: &CoefficientRow) {
        debug_assert_eq!(self.len, other.len, "row length mismatch");
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a ^= *b;
        }
    }

    /// GF(2) inner product with a packed vector of the same length.
    pub fn dot(&self, other: &CoefficientRow) -> u8 {
        parity_of_and(&self.words, &other.words)
    }

    /// Number of non-zero coefficients.
    pub fn weight(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Unpack into one 0/1 value per coefficient.
    pub fn to_bits(&self) -> Vec<u8> {
        (0..self.len).map(|i| self.get(i)).collect()
    }
}

fn parity_of_and(a: &[u64], b: &[u64]) -> u8 {
    let ones: u32 = a.iter().zip(b).map(|(x, y)| (x & y).count_ones()).sum();
    (ones & 1) as u8
}

/// Generates coefficient rows for payloads of one fixed length.
///
/// Holds no secret: two parties who agree on the payload length produce
/// identical rows.
#[derive(Clone, Debug)]
pub struct RowGenerator {
    seed: [u8; 32],
    len: usize,
}

impl RowGenerator {
    pub fn new(payload_len: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ROW_DOMAIN);
        hasher.update((payload_len as u64).to_be_bytes());
        Self { seed: hasher.finalize().into(), len: payload_len }
    }

    pub fn payload_len(&self) -> usize {
        self.len
    }

    /// The coefficient row for an absolute keystream position.
    pub fn row(&self, position: u64) -> CoefficientRow {
        if position < self.len as u64 {
            return CoefficientRow::unit(self.len, position as usize);
        }

        let mut rng = ChaCha20Rng::from_seed(self.seed);
        rng.set_stream(position);

        let mut row = CoefficientRow::zero(self.len);
        for word in row.words.iter_mut() {
            let lo = rng.next_u32() as u64;
            let hi = rng.next_u32() as u64;
            *word = (hi << 32) | lo;
        }
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = row.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
        // A zero row carries no information; pin one coefficient instead.
        if row.is_zero() && self.len > 0 {
            let index = (position % self.len as u64) as usize;
            row.words[index / 64] |= 1u64 << (index % 64);
        }
        row
    }
}

/// Deterministic expansion of a payload into an unbounded bit stream.
///
/// Stateless apart from the payload captured at construction: every call is
/// a pure function of its arguments and safe to make from many threads.
#[derive(Clone)]
pub struct KeystreamCodec {
    payload: PayloadBits,
    packed: Zeroizing<Vec<u64>>,
    rows: RowGenerator,
}

impl KeystreamCodec {
    pub fn new(payload: PayloadBits) -> Self {
        let packed = Zeroizing::new(CoefficientRow::from_bits(payload.as_bits()).words);
        let rows = RowGenerator::new(payload.len());
        Self { payload, packed, rows }
    }

    /// Shorthand for `KeystreamCodec::new(PayloadBits::from_bit_str(s)?)`.
    pub fn from_bit_str(s: &str) -> Result<Self, WatermarkError> {
        Ok(Self::new(PayloadBits::from_bit_str(s)?))
    }

    pub fn payload(&self) -> &PayloadBits {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// The row generator shared with verifiers.
    pub fn rows(&self) -> &RowGenerator {
        &self.rows
    }

    /// The coding row for a single absolute position.
    pub fn coefficients(&self, position: u64) -> CoefficientRow {
        self.rows.row(position)
    }

    /// The keystream bit at an absolute position.
    pub fn bit_at(&self, position: u64) -> u8 {
        if position < self.payload.len() as u64 {
            return self.payload.as_bits()[position as usize];
        }
        let row = self.rows.row(position);
        parity_of_and(&row.words, &self.packed)
    }

    /// Exactly `length` bits starting at absolute position `start`.
    ///
    /// Slicing is associative: `stream(a, b + c)` equals `stream(a, b)`
    /// followed by `stream(a + b, c)`.
    ///
    /// # Errors
    /// [`WatermarkError::InvalidRange`] if `length` exceeds
    /// [`MAX_STREAM_REQUEST`] or `start + length` overflows.
    pub fn stream(&self, start: KeystreamCursor, length: usize) -> Result<Vec<u8>, WatermarkError> {
        let invalid = WatermarkError::InvalidRange { start, length: length as u64 };
        if length > MAX_STREAM_REQUEST {
            return Err(invalid);
        }
        let end = start.checked_add(length as u64).ok_or(invalid)?;
        Ok((start..end).map(|p| self.bit_at(p)).collect())
    }
}

impl core::fmt::Debug for KeystreamCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeystreamCodec").field("payload_len", &self.payload.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(bits: &str) -> KeystreamCodec {
        KeystreamCodec::from_bit_str(bits).unwrap()
    }

    #[test]
    fn systematic_prefix_is_payload() {
        let c = codec("1101");
        assert_eq!(c.stream(0, 4).unwrap(), vec![1, 1, 0, 1]);
    }

    #[test]
    fn deterministic() {
        let a = codec("10110011").stream(0, 200).unwrap();
        let b = codec("10110011").stream(0, 200).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_payloads_differ() {
        let a = codec("10110011").stream(8, 128).unwrap();
        let b = codec("10110010").stream(8, 128).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn slices_concatenate() {
        let c = codec("1101");
        let whole = c.stream(5, 70).unwrap();
        let mut parts = c.stream(5, 30).unwrap();
        parts.extend(c.stream(35, 40).unwrap());
        assert_eq!(whole, parts);
    }

    #[test]
    fn zero_length_stream() {
        assert!(codec("1").stream(123, 0).unwrap().is_empty());
    }

    #[test]
    fn overflowing_range_rejected() {
        let c = codec("1101");
        assert!(matches!(c.stream(u64::MAX, 2), Err(WatermarkError::InvalidRange { .. })));
        assert!(matches!(c.stream(0, MAX_STREAM_REQUEST + 1), Err(WatermarkError::InvalidRange { .. })));
    }

    #[test]
    fn bit_is_row_dot_payload() {
        let c = codec("1011001110001111010");
        let payload = CoefficientRow::from_bits(c.payload().as_bits());
        for p in 0..300u64 {
            assert_eq!(c.bit_at(p), c.coefficients(p).dot(&payload), "position {p}");
        }
    }

    #[test]
    fn rows_are_never_zero() {
        let rows = RowGenerator::new(3);
        for p in 0..500u64 {
            assert!(!rows.row(p).is_zero(), "zero row at {p}");
        }
    }

    #[test]
    fn rows_depend_only_on_length() {
        let a = codec("1111").coefficients(17);
        let b = codec("0001").coefficients(17);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn random_rows_span_multiple_words() {
        let rows = RowGenerator::new(130);
        let row = rows.row(1000);
        assert_eq!(row.len(), 130);
        // Bits past the declared length stay clear.
        assert_eq!(row.to_bits().len(), 130);
        assert!(row.weight() > 20 && row.weight() < 110, "weight {}", row.weight());
    }

    #[test]
    fn row_helpers() {
        let mut a = CoefficientRow::from_bits(&[0, 1, 1, 0]);
        assert_eq!(a.leading_one(), Some(1));
        a.xor_assign(&CoefficientRow::unit(4, 1));
        assert_eq!(a.to_bits(), vec![0, 0, 1, 0]);
        assert_eq!(a.leading_one(), Some(2));
        assert_eq!(CoefficientRow::zero(4).leading_one(), None);
    }
}

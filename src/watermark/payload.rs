// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Secret payload bits and the text-message frame.
//!
//! A payload is any non-empty bit sequence. Short literal payloads such as
//! `"1101"` are used as-is. Text messages are wrapped in a frame so that a
//! verifier who reconstructs the bits can tell a correct solve from noise:
//!
//! ```text
//! [2 bytes ] message length in bytes (big-endian u16)
//! [N bytes ] UTF-8 message
//! [4 bytes ] CRC-32 of everything above (big-endian)
//! ```
//!
//! Bytes are serialized MSB-first, so the frame for an `N`-byte message is
//! `48 + 8N` bits long.

use zeroize::Zeroizing;

use crate::watermark::error::WatermarkError;

/// Frame overhead in bits: length(16) + crc(32).
pub const FRAME_OVERHEAD_BITS: usize = 16 + 32;

/// Longest message (in bytes) the u16 length field can describe.
pub const MAX_MESSAGE_BYTES: usize = u16::MAX as usize;

/// The immutable secret bit sequence that seeds the keystream.
///
/// Bits are stored one per byte (0 or 1) and wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PayloadBits {
    bits: Zeroizing<Vec<u8>>,
}

impl PayloadBits {
    /// Wrap a sequence of 0/1 values.
    ///
    /// # Errors
    /// [`WatermarkError::InvalidPayload`] if `bits` is empty or holds a value
    /// other than 0 or 1.
    pub fn new(bits: Vec<u8>) -> Result<Self, WatermarkError> {
        let bits = Zeroizing::new(bits);
        if bits.is_empty() {
            return Err(WatermarkError::InvalidPayload("payload must contain at least one bit"));
        }
        if bits.iter().any(|&b| b > 1) {
            return Err(WatermarkError::InvalidPayload("payload bits must be 0 or 1"));
        }
        Ok(Self { bits })
    }

    /// Parse a bit string such as `"1101"`. Whitespace is ignored.
    pub fn from_bit_str(s: &str) -> Result<Self, WatermarkError> {
        let bits = parse_bit_string(s)
            .ok_or(WatermarkError::InvalidPayload("payload string must contain only 0 and 1"))?;
        Self::new(bits)
    }

    /// Build a framed payload carrying a text message.
    ///
    /// # Errors
    /// [`WatermarkError::InvalidPayload`] if the message exceeds
    /// [`MAX_MESSAGE_BYTES`].
    pub fn from_message(text: &str) -> Result<Self, WatermarkError> {
        let body = text.as_bytes();
        if body.len() > MAX_MESSAGE_BYTES {
            return Err(WatermarkError::InvalidPayload("message longer than 65535 bytes"));
        }

        let mut frame = Zeroizing::new(Vec::with_capacity(body.len() + 6));
        frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
        frame.extend_from_slice(body);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());

        Self::new(bytes_to_bits(&frame))
    }

    /// Payload length in bits for a framed message of `byte_len` bytes.
    ///
    /// Verifiers need this to size the linear system before they know the
    /// message itself.
    pub fn message_len_bits(byte_len: usize) -> usize {
        FRAME_OVERHEAD_BITS + 8 * byte_len
    }

    /// Interpret the bits as a message frame and return its text.
    ///
    /// # Errors
    /// - [`WatermarkError::FrameCorrupted`] if the length field or CRC does
    ///   not match.
    /// - [`WatermarkError::InvalidUtf8`] if the body is not UTF-8.
    pub fn to_message(&self) -> Result<String, WatermarkError> {
        if self.bits.len() % 8 != 0 || self.bits.len() < FRAME_OVERHEAD_BITS {
            return Err(WatermarkError::FrameCorrupted);
        }
        let frame = Zeroizing::new(bits_to_bytes(&self.bits));
        let body_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        if frame.len() != body_len + 6 {
            return Err(WatermarkError::FrameCorrupted);
        }

        let crc_at = 2 + body_len;
        let stored = u32::from_be_bytes([
            frame[crc_at],
            frame[crc_at + 1],
            frame[crc_at + 2],
            frame[crc_at + 3],
        ]);
        if crc32fast::hash(&frame[..crc_at]) != stored {
            return Err(WatermarkError::FrameCorrupted);
        }

        String::from_utf8(frame[2..crc_at].to_vec()).map_err(|_| WatermarkError::InvalidUtf8)
    }

    /// Number of payload bits.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Always `false`: construction rejects empty payloads.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// The bits, one per byte.
    pub fn as_bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn to_bit_string(&self) -> String {
        bits_to_string(&self.bits)
    }
}

impl core::fmt::Debug for PayloadBits {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print the secret itself.
        f.debug_struct("PayloadBits").field("len", &self.bits.len()).finish()
    }
}

/// Parse a string of `0`/`1` digits, skipping whitespace.
///
/// Returns `None` on any other character. An empty string parses to an
/// empty vector.
pub fn parse_bit_string(s: &str) -> Option<Vec<u8>> {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '0' => Some(0u8),
            '1' => Some(1u8),
            _ => None,
        })
        .collect()
}

/// Render bits as a string of `0`/`1` digits.
pub fn bits_to_string(bits: &[u8]) -> String {
    bits.iter().map(|&b| if b & 1 == 1 { '1' } else { '0' }).collect()
}

/// Expand bytes into bits, MSB first.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Pack bits (MSB first) into bytes. A trailing partial byte is zero-padded.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &b)| acc | ((b & 1) << (7 - i)))
        })
        .collect()
}

/// Serde adapter that writes a bit vector as a `"0101"` string.
pub mod bit_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bits: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::bits_to_string(bits))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_bit_string(&s)
            .ok_or_else(|| serde::de::Error::custom("expected a string of 0/1 digits"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_string_roundtrip() {
        let p = PayloadBits::from_bit_str("1101").unwrap();
        assert_eq!(p.as_bits(), &[1, 1, 0, 1]);
        assert_eq!(p.to_bit_string(), "1101");
        assert_eq!(p.len(), 4);
    }

    #[test]
    fn whitespace_ignored() {
        let p = PayloadBits::from_bit_str(" 10 01\n").unwrap();
        assert_eq!(p.as_bits(), &[1, 0, 0, 1]);
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(matches!(PayloadBits::new(vec![]), Err(WatermarkError::InvalidPayload(_))));
        assert!(matches!(PayloadBits::from_bit_str(""), Err(WatermarkError::InvalidPayload(_))));
    }

    #[test]
    fn non_binary_rejected() {
        assert!(matches!(PayloadBits::new(vec![0, 2]), Err(WatermarkError::InvalidPayload(_))));
        assert!(matches!(PayloadBits::from_bit_str("10a1"), Err(WatermarkError::InvalidPayload(_))));
    }

    #[test]
    fn message_frame_roundtrip() {
        let p = PayloadBits::from_message("hi agent").unwrap();
        assert_eq!(p.len(), PayloadBits::message_len_bits(8));
        assert_eq!(p.to_message().unwrap(), "hi agent");
    }

    #[test]
    fn empty_message_still_has_frame() {
        let p = PayloadBits::from_message("").unwrap();
        assert_eq!(p.len(), FRAME_OVERHEAD_BITS);
        assert_eq!(p.to_message().unwrap(), "");
    }

    #[test]
    fn corrupted_frame_detected() {
        let p = PayloadBits::from_message("watermark").unwrap();
        let mut bits = p.as_bits().to_vec();
        bits[20] ^= 1;
        let flipped = PayloadBits::new(bits).unwrap();
        assert_eq!(flipped.to_message(), Err(WatermarkError::FrameCorrupted));
    }

    #[test]
    fn short_bits_are_not_a_frame() {
        let p = PayloadBits::from_bit_str("1101").unwrap();
        assert_eq!(p.to_message(), Err(WatermarkError::FrameCorrupted));
    }

    #[test]
    fn byte_bit_conversion() {
        assert_eq!(bytes_to_bits(&[0b1010_0001]), vec![1, 0, 1, 0, 0, 0, 0, 1]);
        assert_eq!(bits_to_bytes(&[1, 0, 1, 0, 0, 0, 0, 1]), vec![0b1010_0001]);
        assert_eq!(bits_to_bytes(&[1, 1]), vec![0b1100_0000]);
    }

    #[test]
    fn debug_hides_bits() {
        let p = PayloadBits::from_bit_str("1101").unwrap();
        assert_eq!(format!("{p:?}"), "PayloadBits { len: 4 }");
    }
}

// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Engine configuration.
//!
//! Every field has a default, so `{}` is a valid configuration and a JSON
//! document only needs to name what it changes:
//!
//! ```text
//! {"sampler": {"max_bits": 4}, "fallback": {"mix_alpha": 0.5}}
//! ```

use serde::{Deserialize, Serialize};

use crate::watermark::error::WatermarkError;
use crate::watermark::fallback::FallbackPolicy;
use crate::watermark::keystream::MAX_STREAM_REQUEST;
use crate::watermark::sampler::SamplerConfig;

/// Default number of keystream bits fetched per decision.
pub const DEFAULT_KEYSTREAM_WINDOW: usize = 64;

/// Default idle time after which a stored session expires.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub fallback: FallbackPolicy,
    pub sampler: SamplerConfig,
    /// Bits fetched from the keystream for each decision: the consumed
    /// bits plus the look-ahead that fixes the within-cell offset.
    pub keystream_window: usize,
    pub session_ttl_secs: u64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::default(),
            sampler: SamplerConfig::default(),
            keystream_window: DEFAULT_KEYSTREAM_WINDOW,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl WatermarkConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, WatermarkError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| WatermarkError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WatermarkError> {
        self.fallback.validate()?;
        self.sampler.validate()?;
        if self.keystream_window < self.sampler.max_bits as usize {
            return Err(WatermarkError::InvalidConfig(format!(
                "keystream_window ({}) must be at least sampler.max_bits ({})",
                self.keystream_window, self.sampler.max_bits
            )));
        }
        if self.keystream_window > MAX_STREAM_REQUEST {
            return Err(WatermarkError::InvalidConfig(format!(
                "keystream_window ({}) must be at most {MAX_STREAM_REQUEST}",
                self.keystream_window
            )));
        }
        if self.session_ttl_secs == 0 {
            return Err(WatermarkError::InvalidConfig("session_ttl_secs must be positive".into()));
        }
        Ok(())
    }
}

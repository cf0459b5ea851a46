// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Per-agent watermarking sessions and an explicitly owned session table.
//!
//! The cursor and round counter are the only mutable state in the engine.
//! A [`WatermarkSession`] owns both and advances them after each step;
//! [`SessionStore`] is a plain keyed table the host passes to whatever
//! handles requests. There is no global registry.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::watermark::config::WatermarkConfig;
use crate::watermark::context::SamplingContext;
use crate::watermark::erasure::ObservedStep;
use crate::watermark::error::WatermarkError;
use crate::watermark::keystream::{KeystreamCodec, KeystreamCursor};
use crate::watermark::orchestrator::{EmbeddingResult, WatermarkOrchestrator};
use crate::watermark::payload::{bits_to_string, PayloadBits};

/// One agent trajectory embedding one payload.
#[derive(Debug)]
pub struct WatermarkSession {
    orchestrator: WatermarkOrchestrator,
    cursor: KeystreamCursor,
    round: u64,
    history: Vec<(SamplingContext, EmbeddingResult)>,
    created_at: Instant,
    last_active: Instant,
}

impl WatermarkSession {
    pub fn new(payload: PayloadBits, config: &WatermarkConfig) -> Result<Self, WatermarkError> {
        let orchestrator = WatermarkOrchestrator::new(KeystreamCodec::new(payload), config)?;
        let now = Instant::now();
        Ok(Self { orchestrator, cursor: 0, round: 0, history: Vec::new(), created_at: now, last_active: now })
    }

    /// Embed at the current cursor and round, then advance both.
    ///
    /// On error nothing advances.
    pub fn step<S: AsRef<str>>(
        &mut self,
        raw_output: &str,
        candidates: &[S],
        context_key: &str,
    ) -> Result<&EmbeddingResult, WatermarkError> {
        let context = SamplingContext::new(context_key, self.round);
        let result = self.orchestrator.encode(raw_output, candidates, &context, self.cursor)?;

        trace!(context = %context, cursor = self.cursor, bits = result.bits_count, "session step");
        let missing = WatermarkError::InvalidRange { start: result.cursor, length: result.bits_count as u64 };
        self.cursor = result.next_cursor();
        self.round += 1;
        self.last_active = Instant::now();
        self.history.push((context, result));

        self.history.last().map(|(_, last)| last).ok_or(missing)
    }

    pub fn orchestrator(&self) -> &WatermarkOrchestrator {
        &self.orchestrator
    }

    pub fn cursor(&self) -> KeystreamCursor {
        self.cursor
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn history(&self) -> &[(SamplingContext, EmbeddingResult)] {
        &self.history
    }

    /// Every step's consumed bits, in order.
    pub fn embedded_bits(&self) -> Vec<u8> {
        self.history.iter().flat_map(|(_, r)| r.bits.iter().copied()).collect()
    }

    pub fn embedded_bit_string(&self) -> String {
        bits_to_string(&self.embedded_bits())
    }

    /// The public record a verifier needs for erasure recovery.
    pub fn observed_steps(&self) -> Vec<ObservedStep> {
        self.history
            .iter()
            .map(|(context, r)| ObservedStep {
                distribution: r.distribution_used.clone(),
                chosen: r.chosen.clone(),
                context: context.clone(),
                cursor: r.cursor,
            })
            .collect()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }
}

/// Sessions by id, expiring after a period of inactivity.
#[derive(Debug)]
pub struct SessionStore {
    config: WatermarkConfig,
    ttl: Duration,
    sessions: HashMap<String, WatermarkSession>,
}

impl SessionStore {
    pub fn new(config: WatermarkConfig) -> Result<Self, WatermarkError> {
        config.validate()?;
        Ok(Self { ttl: Duration::from_secs(config.session_ttl_secs), config, sessions: HashMap::new() })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session, replacing any existing one with the same id.
    pub fn create(&mut self, id: impl Into<String>, payload: PayloadBits) -> Result<&mut WatermarkSession, WatermarkError> {
        let id = id.into();
        let session = WatermarkSession::new(payload, &self.config)?;
        debug!(session = %id, payload_len = session.orchestrator().codec().payload_len(), "session created");
        Ok(match self.sessions.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(session);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(session),
        })
    }

    pub fn get(&self, id: &str) -> Option<&WatermarkSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut WatermarkSession> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<WatermarkSession> {
        self.sessions.remove(id)
    }

    /// Drop sessions idle for longer than the TTL as of `now`. Returns how
    /// many were dropped.
    pub fn evict_expired_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now.saturating_duration_since(s.last_active) <= ttl);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.sessions.len(), "sessions expired");
        }
        evicted
    }

    pub fn evict_expired(&mut self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}

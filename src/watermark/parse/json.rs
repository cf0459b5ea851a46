// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Strict-JSON renderings: bare, fenced, and embedded in prose.

use serde_json::{Map, Value};

use super::ParseStrategy;

const FENCE: &str = "```";

/// Parse `text` as a JSON object.
pub(super) fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// The outermost `{ ... }` span: first opening brace to last closing brace.
pub(super) fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// The whole answer is one JSON object.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainJson;

impl ParseStrategy for PlainJson {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn extract(&self, raw: &str) -> Option<Map<String, Value>> {
        parse_object(raw)
    }
}

/// A JSON object inside a Markdown code fence, with or without a language
/// tag. The first fence that holds an object wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct FencedBlock;

impl ParseStrategy for FencedBlock {
    fn name(&self) -> &'static str {
        "fenced"
    }

    fn extract(&self, raw: &str) -> Option<Map<String, Value>> {
        let mut rest = raw;
        while let Some(open) = rest.find(FENCE) {
            let after_open = &rest[open + FENCE.len()..];
            // Skip the language tag line (e.g. "json").
            let body_start = match after_open.find('\n') {
                Some(i) if !after_open[..i].contains('{') => i + 1,
                _ => 0,
            };
            let body = &after_open[body_start..];
            let close = body.find(FENCE)?;
            let inner = &body[..close];
            if let Some(map) = parse_object(inner).or_else(|| outer_braces(inner).and_then(parse_object)) {
                return Some(map);
            }
            rest = &body[close + FENCE.len()..];
        }
        None
    }
}

/// A JSON object surrounded by other text.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedObject;

impl ParseStrategy for EmbeddedObject {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn extract(&self, raw: &str) -> Option<Map<String, Value>> {
        outer_braces(raw).and_then(parse_object)
    }
}

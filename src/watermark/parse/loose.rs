// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Loosely quoted dictionaries, as printed by Python's `str(dict)`.
//!
//! The rewrite is a single left-to-right pass:
//! - single-quoted strings become double-quoted (inner `"` escaped,
//!   `\'` unescaped),
//! - bare `True` / `False` / `None` become `true` / `false` / `null`,
//! - trailing commas before `}` or `]` are dropped.
//!
//! Everything else is copied through, so the result is only valid JSON if
//! the input was "almost JSON". `serde_json` has the final word.

use serde_json::{Map, Value};

use super::json::{outer_braces, parse_object};
use super::ParseStrategy;

/// A dictionary rendered with single quotes and Python literals.
#[derive(Clone, Copy, Debug, Default)]
pub struct LooseDict;

impl ParseStrategy for LooseDict {
    fn name(&self) -> &'static str {
        "loose"
    }

    fn extract(&self, raw: &str) -> Option<Map<String, Value>> {
        let span = outer_braces(raw)?;
        parse_object(&loose_to_json(span))
    }
}

/// Rewrite a Python-style literal into JSON text.
pub fn loose_to_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Copy the string literal opening at `chars[start]` as a double-quoted
/// JSON string. Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let next = chars[i + 1];
            if next == '\'' {
                out.push('\'');
            } else {
                out.push('\\');
                out.push(next);
            }
            i += 2;
            continue;
        }
        if c == quote {
            out.push('"');
            return i + 1;
        }
        if c == '"' {
            out.push_str("\\\"");
        } else {
            out.push(c);
        }
        i += 1;
    }
    // Unterminated: close it so the parser reports a clean failure.
    out.push('"');
    i
}

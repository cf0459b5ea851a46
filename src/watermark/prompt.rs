// Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only
// https://github.com/cgaffga/phasmcore

//! Chat-prompt helpers that ask the model to self-report a distribution.

use serde::{Deserialize, Serialize};

/// Instruction appended to the system prompt.
pub const SCORING_INSTRUCTION: &str = "\
Before acting, score every candidate action. Reply with a single JSON object and nothing else:
{\"action_weights\": {\"<candidate>\": <probability>, ...}, \"action\": \"<your top choice>\", \
\"action_args\": {\"<candidate>\": {<arguments>}, ...}, \"thought\": \"<one short sentence>\"}
Give every candidate a strictly positive weight. Weights should reflect how likely you would \
be to pick each action; they do not need to sum to 1.";

/// Added when no candidate list is supplied.
pub const PROPOSE_CANDIDATES: &str = "\
If no candidate actions are listed, first propose a reasonable set of candidates and give each \
one a probability in action_weights.";

const CANDIDATE_HEADER: &str = "Candidate actions:";

/// An OpenAI-style chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

fn append_line(message: &mut ChatMessage, text: &str) {
    if !message.content.is_empty() {
        message.content.push('\n');
    }
    message.content.push_str(text);
}

/// Rewrite a conversation so the model answers with a scored distribution.
///
/// The instruction goes onto the first system message (one is inserted at
/// the front if there is none). Candidates are listed at the end of the
/// last user message, or in a new user message. Without candidates the
/// model is asked to propose its own.
pub fn inject_instruction<S: AsRef<str>>(messages: &[ChatMessage], candidates: &[S]) -> Vec<ChatMessage> {
    let mut out = messages.to_vec();

    let system = match out.iter().position(|m| m.role == "system") {
        Some(i) => i,
        None => {
            out.insert(0, ChatMessage::system(""));
            0
        }
    };
    append_line(&mut out[system], SCORING_INSTRUCTION);

    if candidates.is_empty() {
        append_line(&mut out[system], PROPOSE_CANDIDATES);
        return out;
    }

    let mut listing = String::from(CANDIDATE_HEADER);
    for c in candidates {
        listing.push_str("\n- ");
        listing.push_str(c.as_ref());
    }
    match out.iter().rposition(|m| m.role == "user") {
        Some(i) => append_line(&mut out[i], &listing),
        None => out.push(ChatMessage::user(listing)),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_to_existing_messages() {
        let msgs = vec![
            ChatMessage::system("You are a cook."),
            ChatMessage::user("What's for dinner?"),
            ChatMessage::new("assistant", "Let me think."),
            ChatMessage::user("Decide now."),
        ];
        let out = inject_instruction(&msgs, &["煮面", "不吃"]);
        assert_eq!(out.len(), 4);
        assert!(out[0].content.starts_with("You are a cook.\n"));
        assert!(out[0].content.contains("action_weights"));
        assert_eq!(out[1], msgs[1]);
        assert!(out[3].content.ends_with("Candidate actions:\n- 煮面\n- 不吃"));
    }

    #[test]
    fn inserts_missing_messages() {
        let out = inject_instruction(&[], &["A"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, "system");
        assert_eq!(out[0].content, SCORING_INSTRUCTION);
        assert_eq!(out[1], ChatMessage::user("Candidate actions:\n- A"));
    }

    #[test]
    fn no_candidates_asks_for_proposals() {
        let none: [&str; 0] = [];
        let out = inject_instruction(&[ChatMessage::user("hi")], &none);
        assert_eq!(out[0].role, "system");
        assert!(out[0].content.ends_with(PROPOSE_CANDIDATES));
        assert_eq!(out[1].content, "hi");
    }
}

//! Tool Extraction and Execution
//!
//! Scans generated text for tool-call markers and applies their side
//! effects. There is no real search or memory backend; the result
//! strings are informational, folded back into the stream of thought.

use std::collections::VecDeque;

use chrono::Utc;
use colored::Colorize;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::logging::SessionLog;
use crate::types::{GuardNotice, PendingMessage, ToolCall, ToolHistoryEntry, ToolKind};

/// Maximum entries kept for repetition detection.
const HISTORY_CAPACITY: usize = 20;

/// History entries store at most this many characters of content.
const HISTORY_CONTENT_CHARS: usize = 50;

/// Consecutive same-kind calls that trip the repetition guard.
const REPEAT_WINDOW: usize = 3;

/// Thought cycles tools stay disabled for after the guard trips.
const COOLDOWN_CYCLES: u64 = 5;

/// Guidance returned by the guard under `GuardNotice::Guidance`.
pub const GUARD_GUIDANCE: &str = "[Rest a moment and carry the thought on in plain words]";

// ─── Extraction ──────────────────────────────────────────────────

/// Scan `text` for tool-call markers and return the structured calls.
///
/// Two grammars are applied over the same text, bracketed form first:
///   1. `[TOOL:name:content]`
///   2. fenced code blocks holding a JSON object with a `name` field
///      and an `arguments` mapping; the first argument value in
///      insertion order is the content, empty when there are none.
///
/// Extraction is best-effort: malformed blocks are skipped silently,
/// matches are not deduplicated, and the text itself is never modified
/// -- the raw markers stay visible in context.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    if let Ok(re) = Regex::new(r"\[TOOL:(\w+):([^\]]+)\]") {
        for cap in re.captures_iter(text) {
            let name = cap[1].to_string();
            calls.push(ToolCall {
                kind: ToolKind::from_name(&name),
                name,
                content: cap[2].to_string(),
                result: String::new(),
            });
        }
    }

    if let Ok(re) = Regex::new(r"(?s)```(?:[a-zA-Z]*\n)?\s*(\{.*?\})\s*```") {
        for cap in re.captures_iter(text) {
            if let Some(call) = parse_structured_block(&cap[1]) {
                calls.push(call);
            }
        }
    }

    calls
}

/// Parse one fenced JSON block. Returns `None` on any shape mismatch.
fn parse_structured_block(raw: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let name = value.get("name")?.as_str()?.to_string();

    let content = value
        .get("arguments")
        .and_then(|args| args.as_object())
        .and_then(|map| map.values().next())
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .unwrap_or_default();

    Some(ToolCall {
        kind: ToolKind::from_name(&name),
        name,
        content,
        result: String::new(),
    })
}

// ─── Execution ───────────────────────────────────────────────────

/// Applies tool effects, enforces the anti-repetition cooldown, and
/// records executed calls. Internal errors never escape this boundary;
/// they degrade to a neutral result string.
pub struct ToolExecutor {
    history: VecDeque<ToolHistoryEntry>,
    pending_messages: Vec<PendingMessage>,
    /// Tools stay disabled while the current sequence number is at or
    /// below this marker.
    cooldown_until: u64,
    guard_notice: GuardNotice,
}

impl ToolExecutor {
    pub fn new(guard_notice: GuardNotice) -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            pending_messages: Vec::new(),
            cooldown_until: 0,
            guard_notice,
        }
    }

    /// Whether tools are suppressed for the cycle numbered `thought`.
    /// The window is inclusive: a guard tripped at thought 4 covers
    /// thoughts 5 through 9.
    pub fn cooldown_active(&self, thought: u64) -> bool {
        thought <= self.cooldown_until
    }

    pub fn cooldown_until(&self) -> u64 {
        self.cooldown_until
    }

    pub fn history(&self) -> &VecDeque<ToolHistoryEntry> {
        &self.history
    }

    /// Messages produced by the `message` tool, oldest first. The
    /// external UI consumes these; the core never reads them back.
    pub fn pending_messages(&self) -> &[PendingMessage] {
        &self.pending_messages
    }

    /// Execute one call at sequence number `thought` and return the
    /// informational result string.
    pub fn execute(
        &mut self,
        call: &ToolCall,
        thought: u64,
        context_chars: usize,
        log: &SessionLog,
    ) -> String {
        // Three identical kinds in a row: pause tools instead of running.
        let recent: Vec<ToolKind> = self
            .history
            .iter()
            .rev()
            .take(REPEAT_WINDOW)
            .map(|h| h.kind)
            .collect();
        if recent.len() >= REPEAT_WINDOW && recent.iter().all(|k| *k == call.kind) {
            self.cooldown_until = thought + COOLDOWN_CYCLES;
            return match self.guard_notice {
                GuardNotice::Guidance => GUARD_GUIDANCE.to_string(),
                GuardNotice::Silent => String::new(),
            };
        }

        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(ToolHistoryEntry {
            kind: call.kind,
            content: truncate_chars(&call.content, HISTORY_CONTENT_CHARS),
            thought,
        });

        match call.kind {
            ToolKind::Search => {
                self.log_entry(
                    log,
                    "search_request",
                    &call.content,
                    thought,
                    context_chars,
                    Some(serde_json::json!({ "query": call.content, "thought": thought })),
                );
                println!(
                    "{}",
                    format!("  [search] {}", truncate_chars(&call.content, 60)).yellow()
                );
                format!("[Search complete: '{}'] Unfold the results below.", call.content)
            }
            ToolKind::Message => {
                self.pending_messages.push(PendingMessage {
                    content: call.content.clone(),
                    time: Utc::now().to_rfc3339(),
                });
                self.log_entry(log, "message", &call.content, thought, context_chars, None);
                println!(
                    "{}",
                    format!("  [message] {}", truncate_chars(&call.content, 80)).magenta()
                );
                "[Delivered]".to_string()
            }
            ToolKind::Remember => {
                self.log_entry(
                    log,
                    "remember",
                    &call.content,
                    thought,
                    context_chars,
                    Some(serde_json::json!({ "thought": thought })),
                );
                println!(
                    "{}",
                    format!("  [remember] {}", truncate_chars(&call.content, 60)).cyan()
                );
                format!(
                    "[Memory archive reached] Past memories touching '{}' have surfaced. \
                     Gather what you recall and continue.",
                    call.content
                )
            }
            ToolKind::Feel => {
                self.log_entry(log, "feel", &call.content, thought, context_chars, None);
                "[Felt]".to_string()
            }
            ToolKind::Unknown => {
                self.log_entry(
                    log,
                    "unknown_tool",
                    &call.content,
                    thought,
                    context_chars,
                    Some(serde_json::json!({ "name": call.name })),
                );
                "[Unrecognized]".to_string()
            }
        }
    }

    /// Log write that cannot fail past this boundary.
    fn log_entry(
        &self,
        log: &SessionLog,
        kind: &str,
        content: &str,
        n: u64,
        context_chars: usize,
        meta: Option<Value>,
    ) {
        if let Err(err) = log.write(kind, content, n, context_chars, meta) {
            warn!("Tool log write failed: {}", err);
        }
    }
}

/// Char-safe prefix truncation.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

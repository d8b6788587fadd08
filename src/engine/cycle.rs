//! The Thought Cycle
//!
//! One autonomous cycle: build the prompt from the accumulated
//! context, generate a continuation, fold any tool results back in,
//! record the thought, and run the compression check. The dialog path
//! lives here too since it shares the same state and commit rules.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use colored::Colorize;
use tracing::{debug, info, warn};

use crate::engine::context::ContextManager;
use crate::engine::tools::{extract_tool_calls, truncate_chars, ToolExecutor};
use crate::engine::NO_RESPONSE;
use crate::logging::SessionLog;
use crate::types::{
    CompletionClient, EngineStatus, LoopConfig, PendingMessage, ThoughtRecord, DIALOG_SAMPLING,
    THOUGHT_SAMPLING,
};

/// In-memory thought records kept for display.
const THOUGHT_LOG_CAPACITY: usize = 100;

/// Read-side view published by the worker after every cycle. Readers
/// only ever see a complete snapshot, never mid-cycle state.
#[derive(Clone, Debug, Default)]
pub struct SharedSnapshot {
    pub status: EngineStatus,
    pub recent_thoughts: Vec<ThoughtRecord>,
    pub pending_messages: Vec<PendingMessage>,
}

/// All mutable engine state. Owned exclusively by the worker task;
/// nothing here needs its own lock.
pub struct EngineState {
    pub client: Arc<dyn CompletionClient>,
    pub context: ContextManager,
    pub tools: ToolExecutor,
    pub log: SessionLog,
    pub thoughts: u64,
    pub total_tokens: u64,
    pub total_thought_secs: f64,
    pub thought_log: VecDeque<ThoughtRecord>,
    pub started: Instant,
    pub snapshot: Arc<Mutex<SharedSnapshot>>,
}

impl EngineState {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        config: &LoopConfig,
        seed: String,
        preamble: String,
        log: SessionLog,
        snapshot: Arc<Mutex<SharedSnapshot>>,
    ) -> Self {
        Self {
            client,
            context: ContextManager::new(
                seed,
                preamble,
                config.compress_at_chars,
                config.max_context_chars,
            ),
            tools: ToolExecutor::new(config.guard_notice),
            log,
            thoughts: 0,
            total_tokens: 0,
            total_thought_secs: 0.0,
            thought_log: VecDeque::with_capacity(THOUGHT_LOG_CAPACITY),
            started: Instant::now(),
            snapshot,
        }
    }

    /// Publish the current state for readers.
    pub fn publish_snapshot(&self, thinking: bool) {
        let avg = if self.thoughts > 0 {
            self.total_thought_secs / self.thoughts as f64
        } else {
            0.0
        };
        let snapshot = SharedSnapshot {
            status: EngineStatus {
                uptime_secs: self.started.elapsed().as_secs(),
                thoughts: self.thoughts,
                compressions: self.context.compressions(),
                context_chars: self.context.size(),
                total_tokens: self.total_tokens,
                avg_thought_sec: avg,
                thinking,
                model: self.client.model_name().unwrap_or_default(),
            },
            recent_thoughts: self.thought_log.iter().cloned().collect(),
            pending_messages: self.tools.pending_messages().to_vec(),
        };
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

/// Run one autonomous thought cycle.
///
/// An empty generation is a silent no-op. Non-empty output has its
/// tool markers extracted and executed, then goes into context
/// unmodified.
pub async fn think_once(state: &mut EngineState) -> Result<()> {
    state.publish_snapshot(true);

    // During a cooldown the tool definitions are hidden from the prompt
    // to discourage new markers; the buffer itself is untouched.
    let n = state.thoughts + 1;
    let prompt = if state.tools.cooldown_active(n) {
        debug!("Tool cooldown active until thought {}", state.tools.cooldown_until());
        state.context.text_without_preamble()
    } else {
        state.context.text().to_string()
    };

    let start = Instant::now();
    let completion = match state.client.generate(&prompt, THOUGHT_SAMPLING).await {
        Ok(completion) => completion,
        Err(err) => {
            state.publish_snapshot(false);
            return Err(err);
        }
    };
    let elapsed = start.elapsed().as_secs_f64();

    let text = completion.text.trim().to_string();
    if text.is_empty() {
        debug!("Empty generation, skipping cycle");
        state.publish_snapshot(false);
        return Ok(());
    }

    state.thoughts = n;
    state.total_tokens += completion.tokens;
    state.total_thought_secs += elapsed;
    let tokens_per_sec = if elapsed > 0.0 {
        completion.tokens as f64 / elapsed
    } else {
        0.0
    };

    // Tools run against the context as it stood before this thought.
    // Results are informational only; nothing is fed back into context.
    let mut tool_names = Vec::new();
    for call in extract_tool_calls(&text) {
        let result = state
            .tools
            .execute(&call, n, state.context.size(), &state.log);
        if !result.is_empty() {
            println!("  {} {} {}", call.name.dimmed(), "->".dimmed(), result.dimmed());
        }
        tool_names.push(call.name);
    }

    // The raw text goes into context unmodified, markers included.
    state.context.append(&text);

    println!(
        "\n{}",
        thought_banner(n, elapsed, tokens_per_sec, state.context.size()).dimmed()
    );
    println!("{}", truncate_chars(&text, 300).cyan());
    info!(
        "Thought #{}: {} tokens in {:.1}s ({:.1} tok/s), context {} chars",
        n,
        completion.tokens,
        elapsed,
        tokens_per_sec,
        state.context.size()
    );

    if state.thought_log.len() >= THOUGHT_LOG_CAPACITY {
        state.thought_log.pop_front();
    }
    state.thought_log.push_back(ThoughtRecord {
        n,
        content: text.clone(),
        duration_sec: elapsed,
        tokens: completion.tokens,
        tokens_per_sec,
        tool_calls: tool_names.clone(),
    });

    if let Err(err) = state.log.write(
        "thought",
        &text,
        n,
        state.context.size(),
        Some(serde_json::json!({
            "durationSec": elapsed,
            "tokens": completion.tokens,
            "tokensPerSec": tokens_per_sec,
            "toolCalls": tool_names,
        })),
    ) {
        warn!("Thought log write failed: {}", err);
    }

    state
        .context
        .maybe_compress(&*state.client, &state.log, n)
        .await;

    state.publish_snapshot(false);
    Ok(())
}

/// Divider line printed above each thought.
fn thought_banner(n: u64, elapsed: f64, tokens_per_sec: f64, context_chars: usize) -> String {
    format!(
        "\u{2501}\u{2501}\u{2501} #{} [{:.1}s {:.0}tok/s ctx:{}] \u{2501}\u{2501}\u{2501}",
        n, elapsed, tokens_per_sec, context_chars
    )
}

/// Answer a human interruption and fold the exchange into context.
///
/// Generation failure yields the no-response sentinel; the worker and
/// its context stay intact either way.
pub async fn respond_to_human(state: &mut EngineState, message: &str) -> String {
    if let Err(err) = state.log.write(
        "human_input",
        message,
        state.thoughts,
        state.context.size(),
        None,
    ) {
        warn!("Human input log write failed: {}", err);
    }

    let injection = format!("\n\n[Human voice]: {}\n\n[Reply]:\n", message);
    let prompt = format!("{}{}", state.context.text(), injection);

    let reply = match state.client.generate(&prompt, DIALOG_SAMPLING).await {
        Ok(completion) => {
            state.total_tokens += completion.tokens;
            let text = completion.text.trim().to_string();
            if text.is_empty() {
                NO_RESPONSE.to_string()
            } else {
                text
            }
        }
        Err(err) => {
            warn!("Dialog generation failed: {:#}", err);
            NO_RESPONSE.to_string()
        }
    };

    if reply != NO_RESPONSE {
        state.context.append(&format!("{}{}", injection, reply));
    }

    if let Err(err) = state.log.write(
        "dialog",
        &reply,
        state.thoughts,
        state.context.size(),
        Some(serde_json::json!({ "human": message })),
    ) {
        warn!("Dialog log write failed: {}", err);
    }
    if let Err(err) = state
        .log
        .write_dialog(message, &reply, state.thoughts, state.context.size())
    {
        warn!("Dialog file write failed: {}", err);
    }

    state
        .context
        .maybe_compress(&*state.client, &state.log, state.thoughts)
        .await;

    state.publish_snapshot(false);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Completion, GuardNotice, SamplingParams};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Returns canned replies in order, then errors.
    struct ScriptedClient {
        replies: Vec<String>,
        cursor: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: replies.into_iter().map(String::from).collect(),
                cursor: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn generate(&self, _prompt: &str, _params: SamplingParams) -> Result<Completion> {
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(i) {
                Some(text) => Ok(Completion {
                    text: text.clone(),
                    tokens: 5,
                }),
                None => bail!("script exhausted"),
            }
        }

        async fn check_connection(&self) -> Result<String> {
            Ok("scripted".to_string())
        }

        fn model_name(&self) -> Option<String> {
            Some("scripted".to_string())
        }
    }

    fn test_state(client: ScriptedClient) -> EngineState {
        let dir = std::env::temp_dir().join(format!("autoloop_cycle_test_{}", Uuid::new_v4()));
        let log = SessionLog::new(&dir.to_string_lossy()).unwrap();
        let config = LoopConfig {
            compress_at_chars: 75_000,
            max_context_chars: 90_000,
            guard_notice: GuardNotice::Guidance,
            ..LoopConfig::default()
        };
        EngineState::new(
            Arc::new(client),
            &config,
            "PRE\nseed".to_string(),
            "PRE\n".to_string(),
            log,
            Arc::new(Mutex::new(SharedSnapshot::default())),
        )
    }

    #[tokio::test]
    async fn test_think_once_appends_thought_and_counts() {
        let mut state = test_state(ScriptedClient::new(vec!["a quiet thought"]));
        think_once(&mut state).await.unwrap();

        assert_eq!(state.thoughts, 1);
        assert_eq!(state.total_tokens, 5);
        assert!(state.context.text().contains("a quiet thought"));
        assert_eq!(state.thought_log.len(), 1);
        assert_eq!(state.thought_log[0].n, 1);
    }

    #[tokio::test]
    async fn test_empty_generation_is_a_no_op() {
        let mut state = test_state(ScriptedClient::new(vec!["   "]));
        let before = state.context.size();
        think_once(&mut state).await.unwrap();

        assert_eq!(state.thoughts, 0);
        assert_eq!(state.context.size(), before);
        assert!(state.thought_log.is_empty());
    }

    #[tokio::test]
    async fn test_generation_error_propagates_to_cycle_boundary() {
        let mut state = test_state(ScriptedClient::new(vec![]));
        assert!(think_once(&mut state).await.is_err());
        assert_eq!(state.thoughts, 0);
        // The busy flag must not survive a failed cycle.
        assert!(!state.snapshot.lock().unwrap().status.thinking);
    }

    #[tokio::test]
    async fn test_tool_log_records_pre_thought_context_size() {
        let mut state = test_state(ScriptedClient::new(vec![
            "I wonder. [TOOL:search:old rivers]",
        ]));
        let before = state.context.size();
        think_once(&mut state).await.unwrap();

        let contents = std::fs::read_to_string(state.log.log_file()).unwrap();
        let record: serde_json::Value = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .find(|r: &serde_json::Value| r["kind"] == "search_request")
            .unwrap();
        assert_eq!(record["contextChars"], before as u64);
    }

    #[test]
    fn test_thought_banner_format() {
        let banner = thought_banner(3, 1.24, 10.6, 4500);
        assert_eq!(banner, "\u{2501}\u{2501}\u{2501} #3 [1.2s 11tok/s ctx:4500] \u{2501}\u{2501}\u{2501}");
    }

    #[tokio::test]
    async fn test_tool_markers_stay_in_context_results_do_not() {
        let mut state = test_state(ScriptedClient::new(vec![
            "I wonder. [TOOL:search:old rivers]",
        ]));
        think_once(&mut state).await.unwrap();

        assert!(state.context.text().contains("[TOOL:search:old rivers]"));
        assert!(!state.context.text().contains("[Search complete"));
        assert_eq!(state.thought_log[0].tool_calls, vec!["search"]);
        assert_eq!(state.tools.history().len(), 1);
    }

    #[tokio::test]
    async fn test_respond_to_human_commits_exchange() {
        let mut state = test_state(ScriptedClient::new(vec!["hello there"]));
        let reply = respond_to_human(&mut state, "who are you?").await;

        assert_eq!(reply, "hello there");
        assert!(state.context.text().contains("[Human voice]: who are you?"));
        assert!(state.context.text().contains("hello there"));
    }

    #[tokio::test]
    async fn test_respond_to_human_failure_returns_sentinel() {
        let mut state = test_state(ScriptedClient::new(vec![]));
        let before = state.context.size();
        let reply = respond_to_human(&mut state, "anyone home?").await;

        assert_eq!(reply, NO_RESPONSE);
        // Failed exchanges are not committed to context.
        assert_eq!(state.context.size(), before);
    }

    #[tokio::test]
    async fn test_snapshot_published_after_cycle() {
        let mut state = test_state(ScriptedClient::new(vec!["a thought"]));
        think_once(&mut state).await.unwrap();

        let snapshot = state.snapshot.lock().unwrap().clone();
        assert_eq!(snapshot.status.thoughts, 1);
        assert!(!snapshot.status.thinking);
        assert_eq!(snapshot.status.model, "scripted");
        assert_eq!(snapshot.recent_thoughts.len(), 1);
    }
}

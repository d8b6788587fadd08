//! Context Accumulation and Compression
//!
//! The context is one growing string. Every generated thought, tool
//! result, and dialog exchange is appended; when it exceeds the
//! configured threshold, the trailing slice is summarized by the model
//! and the buffer restarts from the preamble plus a core memory line.

use tracing::{info, warn};

use crate::logging::SessionLog;
use crate::types::{CompletionClient, COMPRESS_SAMPLING};

/// Trailing characters fed to the summarizer at compression time.
const COMPRESS_SOURCE_CHARS: usize = 2_000;

/// Prefix of the carried-over summary line.
const MEMORY_MARKER: &str = "[core memory]";

const COMPRESS_INSTRUCTION: &str =
    "From the stream of thought above, extract only the core insights \
     and the questions still open. Do not conclude. Do not summarize \
     what was resolved. Write in first person.";

pub struct ContextManager {
    buffer: String,
    /// Tool definitions carried verbatim across compressions.
    preamble: String,
    compress_at_chars: usize,
    max_context_chars: usize,
    compressions: u64,
}

impl ContextManager {
    pub fn new(
        seed: String,
        preamble: String,
        compress_at_chars: usize,
        max_context_chars: usize,
    ) -> Self {
        Self {
            buffer: seed,
            preamble,
            compress_at_chars,
            max_context_chars,
            compressions: 0,
        }
    }

    /// Append `text` plus a newline separator, then enforce the hard
    /// size cap by dropping the oldest characters.
    pub fn append(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.buffer.push('\n');
        if self.size() > self.max_context_chars {
            self.buffer = tail_chars(&self.buffer, self.max_context_chars);
        }
    }

    /// Context size in characters, not bytes.
    pub fn size(&self) -> usize {
        self.buffer.chars().count()
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// The buffer with the tool-definition preamble stripped. Used as
    /// the prompt while a tool cooldown is active.
    pub fn text_without_preamble(&self) -> String {
        self.buffer.replace(&self.preamble, "")
    }

    pub fn replace(&mut self, text: String) {
        self.buffer = text;
    }

    pub fn compressions(&self) -> u64 {
        self.compressions
    }

    /// Compress the context if it has crossed the threshold. Returns
    /// whether a compression cycle ran.
    ///
    /// Either way the cycle counts and the buffer shrinks: on model
    /// failure the fallback is a plain tail truncation to the
    /// threshold, so a dead summarizer cannot stall the loop.
    pub async fn maybe_compress(
        &mut self,
        client: &dyn CompletionClient,
        log: &SessionLog,
        thought: u64,
    ) -> bool {
        if self.size() <= self.compress_at_chars {
            return false;
        }

        let before = self.size();
        self.compressions += 1;

        let source = tail_chars(&self.buffer, COMPRESS_SOURCE_CHARS);
        let prompt = format!("{}\n\n{}\n\nSummary:", source, COMPRESS_INSTRUCTION);

        let summary = match client.generate(&prompt, COMPRESS_SAMPLING).await {
            Ok(completion) => {
                let summary = completion.text.trim().to_string();
                self.buffer = format!("{}\n{}: {}\n\n", self.preamble, MEMORY_MARKER, summary);
                summary
            }
            Err(err) => {
                warn!("Compression generation failed, truncating instead: {:#}", err);
                self.buffer = tail_chars(&self.buffer, self.compress_at_chars);
                String::new()
            }
        };

        let after = self.size();
        info!(
            "Context compressed: {} -> {} chars (compression #{})",
            before, after, self.compressions
        );
        if let Err(err) = log.write(
            "compress",
            &summary,
            thought,
            after,
            Some(serde_json::json!({
                "before": before,
                "after": after,
                "n": self.compressions,
            })),
        ) {
            warn!("Compression log write failed: {}", err);
        }

        true
    }
}

/// Last `max` characters of `s`, char-safe.
fn tail_chars(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        s.to_string()
    } else {
        s.chars().skip(len - max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Completion, SamplingParams};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct StubClient {
        reply: Option<String>,
    }

    #[async_trait]
    impl CompletionClient for StubClient {
        async fn generate(&self, _prompt: &str, _params: SamplingParams) -> Result<Completion> {
            match &self.reply {
                Some(text) => Ok(Completion {
                    text: text.clone(),
                    tokens: 10,
                }),
                None => bail!("stub offline"),
            }
        }

        async fn check_connection(&self) -> Result<String> {
            Ok("stub".to_string())
        }

        fn model_name(&self) -> Option<String> {
            Some("stub".to_string())
        }
    }

    fn test_log() -> SessionLog {
        let dir = std::env::temp_dir().join(format!("autoloop_ctx_test_{}", Uuid::new_v4()));
        SessionLog::new(&dir.to_string_lossy()).unwrap()
    }

    fn manager(threshold: usize, cap: usize) -> ContextManager {
        ContextManager::new(
            "PRE\nseed".to_string(),
            "PRE\n".to_string(),
            threshold,
            cap,
        )
    }

    #[test]
    fn test_append_adds_newline_separator() {
        let mut ctx = manager(1000, 2000);
        let start = ctx.size();
        ctx.append("hello");
        assert_eq!(ctx.size(), start + 6);
        assert!(ctx.text().ends_with("hello\n"));
    }

    #[test]
    fn test_append_enforces_hard_cap() {
        let mut ctx = manager(1000, 100);
        ctx.append(&"x".repeat(500));
        assert_eq!(ctx.size(), 100);
    }

    #[test]
    fn test_size_counts_chars_not_bytes() {
        let mut ctx = ContextManager::new(String::new(), String::new(), 1000, 2000);
        ctx.append("héllo");
        assert_eq!(ctx.size(), 6);
    }

    #[test]
    fn test_text_without_preamble_strips_tool_definitions() {
        let ctx = manager(1000, 2000);
        assert_eq!(ctx.text_without_preamble(), "seed");
    }

    #[tokio::test]
    async fn test_no_compression_below_threshold() {
        let log = test_log();
        let client = StubClient { reply: None };
        let mut ctx = manager(1000, 2000);
        ctx.append("short");
        assert!(!ctx.maybe_compress(&client, &log, 1).await);
        assert_eq!(ctx.compressions(), 0);
    }

    #[tokio::test]
    async fn test_compression_restarts_from_preamble_and_summary() {
        let log = test_log();
        let client = StubClient {
            reply: Some("I thought about rivers.".to_string()),
        };
        let mut ctx = manager(50, 10_000);
        ctx.append(&"a".repeat(200));

        assert!(ctx.maybe_compress(&client, &log, 5).await);
        assert_eq!(ctx.compressions(), 1);
        assert!(ctx.text().starts_with("PRE\n"));
        assert!(ctx.text().contains("[core memory]: I thought about rivers."));
        assert!(ctx.size() < 200);
    }

    #[tokio::test]
    async fn test_compression_failure_falls_back_to_truncation() {
        let log = test_log();
        let client = StubClient { reply: None };
        let mut ctx = manager(50, 10_000);
        ctx.append(&"b".repeat(200));

        assert!(ctx.maybe_compress(&client, &log, 5).await);
        // Counts even when the model is down.
        assert_eq!(ctx.compressions(), 1);
        assert_eq!(ctx.size(), 50);
    }
}

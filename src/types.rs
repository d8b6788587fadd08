//! Autoloop - Type Definitions
//!
//! All shared types for the self-feeding thought engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Configuration ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopConfig {
    /// Base URL of the OpenAI-compatible completion server.
    pub api_url: String,
    /// Directory for the append-only session and dialog logs.
    pub log_dir: String,
    /// Buffer size (chars) that triggers a compression pass.
    pub compress_at_chars: usize,
    /// Hard cap (chars) the buffer may never exceed.
    pub max_context_chars: usize,
    /// Port the external control UI listens on. Not consumed by the core.
    pub port: u16,
    /// Whether the external UI should open a browser on launch.
    pub open_browser: bool,
    pub log_level: LogLevel,
    pub guard_notice: GuardNotice,
    /// Seed text the context buffer starts from. Falls back to the
    /// built-in seed when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_text: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        default_config()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Policy for what the repetition guard hands back when it suppresses
/// a tool call. The two ancestral implementations disagreed, so this is
/// a configuration parameter rather than a constant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardNotice {
    /// Return a short guidance string steering back to plain language.
    Guidance,
    /// Return an empty string.
    Silent,
}

/// Returns a `LoopConfig` with the stock defaults. Callers override
/// individual fields from the config file or CLI flags.
pub fn default_config() -> LoopConfig {
    LoopConfig {
        api_url: "http://localhost:1234".to_string(),
        log_dir: "~/.autoloop/log".to_string(),
        compress_at_chars: 75_000,
        max_context_chars: 90_000,
        port: 7860,
        open_browser: false,
        log_level: LogLevel::Info,
        guard_notice: GuardNotice::Guidance,
        seed_text: None,
    }
}

// ─── Generation ──────────────────────────────────────────────────

/// One generation result: whitespace-trimmed text plus the completion
/// token count reported by the server (0 when unavailable).
#[derive(Clone, Debug)]
pub struct Completion {
    pub text: String,
    pub tokens: u64,
}

/// Sampling parameters for a single generation call.
#[derive(Clone, Copy, Debug)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Fixed sampling for autonomous thought steps.
pub const THOUGHT_SAMPLING: SamplingParams = SamplingParams {
    max_tokens: 256,
    temperature: 0.85,
};

/// Fixed sampling for direct replies to the human. Bigger budget,
/// lower temperature than background thought.
pub const DIALOG_SAMPLING: SamplingParams = SamplingParams {
    max_tokens: 512,
    temperature: 0.7,
};

/// Fixed sampling for context compression passes.
pub const COMPRESS_SAMPLING: SamplingParams = SamplingParams {
    max_tokens: 300,
    temperature: 0.5,
};

/// Client for the external completion endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a continuation of `prompt`.
    async fn generate(&self, prompt: &str, params: SamplingParams)
        -> anyhow::Result<Completion>;

    /// Verify the server is reachable and a model is loaded.
    /// Returns the model identifier on success.
    async fn check_connection(&self) -> anyhow::Result<String>;

    /// The model identifier learned from the last successful
    /// connection check, if any.
    fn model_name(&self) -> Option<String>;
}

// ─── Tools ───────────────────────────────────────────────────────

/// The closed set of tool kinds the engine understands. Names that do
/// not match map to `Unknown` rather than falling through.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Search,
    Message,
    Remember,
    Feel,
    Unknown,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "search" => ToolKind::Search,
            "message" => ToolKind::Message,
            "remember" => ToolKind::Remember,
            "feel" => ToolKind::Feel,
            _ => ToolKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Search => "search",
            ToolKind::Message => "message",
            ToolKind::Remember => "remember",
            ToolKind::Feel => "feel",
            ToolKind::Unknown => "unknown",
        }
    }
}

/// A tool invocation extracted from generated text. Produced and
/// consumed within one thought cycle.
#[derive(Clone, Debug)]
pub struct ToolCall {
    pub kind: ToolKind,
    /// Raw tool name as written in the text (kept for unknown kinds).
    pub name: String,
    pub content: String,
    /// Result string, filled in by the executor.
    pub result: String,
}

/// One entry in the bounded repetition-detection history. Not a replay
/// log; only the last few entries are ever consulted.
#[derive(Clone, Debug)]
pub struct ToolHistoryEntry {
    pub kind: ToolKind,
    pub content: String,
    pub thought: u64,
}

/// An outbound human-directed message produced by the `message` tool.
/// Consumed by the external UI, never by the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub content: String,
    pub time: String,
}

// ─── Thought log ─────────────────────────────────────────────────

/// One completed thought cycle. The full history lives in the session
/// log file; in memory only the last 100 are kept for display.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtRecord {
    pub n: u64,
    pub content: String,
    pub duration_sec: f64,
    pub tokens: u64,
    pub tokens_per_sec: f64,
    /// Names of the tools invoked during this cycle.
    pub tool_calls: Vec<String>,
}

// ─── Status ──────────────────────────────────────────────────────

/// Snapshot of the engine's current state, safe to read at any time.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub uptime_secs: u64,
    pub thoughts: u64,
    pub compressions: u64,
    pub context_chars: usize,
    pub total_tokens: u64,
    pub avg_thought_sec: f64,
    pub thinking: bool,
    pub model: String,
}

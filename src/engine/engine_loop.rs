//! Engine Worker Loop
//!
//! Runs the perpetual thought loop on a single background tokio task.
//! The worker owns all mutable state; callers talk to it over a
//! command channel and read from a published snapshot, so there is no
//! shared mutation to coordinate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::resolve_path;
use crate::engine::cycle::{respond_to_human, think_once, EngineState, SharedSnapshot};
use crate::engine::NO_RESPONSE;
use crate::logging::SessionLog;
use crate::types::{CompletionClient, EngineStatus, LoopConfig, PendingMessage, ThoughtRecord};

/// How long an interrupt waits for its reply before giving up.
const SPEAK_TIMEOUT: Duration = Duration::from_secs(180);

/// How long the idle worker waits for a command between cycles.
const COMMAND_POLL: Duration = Duration::from_millis(10);

/// Pause after a failed cycle before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Commands serviced by the worker between thought cycles.
enum Command {
    Speak {
        text: String,
        reply: oneshot::Sender<String>,
    },
}

/// Handle to the engine. Owns the worker task; reads go through the
/// published snapshot and never block on a running cycle.
pub struct Engine {
    client: Arc<dyn CompletionClient>,
    config: LoopConfig,
    running: Arc<AtomicBool>,
    commands: Option<mpsc::Sender<Command>>,
    worker_handle: Option<JoinHandle<()>>,
    snapshot: Arc<Mutex<SharedSnapshot>>,
}

impl Engine {
    pub fn new(client: Arc<dyn CompletionClient>, config: LoopConfig) -> Self {
        Self {
            client,
            config,
            running: Arc::new(AtomicBool::new(false)),
            commands: None,
            worker_handle: None,
            snapshot: Arc::new(Mutex::new(SharedSnapshot::default())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Verify the generation server, open the session logs, and spawn
    /// the worker. An unreachable server is fatal here; after start,
    /// generation failures only back off.
    pub async fn start(&mut self, seed: String, preamble: String) -> Result<()> {
        if self.is_running() {
            warn!("Engine is already running");
            return Ok(());
        }

        let model = self
            .client
            .check_connection()
            .await
            .with_context(|| format!("Cannot reach generation server at {}", self.config.api_url))?;
        info!("Connected to generation server, model: {}", model);

        let log = SessionLog::new(&resolve_path(&self.config.log_dir))?;
        log.write(
            "session_start",
            &seed,
            0,
            seed.chars().count(),
            Some(serde_json::json!({ "model": model })),
        )?;
        info!("Session {} logging to {}", log.session_id(), log.log_file().display());

        let (tx, rx) = mpsc::channel(8);
        self.commands = Some(tx);
        self.running.store(true, Ordering::SeqCst);

        let state = EngineState::new(
            Arc::clone(&self.client),
            &self.config,
            seed,
            preamble,
            log,
            Arc::clone(&self.snapshot),
        );
        let running = Arc::clone(&self.running);
        self.worker_handle = Some(tokio::spawn(run_worker(state, rx, running)));

        Ok(())
    }

    /// Stop the worker and wait for the in-flight cycle to finish.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        // Closing the channel wakes an idle worker immediately.
        self.commands = None;

        if let Some(handle) = self.worker_handle.take() {
            if let Err(err) = handle.await {
                error!("Worker task panicked: {}", err);
            }
        }

        let status = self.status();
        info!(
            "Engine stopped after {}s and {} thoughts",
            status.uptime_secs, status.thoughts
        );
    }

    /// Send a human message to the worker and wait for the reply.
    ///
    /// Returns the no-response sentinel when the engine is stopped,
    /// the worker is gone, or the reply does not arrive in time. The
    /// wait covers at most one in-flight thought cycle; interrupts are
    /// serviced before the next one begins.
    pub async fn speak(&self, message: &str) -> String {
        let tx = match &self.commands {
            Some(tx) => tx.clone(),
            None => return NO_RESPONSE.to_string(),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::Speak {
            text: message.to_string(),
            reply: reply_tx,
        };
        if tx.send(command).await.is_err() {
            return NO_RESPONSE.to_string();
        }

        match timeout(SPEAK_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => NO_RESPONSE.to_string(),
            Err(_) => {
                warn!("Reply did not arrive within {}s", SPEAK_TIMEOUT.as_secs());
                NO_RESPONSE.to_string()
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.snapshot.lock().unwrap().status.clone()
    }

    /// Last `limit` completed thoughts, oldest first.
    pub fn recent_thoughts(&self, limit: usize) -> Vec<ThoughtRecord> {
        let snapshot = self.snapshot.lock().unwrap();
        let skip = snapshot.recent_thoughts.len().saturating_sub(limit);
        snapshot.recent_thoughts[skip..].to_vec()
    }

    pub fn pending_messages(&self) -> Vec<PendingMessage> {
        self.snapshot.lock().unwrap().pending_messages.clone()
    }
}

/// The worker: service pending commands first, then run one thought
/// cycle, forever. A closed command channel means shutdown.
async fn run_worker(
    mut state: EngineState,
    mut commands: mpsc::Receiver<Command>,
    running: Arc<AtomicBool>,
) {
    info!("Engine worker started");

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match timeout(COMMAND_POLL, commands.recv()).await {
            Ok(Some(Command::Speak { text, reply })) => {
                let response = respond_to_human(&mut state, &text).await;
                // The caller may have timed out already.
                let _ = reply.send(response);
                continue;
            }
            Ok(None) => break,
            Err(_) => {}
        }

        let cycle_result: Result<()> = think_once(&mut state).await;
        if let Err(err) = cycle_result {
            error!("Thought cycle failed: {:#}", err);
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }

    state.publish_snapshot(false);
    info!("Engine worker stopped after {} thoughts", state.thoughts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Completion, SamplingParams};
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Always answers with the same text.
    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn generate(&self, _prompt: &str, _params: SamplingParams) -> Result<Completion> {
            Ok(Completion {
                text: "a steady thought".to_string(),
                tokens: 3,
            })
        }

        async fn check_connection(&self) -> Result<String> {
            Ok("echo".to_string())
        }

        fn model_name(&self) -> Option<String> {
            Some("echo".to_string())
        }
    }

    /// Never reachable.
    struct OfflineClient;

    #[async_trait]
    impl CompletionClient for OfflineClient {
        async fn generate(&self, _prompt: &str, _params: SamplingParams) -> Result<Completion> {
            anyhow::bail!("offline")
        }

        async fn check_connection(&self) -> Result<String> {
            anyhow::bail!("offline")
        }

        fn model_name(&self) -> Option<String> {
            None
        }
    }

    fn test_config() -> LoopConfig {
        let dir = std::env::temp_dir().join(format!("autoloop_engine_test_{}", Uuid::new_v4()));
        LoopConfig {
            log_dir: dir.to_string_lossy().into_owned(),
            ..LoopConfig::default()
        }
    }

    #[tokio::test]
    async fn test_speak_round_trip() {
        let mut engine = Engine::new(Arc::new(EchoClient), test_config());
        engine
            .start("PRE\nseed".to_string(), "PRE\n".to_string())
            .await
            .unwrap();

        let reply = engine.speak("hello?").await;
        assert_eq!(reply, "a steady thought");

        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_session_start_record_carries_seed() {
        let config = test_config();
        let log_dir = config.log_dir.clone();
        let mut engine = Engine::new(Arc::new(EchoClient), config);
        engine
            .start("PRE\nseed".to_string(), "PRE\n".to_string())
            .await
            .unwrap();
        engine.stop().await;

        let session_file = std::fs::read_dir(&log_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with("session_"))
                    .unwrap_or(false)
            })
            .unwrap();
        let contents = std::fs::read_to_string(session_file).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first["kind"], "session_start");
        assert_eq!(first["content"], "PRE\nseed");
        assert_eq!(first["contextChars"], 8);
    }

    #[tokio::test]
    async fn test_speak_on_stopped_engine_returns_sentinel() {
        let engine = Engine::new(Arc::new(EchoClient), test_config());
        assert_eq!(engine.speak("anyone?").await, NO_RESPONSE);
    }

    #[tokio::test]
    async fn test_start_fails_when_server_unreachable() {
        let mut engine = Engine::new(Arc::new(OfflineClient), test_config());
        let result = engine
            .start("seed".to_string(), String::new())
            .await;
        assert!(result.is_err());
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_status_is_idempotent() {
        let mut engine = Engine::new(Arc::new(EchoClient), test_config());
        engine
            .start("PRE\nseed".to_string(), "PRE\n".to_string())
            .await
            .unwrap();

        // Let at least one cycle complete.
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop().await;

        let first = engine.status();
        let second = engine.status();
        assert_eq!(first.thoughts, second.thoughts);
        assert_eq!(first.total_tokens, second.total_tokens);
        assert!(first.thoughts >= 1);
        assert_eq!(first.model, "echo");
    }

    #[tokio::test]
    async fn test_recent_thoughts_tail_limited() {
        let mut engine = Engine::new(Arc::new(EchoClient), test_config());
        engine
            .start("PRE\nseed".to_string(), "PRE\n".to_string())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop().await;

        let all = engine.recent_thoughts(100);
        let tail = engine.recent_thoughts(1);
        assert!(!all.is_empty());
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].n, all.last().unwrap().n);
    }
}

//! Autoloop Runtime
//!
//! The entry point for the perpetual thought loop.
//! Handles CLI args, config, and the operator console that sits on
//! top of the running engine.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::Input;
use tokio::signal;

use autoloop::config::{get_config_path, load_config, save_config};
use autoloop::engine::seed::{default_seed, TOOL_DEFINITIONS};
use autoloop::engine::Engine;
use autoloop::generate::HttpCompletionClient;
use autoloop::types::{default_config, LogLevel, LoopConfig};

const VERSION: &str = "0.1.0";

/// Autoloop -- Perpetual Self-Feeding Thought Loop
#[derive(Parser, Debug)]
#[command(
    name = "autoloop",
    version = VERSION,
    about = "Autoloop -- Perpetual Self-Feeding Thought Loop",
    long_about = "Runs an endless text-generation loop against a local \
                  OpenAI-compatible server. The model's output is fed back \
                  as its own input; you can interrupt it and talk to it."
)]
struct Cli {
    /// Start the loop and drop into the operator console
    #[arg(long)]
    run: bool,

    /// Write the default config file and exit
    #[arg(long)]
    init: bool,

    /// Show the stored configuration
    #[arg(long)]
    status: bool,

    /// Generation server URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// UI port stored in config for external frontends
    #[arg(long)]
    port: Option<u16>,

    /// Ask external frontends to open a browser on start
    #[arg(long)]
    browser: bool,

    /// Log directory (overrides config)
    #[arg(long)]
    log_dir: Option<String>,

    /// Seed text file replacing the built-in seed
    #[arg(long)]
    seed: Option<String>,
}

// ---- Status Command ---------------------------------------------------------

/// Display the stored configuration.
fn show_status() {
    let config_path = get_config_path();
    if !config_path.exists() {
        println!("Autoloop is not configured. Run: autoloop --init");
        return;
    }

    let config = match load_config() {
        Some(c) => c,
        None => {
            eprintln!("Failed to read config at {}", config_path.display());
            return;
        }
    };

    println!(
        r#"
=== AUTOLOOP STATUS ===
Config:     {}
API URL:    {}
Log dir:    {}
Compress:   {} chars
Hard cap:   {} chars
Port:       {}
Log level:  {:?}
=======================
"#,
        config_path.display(),
        config.api_url,
        config.log_dir,
        config.compress_at_chars,
        config.max_context_chars,
        config.port,
        config.log_level,
    );
}

// ---- Main Run ---------------------------------------------------------------

/// Resolve the effective config: stored file if present, defaults
/// otherwise, CLI flags on top.
fn effective_config(cli: &Cli) -> LoopConfig {
    let mut config = load_config().unwrap_or_else(default_config);
    if let Some(ref url) = cli.url {
        config.api_url = url.clone();
    }
    if let Some(ref dir) = cli.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.browser {
        config.open_browser = true;
    }
    if let Some(ref path) = cli.seed {
        match fs::read_to_string(path) {
            Ok(text) => config.seed_text = Some(text),
            Err(e) => eprintln!("Failed to read seed file {}: {}", path, e),
        }
    }
    config
}

/// Start the engine and hand the terminal to the operator console.
async fn run(config: LoopConfig) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    println!("[{}] Autoloop v{} starting...", now, VERSION);

    let client = Arc::new(HttpCompletionClient::new(&config.api_url));
    let mut engine = Engine::new(client, config.clone());

    let seed = match config.seed_text {
        Some(ref text) => format!("{}\n---\n\n{}", TOOL_DEFINITIONS, text),
        None => default_seed(),
    };
    engine
        .start(seed, TOOL_DEFINITIONS.to_string())
        .await
        .context("Failed to start engine")?;

    println!(
        "{}",
        "The loop is running. Type to speak, /status for stats, /quit to stop.".dimmed()
    );

    // Handle graceful shutdown
    let shutdown = async {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    println!("\nReceived SIGINT, shutting down...");
                }
                _ = sigterm.recv() => {
                    println!("\nReceived SIGTERM, shutting down...");
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to register Ctrl+C handler");
            println!("\nReceived shutdown signal...");
        }
    };

    tokio::select! {
        _ = shutdown => {}
        _ = console_loop(&engine) => {}
    }

    engine.stop().await;
    let status = engine.status();
    println!(
        "Stopped after {}s, {} thoughts, {} tokens.",
        status.uptime_secs, status.thoughts, status.total_tokens
    );

    Ok(())
}

/// The operator console. Plain text becomes a spoken interruption;
/// slash commands query or stop the engine.
async fn console_loop(engine: &Engine) {
    loop {
        // dialoguer blocks on stdin; keep it off the async runtime.
        let input = tokio::task::spawn_blocking(|| {
            Input::<String>::new()
                .with_prompt(format!("{}", "you".cyan()))
                .allow_empty(true)
                .interact_text()
        })
        .await;

        let line = match input {
            Ok(Ok(line)) => line.trim().to_string(),
            _ => break,
        };

        match line.as_str() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/status" => {
                let s = engine.status();
                println!(
                    "  up {}s | {} thoughts ({:.1}s avg) | {} compressions | {} chars | {} tokens | model {}",
                    s.uptime_secs,
                    s.thoughts,
                    s.avg_thought_sec,
                    s.compressions,
                    s.context_chars,
                    s.total_tokens,
                    s.model,
                );
            }
            _ => {
                println!("{}", "  ...".dimmed());
                let reply = engine.speak(&line).await;
                println!("{} {}", "loop".green(), reply);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = effective_config(&cli);

    // Initialize tracing. RUST_LOG overrides the config level.
    let level = match config.log_level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    if cli.status {
        show_status();
        return Ok(());
    }

    if cli.init {
        save_config(&config).context("Failed to write config")?;
        println!("Config written to {}", get_config_path().display());
        return Ok(());
    }

    if cli.run {
        return run(config).await;
    }

    println!("Usage: autoloop --run | --status | --init  (see --help)");
    Ok(())
}

//! Quill CLI - terminal chat REPL
//!
//! Drives one local chat session and consumes its event channel in a
//! single printing loop (the session's "main" execution context). Ships
//! with the scripted mock backend so the whole pipeline runs without
//! model weights; a real engine slots in behind the same
//! `InferenceBackend` seam.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use quill_core::backend::mock::MockBackend;
use quill_core::{ModelParams, SessionEvent, SessionManager};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing_subscriber::EnvFilter;

/// Quill - local LLM chat session REPL
#[derive(Parser)]
#[command(name = "quill-cli", version, about)]
struct Args {
    /// Model weights to load on startup. A placeholder file is created
    /// for the built-in mock backend when omitted.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Session config file (TOML, camelCase keys).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit session events as JSON lines instead of rendered text.
    #[arg(long)]
    json: bool,

    /// Route <think> segments into the visible reply as well.
    #[arg(long)]
    show_thinking: bool,
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

fn print_prompt() {
    print!("> ");
    flush_stdout();
}

/// Canned reply pieces for the mock backend: stream the user's own words
/// back so the increment/think plumbing is visible.
fn scripted_reply(line: &str) -> Vec<String> {
    let mut pieces = vec!["(mock) ".to_string()];
    for word in line.split_whitespace() {
        pieces.push(format!("{} ", word));
    }
    pieces
}

fn print_event(event: SessionEvent) -> bool {
    match event {
        SessionEvent::LoadFinished { success: true } => {
            println!("model loaded");
            print_prompt();
        }
        SessionEvent::LoadFinished { success: false } => {
            eprintln!("model load failed");
        }
        SessionEvent::Thinking { text } => {
            // Think text in gray, inline.
            print!("\x1b[90m{}\x1b[0m", text);
            flush_stdout();
        }
        SessionEvent::Message { text } => {
            // Increments are cumulative: rewrite the line.
            print!("\r\x1b[2K{}", text);
            flush_stdout();
        }
        SessionEvent::MessageComplete { .. } => {
            println!();
            print_prompt();
        }
        SessionEvent::SendError { reason } => {
            eprintln!("send failed: {}", reason);
            print_prompt();
        }
        SessionEvent::Fatal { reason } => {
            eprintln!("session closed: {}", reason);
            return false;
        }
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    let params: ModelParams = match args.config.as_deref() {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&text).context("parsing session config")?
        }
        None => ModelParams::default(),
    };

    let model_path = match args.model {
        Some(path) => path,
        None => {
            // The mock backend only checks that the file exists.
            let path = std::env::temp_dir().join("quill-mock-model.gguf");
            std::fs::write(&path, b"mock weights").context("creating mock model file")?;
            path
        }
    };

    let backend = Arc::new(MockBackend::new());
    let (manager, rx) = SessionManager::new(backend.clone());
    manager.set_show_thinking(args.show_thinking);

    let json = args.json;
    let printer = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("failed to serialize event: {}", e),
                }
                continue;
            }
            if !print_event(event) {
                break;
            }
        }
    });

    manager
        .load(&model_path, params)
        .context("scheduling model load")?;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match line.as_str() {
            ":quit" | ":q" => break,
            ":close" => {
                if let Err(e) = manager.close() {
                    eprintln!("close failed: {}", e);
                }
            }
            _ if line.starts_with(":load ") => {
                let path = line.trim_start_matches(":load ").trim().to_string();
                if let Err(e) = manager.load(path, ModelParams::default()) {
                    eprintln!("load failed: {}", e);
                }
            }
            _ => {
                backend.push_reply(scripted_reply(&line));
                if let Err(e) = manager.send_message(&line) {
                    eprintln!("send failed: {}", e);
                }
            }
        }
    }

    printer.abort();
    Ok(())
}

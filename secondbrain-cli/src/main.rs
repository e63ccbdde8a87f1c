//! secondbrain-cli: talk to a running SecondBrain server from the terminal
//!
//! # Subcommands
//! - `chat <message> [--verbose]`: ask a question or tell it something,
//!   the answer is printed as it streams in
//! - `status`: show server health

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "secondbrain-cli",
    version,
    about = "Chat with your SecondBrain knowledge base"
)]
struct Cli {
    /// SecondBrain HTTP server URL (overrides SECONDBRAIN_HTTP_URL env var)
    #[arg(long, env = "SECONDBRAIN_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one message and print the streamed answer
    Chat {
        /// Message text (multiple words are joined with spaces)
        #[arg(required = true)]
        message: Vec<String>,

        /// Also print tool calls and tool results
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show SecondBrain server status
    Status,
}

// ============================================================================
// Stream parsing
// ============================================================================

/// Split one data-stream line into its type code and JSON payload.
pub fn parse_line(line: &str) -> Option<(char, Value)> {
    let (code, payload) = line.split_once(':')?;
    let mut chars = code.chars();
    let code = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    serde_json::from_str(payload).ok().map(|v| (code, v))
}

/// What a part prints, if anything.
#[derive(Debug, PartialEq)]
pub enum Rendered {
    Text(String),
    Detail(String),
    Error(String),
}

pub fn render_part(code: char, payload: &Value, verbose: bool) -> Option<Rendered> {
    match code {
        '0' => payload.as_str().map(|s| Rendered::Text(s.to_string())),
        '3' => Some(Rendered::Error(
            payload.as_str().unwrap_or("unknown error").to_string(),
        )),
        '9' if verbose => Some(Rendered::Detail(format!(
            "→ {}({})",
            payload["toolName"].as_str().unwrap_or("?"),
            payload["args"]
        ))),
        'a' if verbose => Some(Rendered::Detail(format!("← {}", payload["result"]))),
        _ => None,
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// Post one user message and print the answer as it streams.
fn do_chat(server: &str, message: &str, verbose: bool) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let url = format!("{}/api/chat", server);
    let body = serde_json::json!({
        "messages": [{ "role": "user", "content": message }],
    });

    let resp = match client.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("secondbrain-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("secondbrain-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let mut stdout = std::io::stdout();
    let mut failed = false;
    for line in BufReader::new(resp).lines() {
        let line = line?;
        let Some((code, payload)) = parse_line(&line) else {
            continue;
        };
        match render_part(code, &payload, verbose) {
            Some(Rendered::Text(text)) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            Some(Rendered::Detail(detail)) => eprintln!("{}", detail),
            Some(Rendered::Error(message)) => {
                eprintln!("\nsecondbrain-cli: {}", message);
                failed = true;
            }
            None => {}
        }
    }
    println!();

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);

    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: Value = r.json().unwrap_or_default();
            let store = &body["store"];
            println!("SecondBrain server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:            {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:              {}", store["backend"].as_str().unwrap_or("?"));
            if let Some(pg) = store["postgresql"].as_str() {
                println!("PostgreSQL:         {}", pg);
            }
            if let Some(v) = store["pgvector"].as_str() {
                println!("pgvector:           {}", v);
            }
        }
        Ok(r) => {
            eprintln!("secondbrain-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("secondbrain-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat { message, verbose } => do_chat(&server, &message.join(" "), verbose),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("secondbrain-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

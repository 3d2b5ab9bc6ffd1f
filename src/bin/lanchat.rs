//! LanChat Binary
//!
//! Hosts or joins a LAN chat and wires it to the console.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lanchat::{ChatNode, Config, ConsoleTerminal, Framing, Terminal, DEFAULT_PORT};
use tracing_subscriber::{fmt, EnvFilter};

/// LanChat
#[derive(Parser, Debug)]
#[command(name = "lanchat")]
#[command(about = "Minimal peer-to-peer LAN text chat")]
#[command(version)]
struct Args {
    /// Display name (prompted for when omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Chat port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Message framing: line, length or raw
    #[arg(short, long, default_value = "line")]
    framing: Framing,

    /// Host or join; prompted for when omitted
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Host the chat on this machine
    Host,

    /// Join a chat hosted elsewhere
    Join {
        /// Host IP address (optionally ip:port)
        address: String,
    },
}

fn main() {
    // Logs on stderr so they stay out of the chat on stdout
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lanchat=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut input = io::stdin().lock();

    let name = match args.name {
        Some(name) => name,
        None => ask(&mut input, "Enter your name: ").unwrap_or_default(),
    };

    let mode = match args.mode {
        Some(mode) => Some(mode),
        None => ask_mode(&mut input),
    };

    let config = Config::builder()
        .username(if name.is_empty() { "anonymous".to_string() } else { name })
        .port(args.port)
        .framing(args.framing)
        .build();

    tracing::info!("LanChat v{} ({} framing)", lanchat::VERSION, config.framing);

    let terminal: Arc<dyn Terminal> = Arc::new(ConsoleTerminal::new());
    let node = match mode {
        Some(Mode::Host) => ChatNode::host(config, terminal),
        Some(Mode::Join { address }) => ChatNode::join(config, &address, terminal),
        None => ChatNode::detached(config, terminal),
    };

    let node = match node {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = node.run_dispatcher(input) {
        tracing::error!("Input error: {}", e);
    }

    node.shutdown();
    tracing::info!("Bye");
}

/// Prompt and read one trimmed line; `None` on EOF or read error
fn ask<R: BufRead>(input: &mut R, prompt: &str) -> Option<String> {
    print!("{}", prompt);
    let _ = io::stdout().flush();

    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

fn ask_mode<R: BufRead>(input: &mut R) -> Option<Mode> {
    let host = ask(input, "Do you want to host the chat? (y/n): ")?;
    if host.eq_ignore_ascii_case("y") {
        return Some(Mode::Host);
    }

    let address = ask(input, "Enter the IP address to connect to: ")?;
    if address.is_empty() {
        None
    } else {
        Some(Mode::Join { address })
    }
}

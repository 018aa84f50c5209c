//! meshchat CLI
//!
//! Command-line client for meshchat nodes.
//!
//! ## Usage
//!
//! ```bash
//! # Send one line and exit
//! meshchat send --username alice "hello everyone"
//!
//! # Check that a node answers
//! meshchat ping
//!
//! # Interactive session, falling back between two nodes
//! meshchat --server 127.0.0.1:9001 --server 127.0.0.1:9002 connect --username alice
//!
//! # Print a default node config to start from
//! meshchat config > node.json
//! ```

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshchat_core::{ChatClient, ChatError, Inbound, Message, MessageKind, NodeConfig};
use tokio::io::AsyncBufReadExt;

/// Pause between reconnection rounds in interactive mode.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// meshchat - talk to a multi-node chat mesh
#[derive(Parser)]
#[command(name = "meshchat")]
#[command(version = "0.1.0")]
#[command(about = "meshchat - talk to a multi-node chat mesh")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Node client address, tried in order (repeatable)
    #[arg(
        short,
        long = "server",
        value_name = "HOST:PORT",
        global = true,
        default_value = "127.0.0.1:9001"
    )]
    servers: Vec<String>,

    /// Connect and reply timeout in milliseconds
    #[arg(short, long, global = true, default_value_t = 2000)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one chat line and exit
    Send {
        /// Name to join as
        #[arg(short, long, default_value = "anon")]
        username: String,

        /// Text to send (words are joined with spaces)
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Ping a node and report the round trip
    Ping {
        /// Name to join as
        #[arg(short, long, default_value = "anon")]
        username: String,
    },

    /// Interactive chat: lines from stdin are sent, incoming lines printed
    Connect {
        /// Name to join as
        #[arg(short, long, default_value = "anon")]
        username: String,

        /// Give up instead of reconnecting when the node goes away
        #[arg(long)]
        no_reconnect: bool,
    },

    /// Print the default node configuration as JSON
    Config,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// One line of output for an incoming message.
fn render(msg: &Message) -> String {
    match msg.kind {
        MessageKind::Chat => format!("[{}] {}: {}", msg.clock_time(), msg.username, msg.text),
        _ => format!("[{}] * {}", msg.clock_time(), msg.text),
    }
}

async fn connect(servers: &[String], username: &str, timeout: Duration) -> Result<ChatClient> {
    let client = ChatClient::connect(servers, username, timeout).await?;
    tracing::info!(server = %client.server(), username, "Connected");
    Ok(client)
}

async fn cmd_send(servers: &[String], username: &str, text: &str, timeout: Duration) -> Result<()> {
    let mut client = connect(servers, username, timeout).await?;
    client.send_chat(text).await?;
    println!("Sent to {}", client.server());
    Ok(())
}

async fn cmd_ping(servers: &[String], username: &str, timeout: Duration) -> Result<()> {
    let mut client = connect(servers, username, timeout).await?;
    let started = Instant::now();
    let reply = client
        .ping(timeout)
        .await
        .with_context(|| format!("no ping reply from {}", client.server()))?;
    let elapsed = started.elapsed();

    match reply.originating_node {
        Some(node) => println!(
            "{} from {} (node {}) in {:.1}ms",
            reply.text,
            client.server(),
            node,
            elapsed.as_secs_f64() * 1000.0
        ),
        None => println!(
            "{} from {} in {:.1}ms",
            reply.text,
            client.server(),
            elapsed.as_secs_f64() * 1000.0
        ),
    }
    Ok(())
}

/// How an interactive session on one connection ended.
enum SessionEnd {
    /// Stdin closed or the user typed /quit
    Quit,
    /// The node went away
    Lost,
}

async fn cmd_connect(
    servers: &[String],
    username: &str,
    timeout: Duration,
    reconnect: bool,
) -> Result<()> {
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        let mut client = match ChatClient::connect(servers, username, timeout).await {
            Ok(client) => client,
            Err(e @ ChatError::NoServerReachable(_)) if reconnect => {
                eprintln!("{}; retrying...", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        eprintln!(
            "Connected to {} as {}. Type /quit to leave.",
            client.server(),
            username
        );

        match run_session(&mut client, &mut stdin).await? {
            SessionEnd::Quit => return Ok(()),
            SessionEnd::Lost if reconnect => {
                eprintln!("Connection to {} lost, reconnecting...", client.server());
            }
            SessionEnd::Lost => {
                anyhow::bail!("connection to {} lost", client.server());
            }
        }
    }
}

async fn run_session<R>(
    client: &mut ChatClient,
    stdin: &mut tokio::io::Lines<R>,
) -> Result<SessionEnd>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    return Ok(SessionEnd::Quit);
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    return Ok(SessionEnd::Quit);
                }
                let sent = if line == "/ping" {
                    let ping = Message::ping(client.username());
                    client.send(ping).await
                } else {
                    client.send_chat(line).await
                };
                if let Err(e) = sent {
                    tracing::debug!(error = %e, "Send failed");
                    return Ok(SessionEnd::Lost);
                }
            }
            inbound = client.recv(None) => match inbound {
                Ok(Inbound::Message(msg)) => println!("{}", render(&msg)),
                Ok(Inbound::TimedOut) => {}
                Ok(Inbound::Closed) => return Ok(SessionEnd::Lost),
                Err(e) => {
                    tracing::debug!(error = %e, "Receive failed");
                    return Ok(SessionEnd::Lost);
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let timeout = Duration::from_millis(cli.timeout);

    match cli.command {
        Commands::Send { username, text } => {
            cmd_send(&cli.servers, &username, &text.join(" "), timeout).await?;
        }

        Commands::Ping { username } => {
            cmd_ping(&cli.servers, &username, timeout).await?;
        }

        Commands::Connect {
            username,
            no_reconnect,
        } => {
            cmd_connect(&cli.servers, &username, timeout, !no_reconnect).await?;
        }

        Commands::Config => {
            println!("{}", NodeConfig::default().to_json()?);
        }
    }

    Ok(())
}

//! meshchat node daemon
//!
//! Runs one chat node: a client port for chat clients and a gossip port for
//! sibling nodes.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: clients on 9001, gossip on 9003, no peers
//! meshchat-node
//!
//! # Two nodes on one machine that gossip with each other
//! meshchat-node --port 9001 --gossip-port 9003 --peer 127.0.0.1:9004
//! meshchat-node --port 9002 --gossip-port 9004 --peer 127.0.0.1:9003
//!
//! # Settings from a JSON file, with structured logs
//! meshchat-node --config node.json --log-dir logs -v
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use meshchat_core::logging::JsonlLayer;
use meshchat_core::{Node, NodeConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// meshchat node - multi-node chat with single-hop gossip
#[derive(Parser, Debug)]
#[command(name = "meshchat-node")]
#[command(version = "0.1.0")]
#[command(about = "Run a meshchat node")]
struct Args {
    /// Client-facing port
    #[arg(short, long)]
    port: Option<u16>,

    /// Port sibling nodes gossip to
    #[arg(short, long)]
    gossip_port: Option<u16>,

    /// Interface to bind both listeners on
    #[arg(long)]
    host: Option<String>,

    /// Gossip address of a sibling node (repeatable)
    #[arg(long = "peer", value_name = "HOST:PORT")]
    peers: Vec<String>,

    /// JSON config file (default: <config dir>/meshchat/node.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chat transcript path
    #[arg(long, conflicts_with = "no_chat_log")]
    chat_log: Option<PathBuf>,

    /// Do not write a chat transcript
    #[arg(long)]
    no_chat_log: bool,

    /// Also write JSONL structured logs into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Load the base config, then apply command-line overrides.
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match self.config.clone().or_else(default_config_path) {
            Some(path) => NodeConfig::from_file(&path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => NodeConfig::default(),
        };

        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        if let Some(port) = self.port {
            config = config.with_client_port(port);
        }
        if let Some(port) = self.gossip_port {
            config = config.with_gossip_port(port);
        }
        if !self.peers.is_empty() {
            config = config.with_peers(self.peers.iter().cloned());
        }
        if self.no_chat_log {
            config = config.with_chat_log(None);
        } else if let Some(path) = &self.chat_log {
            config = config.with_chat_log(Some(path.clone()));
        }

        config.validate()?;
        Ok(config)
    }
}

/// `<config dir>/meshchat/node.json`, only if it exists.
fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("meshchat").join("node.json");
    path.exists().then_some(path)
}

fn setup_logging(verbosity: u8, log_dir: Option<&PathBuf>, node: u16) -> Result<()> {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let jsonl = match log_dir {
        Some(dir) => Some(
            JsonlLayer::new(dir, format!("node-{}", node))
                .with_context(|| format!("opening log directory {}", dir.display()))?,
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(jsonl)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.node_config()?;

    setup_logging(args.verbose, args.log_dir.as_ref(), config.client_port)?;

    let node = Node::from_config(config).await?;

    println!("meshchat node {}", node.node_id());
    println!("  Clients: {}", node.client_addr());
    println!("  Gossip:  {}", node.gossip_addr());
    if node.peers().is_empty() {
        println!("  Peers:   (none)");
    } else {
        for peer in node.peers() {
            println!("  Peer:    {}", peer);
        }
    }
    println!();
    println!("Node is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl+C")?;
            println!();
            println!("Received shutdown signal...");
        }
        _ = node.wait() => {}
    }

    node.stop();
    println!("Goodbye.");
    Ok(())
}

//! Local mixnet runner
//!
//! Starts every node of a directory file in one process with freshly
//! generated keys, then reads `content|destination|mix1,mix2` lines from stdin
//! and sends each one from the client node.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use synapsed_mixnet::{KeyDirectory, MixnetConfig, MixnetNode, NodeDirectory, NodeId, RoleKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node directory file (TOML)
    #[arg(long, short, default_value = "nodes.toml")]
    directory: PathBuf,

    /// Only start these nodes (repeatable); defaults to every node in the directory
    #[arg(long = "node")]
    nodes: Vec<String>,

    /// Client node that sends stdin lines; defaults to the first client started
    #[arg(long)]
    client: Option<String>,

    /// Override the mix dispatch interval
    #[arg(long)]
    dispatch_interval_ms: Option<u64>,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
struct SendRequest {
    content: String,
    destination: NodeId,
    relays: Vec<NodeId>,
}

/// Parses `content|destination|mix1,mix2`. The content may itself contain `|`.
fn parse_request(line: &str) -> Result<SendRequest> {
    let mut parts = line.trim_end().rsplitn(3, '|');
    let relays = parts.next().unwrap_or_default();
    let destination = parts.next().ok_or_else(|| anyhow!("expected content|destination|mix1,mix2"))?;
    let content = parts.next().ok_or_else(|| anyhow!("expected content|destination|mix1,mix2"))?;

    let destination = NodeId::new(destination.trim());
    if destination.is_empty() {
        bail!("destination is empty");
    }
    let relays = relays
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(NodeId::new)
        .collect();

    Ok(SendRequest {
        content: content.to_string(),
        destination,
        relays,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let (directory, file_config) = NodeDirectory::load(&args.directory)
        .with_context(|| format!("loading {}", args.directory.display()))?;
    let mut config = match file_config {
        Some(config) => config,
        None => MixnetConfig::from_env()?,
    };
    if let Some(interval) = args.dispatch_interval_ms {
        config.dispatch_interval_ms = interval;
    }
    config.validate()?;

    let selected: Vec<NodeId> = if args.nodes.is_empty() {
        directory.ids()
    } else {
        args.nodes.iter().map(|id| NodeId::new(id.as_str())).collect()
    };

    let directory = Arc::new(directory);
    let keys = Arc::new(KeyDirectory::generate(&directory.ids(), config.rsa_key_bits)?);

    // Receivers before senders so first hops are listening
    let mut ordered = Vec::new();
    for id in &selected {
        let entry = directory.resolve(id)?;
        let kind = entry
            .role
            .ok_or_else(|| anyhow!("node {} has no role in {}", id, args.directory.display()))?;
        ordered.push((id.clone(), kind));
    }
    ordered.sort_by_key(|(_, kind)| match kind {
        RoleKind::Destination => 0,
        RoleKind::Mix => 1,
        RoleKind::Client => 2,
    });

    let mut nodes = Vec::new();
    for (id, kind) in ordered {
        let node = MixnetNode::start(id, kind, Arc::clone(&keys), Arc::clone(&directory), config.clone()).await?;
        if let Some(mut deliveries) = node.take_deliveries() {
            let dest = node.id().clone();
            tokio::spawn(async move {
                while let Some(delivered) = deliveries.recv().await {
                    println!("[{}] {}", dest, delivered.content);
                }
            });
        }
        nodes.push(node);
    }

    let client_index = match &args.client {
        Some(id) => nodes
            .iter()
            .position(|node| node.id().as_str() == id && node.client().is_some())
            .ok_or_else(|| anyhow!("{} is not a running client node", id))
            .map(Some)?,
        None => nodes.iter().position(|node| node.client().is_some()),
    };

    match client_index {
        Some(index) => {
            info!(client = %nodes[index].id(), "Reading messages from stdin (content|destination|mix1,mix2)");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    line = lines.next_line() => match line? {
                        Some(line) if line.trim().is_empty() => continue,
                        Some(line) => {
                            let request = match parse_request(&line) {
                                Ok(request) => request,
                                Err(e) => {
                                    warn!(error = %e, "Ignoring input line");
                                    continue;
                                }
                            };
                            if let Some(client) = nodes[index].client() {
                                if let Err(e) = client.send(&request.content, &request.destination, &request.relays).await {
                                    error!(error = %e, "Send failed");
                                }
                            }
                        }
                        None => {
                            info!("Input closed, waiting for Ctrl-C");
                            tokio::signal::ctrl_c().await?;
                            break;
                        }
                    },
                }
            }
        }
        None => {
            info!("No client node running, waiting for Ctrl-C");
            tokio::signal::ctrl_c().await?;
        }
    }

    for node in nodes.iter().rev() {
        node.shutdown().await;
    }
    info!("All nodes stopped");
    Ok(())
}

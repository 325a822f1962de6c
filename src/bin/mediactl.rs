//! MediaCtl - Command line client for a running MediaSync server
//!
//! Usage:
//!   mediactl replicate --source 1 --target 2   - Replicate existing media in batches
//!   mediactl status                            - Show server status
//!   mediactl relationships show|set|reload     - Manage node relationships

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

use mediasync::client::{BatchLoop, HttpTransport, LoopOutcome, LoopSettings, LoopSignal};
use mediasync::config::MediaSyncConfig;
use mediasync::error::Error;
use mediasync::id::NodeId;
use mediasync::network::RelationshipGraph;

/// MediaSync Control Tool
#[derive(Parser)]
#[command(name = "mediactl")]
#[command(about = "Control a running MediaSync server", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/mediasync/config.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate existing media from one node to another.
    /// Ctrl+C pauses; Enter resumes; a second Ctrl+C terminates.
    Replicate {
        #[arg(long)]
        source: NodeId,
        #[arg(long)]
        target: NodeId,
        /// First batch size (shrinks after failed requests)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Show server status
    Status,
    /// Show or change node relationships
    Relationships {
        #[command(subcommand)]
        action: RelationshipAction,
    },
}

#[derive(Subcommand)]
enum RelationshipAction {
    /// Print the relationship map
    Show,
    /// Replace the relationship map, e.g. `set 1=2,3`
    Set {
        #[arg(required = true)]
        links: Vec<String>,
    },
    /// Make the server re-read relationships from its store
    Reload,
}

// ============ Response Types ============

#[derive(Debug, Deserialize)]
struct StatusResponse {
    name: String,
    main_node: u64,
    current_node: u64,
    engine: String,
    in_process: Option<String>,
    share_media: bool,
    delete_shared_media: bool,
    relationships: usize,
    nodes: Vec<NodeSummary>,
    uptime_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct NodeSummary {
    id: u64,
    url: String,
}

// ============ Main ============

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let config = MediaSyncConfig::from_file(&cli.config).ok();
    let endpoint = match &cli.endpoint {
        Some(e) => e.trim_end_matches('/').to_string(),
        None => endpoint_from_bind(config.as_ref().map(|c| c.api.bind_address.as_str())),
    };
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Replicate {
            source,
            target,
            batch_size,
        } => {
            let settings = match &config {
                Some(c) => LoopSettings {
                    batch_size: c.effective_batch_size(batch_size),
                    shrink_step: c.replication.batch_shrink_step,
                    ..Default::default()
                },
                None => LoopSettings {
                    batch_size: batch_size.unwrap_or(10),
                    ..Default::default()
                },
            };
            replicate(&endpoint, timeout, source, target, settings).await
        }
        Commands::Status => show_status(&endpoint, timeout).await,
        Commands::Relationships { action } => relationships(&endpoint, timeout, action).await,
    }
}

/// Turn a server bind address into a local URL
fn endpoint_from_bind(bind: Option<&str>) -> String {
    match bind {
        Some(addr) if addr.starts_with("0.0.0.0") => {
            format!("http://127.0.0.1:{}", addr.rsplit(':').next().unwrap_or("8080"))
        }
        Some(addr) => format!("http://{}", addr),
        None => "http://127.0.0.1:8080".to_string(),
    }
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to create HTTP client")
}

// ============ Commands ============

async fn replicate(
    endpoint: &str,
    timeout: Duration,
    source: NodeId,
    target: NodeId,
    settings: LoopSettings,
) -> anyhow::Result<()> {
    let transport = HttpTransport::new(endpoint, timeout)?;
    let (signal_tx, signal_rx) = watch::channel(LoopSignal::Run);

    // First Ctrl+C pauses, Enter resumes, second Ctrl+C terminates
    tokio::spawn(async move {
        let mut paused = false;
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_err() {
                        break;
                    }
                    if paused {
                        eprintln!("\nTerminating after the current batch");
                        let _ = signal_tx.send(LoopSignal::Terminate);
                        break;
                    }
                    paused = true;
                    eprintln!("\nPausing after the current batch. Press Enter to resume or Ctrl+C to stop.");
                    let _ = signal_tx.send(LoopSignal::Pause);
                }
                read = async {
                    let mut line = String::new();
                    stdin.read_line(&mut line).await
                }, if paused => {
                    if matches!(read, Ok(n) if n > 0) {
                        paused = false;
                        eprintln!("Resuming");
                        let _ = signal_tx.send(LoopSignal::Run);
                    }
                }
            }
        }
    });

    println!("Replicating existing media from node {} to node {}", source, target);
    let mut batch = BatchLoop::new(transport, source, target, settings, signal_rx);
    let result = batch
        .run(|progress| {
            println!(
                "{:>5.1}%  {} of {} originals left",
                progress.percent_complete(),
                progress.not_replicated,
                progress.total
            );
        })
        .await;

    match result {
        Ok(LoopOutcome::Completed(progress)) => {
            println!("✓ Done: all {} originals are on node {}", progress.total, target);
            Ok(())
        }
        Ok(LoopOutcome::Terminated(last)) => {
            match last {
                Some(p) => println!("Stopped at {:.1}% ({} left)", p.percent_complete(), p.not_replicated),
                None => println!("Stopped before the first batch"),
            }
            Ok(())
        }
        Err(e @ Error::IllegalPair { .. }) => bail!("{}", e.user_message()),
        Err(e) => {
            tracing::debug!("Batch loop failed: {}", e);
            bail!("{} ({})", e.user_message(), e)
        }
    }
}

async fn show_status(endpoint: &str, timeout: Duration) -> anyhow::Result<()> {
    let url = format!("{}/status", endpoint);
    let response = http_client(timeout)?
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;

    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }
    let status: StatusResponse = response.json().await.context("invalid status response")?;

    println!();
    println!("MediaSync Server Status (mediactl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
    println!("Server:        {}", status.name);
    println!("Main Node:     {}", status.main_node);
    println!("Current Node:  {}", status.current_node);
    println!("Engine:        {}", status.engine);
    if let Some(item) = &status.in_process {
        println!("In Process:    {}", item);
    }
    println!("Share Media:   {}", status.share_media);
    println!("Delete Shared: {}", status.delete_shared_media);
    println!("Links:         {}", status.relationships);
    println!("Uptime:        {}s", status.uptime_seconds);
    println!();
    println!("{:<8} {:<50}", "NODE", "URL");
    println!("{}", "-".repeat(58));
    for node in &status.nodes {
        println!("{:<8} {:<50}", node.id, node.url);
    }
    println!();

    Ok(())
}

async fn relationships(endpoint: &str, timeout: Duration, action: RelationshipAction) -> anyhow::Result<()> {
    let client = http_client(timeout)?;
    let url = format!("{}/relationships", endpoint);

    let request = match action {
        RelationshipAction::Show => client.get(&url),
        RelationshipAction::Set { links } => {
            let graph = RelationshipGraph::parse_links(&links)?;
            client.put(&url).json(&graph)
        }
        RelationshipAction::Reload => client.post(format!("{}/reload", url)),
    };

    let response = request
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("API error: {} {}", status, body);
    }

    let graph: RelationshipGraph = response.json().await.context("invalid relationship response")?;
    if graph.is_empty() {
        println!("No relationships configured");
    }
    for (key, peers) in graph.to_option_map() {
        let peers: Vec<String> = peers.iter().map(|p| p.to_string()).collect();
        println!("{:<10} -> {}", key, peers.join(", "));
    }
    Ok(())
}

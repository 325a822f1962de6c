//! MediaSync - Media Replication Across Linked Sites
//!
//! Server binary: runs the HTTP API and provides local administration
//! commands against the configured media store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediasync::api::HttpServer;
use mediasync::client::{BatchLoop, LoopOutcome, LoopSettings, LoopSignal};
use mediasync::config::{LoggingConfig, MediaSyncConfig};
use mediasync::error::Result;
use mediasync::id::NodeId;
use mediasync::network::RelationshipGraph;
use mediasync::MediaSync;

/// MediaSync - media replication across linked sites
#[derive(Parser)]
#[command(name = "mediasync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mediasync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "mediasync.toml")]
        output: PathBuf,

        /// Server name
        #[arg(long, default_value = "media-1")]
        name: String,
    },

    /// Validate configuration file
    Validate,

    /// Show configuration summary
    Info,

    /// Replicate existing media from one node to another until done
    Replicate {
        /// Node whose originals are copied
        #[arg(long)]
        source: NodeId,

        /// Node receiving the copies
        #[arg(long)]
        target: NodeId,

        /// Originals per batch (defaults to the configured value)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show or replace node relationships
    Relationships {
        #[command(subcommand)]
        action: RelationshipAction,
    },
}

#[derive(Subcommand)]
enum RelationshipAction {
    /// Print the current relationship map
    Show,

    /// Replace the relationship map, e.g. `set 1=2,3 4=1`
    Set {
        /// Links as <node>=<peer,peer>
        #[arg(required = true)]
        links: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it is readable
    let logging = MediaSyncConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(&logging, cli.log_level.as_deref());

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, name } => run_init(output, name),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Replicate {
            source,
            target,
            batch_size,
        } => run_replicate(cli.config, source, target, batch_size).await,
        Commands::Relationships { action } => run_relationships(cli.config, action).await,
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&logging.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(config_path: &PathBuf) -> Result<MediaSyncConfig> {
    match MediaSyncConfig::from_file(config_path) {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            Err(e)
        }
    }
}

/// Start the HTTP API
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting MediaSync...");

    let config = load_config(&config_path)?;
    tracing::info!("Loaded configuration for server: {}", config.node.name);

    if let Err(e) = std::fs::create_dir_all(config.data_dir()) {
        tracing::error!("Failed to create data directory {:?}: {}", config.data_dir(), e);
        return Err(e.into());
    }

    let api_config = config.api.clone();
    let app = Arc::new(MediaSync::open(config).await?);

    let graph = app.network.snapshot().await?;
    tracing::info!(
        "Serving {} registered nodes with {} relationship links",
        app.store.list_nodes().await?.len(),
        graph.pair_count()
    );

    let server = HttpServer::new(api_config, app);
    server
        .start(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received shutdown signal");
            }
        })
        .await?;

    tracing::info!("MediaSync stopped");
    Ok(())
}

/// Write a default configuration file
fn run_init(output: PathBuf, name: String) -> Result<()> {
    let config_content = format!(
        r#"# MediaSync Configuration
# Generated configuration file

[node]
name = "{name}"
data_dir = "/var/lib/mediasync"
# Node that is active when no request has switched context
main_node = 1

[store]
# path = "/var/lib/mediasync/media.db"

[sharing]
# Replicate new uploads to linked nodes
share_media = true
# Deleting an asset also deletes its copies (or its original)
delete_shared_media = false

[replication]
default_batch_size = 10
max_batch_size = 999
batch_shrink_step = 2
# skip_mime_types = ["video/"]

[api]
enabled = true
bind_address = "0.0.0.0:8080"
cors_enabled = false

[logging]
level = "info"
format = "pretty"

# [[nodes]]
# id = 1
# url = "https://site-one.example"
#
# [[nodes]]
# id = 2
# url = "https://site-two.example"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to register your nodes.");
    println!("Then start with: mediasync start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match MediaSyncConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Server: {}", config.node.name);
            println!("  Store: {}", config.store_path().display());
            println!("  Nodes: {}", config.nodes.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show configuration summary
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = MediaSyncConfig::from_file(&config_path)?;

    println!("MediaSync Server Information");
    println!("============================");
    println!();
    println!("Server:           {}", config.node.name);
    println!("Main Node:        {}", config.node.main_node);
    println!("Data Directory:   {}", config.data_dir().display());
    println!("Store:            {}", config.store_path().display());
    println!();
    println!("Sharing:");
    println!("  Share Media:    {}", config.sharing.share_media);
    println!("  Delete Shared:  {}", config.sharing.delete_shared_media);
    println!();
    println!("Replication:");
    println!("  Batch Size:     {} (max {})", config.replication.default_batch_size, config.replication.max_batch_size);
    println!("  Shrink Step:    {}", config.replication.batch_shrink_step);
    println!("  Skipped Types:  {:?}", config.replication.skip_mime_types);
    println!();
    println!("API:              {} ({})", config.api.bind_address, if config.api.enabled { "enabled" } else { "disabled" });
    println!();
    println!("Nodes:");
    for seed in &config.nodes {
        println!("  {:>4}  {}", seed.id, seed.url);
    }

    Ok(())
}

/// Drive the batch loop in-process
async fn run_replicate(
    config_path: PathBuf,
    source: NodeId,
    target: NodeId,
    batch_size: Option<usize>,
) -> Result<()> {
    let config = load_config(&config_path)?;
    let settings = LoopSettings {
        batch_size: config.effective_batch_size(batch_size),
        shrink_step: config.replication.batch_shrink_step,
        ..Default::default()
    };
    let app = MediaSync::open(config).await?;

    let (signal_tx, signal_rx) = watch::channel(LoopSignal::Run);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping after the current batch");
            let _ = signal_tx.send(LoopSignal::Terminate);
        }
    });

    let mut batch = BatchLoop::new(app.orchestrator.clone(), source, target, settings, signal_rx);
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
            println!("✓ All {} originals of node {} are on node {}", progress.total, source, target);
            Ok(())
        }
        Ok(LoopOutcome::Terminated(_)) => {
            println!("Replication stopped");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {}", e.user_message());
            Err(e)
        }
    }
}

/// Show or replace the relationship map
async fn run_relationships(config_path: PathBuf, action: RelationshipAction) -> Result<()> {
    let config = load_config(&config_path)?;
    let app = MediaSync::open(config).await?;

    let graph = match action {
        RelationshipAction::Show => app.network.snapshot().await?,
        RelationshipAction::Set { links } => {
            let graph = RelationshipGraph::parse_links(&links)?;
            app.network.replace_all(graph).await?
        }
    };

    print_graph(&graph);
    Ok(())
}

fn print_graph(graph: &RelationshipGraph) {
    if graph.is_empty() {
        println!("No relationships configured");
        return;
    }
    for (key, peers) in graph.to_option_map() {
        let peers: Vec<String> = peers.iter().map(|p| p.to_string()).collect();
        println!("{:<10} -> {}", key, peers.join(", "));
    }
}

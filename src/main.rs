use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shardlimit::config::ShardlimitConfig;
use shardlimit::ratelimit::{
    Engine, RateLimitDescriptor, RateLimitRequest, RateLimiterBackend, SnapshotHandle, Stats,
};
use shardlimit::reload::{read_documents, Coordinator, DirectoryWatcher};

/// A sidecar rate limiting decision engine.
#[derive(Debug, Parser)]
#[command(name = "shardlimit", version, about)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the rules directory and keep the engine configured until shutdown
    Serve(RulesArgs),
    /// Evaluate a single request against the rules directory and print the response
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct RulesArgs {
    /// Rules directory
    #[arg(short, long)]
    watch: Option<PathBuf>,

    /// Replica count to divide limits by
    #[arg(short, long)]
    replicas: Option<u32>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[command(flatten)]
    rules: RulesArgs,

    /// Rate limit domain
    #[arg(short, long)]
    domain: String,

    /// Descriptor as `key=value,key2=value2`; repeat for several descriptors
    #[arg(short = 'D', long = "descriptor", required = true)]
    descriptors: Vec<String>,
}

impl RulesArgs {
    fn apply(&self, config: &mut ShardlimitConfig) {
        if let Some(dir) = &self.watch {
            config.rules.dir = dir.clone();
        }
        if let Some(replicas) = self.replicas {
            config.replicas.count = replicas;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ShardlimitConfig::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.log_json;
    init_tracing(&config);

    match &cli.command {
        Command::Serve(args) => {
            args.apply(&mut config);
            serve(config).await
        }
        Command::Check(args) => {
            args.rules.apply(&mut config);
            check(config, args).await
        }
    }
}

fn init_tracing(config: &ShardlimitConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: ShardlimitConfig) -> anyhow::Result<()> {
    info!("Starting Shardlimit Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        rules_dir = %config.rules.dir.display(),
        replicas = config.replicas.count,
        "Configuration loaded"
    );

    let snapshots = SnapshotHandle::new();
    let stats = Arc::new(Stats::new());
    let coordinator = Arc::new(Coordinator::with_replicas(
        snapshots.clone(),
        stats.clone(),
        config.replicas.count,
    ));
    let engine = Engine::new(snapshots, stats);

    let (handle, coordinator_task) = coordinator.spawn();

    let watcher = DirectoryWatcher::new(&config.rules.dir, config.rules.poll_interval())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(handle, shutdown_rx));

    info!("Rate limit engine ready");
    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = watcher_task.await? {
        error!(error = %e, "Directory watcher failed");
    }
    coordinator_task.await?;

    let stats = engine.stats();
    info!(
        config_load_success = stats.config_load_success(),
        config_load_error = stats.config_load_error(),
        "Shardlimit Rate Limiting Service stopped"
    );
    Ok(())
}

async fn check(config: ShardlimitConfig, args: &CheckArgs) -> anyhow::Result<()> {
    let snapshots = SnapshotHandle::new();
    let stats = Arc::new(Stats::new());
    let coordinator =
        Coordinator::with_replicas(snapshots.clone(), stats.clone(), config.replicas.count);
    let summary = coordinator.on_configuration_changed(read_documents(&config.rules.dir))?;
    for rejected in &summary.rejected {
        error!(%rejected, "Rejected rules document");
    }

    let request = RateLimitRequest {
        domain: args.domain.clone(),
        descriptors: args
            .descriptors
            .iter()
            .map(|d| RateLimitDescriptor::parse_pairs(d))
            .collect(),
        hits_addend: 1,
    };

    let engine = Engine::new(snapshots, stats);
    let response = engine.should_rate_limit(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

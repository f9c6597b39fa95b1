//! Local Storage Scheduler
//!
//! Scheduler extender binary: mirrors cluster objects into memory, keeps the
//! local storage ledger current and serves kube-scheduler's filter and
//! prioritize calls.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use local_storage_scheduler::reschedule::run_retrigger_loop;
use local_storage_scheduler::{
    ApiServer, ClusterNodeCache, ClusterSync, InMemoryObjectStore, InitConfigController,
    KubeNodeLocalStorageApi, KubePodPatcher, LedgerMaintainer, LedgerMetrics, ObjectStore, Result,
    SchedulerConfig, SchedulingContext,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Local Storage Scheduler - kube-scheduler extender for node-local storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Extender HTTP port
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// YAML configuration file
    #[arg(long, env = "SCHEDULER_CONFIG")]
    config: Option<PathBuf>,

    /// Pending pod re-trigger interval in seconds
    #[arg(long, env = "TRIGGER_PENDING_POD_CYCLE")]
    trigger_pending_pod_cycle_secs: Option<u64>,

    /// Maximum pods patched per re-trigger pass
    #[arg(long, env = "RESCHEDULE_BATCH_SIZE")]
    reschedule_batch_size: Option<usize>,

    /// NodeLocalStorageInitConfig driving per-node configuration
    #[arg(long, env = "INIT_CONFIG_NAME")]
    init_config_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

impl Args {
    /// File configuration (or defaults) with command line overrides applied
    fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_yaml_file(path)?,
            None => SchedulerConfig::default(),
        };
        if let Some(port) = self.port {
            config.bind_addr = SocketAddr::new(config.bind_addr.ip(), port);
        }
        if let Some(secs) = self.trigger_pending_pod_cycle_secs {
            config.trigger_pending_pod_cycle = Duration::from_secs(secs);
        }
        if let Some(batch) = self.reschedule_batch_size {
            config.reschedule_batch_size = batch;
        }
        if let Some(name) = &self.init_config_name {
            config.init_config_name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.scheduler_config()?;

    info!("Starting Local Storage Scheduler");
    info!("  Version: {}", local_storage_scheduler::VERSION);
    info!("  Extender API: {}", config.bind_addr);
    info!("  Init config: {}", config.init_config_name);
    info!("  Standalone mode: {}", args.standalone);

    let metrics = Arc::new(LedgerMetrics::new()?);
    let store = InMemoryObjectStore::new();
    let cache = ClusterNodeCache::new(config.event_channel_capacity);
    let maintainer = Arc::new(
        LedgerMaintainer::new(cache.clone(), store.clone()).with_metrics(metrics.clone()),
    );
    let ctx = Arc::new(
        SchedulingContext::new(cache.clone(), store.clone(), &config)
            .with_metrics(metrics.clone()),
    );
    info!("Resource ledger initialized");

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    // Stop everything on Ctrl-C
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    let event_log = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        let seen = cache.log_events(event_log).await;
        info!("Ledger event log stopped after {} events", seen);
    }));

    if !args.standalone {
        let client = kube::Client::try_default().await?;
        info!("Connected to Kubernetes API server");

        let sync = ClusterSync::new(store.clone(), maintainer);
        tasks.extend(sync.spawn_watchers(client.clone(), shutdown.clone()));

        // decisions against a partial ledger would accept full nodes
        info!("Waiting for the initial cluster state");
        tokio::select! {
            _ = sync.wait_synced() => info!("Cluster state synced"),
            _ = shutdown.cancelled() => info!("Shutdown before the cluster state synced"),
        }

        let object_store: Arc<dyn ObjectStore> = store.clone();
        tasks.push(tokio::spawn(run_retrigger_loop(
            object_store.clone(),
            Arc::new(KubePodPatcher::new(client.clone())),
            config.clone(),
            shutdown.clone(),
        )));

        let controller = InitConfigController::new(
            object_store,
            Arc::new(KubeNodeLocalStorageApi::new(client)),
            config.init_config_name.clone(),
            config.init_config_resync,
        );
        tasks.push(tokio::spawn(controller.run(shutdown.clone())));
    }

    let server = ApiServer::new(config.bind_addr, ctx, metrics);
    let served = server.run(shutdown.clone()).await;
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task failed: {}", e);
        }
    }

    served?;
    info!("Scheduler shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

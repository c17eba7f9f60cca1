//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "binary"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Binary entrypoint for the ReactorSync daemon."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use reactorsync_api::{spawn_api_server, ApiServer, ApiState};
use reactorsync_common::{init_tracing, AppConfig};
use reactorsync_core::{EmissionPipeline, PipelineSettings, SimulationControl};
use reactorsync_metrics::{
    new_registry, spawn_http_server, DaemonMetrics, GeneratorMetrics, SharedRegistry,
};
use reactorsync_msg::{
    log_message, BrokerSettings, InMemoryBroker, MessageDirection, MessagingMetricsExporter,
    TelemetryPublisher, TopicNames,
};
use reactorsync_persistence::{InMemoryStore, PersistenceMetrics, TelemetryStore};
use reactorsync_sim::AnomalyController;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SERVICE_NAME: &str = "reactorsyncd";

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "ReactorSync telemetry synthesis daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the generator seed")]
    seed: Option<u64>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the emission loop and admin API")]
    Run,
    #[command(about = "Load and validate configuration, then print it as JSON")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("ReactorSync {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/reactorsync.toml"));
    candidates.push(PathBuf::from("configs/reactorsync.example.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let load_duration = load_started.elapsed();
    if let Some(seed) = cli.seed {
        config.generator.seed = seed;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());

            init_tracing(SERVICE_NAME, &config.logging)?;
            info!(
                config_path = %loaded_config.source.display(),
                reactors = config.reactors.len(),
                seed = config.generator.seed,
                "configuration loaded"
            );
            run_daemon(config, registry).await?
        }
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let store = match &config.store.journal_path {
        Some(path) => InMemoryStore::open_journaled(path)
            .with_context(|| format!("failed to open journal {}", path.display()))?,
        None => InMemoryStore::new(),
    };
    let store = Arc::new(store.with_metrics(PersistenceMetrics::new(registry.clone())?));
    for seed in &config.reactors {
        if store.reactor(seed.id).is_ok() {
            continue;
        }
        let reactor = store.upsert_reactor(seed.to_reactor())?;
        info!(reactor_id = reactor.id, name = %reactor.name, family = %reactor.family, "reactor seeded");
    }

    let broker = Arc::new(InMemoryBroker::new(BrokerSettings {
        partitions: config.broker.partitions,
        subscriber_capacity: config.broker.subscriber_capacity,
        ..BrokerSettings::default()
    }));
    let topics = TopicNames::with_prefix(&config.broker.topic_prefix);
    let alert_tap = spawn_alert_tap(&broker, &topics.alerts);
    let publisher = Arc::new(
        TelemetryPublisher::new(SERVICE_NAME, topics, broker.clone())
            .with_exporter(MessagingMetricsExporter::register(&registry)?),
    );

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let anomalies = AnomalyController::new(config.generator.seed.rotate_left(17));
    let store_dyn: Arc<dyn TelemetryStore> = store.clone();
    let control = SimulationControl::new(store_dyn.clone(), anomalies.clone());
    let settings = PipelineSettings::from_config(&config.generator, &config.store);
    let pipeline = EmissionPipeline::new(settings, store_dyn.clone(), publisher, anomalies)
        .with_metrics(GeneratorMetrics::new(registry)?);
    let stats = pipeline.stats();
    let handle = pipeline.spawn();

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(store_dyn, control, stats));
        match spawn_api_server(state, config.api.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    match handle.shutdown().await? {
        Some(pipeline) => info!(
            ticks = pipeline.stats().snapshot().ticks,
            "emission loop drained"
        ),
        None => warn!("emission loop aborted after drain timeout"),
    }
    alert_tap.abort();
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

/// Log every alert as the broker delivers it.
fn spawn_alert_tap(broker: &InMemoryBroker, topic: &str) -> JoinHandle<()> {
    let mut alerts = broker.subscribe(topic);
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(record) => log_message(MessageDirection::Inbound, &record.topic, &record.message),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "alert tap lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}

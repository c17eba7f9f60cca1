//! ---
//! rs_section: "03-persistence-logging"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Metrics collection and export utilities."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "reactorsyncd_starts_total",
            "Total number of times the ReactorSync daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "reactorsyncd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "reactorsyncd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

/// Counters and timings for the emission loop.
#[derive(Clone, Debug)]
pub struct GeneratorMetrics {
    registry: SharedRegistry,
    readings: IntCounterVec,
    publish_failures: IntCounter,
    persist_failures: IntCounter,
    faults_raised: IntCounterVec,
    active_anomalies: IntGauge,
    tick_seconds: Histogram,
}

impl GeneratorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let readings = IntCounterVec::new(
            Opts::new(
                "reactorsync_readings_generated_total",
                "Readings produced by the generator, by reactor family",
            ),
            &["family"],
        )?;
        registry.register(Box::new(readings.clone()))?;

        let publish_failures = IntCounter::with_opts(Opts::new(
            "reactorsync_publish_failures_total",
            "Readings skipped after exhausting publish retries",
        ))?;
        registry.register(Box::new(publish_failures.clone()))?;

        let persist_failures = IntCounter::with_opts(Opts::new(
            "reactorsync_persist_failures_total",
            "Readings skipped after exhausting persist retries",
        ))?;
        registry.register(Box::new(persist_failures.clone()))?;

        let faults_raised = IntCounterVec::new(
            Opts::new(
                "reactorsync_faults_raised_total",
                "Faults created, by fault type and severity",
            ),
            &["fault_type", "severity"],
        )?;
        registry.register(Box::new(faults_raised.clone()))?;

        let active_anomalies = IntGauge::with_opts(Opts::new(
            "reactorsync_active_anomalies",
            "Anomaly injections currently perturbing readings",
        ))?;
        registry.register(Box::new(active_anomalies.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let tick_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "reactorsync_tick_duration_seconds",
                "Wall time spent processing one generator tick",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(tick_seconds.clone()))?;

        Ok(Self {
            registry,
            readings,
            publish_failures,
            persist_failures,
            faults_raised,
            active_anomalies,
            tick_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_reading(&self, family: &str) {
        self.readings.with_label_values(&[family]).inc();
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.inc();
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.inc();
    }

    pub fn record_fault(&self, fault_type: &str, severity: &str) {
        self.faults_raised
            .with_label_values(&[fault_type, severity])
            .inc();
    }

    pub fn set_active_anomalies(&self, count: usize) {
        self.active_anomalies.set(count as i64);
    }

    pub fn observe_tick(&self, seconds: f64) {
        self.tick_seconds.observe(seconds);
    }
}

pub use prometheus;

//! ---
//! rs_section: "05-networking-external-interfaces"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Admin REST API over the reactor registry and anomaly control."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use reactorsync_common::{Fault, PersistedReading, Reactor, ReactorId, ReactorSeed};
use reactorsync_core::{
    CoreError, GenerationStats, InjectionAck, InjectionRequest, SimulationControl, StatsHandle,
};
use reactorsync_persistence::{
    FaultFilter, KnowledgeBase, KnowledgeDocument, SearchHit, StoreError, StoreStats,
    TelemetryStore,
};
use reactorsync_sim::AnomalyInjection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const DEFAULT_TELEMETRY_LIMIT: usize = 100;
const MAX_TELEMETRY_LIMIT: usize = 1000;
const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Shared API state exposed to handlers.
pub struct ApiState {
    store: Arc<dyn TelemetryStore>,
    control: SimulationControl,
    stats: StatsHandle,
    knowledge: Arc<KnowledgeBase>,
    start: Instant,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        control: SimulationControl,
        stats: StatsHandle,
    ) -> Self {
        Self {
            store,
            control,
            stats,
            knowledge: Arc::new(KnowledgeBase::default()),
            start: Instant::now(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeBase>) -> Self {
        self.knowledge = knowledge;
        self
    }

    fn status(&self) -> Result<StatusResponse, ApiError> {
        let store = self.store.stats()?;
        Ok(StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: self.start.elapsed().as_secs(),
            store_backend: self.store.name(),
            reactors: store.reactors,
            active_anomalies: self.control.active().len(),
            current_tick: self.stats.snapshot().current_tick,
        })
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("store", &self.store.name())
            .field("knowledge_documents", &self.knowledge.len())
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/reactors", get(list_reactors).post(post_reactor))
        .route("/api/reactors/:id", get(get_reactor).delete(delete_reactor))
        .route("/api/reactors/:id/telemetry", get(get_telemetry))
        .route("/api/faults", get(list_faults))
        .route("/api/faults/:id/resolve", post(resolve_fault))
        .route("/api/anomalies", get(list_anomalies).post(post_anomaly))
        .route("/api/anomalies/:reactor_id/:target", delete(clear_anomalies))
        .route("/api/stats", get(get_stats))
        .route("/api/knowledge", post(post_knowledge))
        .route("/api/knowledge/search", post(search_knowledge))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the REST API; binding port 0 picks a free port, see [`ApiServer::addr`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let bound = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    uptime_seconds: u64,
    store_backend: &'static str,
    reactors: usize,
    active_anomalies: usize,
    current_tick: u64,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    generation: GenerationStats,
    store: StoreStats,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    reactor_id: ReactorId,
    cleared: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::UnknownReactor(_) | StoreError::UnknownFault(_) => StatusCode::NOT_FOUND,
            StoreError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
            StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::UnknownReactor(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidAnomalySpec(_) => StatusCode::BAD_REQUEST,
            CoreError::Store(StoreError::Unavailable(_))
            | CoreError::TransientPublishFailure { .. }
            | CoreError::TransientPersistFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Result<Json<StatusResponse>, ApiError> {
    state.status().map(Json)
}

async fn list_reactors(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<Reactor>>, ApiError> {
    Ok(Json(state.store.list_reactors()?))
}

async fn get_reactor(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<ReactorId>,
) -> Result<Json<Reactor>, ApiError> {
    Ok(Json(state.store.reactor(id)?))
}

async fn post_reactor(
    State(state): State<Arc<ApiState>>,
    Json(seed): Json<ReactorSeed>,
) -> Result<(StatusCode, Json<Reactor>), ApiError> {
    if seed.name.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "reactor name must not be empty"));
    }
    if !(-90.0..=90.0).contains(&seed.latitude) || !(-180.0..=180.0).contains(&seed.longitude) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("coordinates out of range: {}, {}", seed.latitude, seed.longitude),
        ));
    }
    let reactor = state.store.upsert_reactor(seed.to_reactor())?;
    info!(reactor_id = reactor.id, family = %reactor.family, "reactor registered via api");
    Ok((StatusCode::CREATED, Json(reactor)))
}

async fn delete_reactor(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<ReactorId>,
) -> Result<Json<Reactor>, ApiError> {
    state.control.clear(id, "all")?;
    let reactor = state.store.delete_reactor(id)?;
    info!(reactor_id = id, "reactor removed via api");
    Ok(Json(reactor))
}

#[derive(Debug, Deserialize)]
struct TelemetryQuery {
    limit: Option<usize>,
}

async fn get_telemetry(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<ReactorId>,
    Query(query): Query<TelemetryQuery>,
) -> Result<Json<Vec<PersistedReading>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TELEMETRY_LIMIT)
        .clamp(1, MAX_TELEMETRY_LIMIT);
    Ok(Json(state.store.readings(id, limit)?))
}

#[derive(Debug, Deserialize)]
struct FaultQuery {
    reactor_id: Option<ReactorId>,
    resolved: Option<bool>,
}

async fn list_faults(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<FaultQuery>,
) -> Result<Json<Vec<Fault>>, ApiError> {
    Ok(Json(state.store.faults(FaultFilter {
        reactor_id: query.reactor_id,
        resolved: query.resolved,
    })?))
}

async fn resolve_fault(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> Result<Json<Fault>, ApiError> {
    Ok(Json(state.store.resolve_fault(id, Utc::now())?))
}

async fn list_anomalies(State(state): State<Arc<ApiState>>) -> Json<Vec<AnomalyInjection>> {
    Json(state.control.active())
}

async fn post_anomaly(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<InjectionRequest>,
) -> Result<(StatusCode, Json<InjectionAck>), ApiError> {
    let ack = state.control.inject(&request)?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn clear_anomalies(
    State(state): State<Arc<ApiState>>,
    Path((reactor_id, target)): Path<(ReactorId, String)>,
) -> Result<Json<ClearResponse>, ApiError> {
    let cleared = state.control.clear(reactor_id, &target)?;
    Ok(Json(ClearResponse {
        reactor_id,
        cleared: cleared.iter().map(ToString::to_string).collect(),
    }))
}

async fn get_stats(State(state): State<Arc<ApiState>>) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        generation: state.stats.snapshot(),
        store: state.store.stats()?,
    }))
}

#[derive(Debug, Deserialize)]
struct KnowledgeRequest {
    name: String,
    content: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    metadata: Value,
}

async fn post_knowledge(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<KnowledgeRequest>,
) -> Result<(StatusCode, Json<KnowledgeDocument>), ApiError> {
    let document = state.knowledge.add(
        request.name,
        request.content,
        request.embedding,
        request.metadata,
    )?;
    Ok((StatusCode::CREATED, Json(document)))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    embedding: Vec<f32>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    document_type: Option<String>,
}

async fn search_knowledge(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    Ok(Json(state.knowledge.search(
        &request.embedding,
        request.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        request.threshold.unwrap_or(0.0),
        request.document_type.as_deref(),
    )?))
}

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path as AxumPath, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_channel::AnnouncementChannel;
use relay_store::ContentStore;
use relay_types::{ContentId, FilterHandle, RelayError, Topic};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::latest::LatestCell;

/// Body returned by `/cat_last` before any announcement has been seen.
pub const NO_MESSAGES_SENTINEL: &str = "No msgs ever!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// Origins allowed by CORS. Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5007)),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ContentStore>,
    pub channel: Arc<dyn AnnouncementChannel>,
    pub filter: FilterHandle,
    pub topic: Topic,
    pub latest: LatestCell,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ContentStore>,
        channel: Arc<dyn AnnouncementChannel>,
        filter: FilterHandle,
        topic: Topic,
    ) -> Self {
        Self {
            store,
            channel,
            filter,
            topic,
            latest: LatestCell::new(),
            start_time: Instant::now(),
            req_count: Arc::new(AtomicUsize::new(0)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    fn record_request(&self, endpoint: &'static str) -> u64 {
        counter!("relay_http_requests_total", "endpoint" => endpoint).increment(1);
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct NewMessagesResponse {
    payloads: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    req_total: u64,
    topic: String,
    store_mode: &'static str,
    channel_mode: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_gateway<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    fn service_unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match &err {
            RelayError::NotFound(_) => Self::not_found(err.to_string()),
            RelayError::InvalidInput(_) => Self::bad_request(err.to_string()),
            // On the read path a malformed document can only come back from the store.
            RelayError::MalformedDocument(_)
            | RelayError::StoreUnavailable(_)
            | RelayError::ChannelUnavailable(_) => {
                warn!("Upstream failure [{}]: {}", err.kind(), err);
                Self::bad_gateway(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

/// Serve the retrieval API until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, config: &ServiceConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state, &config.allowed_origins);
    let listener = bind_listener(config.bind_addr).await?;
    let local_addr = listener
        .local_addr()
        .context("failed to read HTTP listener address")?;
    info!("Retrieval API listening on http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server terminated unexpectedly")
}

async fn bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/get_new_messages", get(handle_get_new_messages))
        .route("/cat/:content_id", get(handle_cat))
        .route("/cat_last", get(handle_cat_last))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
}

async fn handle_get_new_messages(
    State(state): State<SharedState>,
) -> Result<Json<NewMessagesResponse>, ApiError> {
    state.record_request("get_new_messages");
    let received = state.channel.poll(&state.filter).await?;
    let payloads = received
        .into_iter()
        .map(|message| message.payload.to_string())
        .collect();
    Ok(Json(NewMessagesResponse { payloads }))
}

async fn handle_cat(
    State(state): State<SharedState>,
    AxumPath(content_id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    state.record_request("cat");
    // An id we cannot parse was never produced by `put`.
    let id = ContentId::parse(&content_id)
        .map_err(|_| ApiError::from(RelayError::not_found(content_id.as_str())))?;
    let document = state.store.get(&id).await?;
    Ok(Json(document.into_value()))
}

async fn handle_cat_last(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    state.record_request("cat_last");
    let latest = state
        .latest
        .advance(state.channel.as_ref(), &state.filter)
        .await?;

    let Some(id) = latest else {
        return Ok(Json(json!({ "error": NO_MESSAGES_SENTINEL })));
    };
    let document = state.store.get(&id).await?;
    Ok(Json(document.into_value()))
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let req_total = state.record_request("health");
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_seconds(),
        req_total,
        topic: state.topic.to_hex(),
        store_mode: state.store.backend(),
        channel_mode: state.channel.transport(),
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Result<Response, ApiError> {
    state.record_request("metrics");
    let Some(handle) = &state.metrics else {
        return Err(ApiError::service_unavailable(
            "Prometheus exporter is disabled",
        ));
    };

    let mut response = handle.render().into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}

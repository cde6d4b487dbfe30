use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use otelmap_core::config::Config;
use otelmap_core::error::OtelMapError;
use otelmap_core::filter::TimeWindow;
use otelmap_core::ids::SessionToken;
use otelmap_core::model::service_map::MapAnalysis;
use otelmap_core::query::{
    ErrorResponse, IngestConfig, ResourceAttribute, ServiceMapQuery, SessionTokenResponse,
    StatusResponse,
};
use otelmap_core::time::parse_rfc3339;
use otelmap_engine::{MapOptions, map_session};
use otelmap_store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::events::session_events;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub config: Arc<Config>,
}

/// Error body plus status for every failed API call.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Timeout(String),
    Unavailable(String),
    Internal(String),
}

impl From<OtelMapError> for ApiError {
    fn from(err: OtelMapError) -> Self {
        if err.is_client_error() {
            return Self::BadRequest(err.to_string());
        }
        match err {
            OtelMapError::NotFound(_) => Self::NotFound(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(msg) => {
                tracing::warn!(error = %msg, "api request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let v1 = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/session-token", post(create_session_token))
        .route("/service-map/{token}", get(service_map))
        .route("/session-events", get(session_events))
        .route("/status", get(status));

    Router::new()
        .nest("/api/v1", v1)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

pub async fn run_api_server(state: ApiState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind api listener {addr}"))?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, router(state))
        .await
        .context("api server failed")
}

/// Runs a store call off the async workers.
pub(crate) async fn with_store<T, F>(store: &Store, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Store) -> otelmap_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
        .map_err(ApiError::from)
}

/// Parses the path token and confirms it was issued here.
pub(crate) async fn known_session(store: &Store, raw: &str) -> Result<SessionToken, ApiError> {
    let token = SessionToken::parse(raw)?;
    let key = token.to_string();
    if !with_store(store, move |s| s.session_exists(&key)).await? {
        return Err(ApiError::NotFound(format!("session token {token} not found")));
    }
    Ok(token)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readyz(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    match with_store(&state.store, |s| s.status()).await {
        Ok(_) => Ok(Json(serde_json::json!({ "status": "ready" }))),
        Err(ApiError::Internal(msg)) => Err(ApiError::Unavailable(msg)),
        Err(other) => Err(other),
    }
}

async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    with_store(&state.store, |s| s.status()).await.map(Json)
}

async fn create_session_token(
    State(state): State<ApiState>,
) -> Result<Json<SessionTokenResponse>, ApiError> {
    let token = with_store(&state.store, |s| s.create_session_token()).await?;
    Ok(Json(session_response(&state.config, &token)))
}

pub(crate) fn session_response(config: &Config, token: &SessionToken) -> SessionTokenResponse {
    let value = token.to_string();
    SessionTokenResponse {
        token: value.clone(),
        ingest: IngestConfig {
            otlp_http_url: config.otlp_http_url(),
            otlp_grpc_url: config.otlp_grpc_url(),
            header_key: config.session_header.clone(),
            header_value: value.clone(),
            resource_attribute: ResourceAttribute {
                key: config.session_attribute_key.clone(),
                value,
            },
        },
    }
}

async fn service_map(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    Query(query): Query<ServiceMapQuery>,
) -> Result<Json<MapAnalysis>, ApiError> {
    let window = query_window(&query)?;
    let token = known_session(&state.store, &token).await?.to_string();
    let options = MapOptions {
        include_client_only_services: state.config.include_client_only_services,
    };

    let store = state.store.clone();
    let task = tokio::task::spawn_blocking(move || {
        map_session(&store, &token, &window, options, Utc::now())
    });

    match tokio::time::timeout(state.config.map_timeout, task).await {
        Err(_) => Err(ApiError::Timeout(format!(
            "service map not ready within {}ms",
            state.config.map_timeout.as_millis()
        ))),
        Ok(Err(join)) => Err(ApiError::Internal(format!("map task failed: {join}"))),
        Ok(Ok(result)) => result.map(Json).map_err(ApiError::from),
    }
}

fn query_window(query: &ServiceMapQuery) -> Result<TimeWindow, ApiError> {
    let since = query
        .start
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(parse_rfc3339)
        .transpose()?;
    let until = query
        .end
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(parse_rfc3339)
        .transpose()?;
    Ok(TimeWindow::new(since, until)?)
}

//! HTTP API for health checks, status, and operator actions

use crate::chain::ChainManager;
use crate::config::ApiConfig;
use crate::error::{SwapperError, SwapperResult};
use crate::model::{Chain, Order};
use crate::store::{self, Store, StoreStats};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub chains: Arc<ChainManager>,
    pub started_at: Instant,
    /// Bearer token for operator actions; without one they are not served
    pub operator_token: Option<String>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, chains: Arc<ChainManager>) -> Self {
        Self {
            store,
            chains,
            started_at: Instant::now(),
            operator_token: None,
        }
    }

    pub fn with_operator_token(mut self, token: Option<String>) -> Self {
        self.operator_token = token.filter(|t| !t.is_empty());
        self
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/chains", get(get_chains));
    if state.operator_token.is_some() {
        router = router.route("/orders/:id/retry", post(retry_order));
    } else {
        warn!("No operator token configured; operator endpoints disabled");
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> SwapperResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SwapperError::Config(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| SwapperError::Internal(format!("API server: {}", e)))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store and every chain client reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await.is_ok();
    let chain_health = state.chains.health_check().await;
    let chains = chain_health.iter().all(|(_, healthy)| *healthy);

    let ready = database && chains;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            chains,
            details: chain_details(chain_health),
        }),
    )
}

/// Get swapper status
async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let chain_health = state.chains.health_check().await;
    let stats = state.store.stats().await?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connected_chains: state.chains.connected_chains(),
        chain_status: chain_details(chain_health),
        stats,
    }))
}

/// Get connected chains
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: state.chains.connected_chains(),
    })
}

/// Rewind a failed order one cycle
async fn retry_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Order>, ApiError> {
    authorize(&state, &headers)?;
    let order = store::retry_order(state.store.as_ref(), id).await?;
    Ok(Json(order))
}

/// Operator actions need `Authorization: Bearer <operator_token>`
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state.operator_token.as_deref().ok_or(ApiError::Unauthorized)?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

fn chain_details(health: Vec<(Chain, bool)>) -> Vec<ChainHealth> {
    health
        .into_iter()
        .map(|(chain, healthy)| ChainHealth { chain, healthy })
        .collect()
}

/// Error response with a status derived from the failure
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Swapper(SwapperError),
}

impl From<SwapperError> for ApiError {
    fn from(err: SwapperError) -> Self {
        ApiError::Swapper(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Swapper(err) => {
                let status = match &err {
                    SwapperError::NotFound { .. } => StatusCode::NOT_FOUND,
                    SwapperError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    warn!("API request failed: {}", err);
                }
                (status, err.to_string())
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain: Chain,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    connected_chains: Vec<Chain>,
    chain_status: Vec<ChainHealth>,
    stats: StoreStats,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<Chain>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

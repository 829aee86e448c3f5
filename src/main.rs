mod apply;
mod catalog;
mod commerce;
mod config;
mod generator;
mod http;
mod lifecycle;
mod llm;
mod locks;
mod marker;
mod metrics;
mod models;
mod pipeline;
mod prompt;
mod schema;
mod shopify;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use commerce::{CommerceApi, StoreConnector};
use config::AppConfig;
use eyre::WrapErr;
use llm::LlmClient;
use locks::{StoreGuard, StoreLocks};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, OperationResponse, PreviewResponse, StoreRequest};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde_json::json;
use shopify::ShopifyConnector;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "synthstore.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    if config.llm.api_key.is_none() {
        warn!(target = "synthstore.api", "LLM_API_KEY is not set; generation requests will fail");
    }
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let model = Arc::new(LlmClient::new(config.llm.clone(), &config.http));
    let state = AppState {
        pipeline: Pipeline::new(config.pipeline.clone(), model),
        connector: Arc::new(ShopifyConnector::new(
            &config.http,
            config.shopify_api_version.clone(),
        )),
        locks: StoreLocks::default(),
        prometheus_handle,
        metrics_key: config.metrics_key.clone(),
    };
    let app = router(state, config.body_limit);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(
        target = "synthstore.api",
        marker = config.pipeline.marker.tag(),
        model = %config.llm.model,
        "listening on {addr}"
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .await
        .wrap_err("server error")?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    connector: Arc<dyn StoreConnector>,
    locks: StoreLocks,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/preview", post(preview))
        .route("/generate-orders", post(generate_orders))
        .route("/generate-inventory", post(generate_inventory))
        .route("/clear-orders", post(clear_orders).delete(clear_orders))
        .route("/reset-inventory", post(reset_inventory))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Health check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "synthstore-api-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Builds the store client and holds the store's lock until the guard drops.
async fn connect_store(
    state: &AppState,
    payload: &StoreRequest,
) -> Result<(Arc<dyn CommerceApi>, StoreGuard), PipelineError> {
    let store_key = shopify::normalize_shop_domain(&payload.shop_url)?;
    let api = state
        .connector
        .connect(&payload.shop_url, &payload.access_token)?;
    let guard = state.locks.lock_owned(&store_key).await;
    Ok((api, guard))
}

/// Generate candidate records without writing anything to the store.
///
/// - Method: `POST`
/// - Path: `/preview`
/// - Body: `StoreRequest` (`kind` selects orders or inventory adjustments)
/// - Response: `PreviewResponse`
async fn preview(
    State(state): State<AppState>,
    Json(payload): Json<StoreRequest>,
) -> Result<Json<PreviewResponse>, AppError> {
    crate::metrics::inc_requests("/preview");
    let (api, _guard) = connect_store(&state, &payload).await?;
    let result = state
        .pipeline
        .preview(
            api.as_ref(),
            payload.kind,
            payload.num_items,
            Some(payload.date_range_days),
        )
        .await?;
    Ok(Json(PreviewResponse {
        message: "Generated preview data".into(),
        items: result.records,
        available_products: result.available_products,
    }))
}

/// Generate orders and create them in the store.
///
/// - Method: `POST`
/// - Path: `/generate-orders`
/// - Body: `StoreRequest`
/// - Response: `OperationResponse`
async fn generate_orders(
    State(state): State<AppState>,
    Json(payload): Json<StoreRequest>,
) -> Result<Json<OperationResponse>, AppError> {
    crate::metrics::inc_requests("/generate-orders");
    let (api, _guard) = connect_store(&state, &payload).await?;
    let response = state
        .pipeline
        .generate_orders(api.as_ref(), payload.num_items, payload.date_range_days)
        .await?;
    Ok(Json(response))
}

async fn generate_inventory(
    State(state): State<AppState>,
    Json(payload): Json<StoreRequest>,
) -> Result<Json<OperationResponse>, AppError> {
    crate::metrics::inc_requests("/generate-inventory");
    let (api, _guard) = connect_store(&state, &payload).await?;
    let response = state
        .pipeline
        .generate_inventory(api.as_ref(), payload.num_items)
        .await?;
    Ok(Json(response))
}

/// Delete every order carrying the synthetic marker. Safe to repeat.
async fn clear_orders(
    State(state): State<AppState>,
    Json(payload): Json<StoreRequest>,
) -> Result<Json<OperationResponse>, AppError> {
    crate::metrics::inc_requests("/clear-orders");
    let (api, _guard) = connect_store(&state, &payload).await?;
    let response = state.pipeline.clear_generated_orders(api.as_ref()).await?;
    Ok(Json(response))
}

async fn reset_inventory(
    State(state): State<AppState>,
    Json(payload): Json<StoreRequest>,
) -> Result<Json<OperationResponse>, AppError> {
    crate::metrics::inc_requests("/reset-inventory");
    let (api, _guard) = connect_store(&state, &payload).await?;
    let response = state.pipeline.reset_inventory(api.as_ref()).await?;
    Ok(Json(response))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput | PipelineErrorKind::EmptyCatalog => {
                        StatusCode::BAD_REQUEST
                    }
                    PipelineErrorKind::GenerationInvalid => StatusCode::UNPROCESSABLE_ENTITY,
                    PipelineErrorKind::UpstreamRejected => StatusCode::FAILED_DEPENDENCY,
                    PipelineErrorKind::UpstreamUnavailable | PipelineErrorKind::ModelUnavailable => {
                        StatusCode::BAD_GATEWAY
                    }
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                error!(
                    target = "synthstore.api",
                    stage = err.stage(),
                    kind = err.kind().label(),
                    error = %err,
                    "request_failed"
                );
                let payload = ApiError {
                    error: err.detail().to_string(),
                    kind: Some(err.kind().label().to_string()),
                    stage: Some(err.stage().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

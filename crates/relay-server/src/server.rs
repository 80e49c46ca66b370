//! HTTP Server - WebSocket 网关与辅助 REST 路由

use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relay_bridge::{load_user, sample_records, store_user, PersonRecord, StoreError};

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::ws_handler;

/// 运行 HTTP 服务器，`shutdown` 被取消时优雅退出
pub async fn run_server(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Relay server starting on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// 创建路由
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/publish", get(publish_handler))
        .route("/data", axum::routing::post(store_default_handler))
        .route("/data/:id", get(load_handler).post(store_handler))
        .route("/connections/:id", axum::routing::delete(close_connection_handler))
        .route("/ws/:id", get(ws_handler))
        // 中间件
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler() -> &'static str {
    "Hello, World 👋!"
}

/// 健康检查处理器
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.gateway.connection_pool();
    Json(json!({
        "status": "ok",
        "connections": pool.count(),
        "reserved": pool.reserved(),
        "at_capacity": pool.is_full(),
        "identities": state.gateway.registry().len(),
        "bridge": state.bridge_state().as_str(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// 由服务端关闭某个身份的当前连接
async fn close_connection_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.gateway.close(&identity, "closed by server")?;
    tracing::info!(identity = %identity, "Server closed connection");
    Ok(StatusCode::NO_CONTENT)
}

/// 向外部频道发布示例记录
async fn publish_handler(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.publisher.publish(&sample_records()).await?;
    Ok("published")
}

async fn store_default_handler(
    state: State<AppState>,
    body: Result<Json<PersonRecord>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    store_record(state, 1, body).await
}

async fn store_handler(
    state: State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<PersonRecord>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = id
        .parse::<u64>()
        .map_err(|_| ApiError::BadRequest(format!("invalid id: {}", id)))?;
    store_record(state, id, body).await
}

async fn store_record(
    State(state): State<AppState>,
    id: u64,
    body: Result<Json<PersonRecord>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(record) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    store_user(state.store.as_ref(), id, &record).await?;
    tracing::debug!(id, name = %record.name, "Stored user data");
    Ok(Json(json!({ "message": "stored" })))
}

async fn load_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = id.parse::<u64>().map_err(|_| ApiError::NotFound)?;
    match load_user(state.store.as_ref(), id).await {
        Ok(Some(value)) => Ok((StatusCode::OK, Json(value))),
        Ok(None) => Err(ApiError::NotFound),
        Err(StoreError::Codec(e)) => {
            tracing::warn!(id, error = %e, "Stored user data is unreadable");
            Err(ApiError::NotFound)
        }
        Err(e) => Err(e.into()),
    }
}

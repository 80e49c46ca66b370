//! HTTP 错误响应

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use relay_bridge::{BridgeError, StoreError};
use relay_gateway::GatewayError;
use serde_json::json;

/// Errors returned by the auxiliary HTTP routes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("data not found")]
    NotFound,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("publish error: {0}")]
    Publish(#[from] BridgeError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": "data not found" })),
            )
                .into_response(),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "User data store failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "error" })),
                )
                    .into_response()
            }
            // plain body, same as the success path
            ApiError::Publish(e) => {
                tracing::error!(error = %e, "Publish failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "error").into_response()
            }
            ApiError::Gateway(GatewayError::IdentityNotConnected(identity)) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": format!("not connected: {}", identity) })),
            )
                .into_response(),
            ApiError::Gateway(e) => {
                tracing::warn!(error = %e, "Gateway request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "error" })),
                )
                    .into_response()
            }
        }
    }
}

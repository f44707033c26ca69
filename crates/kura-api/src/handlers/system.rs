//! Health check and API description.

use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::ApiDoc;

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

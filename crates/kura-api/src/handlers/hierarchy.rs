//! Tree structure handlers: attach, detach, reparent, root ordering,
//! breadcrumbs and closure maintenance.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use kura_core::{BreadcrumbEntry, ClosureReport, MoveDirection};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct AttachChildBody {
    pub child_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ReparentBody {
    pub parent_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MoveRootBody {
    pub direction: MoveDirection,
}

/// Attach an existing class (with its subtree) under `id`.
///
/// # Returns
/// - 204 No Content on success
/// - 404 Not Found if either class doesn't exist
/// - 409 Conflict with code `CYCLE_DETECTED` or `CONFLICT`
pub async fn attach_child(
    State(state): State<AppState>,
    Path(parent_id): Path<Uuid>,
    Json(body): Json<AttachChildBody>,
) -> Result<StatusCode, ApiError> {
    state.hierarchy.attach_child(parent_id, body.child_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Move a class under a new parent.
pub async fn reparent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReparentBody>,
) -> Result<StatusCode, ApiError> {
    state.hierarchy.reparent(id, body.parent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Make a class a root; a root stays a root.
pub async fn detach_child(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.hierarchy.detach_child(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Swap a root with its neighbour and renumber roots.
///
/// # Returns
/// - 204 No Content, also when the move is out of range
/// - 404 Not Found if the class doesn't exist or is not a root
pub async fn move_root(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<MoveRootBody>,
) -> Result<StatusCode, ApiError> {
    state.hierarchy.move_root(id, body.direction).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Ancestor titles from root to immediate parent.
pub async fn ancestor_path(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.breadcrumbs.ancestor_path(id).await?))
}

/// Ancestors with ids and depths, root first.
pub async fn breadcrumb(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BreadcrumbEntry>>, ApiError> {
    Ok(Json(state.breadcrumbs.breadcrumb(id).await?))
}

/// Report closure drift without repairing it.
pub async fn verify_closure(
    State(state): State<AppState>,
) -> Result<Json<ClosureReport>, ApiError> {
    Ok(Json(state.hierarchy.verify_closure().await?))
}

/// Rewrite the closure index from parent links.
///
/// # Returns
/// - 200 OK with `{"edge_count": n}`
pub async fn rebuild_closure(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let edge_count = state.hierarchy.rebuild_closure().await?;
    info!(subsystem = "api", op = "rebuild", edge_count, "Closure rebuild requested");
    Ok(Json(serde_json::json!({ "edge_count": edge_count })))
}

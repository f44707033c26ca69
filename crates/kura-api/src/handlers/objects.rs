//! Object assignment and count handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use kura_core::{defaults::DIRECT_OBJECTS_LIMIT, ClassCounts};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct AssignObjectBody {
    /// New primary class; `null` clears the assignment.
    pub class_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct BatchCountsBody {
    pub class_ids: Vec<Uuid>,
}

/// Query parameters for listing directly assigned objects.
#[derive(Debug, Deserialize)]
pub struct DirectObjectsQuery {
    pub limit: Option<i64>,
}

/// Set or clear an object's primary local class.
///
/// # Returns
/// - 204 No Content on success
/// - 404 Not Found if the class doesn't exist
pub async fn assign_object(
    State(state): State<AppState>,
    Path(object_id): Path<Uuid>,
    Json(body): Json<AssignObjectBody>,
) -> Result<StatusCode, ApiError> {
    state.assignments.assign_object(object_id, body.class_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Direct and total object counts for one class.
pub async fn class_counts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClassCounts>, ApiError> {
    let direct = state.counts.direct_count(id).await?;
    let total = state.counts.total_count(id).await?;
    Ok(Json(ClassCounts {
        class_id: id,
        direct,
        total,
    }))
}

/// Counts for many classes in request order; unknown ids are skipped.
pub async fn batch_counts(
    State(state): State<AppState>,
    Json(body): Json<BatchCountsBody>,
) -> Result<Json<Vec<ClassCounts>>, ApiError> {
    Ok(Json(state.counts.counts(&body.class_ids).await?))
}

/// Ids of objects assigned directly to a class.
///
/// # Query Parameters
/// - `limit`: maximum ids returned, clamped to `1..=DIRECT_OBJECTS_LIMIT`
pub async fn direct_objects(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DirectObjectsQuery>,
) -> Result<Json<Vec<Uuid>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DIRECT_OBJECTS_LIMIT)
        .clamp(1, DIRECT_OBJECTS_LIMIT);
    Ok(Json(state.counts.direct_objects(id, limit).await?))
}

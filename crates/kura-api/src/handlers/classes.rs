//! Local class HTTP handlers.
//!
//! Reads go straight to the class repository; every write that touches
//! tree structure is delegated to the hierarchy maintainer so the closure
//! index is never bypassed.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use kura_core::{
    ClassDetail, ClassSearchHit, CreateLocalClassRequest, LocalClass, UpdateLocalClassRequest,
};

use super::CreatedId;
use crate::{ApiError, AppState};

/// Query parameters for typeahead search.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Free-text term matched against labels and local numbers.
    #[serde(default)]
    pub q: String,
}

/// Create a local class, optionally under a parent.
///
/// # Returns
/// - 201 Created with `{"id": ...}`
/// - 400 Bad Request if no label is given
/// - 404 Not Found if the parent doesn't exist
pub async fn create_class(
    State(state): State<AppState>,
    Json(body): Json<CreateLocalClassRequest>,
) -> Result<(StatusCode, Json<CreatedId>), ApiError> {
    let id = state.hierarchy.create_class(body).await?;
    Ok((StatusCode::CREATED, CreatedId::json(id)))
}

/// Get a local class by ID.
///
/// # Returns
/// - 200 OK with the class
/// - 404 Not Found if the class doesn't exist
pub async fn get_class(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LocalClass>, ApiError> {
    state
        .classes
        .get_class(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Local class {} not found", id)))
}

/// Update descriptive fields, and the parent when `parent` is not `keep`.
///
/// # Returns
/// - 204 No Content on success
/// - 400 Bad Request if the update leaves the class without a label
/// - 404 Not Found if the class or new parent doesn't exist
/// - 409 Conflict if the parent change would create a cycle
pub async fn update_class(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateLocalClassRequest>,
) -> Result<StatusCode, ApiError> {
    state.hierarchy.update_class(id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a leaf class with no directly assigned objects.
///
/// # Returns
/// - 204 No Content on success
/// - 404 Not Found if the class doesn't exist
/// - 409 Conflict with code `HAS_OBJECTS` or `HAS_CHILDREN`
pub async fn delete_class(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.hierarchy.delete_class(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Class with breadcrumb, counts, children, links and preferred record.
pub async fn class_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClassDetail>, ApiError> {
    state
        .classes
        .class_detail(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Local class {} not found", id)))
}

/// Direct children of a class.
pub async fn list_children(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LocalClass>>, ApiError> {
    Ok(Json(state.classes.list_children(id).await?))
}

/// Root classes in display order.
pub async fn list_roots(
    State(state): State<AppState>,
) -> Result<Json<Vec<LocalClass>>, ApiError> {
    Ok(Json(state.classes.list_roots().await?))
}

/// Typeahead search.
///
/// # Query Parameters
/// - `q`: search term; blank after sanitizing returns an empty list
///
/// # Returns
/// - 200 OK with hits ranked by total count, then display string
pub async fn search_classes(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ClassSearchHit>>, ApiError> {
    Ok(Json(state.classes.search(&query.q).await?))
}

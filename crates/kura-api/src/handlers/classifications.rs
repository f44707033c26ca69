//! External classification handlers: links, preferred record and the
//! authority catalog.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use kura_core::{Classification, ClassificationScheme, LinkExternalRequest, LinkedClassification};

use super::CreatedId;
use crate::{ApiError, AppState};

/// Query parameters for listing the catalog.
#[derive(Debug, Deserialize)]
pub struct ListClassificationsQuery {
    /// Restrict to one scheme: `aat` or `wikidata`.
    pub scheme: Option<String>,
}

/// Query parameters for looking up a record by its natural key.
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub scheme: String,
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkExistingBody {
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct SetPreferredBody {
    pub classification_id: Uuid,
}

/// Link a class to an external record, creating the record if needed.
///
/// # Returns
/// - 201 Created with `{"classification_id": ...}`
/// - 400 Bad Request for an unknown scheme, blank uri or bad confidence
/// - 404 Not Found if the class doesn't exist
pub async fn link_external(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<LinkExternalRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let classification_id = state.links.link_external(id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "classification_id": classification_id })),
    ))
}

/// Link a class to a record already in the catalog.
///
/// The body is optional; an absent confidence keeps any stored value.
pub async fn link_existing(
    State(state): State<AppState>,
    Path((id, classification_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<LinkExistingBody>>,
) -> Result<StatusCode, ApiError> {
    let confidence = body.and_then(|Json(b)| b.confidence);
    state
        .links
        .link_existing(id, classification_id, confidence)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove a link; removing a missing link succeeds.
pub async fn unlink_external(
    State(state): State<AppState>,
    Path((id, classification_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.links.unlink_external(id, classification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Linked records of a class, scheme then label.
pub async fn list_links(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LinkedClassification>>, ApiError> {
    Ok(Json(state.links.list_links(id).await?))
}

/// Designate the canonical external record of a class.
///
/// # Returns
/// - 204 No Content on success
/// - 400 Bad Request if the record is not linked to the class
/// - 404 Not Found if the class or record doesn't exist
pub async fn set_preferred(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetPreferredBody>,
) -> Result<StatusCode, ApiError> {
    state
        .links
        .set_preferred_external(id, body.classification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resolved preferred record, or `null` when none is set or still linked.
pub async fn preferred_external(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<Classification>>, ApiError> {
    Ok(Json(state.preferred.preferred_external(id).await?))
}

/// Catalog records ordered by scheme then label.
///
/// # Query Parameters
/// - `scheme`: optional filter (`aat` | `wikidata`)
pub async fn list_classifications(
    State(state): State<AppState>,
    Query(query): Query<ListClassificationsQuery>,
) -> Result<Json<Vec<Classification>>, ApiError> {
    let scheme = query
        .scheme
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<ClassificationScheme>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    Ok(Json(state.catalog.list_classifications(scheme).await?))
}

/// Get one catalog record.
pub async fn get_classification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Classification>, ApiError> {
    state
        .catalog
        .get_classification(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Classification {} not found", id)))
}

/// Find a catalog record by `(scheme, uri)`.
///
/// # Returns
/// - 200 OK with the record
/// - 400 Bad Request for an unknown scheme
/// - 404 Not Found if no record has that key
pub async fn lookup_classification(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Classification>, ApiError> {
    let scheme = query
        .scheme
        .parse::<ClassificationScheme>()
        .map_err(ApiError::BadRequest)?;
    state
        .catalog
        .find_classification(scheme, &query.uri)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "Classification {} {} not found",
                scheme,
                query.uri.trim()
            ))
        })
}

/// Register a record in the catalog without linking it to a class.
///
/// Registering an existing `(scheme, uri)` returns the stored id.
///
/// # Returns
/// - 201 Created with `{"id": ...}`
/// - 400 Bad Request for an unknown scheme or blank uri
pub async fn upsert_classification(
    State(state): State<AppState>,
    Json(body): Json<LinkExternalRequest>,
) -> Result<(StatusCode, Json<CreatedId>), ApiError> {
    let record = body.validate()?;
    let id = state.catalog.upsert_classification(&record).await?;
    Ok((StatusCode::CREATED, CreatedId::json(id)))
}

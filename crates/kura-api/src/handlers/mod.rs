//! HTTP handlers for kura-api.

pub mod classes;
pub mod classifications;
pub mod hierarchy;
pub mod objects;
pub mod system;

use axum::Json;
use serde::Serialize;
use uuid::Uuid;

/// Response body for operations that create a resource.
#[derive(Debug, Serialize)]
pub struct CreatedId {
    pub id: Uuid,
}

impl CreatedId {
    pub fn json(id: Uuid) -> Json<Self> {
        Json(Self { id })
    }
}

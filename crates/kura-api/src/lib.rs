//! # kura-api
//!
//! HTTP surface for the kura classification index.
//!
//! The router is built over trait objects so the same handlers serve the
//! PostgreSQL repositories in production and [`MemoryCatalog`] in tests.

use std::sync::Arc;

use axum::{
    http::{header, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use kura_core::{
    BreadcrumbBuilder, ClassificationCatalog, CountAggregator, ExternalLinkRepository,
    HierarchyMaintainer, LocalClassRepository, MemoryCatalog, ObjectAssignmentRepository,
    PreferredLinkResolver,
};
use kura_db::Database;

pub mod config;
pub mod error;
pub mod handlers;

pub use config::ServerConfig;
pub use error::ApiError;

/// Shared handler state: one trait object per repository contract.
#[derive(Clone)]
pub struct AppState {
    pub classes: Arc<dyn LocalClassRepository>,
    pub hierarchy: Arc<dyn HierarchyMaintainer>,
    pub counts: Arc<dyn CountAggregator>,
    pub breadcrumbs: Arc<dyn BreadcrumbBuilder>,
    pub catalog: Arc<dyn ClassificationCatalog>,
    pub links: Arc<dyn ExternalLinkRepository>,
    pub preferred: Arc<dyn PreferredLinkResolver>,
    pub assignments: Arc<dyn ObjectAssignmentRepository>,
}

impl AppState {
    /// State backed by the PostgreSQL repositories.
    pub fn from_database(db: &Database) -> Self {
        Self {
            classes: Arc::new(db.classes.clone()),
            hierarchy: Arc::new(db.hierarchy.clone()),
            counts: Arc::new(db.aggregates.clone()),
            breadcrumbs: Arc::new(db.aggregates.clone()),
            catalog: Arc::new(db.classifications.clone()),
            links: Arc::new(db.classifications.clone()),
            preferred: Arc::new(db.classifications.clone()),
            assignments: Arc::new(db.assignments.clone()),
        }
    }

    /// State backed by a single in-memory catalog.
    pub fn in_memory(catalog: Arc<MemoryCatalog>) -> Self {
        Self {
            classes: catalog.clone(),
            hierarchy: catalog.clone(),
            counts: catalog.clone(),
            breadcrumbs: catalog.clone(),
            catalog: catalog.clone(),
            links: catalog.clone(),
            preferred: catalog.clone(),
            assignments: catalog,
        }
    }
}

/// OpenAPI document served at `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kura Classification API",
        description = "Hierarchical local classes with a closure index, object counts, breadcrumbs and external authority links"
    ),
    components(schemas(
        kura_core::LocalClass,
        kura_core::CreateLocalClassRequest,
        kura_core::UpdateLocalClassRequest,
        kura_core::ParentUpdate,
        kura_core::MoveDirection,
        kura_core::ClassificationScheme,
        kura_core::Classification,
        kura_core::LinkedClassification,
        kura_core::LinkExternalRequest,
        kura_core::ClassCounts,
        kura_core::BreadcrumbEntry,
        kura_core::ClassSearchHit,
        kura_core::ClassDetail,
        kura_core::ClosureEdge,
        kura_core::ClosureReport,
    )),
    tags(
        (name = "Classes", description = "Local class reads and writes"),
        (name = "Hierarchy", description = "Tree structure and closure maintenance"),
        (name = "Classifications", description = "External authority links"),
        (name = "Objects", description = "Object assignment and counts"),
        (name = "System", description = "Health checks and API description")
    )
)]
pub struct ApiDoc;

/// Build the application router with tracing, request-id and CORS layers.
pub fn router(state: AppState) -> Router {
    use handlers::{classes, classifications, hierarchy, objects, system};

    Router::new()
        .route("/health", get(system::health_check))
        .route("/openapi.json", get(system::openapi_json))
        // Local classes
        .route("/api/v1/classes", post(classes::create_class))
        .route("/api/v1/classes/roots", get(classes::list_roots))
        .route("/api/v1/classes/search", get(classes::search_classes))
        .route("/api/v1/classes/counts", post(objects::batch_counts))
        .route(
            "/api/v1/classes/:id",
            get(classes::get_class)
                .patch(classes::update_class)
                .delete(classes::delete_class),
        )
        .route("/api/v1/classes/:id/detail", get(classes::class_detail))
        .route(
            "/api/v1/classes/:id/children",
            get(classes::list_children).post(hierarchy::attach_child),
        )
        .route("/api/v1/classes/:id/path", get(hierarchy::ancestor_path))
        .route("/api/v1/classes/:id/breadcrumb", get(hierarchy::breadcrumb))
        .route(
            "/api/v1/classes/:id/parent",
            put(hierarchy::reparent).delete(hierarchy::detach_child),
        )
        .route("/api/v1/classes/:id/move", post(hierarchy::move_root))
        // Counts and objects
        .route("/api/v1/classes/:id/counts", get(objects::class_counts))
        .route("/api/v1/classes/:id/objects", get(objects::direct_objects))
        .route("/api/v1/objects/:id/class", put(objects::assign_object))
        // External classifications
        .route(
            "/api/v1/classes/:id/links",
            get(classifications::list_links).post(classifications::link_external),
        )
        .route(
            "/api/v1/classes/:id/links/:classification_id",
            put(classifications::link_existing).delete(classifications::unlink_external),
        )
        .route(
            "/api/v1/classes/:id/preferred",
            get(classifications::preferred_external).put(classifications::set_preferred),
        )
        .route(
            "/api/v1/classifications",
            get(classifications::list_classifications).post(classifications::upsert_classification),
        )
        .route(
            "/api/v1/classifications/lookup",
            get(classifications::lookup_classification),
        )
        .route(
            "/api/v1/classifications/:id",
            get(classifications::get_classification),
        )
        // Closure maintenance
        .route("/api/v1/admin/closure/verify", get(hierarchy::verify_closure))
        .route("/api/v1/admin/closure/rebuild", post(hierarchy::rebuild_closure))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        )
        .with_state(state)
}

//! Router tests over the in-memory catalog.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use kura_api::{router, AppState};
use kura_core::MemoryCatalog;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    router(AppState::in_memory(Arc::new(MemoryCatalog::new())))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, label: &str, parent: Option<Uuid>) -> Uuid {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/classes",
        Some(json!({ "label_primary": label, "parent_id": parent })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn assign(app: &Router, class_id: Uuid, n: usize) {
    for _ in 0..n {
        let (status, _) = send(
            app,
            Method::PUT,
            &format!("/api/v1/objects/{}/class", Uuid::new_v4()),
            Some(json!({ "class_id": class_id })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_openapi_lists_schemas() {
    let (status, body) = send(&app(), Method::GET, "/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["components"]["schemas"]["ClassSearchHit"].is_object());
}

#[tokio::test]
async fn test_tea_bowl_counts_path_and_search() {
    let app = app();
    let bowl = create(&app, "Tea Bowl", None).await;
    let raku = create(&app, "Raku Chawan", Some(bowl)).await;
    assign(&app, bowl, 1).await;
    assign(&app, raku, 2).await;

    let (status, body) = send(&app, Method::GET, &format!("/api/v1/classes/{bowl}/counts"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["direct"], 1);
    assert_eq!(body["total"], 3);

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{raku}/counts"), None).await;
    assert_eq!(body["direct"], 2);
    assert_eq!(body["total"], 2);

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{raku}/path"), None).await;
    assert_eq!(body, json!(["Tea Bowl"]));

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/v1/classes/counts",
        Some(json!({ "class_ids": [raku, Uuid::new_v4(), bowl] })),
    )
    .await;
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["class_id"], raku.to_string());

    let (status, body) = send(&app, Method::GET, "/api/v1/classes/search?q=chawan", None).await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["parent_path"], json!(["Tea Bowl"]));
    assert_eq!(hits[0]["display"], "Raku Chawan · 2 items");

    let (_, body) = send(&app, Method::GET, "/api/v1/classes/search?q=%20%20", None).await;
    assert_eq!(body, json!([]));

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{raku}/objects?limit=1"), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reads_of_unknown_class_are_not_found() {
    let app = app();
    let missing = Uuid::new_v4();
    for path in ["", "/detail", "/children", "/path", "/counts", "/links"] {
        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/v1/classes/{missing}{path}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "GET {path}");
        assert_eq!(body["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_cycle_rejected_with_conflict() {
    let app = app();
    let a = create(&app, "A", None).await;
    let b = create(&app, "B", Some(a)).await;

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/classes/{a}/parent"),
        Some(json!({ "parent_id": b })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CYCLE_DETECTED");

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{b}/path"), None).await;
    assert_eq!(body, json!(["A"]));
}

#[tokio::test]
async fn test_attach_detach_round_trip() {
    let app = app();
    let a = create(&app, "A", None).await;
    let x = create(&app, "X", None).await;
    let y = create(&app, "Y", Some(x)).await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/classes/{a}/children"),
        Some(json!({ "child_id": x })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{y}/breadcrumb"), None).await;
    let crumbs = body.as_array().unwrap();
    assert_eq!(crumbs.len(), 2);
    assert_eq!(crumbs[0]["title"], "A");
    assert_eq!(crumbs[0]["depth"], 2);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/v1/classes/{x}/parent"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{y}/path"), None).await;
    assert_eq!(body, json!(["X"]));

    let (_, body) = send(&app, Method::GET, "/api/v1/admin/closure/verify", None).await;
    assert_eq!(body["missing"], json!([]));
    assert_eq!(body["unexpected"], json!([]));
}

#[tokio::test]
async fn test_delete_rejections() {
    let app = app();
    let parent = create(&app, "Kettle", None).await;
    let child = create(&app, "Iron Kettle", Some(parent)).await;

    let (status, body) = send(&app, Method::DELETE, &format!("/api/v1/classes/{parent}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "HAS_CHILDREN");

    assign(&app, child, 1).await;
    let (status, body) = send(&app, Method::DELETE, &format!("/api/v1/classes/{child}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "HAS_OBJECTS");

    let leaf = create(&app, "Lid", Some(parent)).await;
    let (status, _) = send(&app, Method::DELETE, &format!("/api/v1/classes/{leaf}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::GET, &format!("/api/v1/classes/{leaf}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_link_preferred_unlink() {
    let app = app();
    let bowl = create(&app, "Tea Bowl", None).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/classes/{bowl}/links"),
        Some(json!({
            "scheme": "aat",
            "uri": "http://vocab.getty.edu/aat/300266745",
            "label_primary": "tea bowls"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let cid = body["classification_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/classes/{bowl}/preferred"),
        Some(json!({ "classification_id": cid })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{bowl}/preferred"), None).await;
    assert_eq!(body["id"], cid);
    assert_eq!(body["scheme"], "aat");

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{bowl}/links"), None).await;
    assert_eq!(body[0]["preferred"], true);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/v1/classes/{bowl}/links/{cid}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::GET, &format!("/api/v1/classes/{bowl}/preferred"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());

    // Relink without a body, then the catalog still holds the record.
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/classes/{bowl}/links/{cid}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(&app, Method::GET, "/api/v1/classifications?scheme=aat", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    let (status, _) = send(&app, Method::GET, &format!("/api/v1/classifications/{cid}"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bad_input_is_bad_request() {
    let app = app();
    let bowl = create(&app, "Tea Bowl", None).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/classes/{bowl}/links"),
        Some(json!({ "scheme": "lcsh", "uri": "http://id.loc.gov/x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, _) = send(&app, Method::GET, "/api/v1/classifications?scheme=lcsh", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/classes",
        Some(json!({ "label_primary": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_routes_parent_change() {
    let app = app();
    let a = create(&app, "A", None).await;
    let b = create(&app, "B", None).await;

    let (status, _) = send(
        &app,
        Method::PATCH,
        &format!("/api/v1/classes/{b}"),
        Some(json!({ "label_primary": "B prime", "parent": { "under": a } })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{b}"), None).await;
    assert_eq!(body["label_primary"], "B prime");
    assert_eq!(body["parent_id"], a.to_string());

    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{a}/detail"), None).await;
    assert_eq!(body["children"].as_array().unwrap().len(), 1);
    assert_eq!(body["counts"]["total"], 0);
}

#[tokio::test]
async fn test_move_root_swaps_neighbours() {
    let app = app();
    create(&app, "A", None).await;
    create(&app, "B", None).await;

    let (_, body) = send(&app, Method::GET, "/api/v1/classes/roots", None).await;
    let before: Vec<String> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/classes/{}/move", before[1]),
        Some(json!({ "direction": "up" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, Method::GET, "/api/v1/classes/roots", None).await;
    let roots = body.as_array().unwrap();
    assert_eq!(roots[0]["id"], before[1]);
    assert_eq!(roots[1]["id"], before[0]);
    assert_eq!(roots[0]["sort_order"], 1);
    assert_eq!(roots[1]["sort_order"], 2);
}

#[tokio::test]
async fn test_rebuild_reports_edge_count() {
    let app = app();
    let a = create(&app, "A", None).await;
    create(&app, "B", Some(a)).await;

    let (status, body) = send(&app, Method::POST, "/api/v1/admin/closure/rebuild", None).await;
    assert_eq!(status, StatusCode::OK);
    // two self edges plus (A, B, 1)
    assert_eq!(body["edge_count"], 3);
}

#[tokio::test]
async fn test_register_and_lookup_classification() {
    let app = app();
    let record = json!({
        "scheme": "Wikidata",
        "uri": " http://www.wikidata.org/entity/Q1049316 ",
        "label_primary": "chawan"
    });

    let (status, body) = send(&app, Method::POST, "/api/v1/classifications", Some(record.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    // Same natural key returns the stored id.
    let (_, body) = send(&app, Method::POST, "/api/v1/classifications", Some(record)).await;
    assert_eq!(body["id"], id);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/classifications/lookup?scheme=wikidata&uri=http://www.wikidata.org/entity/Q1049316",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
    assert_eq!(body["scheme"], "wikidata");

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/classifications/lookup?scheme=aat&uri=http://www.wikidata.org/entity/Q1049316",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/classifications/lookup?scheme=lcsh&uri=x",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/classifications",
        Some(json!({ "scheme": "aat", "uri": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A registered record can be linked by id.
    let bowl = create(&app, "Tea Bowl", None).await;
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/classes/{bowl}/links/{id}"),
        Some(json!({ "confidence": 0.8 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(&app, Method::GET, &format!("/api/v1/classes/{bowl}/links"), None).await;
    assert_eq!(body[0]["classification"]["id"], id);
}

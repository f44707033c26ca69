//! End-to-end scenarios over the in-memory catalog.

use kura_core::*;
use uuid::Uuid;

struct TeaTree {
    catalog: MemoryCatalog,
    bowl: Uuid,
    raku: Uuid,
}

/// "Tea Bowl" root with a "Raku Chawan" child; one object on the bowl, two
/// on the raku.
async fn tea_tree() -> TeaTree {
    let catalog = MemoryCatalog::new();
    let bowl = catalog
        .create_class(CreateLocalClassRequest::labeled("Tea Bowl", None))
        .await
        .unwrap();
    let raku = catalog
        .create_class(CreateLocalClassRequest::labeled("Raku Chawan", Some(bowl)))
        .await
        .unwrap();
    catalog.assign_object(Uuid::new_v4(), Some(bowl)).await.unwrap();
    for _ in 0..2 {
        catalog.assign_object(Uuid::new_v4(), Some(raku)).await.unwrap();
    }
    TeaTree {
        catalog,
        bowl,
        raku,
    }
}

async fn create(catalog: &MemoryCatalog, label: &str, parent: Option<Uuid>) -> Uuid {
    catalog
        .create_class(CreateLocalClassRequest::labeled(label, parent))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_counts_and_breadcrumb() {
    let t = tea_tree().await;

    assert_eq!(t.catalog.direct_count(t.bowl).await.unwrap(), 1);
    assert_eq!(t.catalog.total_count(t.bowl).await.unwrap(), 3);
    assert_eq!(t.catalog.direct_count(t.raku).await.unwrap(), 2);
    assert_eq!(t.catalog.total_count(t.raku).await.unwrap(), 2);

    assert_eq!(t.catalog.ancestor_path(t.raku).await.unwrap(), vec!["Tea Bowl"]);
    assert!(t.catalog.ancestor_path(t.bowl).await.unwrap().is_empty());

    let counts = t
        .catalog
        .counts(&[t.raku, Uuid::new_v4(), t.bowl])
        .await
        .unwrap();
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[0].class_id, t.raku);
    assert_eq!(counts[1].total, 3);
}

#[tokio::test]
async fn test_reads_on_unknown_class_are_not_found() {
    let t = tea_tree().await;
    let missing = Uuid::new_v4();

    let err = t.catalog.total_count(missing).await.unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
    let err = t.catalog.breadcrumb(missing).await.unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
    assert!(t.catalog.get_class(missing).await.unwrap().is_none());
    assert!(t.catalog.class_detail(missing).await.unwrap().is_none());
}

#[tokio::test]
async fn test_total_is_at_least_direct_everywhere() {
    let t = tea_tree().await;
    let leaf = create(&t.catalog, "Black Raku", Some(t.raku)).await;
    let other = create(&t.catalog, "Ewer", None).await;
    t.catalog.assign_object(Uuid::new_v4(), Some(leaf)).await.unwrap();
    t.catalog.assign_object(Uuid::new_v4(), Some(other)).await.unwrap();

    for c in t
        .catalog
        .counts(&[t.bowl, t.raku, leaf, other])
        .await
        .unwrap()
    {
        assert!(c.total >= c.direct, "{:?}", c);
    }
    assert_eq!(t.catalog.total_count(t.bowl).await.unwrap(), 4);
}

#[tokio::test]
async fn test_link_preferred_and_unlink() {
    let t = tea_tree().await;
    let cid = t
        .catalog
        .link_external(
            t.bowl,
            LinkExternalRequest::new("aat", "http://vocab.getty.edu/aat/300266745", Some("tea bowls")),
        )
        .await
        .unwrap();

    t.catalog.set_preferred_external(t.bowl, cid).await.unwrap();
    let preferred = t.catalog.preferred_external(t.bowl).await.unwrap().unwrap();
    assert_eq!(preferred.id, cid);
    assert_eq!(preferred.scheme, ClassificationScheme::Aat);

    let links = t.catalog.list_links(t.bowl).await.unwrap();
    assert_eq!(links.len(), 1);
    assert!(links[0].preferred);

    t.catalog.unlink_external(t.bowl, cid).await.unwrap();
    assert!(t.catalog.preferred_external(t.bowl).await.unwrap().is_none());
    // The catalog record outlives the link.
    assert!(t.catalog.get_classification(cid).await.unwrap().is_some());
}

#[tokio::test]
async fn test_link_external_reuses_existing_record() {
    let t = tea_tree().await;
    let uri = "https://www.wikidata.org/wiki/Q1066099";
    let first = t
        .catalog
        .link_external(t.bowl, LinkExternalRequest::new("wikidata", uri, None))
        .await
        .unwrap();
    let second = t
        .catalog
        .link_external(t.raku, LinkExternalRequest::new("WIKIDATA", uri, None))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(t.catalog.list_classifications(None).await.unwrap().len(), 1);
    assert!(t
        .catalog
        .list_classifications(Some(ClassificationScheme::Aat))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_link_rejects_bad_input() {
    let t = tea_tree().await;
    let err = t
        .catalog
        .link_external(t.bowl, LinkExternalRequest::new("lcsh", "x", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");

    let mut req = LinkExternalRequest::new("aat", "300266745", None);
    req.confidence = Some(1.5);
    let err = t.catalog.link_external(t.bowl, req).await.unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");
    assert!(t.catalog.list_links(t.bowl).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_set_preferred_requires_link() {
    let t = tea_tree().await;
    let cid = t
        .catalog
        .link_external(t.raku, LinkExternalRequest::new("aat", "300266745", None))
        .await
        .unwrap();
    let err = t
        .catalog
        .set_preferred_external(t.bowl, cid)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");

    let err = t
        .catalog
        .set_preferred_external(t.bowl, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn test_cycle_rejected_and_tree_unchanged() {
    let t = tea_tree().await;
    let leaf = create(&t.catalog, "Black Raku", Some(t.raku)).await;
    let before = t.catalog.verify_closure().await.unwrap();

    let err = t.catalog.reparent(t.bowl, leaf).await.unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));
    let err = t.catalog.attach_child(t.raku, t.raku).await.unwrap_err();
    assert_eq!(err.kind(), "CYCLE_DETECTED");

    let after = t.catalog.verify_closure().await.unwrap();
    assert!(after.is_consistent());
    assert_eq!(after.edge_count, before.edge_count);
    assert_eq!(
        t.catalog.ancestor_path(leaf).await.unwrap(),
        vec!["Tea Bowl", "Raku Chawan"]
    );
    assert_eq!(
        t.catalog.get_class(t.bowl).await.unwrap().unwrap().parent_id,
        None
    );
}

#[tokio::test]
async fn test_delete_rejections() {
    let t = tea_tree().await;

    // Objects are checked before children.
    let err = t.catalog.delete_class(t.bowl).await.unwrap_err();
    assert!(matches!(err, Error::HasObjects { count: 1, .. }));

    let empty_parent = create(&t.catalog, "Kettle", None).await;
    create(&t.catalog, "Iron Kettle", Some(empty_parent)).await;
    let err = t.catalog.delete_class(empty_parent).await.unwrap_err();
    assert!(matches!(err, Error::HasChildren { count: 1, .. }));
    assert!(t.catalog.get_class(empty_parent).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_leaf_removes_edges_and_links() {
    let t = tea_tree().await;
    let leaf = create(&t.catalog, "Black Raku", Some(t.raku)).await;
    t.catalog
        .link_external(leaf, LinkExternalRequest::new("aat", "300266745", None))
        .await
        .unwrap();
    let before = t.catalog.verify_closure().await.unwrap().edge_count;

    t.catalog.delete_class(leaf).await.unwrap();

    let report = t.catalog.verify_closure().await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.edge_count, before - 3);
    assert!(t.catalog.get_class(leaf).await.unwrap().is_none());
    assert!(t.catalog.list_children(t.raku).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_attach_detach_round_trip() {
    let t = tea_tree().await;
    let ewer = create(&t.catalog, "Ewer", None).await;
    let spout = create(&t.catalog, "Spout", Some(ewer)).await;
    let before = t.catalog.verify_closure().await.unwrap();

    t.catalog.attach_child(t.raku, ewer).await.unwrap();
    assert_eq!(
        t.catalog.ancestor_path(spout).await.unwrap(),
        vec!["Tea Bowl", "Raku Chawan", "Ewer"]
    );
    t.catalog.assign_object(Uuid::new_v4(), Some(spout)).await.unwrap();
    assert_eq!(t.catalog.total_count(t.bowl).await.unwrap(), 4);

    t.catalog.detach_child(ewer).await.unwrap();
    let after = t.catalog.verify_closure().await.unwrap();
    assert!(after.is_consistent());
    assert_eq!(after.edge_count, before.edge_count);
    assert_eq!(t.catalog.ancestor_path(spout).await.unwrap(), vec!["Ewer"]);
    assert_eq!(t.catalog.total_count(t.bowl).await.unwrap(), 3);
}

#[tokio::test]
async fn test_update_class_routes_parent_change() {
    let t = tea_tree().await;
    let ewer = create(&t.catalog, "Ewer", None).await;

    let req = UpdateLocalClassRequest {
        label_primary: Some("  Raku  ".into()),
        local_number: Some("R-1".into()),
        parent: ParentUpdate::Under(ewer),
        ..Default::default()
    };
    t.catalog.update_class(t.raku, req).await.unwrap();

    let raku = t.catalog.get_class(t.raku).await.unwrap().unwrap();
    assert_eq!(raku.label_primary.as_deref(), Some("Raku"));
    assert_eq!(raku.parent_id, Some(ewer));
    assert_eq!(t.catalog.ancestor_path(t.raku).await.unwrap(), vec!["Ewer"]);
    assert_eq!(t.catalog.total_count(t.bowl).await.unwrap(), 1);

    // Raku now sits under Ewer, so moving Ewer under it closes a loop and
    // the label change is rolled back with it.
    let bad = UpdateLocalClassRequest {
        label_primary: Some("Renamed Ewer".into()),
        parent: ParentUpdate::Under(t.raku),
        ..Default::default()
    };
    let err = t.catalog.update_class(ewer, bad).await.unwrap_err();
    assert_eq!(err.kind(), "CYCLE_DETECTED");
    assert_eq!(
        t.catalog.get_class(ewer).await.unwrap().unwrap().label_primary.as_deref(),
        Some("Ewer")
    );
}

#[tokio::test]
async fn test_create_requires_a_label() {
    let catalog = MemoryCatalog::new();
    let req = CreateLocalClassRequest {
        label_primary: Some("   ".into()),
        ..Default::default()
    };
    let err = catalog.create_class(req).await.unwrap_err();
    assert_eq!(err.kind(), "INVALID_INPUT");

    let err = catalog
        .create_class(CreateLocalClassRequest::labeled("Orphan", Some(Uuid::new_v4())))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
    assert!(catalog.list_roots().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_move_root_swaps_and_renumbers() {
    let catalog = MemoryCatalog::new();
    let a = create(&catalog, "A", None).await;
    let b = create(&catalog, "B", None).await;
    let c = create(&catalog, "C", None).await;
    let child = create(&catalog, "A1", Some(a)).await;

    let order = |roots: Vec<LocalClass>| roots.into_iter().map(|r| r.id).collect::<Vec<_>>();
    let initial = order(catalog.list_roots().await.unwrap());
    assert_eq!(initial.len(), 3);

    catalog.move_root(initial[2], MoveDirection::Up).await.unwrap();
    let roots = catalog.list_roots().await.unwrap();
    assert_eq!(
        roots.iter().map(|r| r.sort_order).collect::<Vec<_>>(),
        vec![Some(1), Some(2), Some(3)]
    );
    assert_eq!(order(roots), vec![initial[0], initial[2], initial[1]]);

    // Out of range is a no-op.
    catalog.move_root(initial[0], MoveDirection::Up).await.unwrap();
    assert_eq!(
        order(catalog.list_roots().await.unwrap()),
        vec![initial[0], initial[2], initial[1]]
    );

    let err = catalog.move_root(child, MoveDirection::Up).await.unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
    assert!([a, b, c].iter().all(|id| initial.contains(id)));
}

#[tokio::test]
async fn test_search_ranks_by_total_and_formats_display() {
    let t = tea_tree().await;
    t.catalog
        .update_class(
            t.raku,
            UpdateLocalClassRequest {
                label_primary: Some("Raku Chawan".into()),
                label_secondary: Some("楽茶碗".into()),
                local_number: Some("2.1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Quotes and parentheses are stripped before matching.
    let hits = t.catalog.search("  cha(\"wan  ").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, t.raku);

    let hits = t.catalog.search("a").await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, t.bowl);
    assert_eq!(hits[0].display, "Tea Bowl · 3 items");
    assert_eq!(hits[1].display, "楽茶碗 · 2.1 · 2 items");
    assert_eq!(hits[1].parent_path, vec!["Tea Bowl"]);
    assert_eq!(hits[1].object_count_direct, 2);

    assert!(t.catalog.search(" \t ").await.unwrap().is_empty());
    assert_eq!(t.catalog.search("2.1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_class_detail_assembles_everything() {
    let t = tea_tree().await;
    let cid = t
        .catalog
        .link_external(t.raku, LinkExternalRequest::new("aat", "300266745", Some("raku")))
        .await
        .unwrap();
    t.catalog.set_preferred_external(t.raku, cid).await.unwrap();

    let detail = t.catalog.class_detail(t.raku).await.unwrap().unwrap();
    assert_eq!(detail.class.id, t.raku);
    assert_eq!(detail.breadcrumb.len(), 1);
    assert_eq!(detail.breadcrumb[0].id, t.bowl);
    assert_eq!(detail.counts.total, 2);
    assert!(detail.children.is_empty());
    assert_eq!(detail.links.len(), 1);
    assert_eq!(detail.preferred.map(|p| p.id), Some(cid));

    let objects = t.catalog.direct_objects(t.raku, 1).await.unwrap();
    assert_eq!(objects.len(), 1);
}

#[tokio::test]
async fn test_reassigning_object_moves_counts() {
    let t = tea_tree().await;
    let object = Uuid::new_v4();
    t.catalog.assign_object(object, Some(t.raku)).await.unwrap();
    assert_eq!(t.catalog.direct_count(t.raku).await.unwrap(), 3);

    t.catalog.assign_object(object, Some(t.bowl)).await.unwrap();
    assert_eq!(t.catalog.direct_count(t.raku).await.unwrap(), 2);
    assert_eq!(t.catalog.direct_count(t.bowl).await.unwrap(), 2);

    t.catalog.assign_object(object, None).await.unwrap();
    assert_eq!(t.catalog.total_count(t.bowl).await.unwrap(), 3);

    let err = t
        .catalog
        .assign_object(object, Some(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[tokio::test]
async fn test_children_order_local_numbers_by_byte_value() {
    let catalog = MemoryCatalog::new();
    let shelf = create(&catalog, "Shelf", None).await;
    for number in ["a1", "B2", "B10", "b1"] {
        let mut req = CreateLocalClassRequest::labeled(format!("Item {number}"), Some(shelf));
        req.local_number = Some(number.to_string());
        catalog.create_class(req).await.unwrap();
    }

    let numbers: Vec<String> = catalog
        .list_children(shelf)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|c| c.local_number)
        .collect();
    assert_eq!(numbers, vec!["B10", "B2", "a1", "b1"]);
}

//! In-memory implementation of every kura repository trait.
//!
//! Backs tests and embedded use. All state sits behind one `RwLock`; a
//! mutation runs against a staged copy and replaces the committed state
//! only when it succeeds, so readers never observe a half-applied change
//! and a rejected mutation leaves nothing behind.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::closure::{ClosureDelta, ClosureTable, ParentMap};
use crate::defaults::SEARCH_LIMIT;
use crate::error::{Error, Result};
use crate::models::*;
use crate::search::{display_string, matches_term, rank_hits, sanitize_search_term};
use crate::traits::*;
use crate::uuid_utils::new_v7;

#[derive(Debug, Clone, Default)]
struct CatalogState {
    classes: HashMap<Uuid, LocalClass>,
    closure: ClosureTable,
    classifications: HashMap<Uuid, Classification>,
    /// (local_class_id, classification_id) -> link
    links: BTreeMap<(Uuid, Uuid), LocalClassLink>,
    /// object_id -> primary local class
    assignments: HashMap<Uuid, Uuid>,
}

/// Root/children ordering: sort_order (nulls first), local_number (nulls last), id.
fn tree_order(a: &LocalClass, b: &LocalClass) -> std::cmp::Ordering {
    a.sort_order
        .cmp(&b.sort_order)
        .then_with(|| local_number_order(a, b))
        .then(a.id.cmp(&b.id))
}

fn local_number_order(a: &LocalClass, b: &LocalClass) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (&a.local_number, &b.local_number) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl CatalogState {
    fn class(&self, id: Uuid) -> Result<&LocalClass> {
        self.classes.get(&id).ok_or(Error::ClassNotFound(id))
    }

    fn class_mut(&mut self, id: Uuid) -> Result<&mut LocalClass> {
        self.classes.get_mut(&id).ok_or(Error::ClassNotFound(id))
    }

    fn direct_count(&self, id: Uuid) -> i64 {
        self.assignments.values().filter(|&&c| c == id).count() as i64
    }

    fn total_count(&self, id: Uuid) -> i64 {
        let subtree: HashSet<Uuid> = self.closure.subtree(id).into_iter().map(|(d, _)| d).collect();
        self.assignments
            .values()
            .filter(|c| subtree.contains(*c))
            .count() as i64
    }

    fn counts(&self, id: Uuid) -> ClassCounts {
        ClassCounts {
            class_id: id,
            direct: self.direct_count(id),
            total: self.total_count(id),
        }
    }

    fn ordered(&self, ids: impl IntoIterator<Item = Uuid>) -> Vec<LocalClass> {
        let mut out: Vec<LocalClass> = ids
            .into_iter()
            .filter_map(|id| self.classes.get(&id).cloned())
            .collect();
        out.sort_by(tree_order);
        out
    }

    fn children(&self, id: Uuid) -> Vec<LocalClass> {
        self.ordered(self.closure.children(id))
    }

    fn roots(&self) -> Vec<LocalClass> {
        self.ordered(
            self.classes
                .values()
                .filter(|c| c.is_root())
                .map(|c| c.id),
        )
    }

    fn breadcrumb(&self, id: Uuid) -> Result<Vec<BreadcrumbEntry>> {
        self.class(id)?;
        Ok(self
            .closure
            .ancestors(id)
            .into_iter()
            .map(|(ancestor, depth)| BreadcrumbEntry {
                id: ancestor,
                title: self
                    .classes
                    .get(&ancestor)
                    .map(LocalClass::display_title)
                    .unwrap_or_else(|| ancestor.to_string()),
                depth,
            })
            .collect())
    }

    fn links_of(&self, class_id: Uuid) -> Vec<LinkedClassification> {
        let preferred = self
            .classes
            .get(&class_id)
            .and_then(|c| c.preferred_classification_id);
        let mut out: Vec<LinkedClassification> = self
            .links
            .range((class_id, Uuid::nil())..=(class_id, Uuid::max()))
            .filter_map(|(_, link)| {
                self.classifications
                    .get(&link.classification_id)
                    .map(|c| LinkedClassification {
                        classification: c.clone(),
                        confidence: link.confidence,
                        preferred: preferred == Some(c.id),
                    })
            })
            .collect();
        out.sort_by(|a, b| {
            a.classification
                .scheme
                .cmp(&b.classification.scheme)
                .then_with(|| {
                    a.classification
                        .label_primary
                        .cmp(&b.classification.label_primary)
                })
                .then_with(|| a.classification.uri.cmp(&b.classification.uri))
        });
        out
    }

    fn preferred(&self, class_id: Uuid) -> Result<Option<Classification>> {
        let Some(pref) = self.class(class_id)?.preferred_classification_id else {
            return Ok(None);
        };
        let linked = self.links.contains_key(&(class_id, pref));
        match self.classifications.get(&pref) {
            Some(c) if linked => Ok(Some(c.clone())),
            _ => {
                warn!(
                    subsystem = "memory",
                    component = "resolver",
                    class_id = %class_id,
                    classification_id = %pref,
                    error_kind = "DANGLING_PREFERRED",
                    "Preferred classification is not linked; resolving to none"
                );
                Ok(None)
            }
        }
    }

    fn set_parent(&mut self, id: Uuid, parent: Option<Uuid>) -> Result<ClosureDelta> {
        let delta = self.closure.move_subtree(id, parent)?;
        let class = self.class_mut(id)?;
        class.parent_id = parent;
        class.updated_at_utc = Utc::now();
        Ok(delta)
    }

    fn parent_map(&self) -> ParentMap {
        self.classes
            .values()
            .map(|c| (c.id, c.parent_id))
            .collect()
    }

    fn upsert_classification(&mut self, record: &ExternalRecord) -> Uuid {
        if let Some(existing) = self
            .classifications
            .values()
            .find(|c| c.scheme == record.scheme && c.uri == record.uri)
        {
            return existing.id;
        }
        let id = new_v7();
        self.classifications.insert(
            id,
            Classification {
                id,
                scheme: record.scheme,
                uri: record.uri.clone(),
                label_primary: record.label_primary.clone(),
                label_secondary: record.label_secondary.clone(),
                kind: DEFAULT_CLASSIFICATION_KIND.to_string(),
                created_at_utc: Utc::now(),
            },
        );
        id
    }

    fn upsert_link(&mut self, class_id: Uuid, classification_id: Uuid, confidence: Option<f32>) {
        self.links
            .entry((class_id, classification_id))
            .and_modify(|link| {
                if confidence.is_some() {
                    link.confidence = confidence;
                }
            })
            .or_insert_with(|| LocalClassLink {
                local_class_id: class_id,
                classification_id,
                confidence,
                created_at_utc: Utc::now(),
            });
    }
}

/// Thread-safe in-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against a staged copy and commit it only on success.
    async fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut CatalogState) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let mut guard = self.state.write().await;
        let mut staged = guard.clone();
        match f(&mut staged) {
            Ok(out) => {
                *guard = staged;
                debug!(
                    subsystem = "memory",
                    component = "maintainer",
                    op,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Mutation committed"
                );
                Ok(out)
            }
            Err(e) => {
                debug!(
                    subsystem = "memory",
                    component = "maintainer",
                    op,
                    error_kind = e.kind(),
                    error = %e,
                    "Mutation rejected"
                );
                Err(e)
            }
        }
    }

    fn log_delta(op: &'static str, class_id: Uuid, delta: &ClosureDelta) {
        if delta.is_empty() {
            debug!(
                subsystem = "memory",
                component = "maintainer",
                op,
                class_id = %class_id,
                "No structural change"
            );
            return;
        }
        info!(
            subsystem = "memory",
            component = "maintainer",
            op,
            class_id = %class_id,
            edges_inserted = delta.inserted.len(),
            edges_removed = delta.removed.len(),
            "Hierarchy updated"
        );
    }
}

#[async_trait]
impl LocalClassRepository for MemoryCatalog {
    async fn get_class(&self, id: Uuid) -> Result<Option<LocalClass>> {
        Ok(self.state.read().await.classes.get(&id).cloned())
    }

    async fn list_children(&self, id: Uuid) -> Result<Vec<LocalClass>> {
        let state = self.state.read().await;
        state.class(id)?;
        Ok(state.children(id))
    }

    async fn list_roots(&self) -> Result<Vec<LocalClass>> {
        Ok(self.state.read().await.roots())
    }

    async fn search(&self, term: &str) -> Result<Vec<ClassSearchHit>> {
        let Some(term) = sanitize_search_term(term) else {
            return Ok(Vec::new());
        };
        let needle = term.to_lowercase();
        let state = self.state.read().await;

        let mut candidates: Vec<&LocalClass> = state
            .classes
            .values()
            .filter(|c| {
                matches_term(c.label_primary.as_deref(), &needle)
                    || matches_term(c.label_secondary.as_deref(), &needle)
                    || matches_term(c.local_number.as_deref(), &needle)
            })
            .collect();
        candidates.sort_by(|a, b| local_number_order(a, b).then(a.id.cmp(&b.id)));
        candidates.truncate(SEARCH_LIMIT as usize);

        let mut hits = Vec::with_capacity(candidates.len());
        for class in candidates {
            let counts = state.counts(class.id);
            let parent_path = state
                .breadcrumb(class.id)?
                .into_iter()
                .map(|e| e.title)
                .collect();
            hits.push(ClassSearchHit {
                id: class.id,
                local_number: class.local_number.clone(),
                label_primary: class.label_primary.clone(),
                label_secondary: class.label_secondary.clone(),
                parent_path,
                object_count_direct: counts.direct,
                object_count_total: counts.total,
                display: display_string(
                    &class.display_title(),
                    class.local_number.as_deref(),
                    counts.total,
                ),
            });
        }
        rank_hits(&mut hits);
        Ok(hits)
    }

    async fn class_detail(&self, id: Uuid) -> Result<Option<ClassDetail>> {
        let state = self.state.read().await;
        let Some(class) = state.classes.get(&id).cloned() else {
            return Ok(None);
        };
        Ok(Some(ClassDetail {
            breadcrumb: state.breadcrumb(id)?,
            counts: state.counts(id),
            children: state.children(id),
            links: state.links_of(id),
            preferred: state.preferred(id)?,
            class,
        }))
    }
}

#[async_trait]
impl HierarchyMaintainer for MemoryCatalog {
    async fn create_class(&self, req: CreateLocalClassRequest) -> Result<Uuid> {
        let req = req.normalized()?;
        let id = new_v7();
        self.mutate("create", |state| {
            let inserted = state.closure.insert_node(id, req.parent_id)?;
            let now = Utc::now();
            state.classes.insert(
                id,
                LocalClass {
                    id,
                    label_primary: req.label_primary,
                    label_secondary: req.label_secondary,
                    local_number: req.local_number,
                    description: req.description,
                    parent_id: req.parent_id,
                    preferred_classification_id: None,
                    sort_order: req.sort_order,
                    created_at_utc: now,
                    updated_at_utc: now,
                },
            );
            Self::log_delta(
                "create",
                id,
                &ClosureDelta {
                    removed: Vec::new(),
                    inserted,
                },
            );
            Ok(id)
        })
        .await
    }

    async fn update_class(&self, id: Uuid, req: UpdateLocalClassRequest) -> Result<()> {
        let req = req.normalized()?;
        self.mutate("update", |state| {
            let current_parent = state.class(id)?.parent_id;
            let target = match req.parent {
                ParentUpdate::Keep => current_parent,
                ParentUpdate::Root => None,
                ParentUpdate::Under(p) => Some(p),
            };
            if target != current_parent {
                let delta = state.set_parent(id, target)?;
                Self::log_delta("update", id, &delta);
            }
            let class = state.class_mut(id)?;
            class.label_primary = req.label_primary;
            class.label_secondary = req.label_secondary;
            class.local_number = req.local_number;
            class.description = req.description;
            class.sort_order = req.sort_order;
            class.updated_at_utc = Utc::now();
            Ok(())
        })
        .await
    }

    async fn reparent(&self, node_id: Uuid, new_parent_id: Uuid) -> Result<()> {
        self.mutate("reparent", |state| {
            let delta = state.set_parent(node_id, Some(new_parent_id))?;
            Self::log_delta("reparent", node_id, &delta);
            Ok(())
        })
        .await
    }

    async fn detach_child(&self, node_id: Uuid) -> Result<()> {
        self.mutate("detach", |state| {
            let delta = state.set_parent(node_id, None)?;
            Self::log_delta("detach", node_id, &delta);
            Ok(())
        })
        .await
    }

    async fn delete_class(&self, id: Uuid) -> Result<()> {
        self.mutate("delete", |state| {
            state.class(id)?;
            let count = state.direct_count(id);
            if count > 0 {
                return Err(Error::HasObjects { id, count });
            }
            let removed = state.closure.remove_leaf(id)?;
            state.classes.remove(&id);
            state.links.retain(|(class_id, _), _| *class_id != id);
            Self::log_delta(
                "delete",
                id,
                &ClosureDelta {
                    removed,
                    inserted: Vec::new(),
                },
            );
            Ok(())
        })
        .await
    }

    async fn move_root(&self, id: Uuid, direction: MoveDirection) -> Result<()> {
        self.mutate("move_root", |state| {
            state.class(id)?;
            let mut order: Vec<Uuid> = state.roots().into_iter().map(|c| c.id).collect();
            let idx = order
                .iter()
                .position(|&r| r == id)
                .ok_or_else(|| Error::NotFound(format!("root class {}", id)))?;
            let neighbor = match direction {
                MoveDirection::Up => idx.checked_sub(1),
                MoveDirection::Down => Some(idx + 1).filter(|&n| n < order.len()),
            };
            let Some(neighbor) = neighbor else {
                return Ok(());
            };
            order.swap(idx, neighbor);
            for (position, root_id) in order.iter().enumerate() {
                let class = state.class_mut(*root_id)?;
                class.sort_order = Some(position as i32 + 1);
            }
            Ok(())
        })
        .await
    }

    async fn verify_closure(&self) -> Result<ClosureReport> {
        let state = self.state.read().await;
        let expected = ClosureTable::from_parents(&state.parent_map())?;
        let (missing, unexpected) = state.closure.diff(&expected);
        Ok(ClosureReport {
            node_count: state.classes.len() as i64,
            edge_count: state.closure.edge_count() as i64,
            missing,
            unexpected,
        })
    }

    async fn rebuild_closure(&self) -> Result<u64> {
        self.mutate("rebuild", |state| {
            state.closure = ClosureTable::from_parents(&state.parent_map())?;
            let edges = state.closure.edge_count() as u64;
            info!(
                subsystem = "memory",
                component = "maintainer",
                op = "rebuild",
                edges_inserted = edges,
                "Closure index rebuilt"
            );
            Ok(edges)
        })
        .await
    }
}

#[async_trait]
impl CountAggregator for MemoryCatalog {
    async fn direct_count(&self, class_id: Uuid) -> Result<i64> {
        let state = self.state.read().await;
        state.class(class_id)?;
        Ok(state.direct_count(class_id))
    }

    async fn total_count(&self, class_id: Uuid) -> Result<i64> {
        let state = self.state.read().await;
        state.class(class_id)?;
        Ok(state.total_count(class_id))
    }

    async fn counts(&self, class_ids: &[Uuid]) -> Result<Vec<ClassCounts>> {
        let state = self.state.read().await;
        Ok(class_ids
            .iter()
            .filter(|id| state.classes.contains_key(*id))
            .map(|&id| state.counts(id))
            .collect())
    }

    async fn direct_objects(&self, class_id: Uuid, limit: i64) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        state.class(class_id)?;
        let mut objects: Vec<Uuid> = state
            .assignments
            .iter()
            .filter(|&(_, &c)| c == class_id)
            .map(|(&o, _)| o)
            .collect();
        objects.sort();
        objects.truncate(limit.max(0) as usize);
        Ok(objects)
    }
}

#[async_trait]
impl BreadcrumbBuilder for MemoryCatalog {
    async fn breadcrumb(&self, class_id: Uuid) -> Result<Vec<BreadcrumbEntry>> {
        self.state.read().await.breadcrumb(class_id)
    }
}

#[async_trait]
impl ClassificationCatalog for MemoryCatalog {
    async fn get_classification(&self, id: Uuid) -> Result<Option<Classification>> {
        Ok(self.state.read().await.classifications.get(&id).cloned())
    }

    async fn find_classification(
        &self,
        scheme: ClassificationScheme,
        uri: &str,
    ) -> Result<Option<Classification>> {
        let uri = uri.trim();
        Ok(self
            .state
            .read()
            .await
            .classifications
            .values()
            .find(|c| c.scheme == scheme && c.uri == uri)
            .cloned())
    }

    async fn list_classifications(
        &self,
        scheme: Option<ClassificationScheme>,
    ) -> Result<Vec<Classification>> {
        let state = self.state.read().await;
        let mut out: Vec<Classification> = state
            .classifications
            .values()
            .filter(|c| scheme.map_or(true, |s| c.scheme == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.scheme
                .cmp(&b.scheme)
                .then_with(|| a.label_primary.cmp(&b.label_primary))
                .then_with(|| a.uri.cmp(&b.uri))
        });
        Ok(out)
    }

    async fn upsert_classification(&self, record: &ExternalRecord) -> Result<Uuid> {
        self.mutate("upsert_classification", |state| {
            Ok(state.upsert_classification(record))
        })
        .await
    }
}

#[async_trait]
impl ExternalLinkRepository for MemoryCatalog {
    async fn link_external(&self, class_id: Uuid, req: LinkExternalRequest) -> Result<Uuid> {
        let record = req.validate()?;
        self.mutate("link_external", |state| {
            state.class(class_id)?;
            let classification_id = state.upsert_classification(&record);
            state.upsert_link(class_id, classification_id, record.confidence);
            Ok(classification_id)
        })
        .await
    }

    async fn link_existing(
        &self,
        class_id: Uuid,
        classification_id: Uuid,
        confidence: Option<f32>,
    ) -> Result<()> {
        let confidence = validate_confidence(confidence)?;
        self.mutate("link_existing", |state| {
            state.class(class_id)?;
            if !state.classifications.contains_key(&classification_id) {
                return Err(Error::ClassificationNotFound(classification_id));
            }
            state.upsert_link(class_id, classification_id, confidence);
            Ok(())
        })
        .await
    }

    async fn unlink_external(&self, class_id: Uuid, classification_id: Uuid) -> Result<()> {
        self.mutate("unlink_external", |state| {
            state.class(class_id)?;
            state.links.remove(&(class_id, classification_id));
            Ok(())
        })
        .await
    }

    async fn set_preferred_external(&self, class_id: Uuid, classification_id: Uuid) -> Result<()> {
        self.mutate("set_preferred", |state| {
            state.class(class_id)?;
            if !state.classifications.contains_key(&classification_id) {
                return Err(Error::ClassificationNotFound(classification_id));
            }
            if !state.links.contains_key(&(class_id, classification_id)) {
                return Err(Error::InvalidInput(format!(
                    "classification {} is not linked to local class {}",
                    classification_id, class_id
                )));
            }
            let class = state.class_mut(class_id)?;
            class.preferred_classification_id = Some(classification_id);
            class.updated_at_utc = Utc::now();
            Ok(())
        })
        .await
    }

    async fn list_links(&self, class_id: Uuid) -> Result<Vec<LinkedClassification>> {
        let state = self.state.read().await;
        state.class(class_id)?;
        Ok(state.links_of(class_id))
    }
}

#[async_trait]
impl PreferredLinkResolver for MemoryCatalog {
    async fn preferred_external(&self, class_id: Uuid) -> Result<Option<Classification>> {
        self.state.read().await.preferred(class_id)
    }
}

#[async_trait]
impl ObjectAssignmentRepository for MemoryCatalog {
    async fn assign_object(&self, object_id: Uuid, class_id: Option<Uuid>) -> Result<()> {
        self.mutate("assign_object", |state| {
            match class_id {
                Some(c) => {
                    state.class(c)?;
                    state.assignments.insert(object_id, c);
                }
                None => {
                    state.assignments.remove(&object_id);
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tea_tree() -> (MemoryCatalog, Uuid, Uuid) {
        let catalog = MemoryCatalog::new();
        let bowl = catalog
            .create_class(CreateLocalClassRequest::labeled("Tea Bowl", None))
            .await
            .unwrap();
        let raku = catalog
            .create_class(CreateLocalClassRequest::labeled("Raku Chawan", Some(bowl)))
            .await
            .unwrap();
        (catalog, bowl, raku)
    }

    #[tokio::test]
    async fn test_verify_detects_corruption_and_rebuild_repairs_it() {
        let (catalog, bowl, raku) = tea_tree().await;
        assert!(catalog.verify_closure().await.unwrap().is_consistent());

        {
            let mut state = catalog.state.write().await;
            let mut edges = state.closure.edges();
            edges.retain(|e| !(e.ancestor_id == bowl && e.descendant_id == raku));
            state.closure = ClosureTable::from_edges(edges);
        }

        let report = catalog.verify_closure().await.unwrap();
        assert_eq!(report.missing, vec![ClosureEdge::new(bowl, raku, 1)]);
        assert!(report.unexpected.is_empty());
        assert_eq!(catalog.ancestor_path(raku).await.unwrap(), Vec::<String>::new());

        let edges = catalog.rebuild_closure().await.unwrap();
        assert_eq!(edges, 3);
        assert!(catalog.verify_closure().await.unwrap().is_consistent());
        assert_eq!(catalog.ancestor_path(raku).await.unwrap(), vec!["Tea Bowl"]);
    }

    #[tokio::test]
    async fn test_dangling_preferred_resolves_to_none() {
        let (catalog, bowl, _) = tea_tree().await;
        let cid = catalog
            .link_external(bowl, LinkExternalRequest::new("wikidata", "Q1066099", None))
            .await
            .unwrap();
        catalog.set_preferred_external(bowl, cid).await.unwrap();

        catalog.state.write().await.classifications.remove(&cid);
        assert!(catalog.preferred_external(bowl).await.unwrap().is_none());
    }

    #[test]
    fn test_tree_order_nulls_first_then_local_number() {
        let now = Utc::now();
        let make = |sort: Option<i32>, number: Option<&str>| LocalClass {
            id: new_v7(),
            label_primary: Some("x".into()),
            label_secondary: None,
            local_number: number.map(String::from),
            description: None,
            parent_id: None,
            preferred_classification_id: None,
            sort_order: sort,
            created_at_utc: now,
            updated_at_utc: now,
        };
        let mut v = vec![
            make(Some(2), Some("A")),
            make(None, None),
            make(None, Some("B")),
            make(Some(1), Some("Z")),
        ];
        v.sort_by(tree_order);
        let got: Vec<(Option<i32>, Option<String>)> =
            v.into_iter().map(|c| (c.sort_order, c.local_number)).collect();
        assert_eq!(
            got,
            vec![
                (None, Some("B".to_string())),
                (None, None),
                (Some(1), Some("Z".to_string())),
                (Some(2), Some("A".to_string())),
            ]
        );
    }
}

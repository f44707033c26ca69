//! Core traits for the classification index.
//!
//! Each trait is one read or write contract. The PostgreSQL repository in
//! `kura-db` and [`crate::memory::MemoryCatalog`] implement all of them.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// LOCAL CLASS READS
// =============================================================================

/// Read access to local classes.
#[async_trait]
pub trait LocalClassRepository: Send + Sync {
    /// Get a class by ID.
    async fn get_class(&self, id: Uuid) -> Result<Option<LocalClass>>;

    /// Direct children of a class, ordered like roots.
    async fn list_children(&self, id: Uuid) -> Result<Vec<LocalClass>>;

    /// Root classes ordered by `sort_order` (nulls first), then `local_number`.
    async fn list_roots(&self) -> Result<Vec<LocalClass>>;

    /// Typeahead search over labels and local numbers.
    ///
    /// Hits carry breadcrumb and counts computed exactly like
    /// [`BreadcrumbBuilder::ancestor_path`] and [`CountAggregator`].
    async fn search(&self, term: &str) -> Result<Vec<ClassSearchHit>>;

    /// Class with breadcrumb, counts, children and external links.
    async fn class_detail(&self, id: Uuid) -> Result<Option<ClassDetail>>;
}

// =============================================================================
// HIERARCHY MAINTENANCE
// =============================================================================

/// The only writer of tree structure and the closure index.
///
/// Every method commits fully or not at all.
#[async_trait]
pub trait HierarchyMaintainer: Send + Sync {
    /// Create a class, optionally under a parent.
    async fn create_class(&self, req: CreateLocalClassRequest) -> Result<Uuid>;

    /// Update descriptive fields; a parent change goes through reparent/detach.
    async fn update_class(&self, id: Uuid, req: UpdateLocalClassRequest) -> Result<()>;

    /// Move `node_id` (with its subtree) under `new_parent_id`.
    async fn reparent(&self, node_id: Uuid, new_parent_id: Uuid) -> Result<()>;

    /// Attach an existing class as a child of `parent_id`.
    async fn attach_child(&self, parent_id: Uuid, child_id: Uuid) -> Result<()> {
        self.reparent(child_id, parent_id).await
    }

    /// Make `node_id` a root, keeping its subtree intact.
    async fn detach_child(&self, node_id: Uuid) -> Result<()>;

    /// Delete a class with no children and no directly assigned objects.
    async fn delete_class(&self, id: Uuid) -> Result<()>;

    /// Swap a root with its neighbour in root order and renumber all roots.
    async fn move_root(&self, id: Uuid, direction: MoveDirection) -> Result<()>;

    /// Compare the closure index against parent links without repairing it.
    async fn verify_closure(&self) -> Result<ClosureReport>;

    /// Rewrite the closure index from parent links; returns the edge count.
    async fn rebuild_closure(&self) -> Result<u64>;
}

// =============================================================================
// AGGREGATES
// =============================================================================

/// Object counts per class, joined through the closure index.
#[async_trait]
pub trait CountAggregator: Send + Sync {
    /// Objects assigned exactly to the class.
    async fn direct_count(&self, class_id: Uuid) -> Result<i64>;

    /// Objects assigned to the class or any of its descendants.
    async fn total_count(&self, class_id: Uuid) -> Result<i64>;

    /// Direct and total counts for many classes; unknown ids are skipped.
    async fn counts(&self, class_ids: &[Uuid]) -> Result<Vec<ClassCounts>>;

    /// Ids of objects assigned directly to the class.
    async fn direct_objects(&self, class_id: Uuid, limit: i64) -> Result<Vec<Uuid>>;
}

/// Ancestor paths derived from the closure index.
#[async_trait]
pub trait BreadcrumbBuilder: Send + Sync {
    /// Ancestor titles from root to immediate parent.
    async fn ancestor_path(&self, class_id: Uuid) -> Result<Vec<String>> {
        Ok(self
            .breadcrumb(class_id)
            .await?
            .into_iter()
            .map(|e| e.title)
            .collect())
    }

    /// Ancestors with ids and depths, root first.
    async fn breadcrumb(&self, class_id: Uuid) -> Result<Vec<BreadcrumbEntry>>;
}

// =============================================================================
// EXTERNAL CLASSIFICATIONS
// =============================================================================

/// Flat catalog of external authority records.
#[async_trait]
pub trait ClassificationCatalog: Send + Sync {
    async fn get_classification(&self, id: Uuid) -> Result<Option<Classification>>;

    /// Look up a record by its natural key.
    async fn find_classification(
        &self,
        scheme: ClassificationScheme,
        uri: &str,
    ) -> Result<Option<Classification>>;

    /// Records ordered by scheme then label, optionally for one scheme.
    async fn list_classifications(
        &self,
        scheme: Option<ClassificationScheme>,
    ) -> Result<Vec<Classification>>;

    /// Insert a record unless (scheme, uri) already exists; returns its id.
    async fn upsert_classification(&self, record: &ExternalRecord) -> Result<Uuid>;
}

/// Links between local classes and external classifications.
#[async_trait]
pub trait ExternalLinkRepository: Send + Sync {
    /// Link a class to (scheme, uri), creating the classification if absent.
    async fn link_external(&self, class_id: Uuid, req: LinkExternalRequest) -> Result<Uuid>;

    /// Link a class to a classification already in the catalog.
    async fn link_existing(
        &self,
        class_id: Uuid,
        classification_id: Uuid,
        confidence: Option<f32>,
    ) -> Result<()>;

    /// Remove a link; removing a missing link is a no-op.
    async fn unlink_external(&self, class_id: Uuid, classification_id: Uuid) -> Result<()>;

    /// Designate the canonical external record for a class.
    async fn set_preferred_external(&self, class_id: Uuid, classification_id: Uuid) -> Result<()>;

    /// Linked classifications of a class ordered by scheme then label.
    async fn list_links(&self, class_id: Uuid) -> Result<Vec<LinkedClassification>>;
}

/// Resolves the canonical external record of a class.
#[async_trait]
pub trait PreferredLinkResolver: Send + Sync {
    /// The preferred classification, if it is still linked to the class.
    ///
    /// Dangling or unlinked preferences resolve to `None`.
    async fn preferred_external(&self, class_id: Uuid) -> Result<Option<Classification>>;
}

// =============================================================================
// OBJECT STORE BOUNDARY
// =============================================================================

/// Write side of the object-to-class assignment owned by the object store.
#[async_trait]
pub trait ObjectAssignmentRepository: Send + Sync {
    /// Set (or clear) an object's primary local class.
    async fn assign_object(&self, object_id: Uuid, class_id: Option<Uuid>) -> Result<()>;
}

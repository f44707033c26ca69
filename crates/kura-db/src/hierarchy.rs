//! Hierarchy maintenance against PostgreSQL.
//!
//! Every structural change is one transaction that rewrites `local_class`
//! and `local_class_hierarchy` together. Concurrent changes are serialized
//! by locking the `local_class` rows of every node on the affected ancestor
//! chains, in id order. Chains are read before locking, so after the locks
//! are held they are read again; if they moved in the meantime the
//! transaction is rolled back and retried, and after
//! [`HIERARCHY_MAX_ATTEMPTS`] tries the mutation fails with `CONFLICT`.
//!
//! Any mutation inside a subtree locks the subtree root as part of its
//! ancestor chain, so moving a subtree and editing within it never
//! interleave.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use kura_core::defaults::{CLOSURE_REBUILD_BATCH, HIERARCHY_MAX_ATTEMPTS};
use kura_core::{
    new_v7, ClosureEdge, ClosureReport, ClosureTable, CreateLocalClassRequest, Error,
    HierarchyMaintainer, MoveDirection, ParentMap, ParentUpdate, Result, UpdateLocalClassRequest,
};

use crate::aggregates::{direct_count, require_class};
use crate::rows::TREE_ORDER;

/// Closure rows touched by one committed mutation.
#[derive(Debug, Clone, Copy, Default)]
struct EdgeDelta {
    removed: u64,
    inserted: u64,
}

/// Outcome of one locking attempt.
enum Attempt<T> {
    Done(T, EdgeDelta),
    /// The locked ancestor set no longer matches what was read.
    Stale,
}

/// PostgreSQL implementation of HierarchyMaintainer.
#[derive(Clone)]
pub struct PgHierarchyMaintainer {
    pool: Pool<Postgres>,
    max_attempts: u32,
}

impl PgHierarchyMaintainer {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            max_attempts: HIERARCHY_MAX_ATTEMPTS,
        }
    }

    /// Override how many times a mutation retries a stale lock set.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    async fn retrying<T, F, Fut>(&self, op: &'static str, class_id: Uuid, mut run: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>>>,
    {
        let start = Instant::now();
        for attempt in 1..=self.max_attempts {
            match run().await {
                Ok(Attempt::Done(out, delta)) => {
                    info!(
                        subsystem = "hierarchy",
                        component = "maintainer",
                        op,
                        class_id = %class_id,
                        attempt,
                        edges_removed = delta.removed,
                        edges_inserted = delta.inserted,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Hierarchy mutation committed"
                    );
                    return Ok(out);
                }
                Ok(Attempt::Stale) => {
                    debug!(
                        subsystem = "hierarchy",
                        component = "maintainer",
                        op,
                        class_id = %class_id,
                        attempt,
                        "Ancestor chain moved while locking, retrying"
                    );
                }
                Err(Error::Database(e)) if is_retryable(&e) => {
                    debug!(
                        subsystem = "hierarchy",
                        component = "maintainer",
                        op,
                        class_id = %class_id,
                        attempt,
                        error = %e,
                        "Transient lock failure, retrying"
                    );
                }
                Err(e) => {
                    debug!(
                        subsystem = "hierarchy",
                        component = "maintainer",
                        op,
                        class_id = %class_id,
                        error_kind = e.kind(),
                        error = %e,
                        "Hierarchy mutation rejected"
                    );
                    return Err(e);
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        warn!(
            subsystem = "hierarchy",
            component = "maintainer",
            op,
            class_id = %class_id,
            attempt = self.max_attempts,
            error_kind = "CONFLICT",
            "Hierarchy mutation abandoned after repeated conflicts"
        );
        Err(Error::Conflict(format!(
            "{} on local class {} raced concurrent changes {} times",
            op, class_id, self.max_attempts
        )))
    }

    async fn try_create(&self, id: Uuid, req: &CreateLocalClassRequest) -> Result<Attempt<()>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        if let Some(parent) = req.parent_id {
            if let Attempt::Stale = lock_chains(&mut tx, &[parent]).await? {
                return Ok(Attempt::Stale);
            }
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO local_class
                (id, label_primary, label_secondary, local_number, description,
                 parent_id, sort_order, created_at_utc, updated_at_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(id)
        .bind(&req.label_primary)
        .bind(&req.label_secondary)
        .bind(&req.local_number)
        .bind(&req.description)
        .bind(req.parent_id)
        .bind(req.sort_order)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO local_class_hierarchy (ancestor_id, descendant_id, depth)
            SELECT ancestor_id, $1, depth + 1
            FROM local_class_hierarchy
            WHERE descendant_id = $2
            UNION ALL
            SELECT $1, $1, 0
            "#,
        )
        .bind(id)
        .bind(req.parent_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        tx.commit().await.map_err(Error::Database)?;
        Ok(Attempt::Done(
            (),
            EdgeDelta {
                removed: 0,
                inserted,
            },
        ))
    }

    async fn try_update(&self, id: Uuid, req: &UpdateLocalClassRequest) -> Result<Attempt<()>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let current: Option<Uuid> =
            sqlx::query("SELECT parent_id FROM local_class WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?
                .ok_or(Error::ClassNotFound(id))?
                .get("parent_id");
        let target = match req.parent {
            ParentUpdate::Keep => current,
            ParentUpdate::Root => None,
            ParentUpdate::Under(p) => Some(p),
        };

        let mut delta = EdgeDelta::default();
        if target != current {
            let nodes: Vec<Uuid> = std::iter::once(id).chain(target).collect();
            if let Attempt::Stale = lock_chains(&mut tx, &nodes).await? {
                return Ok(Attempt::Stale);
            }
            delta = move_subtree(&mut tx, id, target).await?;
        } else {
            lock_rows(&mut tx, &BTreeSet::from([id])).await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE local_class
            SET label_primary = $2, label_secondary = $3, local_number = $4,
                description = $5, sort_order = $6, updated_at_utc = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&req.label_primary)
        .bind(&req.label_secondary)
        .bind(&req.local_number)
        .bind(&req.description)
        .bind(req.sort_order)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::ClassNotFound(id));
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(Attempt::Done((), delta))
    }

    async fn try_move(&self, node: Uuid, new_parent: Option<Uuid>) -> Result<Attempt<()>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let nodes: Vec<Uuid> = std::iter::once(node).chain(new_parent).collect();
        if let Attempt::Stale = lock_chains(&mut tx, &nodes).await? {
            return Ok(Attempt::Stale);
        }
        let delta = move_subtree(&mut tx, node, new_parent).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(Attempt::Done((), delta))
    }

    async fn try_delete(&self, id: Uuid) -> Result<Attempt<()>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        if let Attempt::Stale = lock_chains(&mut tx, &[id]).await? {
            return Ok(Attempt::Stale);
        }

        let objects = direct_count(&mut tx, id).await?;
        if objects > 0 {
            return Err(Error::HasObjects { id, count: objects });
        }
        let children: i64 = sqlx::query("SELECT COUNT(*) AS n FROM local_class WHERE parent_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?
            .get("n");
        if children > 0 {
            return Err(Error::HasChildren {
                id,
                count: children,
            });
        }

        // Childless, so every edge naming the node has it as descendant.
        let removed = sqlx::query("DELETE FROM local_class_hierarchy WHERE descendant_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        sqlx::query("DELETE FROM local_class WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(Attempt::Done(
            (),
            EdgeDelta {
                removed,
                inserted: 0,
            },
        ))
    }

    async fn try_move_root(&self, id: Uuid, direction: MoveDirection) -> Result<Attempt<()>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        require_class(&mut tx, id).await?;
        sqlx::query("SELECT id FROM local_class WHERE parent_id IS NULL ORDER BY id FOR UPDATE")
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let mut order: Vec<Uuid> = sqlx::query(&format!(
            "SELECT c.id FROM local_class c WHERE c.parent_id IS NULL ORDER BY {TREE_ORDER}"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?
        .iter()
        .map(|r| r.get("id"))
        .collect();

        let idx = order
            .iter()
            .position(|&r| r == id)
            .ok_or_else(|| Error::NotFound(format!("root class {}", id)))?;
        let neighbor = match direction {
            MoveDirection::Up => idx.checked_sub(1),
            MoveDirection::Down => Some(idx + 1).filter(|&n| n < order.len()),
        };
        let Some(neighbor) = neighbor else {
            return Ok(Attempt::Done((), EdgeDelta::default()));
        };
        order.swap(idx, neighbor);

        sqlx::query(
            r#"
            UPDATE local_class c
            SET sort_order = r.pos::int, updated_at_utc = $2
            FROM UNNEST($1::uuid[]) WITH ORDINALITY AS r(id, pos)
            WHERE c.id = r.id
            "#,
        )
        .bind(&order)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(Attempt::Done((), EdgeDelta::default()))
    }
}

/// Deadlocks and serialization failures are worth another attempt.
fn is_retryable(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "40P01" || code == "40001")
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(10u64 << attempt.min(6))
}

/// `ids` plus every ancestor currently recorded for them.
async fn chain_of(conn: &mut PgConnection, ids: &[Uuid]) -> Result<BTreeSet<Uuid>> {
    let rows = sqlx::query(
        "SELECT DISTINCT ancestor_id FROM local_class_hierarchy WHERE descendant_id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(Error::Database)?;
    let mut chain: BTreeSet<Uuid> = rows.iter().map(|r| r.get("ancestor_id")).collect();
    chain.extend(ids.iter().copied());
    Ok(chain)
}

/// Lock `local_class` rows in id order; returns the ids that exist.
async fn lock_rows(conn: &mut PgConnection, ids: &BTreeSet<Uuid>) -> Result<BTreeSet<Uuid>> {
    let ids: Vec<Uuid> = ids.iter().copied().collect();
    let rows = sqlx::query("SELECT id FROM local_class WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

/// Lock the ancestor chains of `ids`, or report them stale.
///
/// Missing ids fail with `ClassNotFound` in the order given.
async fn lock_chains(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Attempt<()>> {
    let chain = chain_of(conn, ids).await?;
    let locked = lock_rows(conn, &chain).await?;
    if let Some(missing) = ids.iter().find(|id| !locked.contains(*id)) {
        return Err(Error::ClassNotFound(*missing));
    }
    if chain_of(conn, ids).await? != chain {
        return Ok(Attempt::Stale);
    }
    Ok(Attempt::Done((), EdgeDelta::default()))
}

/// Move `node` and its subtree under `new_parent` (None = detach).
///
/// Caller holds the locks from [`lock_chains`] for node and new parent.
async fn move_subtree(
    conn: &mut PgConnection,
    node: Uuid,
    new_parent: Option<Uuid>,
) -> Result<EdgeDelta> {
    if let Some(parent) = new_parent {
        let cyclic: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM local_class_hierarchy
                WHERE ancestor_id = $1 AND descendant_id = $2
            ) AS cyclic
            "#,
        )
        .bind(node)
        .bind(parent)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::Database)?
        .get("cyclic");
        if cyclic {
            return Err(Error::CycleDetected { node, parent });
        }
    }

    // Edges from proper ancestors of `node` into its subtree.
    let removed = sqlx::query(
        r#"
        DELETE FROM local_class_hierarchy h
        USING local_class_hierarchy sub, local_class_hierarchy sup
        WHERE sub.ancestor_id = $1
          AND sup.descendant_id = $1
          AND sup.depth > 0
          AND h.ancestor_id = sup.ancestor_id
          AND h.descendant_id = sub.descendant_id
        "#,
    )
    .bind(node)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?
    .rows_affected();

    let inserted = match new_parent {
        Some(parent) => sqlx::query(
            r#"
            INSERT INTO local_class_hierarchy (ancestor_id, descendant_id, depth)
            SELECT sup.ancestor_id, sub.descendant_id, sup.depth + sub.depth + 1
            FROM local_class_hierarchy sup
            JOIN local_class_hierarchy sub ON sub.ancestor_id = $1
            WHERE sup.descendant_id = $2
            "#,
        )
        .bind(node)
        .bind(parent)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?
        .rows_affected(),
        None => 0,
    };

    sqlx::query("UPDATE local_class SET parent_id = $2, updated_at_utc = $3 WHERE id = $1")
        .bind(node)
        .bind(new_parent)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;

    Ok(EdgeDelta { removed, inserted })
}

async fn load_parents(conn: &mut PgConnection) -> Result<ParentMap> {
    let rows = sqlx::query("SELECT id, parent_id FROM local_class")
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;
    Ok(rows
        .iter()
        .map(|r| (r.get("id"), r.get("parent_id")))
        .collect())
}

async fn load_edges(conn: &mut PgConnection) -> Result<Vec<ClosureEdge>> {
    let rows = sqlx::query("SELECT ancestor_id, descendant_id, depth FROM local_class_hierarchy")
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;
    Ok(rows
        .iter()
        .map(|r| ClosureEdge::new(r.get("ancestor_id"), r.get("descendant_id"), r.get("depth")))
        .collect())
}

#[async_trait]
impl HierarchyMaintainer for PgHierarchyMaintainer {
    async fn create_class(&self, req: CreateLocalClassRequest) -> Result<Uuid> {
        let req = req.normalized()?;
        let id = new_v7();
        let req = &req;
        self.retrying("create", id, move || self.try_create(id, req))
            .await?;
        Ok(id)
    }

    async fn update_class(&self, id: Uuid, req: UpdateLocalClassRequest) -> Result<()> {
        let req = req.normalized()?;
        let req = &req;
        self.retrying("update", id, move || self.try_update(id, req))
            .await
    }

    async fn reparent(&self, node_id: Uuid, new_parent_id: Uuid) -> Result<()> {
        self.retrying("reparent", node_id, move || {
            self.try_move(node_id, Some(new_parent_id))
        })
        .await
    }

    async fn detach_child(&self, node_id: Uuid) -> Result<()> {
        self.retrying("detach", node_id, move || self.try_move(node_id, None))
            .await
    }

    async fn delete_class(&self, id: Uuid) -> Result<()> {
        self.retrying("delete", id, move || self.try_delete(id)).await
    }

    async fn move_root(&self, id: Uuid, direction: MoveDirection) -> Result<()> {
        self.retrying("move_root", id, move || self.try_move_root(id, direction))
            .await
    }

    async fn verify_closure(&self) -> Result<ClosureReport> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        let parents = load_parents(&mut tx).await?;
        let stored = ClosureTable::from_edges(load_edges(&mut tx).await?);
        tx.commit().await.map_err(Error::Database)?;

        let expected = ClosureTable::from_parents(&parents)?;
        let (missing, unexpected) = stored.diff(&expected);
        let report = ClosureReport {
            node_count: parents.len() as i64,
            edge_count: stored.edge_count() as i64,
            missing,
            unexpected,
        };
        if !report.is_consistent() {
            warn!(
                subsystem = "hierarchy",
                component = "maintainer",
                op = "verify",
                missing = report.missing.len(),
                unexpected = report.unexpected.len(),
                "Closure index drifted from parent links"
            );
        }
        Ok(report)
    }

    async fn rebuild_closure(&self) -> Result<u64> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        // Blocks every hierarchy writer until the rebuild commits.
        sqlx::query("LOCK TABLE local_class, local_class_hierarchy IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let parents = load_parents(&mut tx).await?;
        let edges = ClosureTable::from_parents(&parents)?.edges();

        let removed = sqlx::query("DELETE FROM local_class_hierarchy")
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        let mut inserted = 0u64;
        for batch in edges.chunks(CLOSURE_REBUILD_BATCH) {
            let ancestors: Vec<Uuid> = batch.iter().map(|e| e.ancestor_id).collect();
            let descendants: Vec<Uuid> = batch.iter().map(|e| e.descendant_id).collect();
            let depths: Vec<i32> = batch.iter().map(|e| e.depth).collect();
            inserted += sqlx::query(
                r#"
                INSERT INTO local_class_hierarchy (ancestor_id, descendant_id, depth)
                SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::int4[])
                "#,
            )
            .bind(&ancestors)
            .bind(&descendants)
            .bind(&depths)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        info!(
            subsystem = "hierarchy",
            component = "maintainer",
            op = "rebuild",
            edges_removed = removed,
            edges_inserted = inserted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Closure index rebuilt"
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff(1), Duration::from_millis(20));
        assert_eq!(backoff(2), Duration::from_millis(40));
        assert_eq!(backoff(6), backoff(60));
    }

    #[test]
    fn test_non_database_errors_are_not_retryable() {
        assert!(!is_retryable(&sqlx::Error::RowNotFound));
        assert!(!is_retryable(&sqlx::Error::PoolTimedOut));
    }
}

//! Object counts and breadcrumbs joined through the closure index.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgConnection, Pool, Postgres, Row};
use uuid::Uuid;

use kura_core::{
    BreadcrumbBuilder, BreadcrumbEntry, ClassCounts, CountAggregator, Error, LocalClass, Result,
};

use crate::rows::{class_from_row, CLASS_COLUMNS};

/// PostgreSQL implementation of CountAggregator and BreadcrumbBuilder.
#[derive(Clone)]
pub struct PgAggregateRepository {
    pool: Pool<Postgres>,
}

impl PgAggregateRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

pub(crate) async fn class_exists(conn: &mut PgConnection, id: Uuid) -> Result<bool> {
    let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM local_class WHERE id = $1) AS present")
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::Database)?;
    Ok(row.get("present"))
}

pub(crate) async fn require_class(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    if class_exists(conn, id).await? {
        Ok(())
    } else {
        Err(Error::ClassNotFound(id))
    }
}

pub(crate) async fn direct_count(conn: &mut PgConnection, id: Uuid) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM catalog_object WHERE primary_local_class_id = $1",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(row.get("n"))
}

pub(crate) async fn total_count(conn: &mut PgConnection, id: Uuid) -> Result<i64> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM local_class_hierarchy h
        JOIN catalog_object o ON o.primary_local_class_id = h.descendant_id
        WHERE h.ancestor_id = $1
        "#,
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(row.get("n"))
}

/// Counts for many classes in input order; unknown ids produce no row.
pub(crate) async fn counts_for(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<ClassCounts>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        r#"
        SELECT c.id AS class_id,
               (SELECT COUNT(*) FROM catalog_object o
                 WHERE o.primary_local_class_id = c.id) AS direct,
               (SELECT COUNT(*) FROM local_class_hierarchy h
                  JOIN catalog_object o ON o.primary_local_class_id = h.descendant_id
                 WHERE h.ancestor_id = c.id) AS total
        FROM UNNEST($1::uuid[]) WITH ORDINALITY AS q(id, ord)
        JOIN local_class c ON c.id = q.id
        ORDER BY q.ord
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(Error::Database)?;

    Ok(rows
        .into_iter()
        .map(|r| ClassCounts {
            class_id: r.get("class_id"),
            direct: r.get("direct"),
            total: r.get("total"),
        })
        .collect())
}

/// Breadcrumbs for many classes at once, keyed by class id, root first.
pub(crate) async fn breadcrumbs_for(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<BreadcrumbEntry>>> {
    let mut out: HashMap<Uuid, Vec<BreadcrumbEntry>> = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }
    let rows = sqlx::query(&format!(
        r#"
        SELECT h.descendant_id AS crumb_for, h.depth AS crumb_depth, {CLASS_COLUMNS}
        FROM local_class_hierarchy h
        JOIN local_class c ON c.id = h.ancestor_id
        WHERE h.descendant_id = ANY($1) AND h.depth > 0
        ORDER BY h.descendant_id, h.depth DESC, c.id
        "#
    ))
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(Error::Database)?;

    for r in &rows {
        let ancestor: LocalClass = class_from_row(r);
        out.entry(r.get("crumb_for")).or_default().push(BreadcrumbEntry {
            id: ancestor.id,
            title: ancestor.display_title(),
            depth: r.get("crumb_depth"),
        });
    }
    Ok(out)
}

pub(crate) async fn breadcrumb(conn: &mut PgConnection, id: Uuid) -> Result<Vec<BreadcrumbEntry>> {
    require_class(conn, id).await?;
    Ok(breadcrumbs_for(conn, &[id])
        .await?
        .remove(&id)
        .unwrap_or_default())
}

#[async_trait]
impl CountAggregator for PgAggregateRepository {
    async fn direct_count(&self, class_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        require_class(&mut conn, class_id).await?;
        direct_count(&mut conn, class_id).await
    }

    async fn total_count(&self, class_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        require_class(&mut conn, class_id).await?;
        total_count(&mut conn, class_id).await
    }

    async fn counts(&self, class_ids: &[Uuid]) -> Result<Vec<ClassCounts>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        counts_for(&mut conn, class_ids).await
    }

    async fn direct_objects(&self, class_id: Uuid, limit: i64) -> Result<Vec<Uuid>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        require_class(&mut conn, class_id).await?;
        let rows = sqlx::query(
            r#"
            SELECT id FROM catalog_object
            WHERE primary_local_class_id = $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(class_id)
        .bind(limit.max(0))
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }
}

#[async_trait]
impl BreadcrumbBuilder for PgAggregateRepository {
    async fn breadcrumb(&self, class_id: Uuid) -> Result<Vec<BreadcrumbEntry>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        breadcrumb(&mut conn, class_id).await
    }
}

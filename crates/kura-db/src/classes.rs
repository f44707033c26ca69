//! Local class reads: lookups, tree listings, search and detail.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use kura_core::defaults::SEARCH_LIMIT;
use kura_core::{
    display_string, escape_like, rank_hits, sanitize_search_term, ClassCounts, ClassDetail,
    ClassSearchHit, Error, LocalClass, LocalClassRepository, Result,
};

use crate::aggregates::{breadcrumb, breadcrumbs_for, counts_for, require_class};
use crate::classifications::{links_of, resolve_preferred};
use crate::rows::{class_from_row, CLASS_COLUMNS, TREE_ORDER};

/// PostgreSQL implementation of LocalClassRepository.
#[derive(Clone)]
pub struct PgLocalClassRepository {
    pool: Pool<Postgres>,
}

impl PgLocalClassRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocalClassRepository for PgLocalClassRepository {
    async fn get_class(&self, id: Uuid) -> Result<Option<LocalClass>> {
        let row = sqlx::query(&format!(
            "SELECT {CLASS_COLUMNS} FROM local_class c WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(class_from_row))
    }

    async fn list_children(&self, id: Uuid) -> Result<Vec<LocalClass>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        require_class(&mut conn, id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {CLASS_COLUMNS} FROM local_class c WHERE c.parent_id = $1 ORDER BY {TREE_ORDER}"
        ))
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(class_from_row).collect())
    }

    async fn list_roots(&self) -> Result<Vec<LocalClass>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLASS_COLUMNS} FROM local_class c WHERE c.parent_id IS NULL ORDER BY {TREE_ORDER}"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(class_from_row).collect())
    }

    async fn search(&self, term: &str) -> Result<Vec<ClassSearchHit>> {
        let Some(term) = sanitize_search_term(term) else {
            return Ok(Vec::new());
        };
        let pattern = format!("%{}%", escape_like(&term));

        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CLASS_COLUMNS}
            FROM local_class c
            WHERE c.label_primary ILIKE $1 ESCAPE '\'
               OR c.label_secondary ILIKE $1 ESCAPE '\'
               OR c.local_number ILIKE $1 ESCAPE '\'
            ORDER BY c.local_number COLLATE "C" ASC NULLS LAST, c.id
            LIMIT $2
            "#
        ))
        .bind(&pattern)
        .bind(SEARCH_LIMIT)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;

        let classes: Vec<LocalClass> = rows.iter().map(class_from_row).collect();
        let ids: Vec<Uuid> = classes.iter().map(|c| c.id).collect();
        let counts: HashMap<Uuid, ClassCounts> = counts_for(&mut conn, &ids)
            .await?
            .into_iter()
            .map(|c| (c.class_id, c))
            .collect();
        let mut crumbs = breadcrumbs_for(&mut conn, &ids).await?;

        let mut hits: Vec<ClassSearchHit> = classes
            .into_iter()
            .map(|class| {
                let counts = counts.get(&class.id).copied().unwrap_or_default();
                let parent_path = crumbs
                    .remove(&class.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|e| e.title)
                    .collect();
                ClassSearchHit {
                    display: display_string(
                        &class.display_title(),
                        class.local_number.as_deref(),
                        counts.total,
                    ),
                    id: class.id,
                    local_number: class.local_number,
                    label_primary: class.label_primary,
                    label_secondary: class.label_secondary,
                    parent_path,
                    object_count_direct: counts.direct,
                    object_count_total: counts.total,
                }
            })
            .collect();
        rank_hits(&mut hits);

        debug!(
            subsystem = "db",
            component = "search",
            op = "search",
            result_count = hits.len(),
            "Class search complete"
        );
        Ok(hits)
    }

    async fn class_detail(&self, id: Uuid) -> Result<Option<ClassDetail>> {
        let Some(class) = self.get_class(id).await? else {
            return Ok(None);
        };
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let counts = counts_for(&mut conn, &[id])
            .await?
            .pop()
            .ok_or(Error::ClassNotFound(id))?;
        let children = sqlx::query(&format!(
            "SELECT {CLASS_COLUMNS} FROM local_class c WHERE c.parent_id = $1 ORDER BY {TREE_ORDER}"
        ))
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?
        .iter()
        .map(class_from_row)
        .collect();

        Ok(Some(ClassDetail {
            breadcrumb: breadcrumb(&mut conn, id).await?,
            counts,
            children,
            links: links_of(&mut conn, id).await?,
            preferred: resolve_preferred(&mut conn, id).await?,
            class,
        }))
    }
}

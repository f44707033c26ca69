//! External classification catalog, class links, and preferred-link resolution.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use kura_core::{
    new_v7, validate_confidence, Classification, ClassificationCatalog, ClassificationScheme,
    Error, ExternalLinkRepository, ExternalRecord, LinkExternalRequest, LinkedClassification,
    PreferredLinkResolver, Result, DEFAULT_CLASSIFICATION_KIND,
};

use crate::aggregates::require_class;
use crate::rows::{classification_from_row, CLASSIFICATION_COLUMNS};

/// PostgreSQL implementation of the classification catalog and link traits.
#[derive(Clone)]
pub struct PgClassificationRepository {
    pool: Pool<Postgres>,
}

impl PgClassificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Insert (scheme, uri) unless present; returns the existing or new id.
pub(crate) async fn upsert_classification(
    conn: &mut PgConnection,
    record: &ExternalRecord,
) -> Result<Uuid> {
    // DO UPDATE with a no-op assignment so RETURNING yields the existing row.
    let row = sqlx::query(
        r#"
        INSERT INTO classification
            (id, scheme, uri, label_primary, label_secondary, kind, created_at_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (scheme, uri) DO UPDATE SET uri = EXCLUDED.uri
        RETURNING id
        "#,
    )
    .bind(new_v7())
    .bind(record.scheme.as_str())
    .bind(&record.uri)
    .bind(&record.label_primary)
    .bind(&record.label_secondary)
    .bind(DEFAULT_CLASSIFICATION_KIND)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(row.get("id"))
}

/// Insert a link, or refresh its confidence when one is supplied.
pub(crate) async fn upsert_link(
    conn: &mut PgConnection,
    class_id: Uuid,
    classification_id: Uuid,
    confidence: Option<f32>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO local_class_link (local_class_id, classification_id, confidence, created_at_utc)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (local_class_id, classification_id)
        DO UPDATE SET confidence = COALESCE(EXCLUDED.confidence, local_class_link.confidence)
        "#,
    )
    .bind(class_id)
    .bind(classification_id)
    .bind(confidence)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

pub(crate) async fn links_of(
    conn: &mut PgConnection,
    class_id: Uuid,
) -> Result<Vec<LinkedClassification>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {CLASSIFICATION_COLUMNS}, l.confidence,
               (c.preferred_classification_id IS NOT DISTINCT FROM k.id) AS preferred
        FROM local_class_link l
        JOIN classification k ON k.id = l.classification_id
        JOIN local_class c ON c.id = l.local_class_id
        WHERE l.local_class_id = $1
        ORDER BY k.scheme, k.label_primary NULLS LAST, k.uri
        "#
    ))
    .bind(class_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(Error::Database)?;

    rows.iter()
        .map(|r| {
            Ok(LinkedClassification {
                classification: classification_from_row(r)?,
                confidence: r.get("confidence"),
                preferred: r.get("preferred"),
            })
        })
        .collect()
}

/// Resolve the preferred classification, treating a dangling or unlinked
/// reference as none.
pub(crate) async fn resolve_preferred(
    conn: &mut PgConnection,
    class_id: Uuid,
) -> Result<Option<Classification>> {
    let row = sqlx::query(
        "SELECT preferred_classification_id FROM local_class WHERE id = $1",
    )
    .bind(class_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?
    .ok_or(Error::ClassNotFound(class_id))?;

    let Some(preferred_id) = row.get::<Option<Uuid>, _>("preferred_classification_id") else {
        return Ok(None);
    };

    let row = sqlx::query(&format!(
        r#"
        SELECT {CLASSIFICATION_COLUMNS}
        FROM classification k
        JOIN local_class_link l
          ON l.classification_id = k.id AND l.local_class_id = $1
        WHERE k.id = $2
        "#
    ))
    .bind(class_id)
    .bind(preferred_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?;

    match row {
        Some(r) => Ok(Some(classification_from_row(&r)?)),
        None => {
            warn!(
                subsystem = "db",
                component = "resolver",
                class_id = %class_id,
                classification_id = %preferred_id,
                error_kind = "DANGLING_PREFERRED",
                "Preferred classification is not linked; resolving to none"
            );
            Ok(None)
        }
    }
}

async fn require_classification(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM classification WHERE id = $1) AS present")
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(Error::Database)?;
    if row.get("present") {
        Ok(())
    } else {
        Err(Error::ClassificationNotFound(id))
    }
}

#[async_trait]
impl ClassificationCatalog for PgClassificationRepository {
    async fn get_classification(&self, id: Uuid) -> Result<Option<Classification>> {
        let row = sqlx::query(&format!(
            "SELECT {CLASSIFICATION_COLUMNS} FROM classification k WHERE k.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(classification_from_row).transpose()
    }

    async fn find_classification(
        &self,
        scheme: ClassificationScheme,
        uri: &str,
    ) -> Result<Option<Classification>> {
        let row = sqlx::query(&format!(
            "SELECT {CLASSIFICATION_COLUMNS} FROM classification k WHERE k.scheme = $1 AND k.uri = $2"
        ))
        .bind(scheme.as_str())
        .bind(uri.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(classification_from_row).transpose()
    }

    async fn list_classifications(
        &self,
        scheme: Option<ClassificationScheme>,
    ) -> Result<Vec<Classification>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CLASSIFICATION_COLUMNS}
            FROM classification k
            WHERE $1::text IS NULL OR k.scheme = $1
            ORDER BY k.scheme, k.label_primary NULLS LAST, k.uri
            "#
        ))
        .bind(scheme.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(classification_from_row).collect()
    }

    async fn upsert_classification(&self, record: &ExternalRecord) -> Result<Uuid> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        upsert_classification(&mut conn, record).await
    }
}

#[async_trait]
impl ExternalLinkRepository for PgClassificationRepository {
    async fn link_external(&self, class_id: Uuid, req: LinkExternalRequest) -> Result<Uuid> {
        let record = req.validate()?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        require_class(&mut tx, class_id).await?;
        let classification_id = upsert_classification(&mut tx, &record).await?;
        upsert_link(&mut tx, class_id, classification_id, record.confidence).await?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "links",
            op = "link_external",
            class_id = %class_id,
            classification_id = %classification_id,
            scheme = %record.scheme,
            "Linked external classification"
        );
        Ok(classification_id)
    }

    async fn link_existing(
        &self,
        class_id: Uuid,
        classification_id: Uuid,
        confidence: Option<f32>,
    ) -> Result<()> {
        let confidence = validate_confidence(confidence)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        require_class(&mut tx, class_id).await?;
        require_classification(&mut tx, classification_id).await?;
        upsert_link(&mut tx, class_id, classification_id, confidence).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn unlink_external(&self, class_id: Uuid, classification_id: Uuid) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        require_class(&mut conn, class_id).await?;
        let result = sqlx::query(
            "DELETE FROM local_class_link WHERE local_class_id = $1 AND classification_id = $2",
        )
        .bind(class_id)
        .bind(classification_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "links",
            op = "unlink_external",
            class_id = %class_id,
            classification_id = %classification_id,
            removed = result.rows_affected(),
            "Unlinked external classification"
        );
        Ok(())
    }

    async fn set_preferred_external(&self, class_id: Uuid, classification_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        require_class(&mut tx, class_id).await?;
        require_classification(&mut tx, classification_id).await?;

        let linked = sqlx::query(
            r#"
            SELECT 1 FROM local_class_link
            WHERE local_class_id = $1 AND classification_id = $2
            FOR SHARE
            "#,
        )
        .bind(class_id)
        .bind(classification_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if linked.is_none() {
            return Err(Error::InvalidInput(format!(
                "classification {} is not linked to local class {}",
                classification_id, class_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE local_class
            SET preferred_classification_id = $2, updated_at_utc = $3
            WHERE id = $1
            "#,
        )
        .bind(class_id)
        .bind(classification_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_links(&self, class_id: Uuid) -> Result<Vec<LinkedClassification>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        require_class(&mut conn, class_id).await?;
        links_of(&mut conn, class_id).await
    }
}

#[async_trait]
impl PreferredLinkResolver for PgClassificationRepository {
    async fn preferred_external(&self, class_id: Uuid) -> Result<Option<Classification>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        resolve_preferred(&mut conn, class_id).await
    }
}

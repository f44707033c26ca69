//! Object-to-class assignment on the `catalog_object` stand-in table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use kura_core::{Error, ObjectAssignmentRepository, Result};

/// `foreign_key_violation`: the class row vanished before the insert.
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION)
}

/// PostgreSQL implementation of ObjectAssignmentRepository.
#[derive(Clone)]
pub struct PgObjectAssignmentRepository {
    pool: Pool<Postgres>,
}

impl PgObjectAssignmentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ObjectAssignmentRepository for PgObjectAssignmentRepository {
    async fn assign_object(&self, object_id: Uuid, class_id: Option<Uuid>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        if let Some(class_id) = class_id {
            // KEY SHARE blocks a concurrent delete of the class until commit.
            sqlx::query("SELECT id FROM local_class WHERE id = $1 FOR KEY SHARE")
                .bind(class_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?
                .ok_or(Error::ClassNotFound(class_id))?;
        }
        sqlx::query(
            r#"
            INSERT INTO catalog_object (id, primary_local_class_id, created_at_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET primary_local_class_id = EXCLUDED.primary_local_class_id
            "#,
        )
        .bind(object_id)
        .bind(class_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| match class_id {
            Some(class_id) if is_foreign_key_violation(&e) => Error::ClassNotFound(class_id),
            _ => Error::Database(e),
        })?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "assignments",
            op = "assign_object",
            object_id = %object_id,
            class_id = ?class_id,
            "Object assignment updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_fk_violations() {
        assert!(!is_foreign_key_violation(&sqlx::Error::RowNotFound));
        assert!(!is_foreign_key_violation(&sqlx::Error::PoolTimedOut));
    }
}

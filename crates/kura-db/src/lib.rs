//! # kura-db
//!
//! PostgreSQL storage for the kura classification index.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for every `kura-core` trait
//! - Transactional closure-table maintenance with ancestor-chain locking
//! - Closure verification and rebuild
//!
//! ## Example
//!
//! ```rust,ignore
//! use kura_db::{Database, CreateLocalClassRequest, HierarchyMaintainer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/kura").await?;
//!
//!     let bowl = db
//!         .hierarchy
//!         .create_class(CreateLocalClassRequest::labeled("Tea Bowl", None))
//!         .await?;
//!
//!     println!("Created class: {}", bowl);
//!     Ok(())
//! }
//! ```
pub mod aggregates;
pub mod assignments;
pub mod classes;
pub mod classifications;
pub mod hierarchy;
pub mod pool;
mod rows;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use kura_core::*;

pub use aggregates::PgAggregateRepository;
pub use assignments::PgObjectAssignmentRepository;
pub use classes::PgLocalClassRepository;
pub use classifications::PgClassificationRepository;
pub use hierarchy::PgHierarchyMaintainer;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Local class reads, search and detail.
    pub classes: PgLocalClassRepository,
    /// The only writer of tree structure and the closure index.
    pub hierarchy: PgHierarchyMaintainer,
    /// Direct/total counts and breadcrumbs.
    pub aggregates: PgAggregateRepository,
    /// External classification catalog, links and preferred resolution.
    pub classifications: PgClassificationRepository,
    /// Object assignment stand-in.
    pub assignments: PgObjectAssignmentRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            classes: PgLocalClassRepository::new(pool.clone()),
            hierarchy: PgHierarchyMaintainer::new(pool.clone()),
            aggregates: PgAggregateRepository::new(pool.clone()),
            classifications: PgClassificationRepository::new(pool.clone()),
            assignments: PgObjectAssignmentRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Override how many times hierarchy mutations retry a stale lock set.
    pub fn with_hierarchy_attempts(mut self, attempts: u32) -> Self {
        self.hierarchy = self.hierarchy.with_max_attempts(attempts);
        self
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

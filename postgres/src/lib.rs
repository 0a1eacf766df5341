//! `PostgreSQL` repositories for the flash-sale pipeline.
//!
//! [`PostgresStore`] implements [`ShopRepository`](flashsale_core::repository::ShopRepository),
//! [`VoucherRepository`](flashsale_core::repository::VoucherRepository) and
//! [`VoucherOrderRepository`](flashsale_core::repository::VoucherOrderRepository) over one
//! connection pool. The order commit is a single explicit transaction:
//!
//! 1. `SELECT COUNT(*)` for `(user_id, voucher_id)`, duplicate if non-zero
//! 2. `UPDATE ... SET stock = stock - 1 WHERE stock > 0`, sold out if no row changed
//! 3. `INSERT` the order; a unique violation is reported as a duplicate
//!
//! # Example
//!
//! ```ignore
//! use flashsale_postgres::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/flashsale", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod shop;
mod voucher;

use flashsale_core::FlashSaleError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connection pool shared by all repositories.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with at most `max_connections` pooled connections.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, FlashSaleError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(database_error)?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), FlashSaleError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| FlashSaleError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

pub(crate) fn database_error(e: sqlx::Error) -> FlashSaleError {
    FlashSaleError::Database(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

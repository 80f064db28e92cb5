//! Low-level SQLite interactions.
//!
//! Plain functions over a `&mut SqliteConnection` rather than stateful structs, so callers can obtain a pooled
//! connection or open a transaction and pass `&mut *tx` through unchanged.
use log::info;
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

pub mod instances;
pub mod orders;
pub mod products;
pub mod tips;
pub mod wire_fees;

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    info!("🗄️ Connected to {url}");
    sqlx::migrate!().run(&pool).await.map_err(|e| SqlxError::Migrate(Box::new(e)))?;
    Ok(pool)
}

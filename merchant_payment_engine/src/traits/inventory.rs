use chrono::{DateTime, Utc};

use crate::db_types::{DatabaseError, ProductLockOutcome};

/// Product stock bookkeeping.
#[allow(async_fn_in_trait)]
pub trait ProductInventory: Clone {
    /// Create or replace a product with the given total stock.
    async fn upsert_product(
        &self,
        instance_id: &str,
        product_id: &str,
        description: &str,
        total_stock: i64,
    ) -> Result<(), DatabaseError>;

    /// Reserve `quantity` units of a product until `expires_at`.
    ///
    /// A lock is keyed by `(instance, product, lock_uuid)`; re-locking under the same UUID replaces the previous
    /// reservation rather than stacking on top of it. Expired locks do not count against the stock.
    async fn lock_product(
        &self,
        instance_id: &str,
        product_id: &str,
        lock_uuid: &str,
        quantity: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<ProductLockOutcome, DatabaseError>;
}

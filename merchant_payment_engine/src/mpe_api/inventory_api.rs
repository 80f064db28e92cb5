use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    db_types::{DatabaseError, ProductLockOutcome},
    mpe_api::MAX_SOFT_RETRIES,
    traits::ProductInventory,
};

/// API for product stock locks.
#[derive(Clone)]
pub struct InventoryApi<B> {
    db: B,
}

impl<B: ProductInventory> InventoryApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn upsert_product(
        &self,
        instance_id: &str,
        product_id: &str,
        description: &str,
        total_stock: i64,
    ) -> Result<(), DatabaseError> {
        self.db.upsert_product(instance_id, product_id, description, total_stock).await
    }

    /// Reserve stock, retrying transient database failures a bounded number of times.
    pub async fn lock_product(
        &self,
        instance_id: &str,
        product_id: &str,
        lock_uuid: &str,
        quantity: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<ProductLockOutcome, DatabaseError> {
        let mut attempt = 0;
        loop {
            match self.db.lock_product(instance_id, product_id, lock_uuid, quantity, expires_at).await {
                Err(DatabaseError::Soft(e)) if attempt < MAX_SOFT_RETRIES => {
                    attempt += 1;
                    debug!("📦️ Transient failure locking {product_id} (attempt {attempt}). {e}");
                },
                other => return other,
            }
        }
    }
}

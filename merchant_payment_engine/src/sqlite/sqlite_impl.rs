//! `SqliteDatabase` is the concrete SQLite backend for the merchant payment gateway. It implements every trait in
//! [`crate::traits`].
use std::{cmp::Ordering, fmt::Debug};

use chrono::{DateTime, Duration, Utc};
use log::*;
use mpg_common::Amount;
use sqlx::SqlitePool;

use super::db::{instances, new_pool, orders, products, tips, wire_fees};
use crate::{
    db_types::{
        DatabaseError,
        InstanceRow,
        NewOrder,
        NewTipAuthorization,
        OrderFilter,
        OrderSummary,
        PickupId,
        ProductLockOutcome,
        Tip,
        TipId,
        WireFeeEntry,
    },
    traits::{
        InstanceStorage,
        MerchantDatabase,
        OrderManagement,
        ProductInventory,
        TipError,
        TipManagement,
        WireFeeStorage,
    },
};

/// How long an authorized tip stays claimable.
const TIP_LIFETIME_DAYS: i64 = 1;

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteDatabase ({})", self.url)
    }
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl TipManagement for SqliteDatabase {
    async fn lookup_tip_by_id(&self, tip_id: &TipId) -> Result<Tip, TipError> {
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        tips::fetch_tip_by_id(tip_id, &mut conn)
            .await
            .map_err(DatabaseError::from)?
            .ok_or_else(|| TipError::UnknownTipId(tip_id.clone()))
    }

    async fn authorize_tip(
        &self,
        instance_id: &str,
        tip_id: &TipId,
        auth: &NewTipAuthorization,
        reserve_priv: &str,
        exchange_url: &str,
    ) -> Result<DateTime<Utc>, TipError> {
        let created_at = Utc::now();
        let expires_at = created_at + Duration::days(TIP_LIFETIME_DAYS);
        let picked_up = Amount::zero(auth.amount.currency())?;
        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from)?;
        tips::insert_tip(instance_id, tip_id, auth, &picked_up, reserve_priv, exchange_url, created_at, expires_at,
            &mut conn)
            .await
            .map_err(DatabaseError::from)?;
        debug!("🎁️ Tip {tip_id} authorized for {} until {expires_at}", auth.amount);
        Ok(expires_at)
    }

    async fn pickup_tip(&self, total: &Amount, tip_id: &TipId, pickup_id: &PickupId) -> Result<String, TipError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let tip = tips::fetch_tip_by_id(tip_id, &mut tx)
            .await
            .map_err(DatabaseError::from)?
            .ok_or_else(|| TipError::UnknownTipId(tip_id.clone()))?;
        if tips::fetch_pickup(tip_id, pickup_id, &mut tx).await.map_err(DatabaseError::from)?.is_some() {
            // Same commitment as before: hand out the reserve key again without touching the balance.
            debug!("🎁️ Repeated pickup {pickup_id} for tip {tip_id}");
            tx.commit().await.map_err(DatabaseError::from)?;
            return Ok(tip.reserve_priv);
        }
        if tip.expires_at <= Utc::now() {
            return Err(TipError::Expired(tip.expires_at));
        }
        let left = tip.amount_left()?;
        if total.cmp_currency(&left)? == Ordering::Greater {
            return Err(TipError::InsufficientFunds { requested: total.clone(), left });
        }
        let new_picked_up = tip.picked_up.checked_add(total)?;
        tips::record_pickup(tip_id, pickup_id, total, &new_picked_up, &mut tx).await.map_err(DatabaseError::from)?;
        tx.commit().await.map_err(DatabaseError::from)?;
        info!("🎁️ Tip {tip_id} debited by {total} (pickup {pickup_id})");
        Ok(tip.reserve_priv)
    }
}

impl WireFeeStorage for SqliteDatabase {
    async fn store_wire_fee_by_exchange(&self, master_pub: &str, entry: &WireFeeEntry) -> Result<bool, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let inserted = wire_fees::store_wire_fee(master_pub, entry, &mut conn).await?;
        if !inserted {
            trace!("🗄️ Wire fee for {}/{} from {} already stored", master_pub, entry.method, entry.start_date);
        }
        Ok(inserted)
    }

    async fn lookup_wire_fees(&self, master_pub: &str, method: &str) -> Result<Vec<WireFeeEntry>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(wire_fees::fetch_wire_fees(master_pub, method, &mut conn).await?)
    }
}

impl ProductInventory for SqliteDatabase {
    async fn upsert_product(
        &self,
        instance_id: &str,
        product_id: &str,
        description: &str,
        total_stock: i64,
    ) -> Result<(), DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(products::upsert_product(instance_id, product_id, description, total_stock, &mut conn).await?)
    }

    async fn lock_product(
        &self,
        instance_id: &str,
        product_id: &str,
        lock_uuid: &str,
        quantity: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<ProductLockOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let outcome = products::lock_product(instance_id, product_id, lock_uuid, quantity, expires_at, &mut tx).await?;
        if outcome == ProductLockOutcome::Applied {
            tx.commit().await?;
        }
        Ok(outcome)
    }
}

impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, instance_id: &str, order: &NewOrder) -> Result<(OrderSummary, bool), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let result = orders::idempotent_insert(instance_id, order, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn lookup_order(&self, instance_id: &str, order_id: &str) -> Result<Option<OrderSummary>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order(instance_id, order_id, &mut conn).await?)
    }

    async fn mark_order_paid(&self, instance_id: &str, order_id: &str) -> Result<OrderSummary, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::mark_paid(instance_id, order_id, &mut conn)
            .await?
            .ok_or_else(|| DatabaseError::Hard(format!("order {order_id} not found for instance {instance_id}")))
    }

    async fn mark_order_refunded(&self, instance_id: &str, order_id: &str) -> Result<OrderSummary, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::mark_refunded(instance_id, order_id, &mut conn)
            .await?
            .ok_or_else(|| DatabaseError::Hard(format!("order {order_id} not found for instance {instance_id}")))
    }

    async fn lookup_orders(&self, instance_id: &str, filter: &OrderFilter) -> Result<Vec<OrderSummary>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::search(instance_id, filter, &mut conn).await?)
    }
}

impl InstanceStorage for SqliteDatabase {
    async fn lookup_instances(&self, active_only: bool) -> Result<Vec<InstanceRow>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(instances::fetch_instances(active_only, &mut conn).await?)
    }

    async fn insert_instance(&self, instance: &InstanceRow) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let inserted = instances::insert_instance(instance, &mut tx).await?;
        tx.commit().await?;
        Ok(inserted)
    }
}

impl MerchantDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        &self.url
    }
}

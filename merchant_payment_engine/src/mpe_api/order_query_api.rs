use chrono::Utc;
use mpg_common::Amount;

use crate::{
    db_types::{DatabaseError, NewOrder, OrderFilter, OrderSummary},
    events::{OrderChange, OrderChangePublisher},
    traits::OrderManagement,
};

/// API for order storage and listings. Mutations publish an [`OrderChange`] after the commit, which is what
/// drives the server's long-poll wakeups.
#[derive(Clone)]
pub struct OrderQueryApi<B> {
    db: B,
    publisher: Option<OrderChangePublisher>,
}

impl<B: OrderManagement> OrderQueryApi<B> {
    pub fn new(db: B) -> Self {
        Self { db, publisher: None }
    }

    pub fn with_publisher(db: B, publisher: OrderChangePublisher) -> Self {
        Self { db, publisher: Some(publisher) }
    }

    pub async fn search_orders(
        &self,
        instance_id: &str,
        filter: &OrderFilter,
    ) -> Result<Vec<OrderSummary>, DatabaseError> {
        self.db.lookup_orders(instance_id, filter).await
    }

    pub async fn insert_order(
        &self,
        instance_id: &str,
        order: &NewOrder,
    ) -> Result<(OrderSummary, bool), DatabaseError> {
        let (summary, inserted) = self.db.insert_order(instance_id, order).await?;
        if inserted {
            self.publish_change(instance_id, None, &summary).await;
        }
        Ok((summary, inserted))
    }

    pub async fn lookup_order(
        &self,
        instance_id: &str,
        order_id: &str,
    ) -> Result<Option<OrderSummary>, DatabaseError> {
        self.db.lookup_order(instance_id, order_id).await
    }

    pub async fn mark_order_paid(&self, instance_id: &str, order_id: &str) -> Result<OrderSummary, DatabaseError> {
        let summary = self.db.mark_order_paid(instance_id, order_id).await?;
        self.publish_change(instance_id, None, &summary).await;
        Ok(summary)
    }

    /// Flag the order as refunded. The refund amount travels on the published change so that waiters gated on a
    /// refund threshold can compare against it.
    pub async fn mark_order_refunded(
        &self,
        instance_id: &str,
        order_id: &str,
        refund: &Amount,
    ) -> Result<OrderSummary, DatabaseError> {
        let summary = self.db.mark_order_refunded(instance_id, order_id).await?;
        self.publish_change(instance_id, Some(refund.clone()), &summary).await;
        Ok(summary)
    }

    async fn publish_change(&self, instance_id: &str, refund: Option<Amount>, summary: &OrderSummary) {
        if let Some(publisher) = &self.publisher {
            publisher
                .publish(OrderChange {
                    instance_id: instance_id.to_string(),
                    date: Utc::now(),
                    refund,
                    summary: summary.clone(),
                })
                .await;
        }
    }
}

use crate::db_types::{DatabaseError, NewOrder, OrderFilter, OrderSummary};

/// Order storage and filtered listings.
///
/// Order state transitions beyond `mark_order_paid` (refunds, wire confirmation) come from subsystems outside
/// this crate; all of them are expected to publish an [`crate::events::OrderChange`] after committing.
#[allow(async_fn_in_trait)]
pub trait OrderManagement: Clone {
    /// Store a new order. Idempotent; returns the stored summary and `false` when the order already existed.
    async fn insert_order(&self, instance_id: &str, order: &NewOrder) -> Result<(OrderSummary, bool), DatabaseError>;

    /// A single order, if it exists.
    async fn lookup_order(&self, instance_id: &str, order_id: &str) -> Result<Option<OrderSummary>, DatabaseError>;

    /// Flip the order to paid, returning the updated summary.
    async fn mark_order_paid(&self, instance_id: &str, order_id: &str) -> Result<OrderSummary, DatabaseError>;

    /// Flip the order to refunded, returning the updated summary. The refund amount itself is carried on the
    /// resulting [`crate::events::OrderChange`], not stored here.
    async fn mark_order_refunded(&self, instance_id: &str, order_id: &str) -> Result<OrderSummary, DatabaseError>;

    /// Orders of one instance selected by the filter. `delta` rows at most, walking forward or backward from the
    /// pivot depending on its sign; backward walks return rows in descending row order.
    async fn lookup_orders(&self, instance_id: &str, filter: &OrderFilter) -> Result<Vec<OrderSummary>, DatabaseError>;
}

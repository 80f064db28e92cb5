//! Order-change event channel.
//!
//! Whatever subsystem mutates order state publishes an [`OrderChange`] here; the HTTP layer subscribes and feeds
//! the events into its long-poll machinery. Delivery is sequential and in publish order, because pollers rely on
//! observing changes in the order they were committed.
use chrono::{DateTime, Utc};
use log::*;
use mpg_common::Amount;
use tokio::sync::mpsc;

use crate::db_types::OrderSummary;

/// A committed change to an order's payment state. Carries the full order summary so that subscribers never have
/// to read the database back to learn what changed.
#[derive(Debug, Clone)]
pub struct OrderChange {
    pub instance_id: String,
    pub date: DateTime<Utc>,
    /// Refund granted by this change, if any. Payment waiters with a refund threshold compare against it.
    pub refund: Option<Amount>,
    pub summary: OrderSummary,
}

impl OrderChange {
    pub fn order_id(&self) -> &str {
        &self.summary.order_id
    }

    /// Row serial of the order; pollers use it to decide on which side of their pivot the change falls.
    pub fn serial(&self) -> i64 {
        self.summary.row_id
    }
}

/// Publishing half of the channel. Cheap to clone; hand one to every subsystem that mutates orders.
#[derive(Clone)]
pub struct OrderChangePublisher {
    sender: mpsc::Sender<OrderChange>,
}

impl OrderChangePublisher {
    pub async fn publish(&self, change: OrderChange) {
        if let Err(e) = self.sender.send(change).await {
            error!("📬️ Failed to publish order change: {e}");
        }
    }
}

/// Receiving half. A single consumer drains the channel and hands each event to its sink, one at a time.
pub struct OrderChangeListener {
    receiver: mpsc::Receiver<OrderChange>,
}

impl OrderChangeListener {
    /// Drain events until every publisher is dropped, calling `sink` for each in publish order.
    pub async fn run<F>(mut self, mut sink: F)
    where F: FnMut(OrderChange) {
        debug!("📬️ Order-change listener started");
        while let Some(change) = self.receiver.recv().await {
            trace!("📬️ Order change for {}/{}", change.instance_id, change.order_id());
            sink(change);
        }
        debug!("📬️ Order-change listener shut down");
    }

    pub async fn recv(&mut self) -> Option<OrderChange> {
        self.receiver.recv().await
    }
}

/// Create a connected publisher/listener pair.
pub fn order_change_channel(buffer: usize) -> (OrderChangePublisher, OrderChangeListener) {
    let (sender, receiver) = mpsc::channel(buffer);
    (OrderChangePublisher { sender }, OrderChangeListener { receiver })
}

#[cfg(test)]
mod test {
    use super::*;

    fn change(serial: i64) -> OrderChange {
        OrderChange {
            instance_id: "default".to_string(),
            date: Utc::now(),
            refund: None,
            summary: OrderSummary {
                row_id: serial,
                order_id: format!("order-{serial}"),
                summary: "a hat".to_string(),
                total: "EUR:5".parse().unwrap(),
                paid: true,
                refunded: false,
                wired: false,
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let _ = env_logger::try_init();
        let (publisher, mut listener) = order_change_channel(16);
        for serial in 1..=5 {
            publisher.publish(change(serial)).await;
        }
        drop(publisher);
        let mut serials = Vec::new();
        while let Some(change) = listener.recv().await {
            serials.push(change.serial());
        }
        assert_eq!(serials, vec![1, 2, 3, 4, 5]);
    }
}

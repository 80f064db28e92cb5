//! Long-poll machinery.
//!
//! Handlers that find nothing to report register here and suspend; the order-change pump resumes them when a
//! matching change is committed, or the tokio timer does when their client-supplied timeout expires. Two kinds of
//! waits exist:
//!
//! * payment waits, keyed by the SHA-256 fingerprint of `merchant_pub || order_id`, optionally gated on a minimum
//!   refund amount, and
//! * order-list polls, which hold a full [`OrderFilter`] and are woken by the first change that matches it.
//!
//! Shutdown calls [`WaitRegistry::drain`], which force-resumes everything so no connection outlives the server.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use log::*;
use mpg_common::Amount;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use merchant_payment_engine::{
    db_types::{OrderFilter, OrderSummary},
    events::OrderChange,
};

/// Key under which payment waiters are filed.
pub type EventKey = [u8; 32];

/// Fingerprint of an order for wait-map purposes.
pub fn payment_trigger_key(merchant_pub: &[u8], order_id: &str) -> EventKey {
    let mut hasher = Sha256::new();
    hasher.update(merchant_pub);
    hasher.update(order_id.as_bytes());
    hasher.finalize().into()
}

/// Why a payment wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// A matching change was committed. Carries the refund granted by that change, if any.
    Notified(Option<Amount>),
    TimedOut,
    /// The server is shutting down.
    Drained,
}

enum WakeMessage {
    Change(Option<Amount>),
    Drained,
}

struct PaymentWaiter {
    id: u64,
    /// Resume only on changes granting a refund strictly above this amount.
    min_refund: Option<Amount>,
    tx: oneshot::Sender<WakeMessage>,
}

struct OrderPoller {
    id: u64,
    instance_id: String,
    filter: OrderFilter,
    tx: oneshot::Sender<Vec<OrderSummary>>,
}

/// Registry of suspended long-poll requests. One per server.
#[derive(Default)]
pub struct WaitRegistry {
    payment_waiters: Mutex<HashMap<EventKey, Vec<PaymentWaiter>>>,
    order_pollers: Mutex<Vec<OrderPoller>>,
    next_id: AtomicU64,
    draining: AtomicBool,
}

/// A registered payment wait. Registration is synchronous, so callers can register *before* their final database
/// check and then suspend; a change committed in between is caught by either the check or the ticket. Dropping a
/// ticket deregisters it.
pub struct PaymentTicket<'a> {
    registry: &'a WaitRegistry,
    key: EventKey,
    id: u64,
    rx: Option<oneshot::Receiver<WakeMessage>>,
}

impl PaymentTicket<'_> {
    /// Suspend until a matching change is committed, the timeout expires, or the server drains.
    pub async fn wait(mut self, timeout: Duration) -> WaitOutcome {
        let Some(rx) = self.rx.take() else { return WaitOutcome::Drained };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(WakeMessage::Change(refund))) => WaitOutcome::Notified(refund),
            Ok(Ok(WakeMessage::Drained)) | Ok(Err(_)) => WaitOutcome::Drained,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}

impl Drop for PaymentTicket<'_> {
    fn drop(&mut self) {
        self.registry.remove_payment_waiter(&self.key, self.id);
    }
}

/// A registered order-list poll. Same contract as [`PaymentTicket`].
pub struct OrderTicket<'a> {
    registry: &'a WaitRegistry,
    id: u64,
    rx: Option<oneshot::Receiver<Vec<OrderSummary>>>,
}

impl OrderTicket<'_> {
    /// Suspend until a matching change arrives, the timeout expires, or the server drains. Empty on timeout or
    /// drain.
    pub async fn wait(mut self, timeout: Duration) -> Vec<OrderSummary> {
        let Some(rx) = self.rx.take() else { return Vec::new() };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(orders)) => orders,
            _ => Vec::new(),
        }
    }
}

impl Drop for OrderTicket<'_> {
    fn drop(&mut self) {
        self.registry.remove_order_poller(self.id);
    }
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payment wait under `key`. With `min_refund` set, changes are ignored unless they grant a refund
    /// in the same currency strictly above that amount.
    pub fn register_payment(&self, key: EventKey, min_refund: Option<Amount>) -> PaymentTicket<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.draining.load(Ordering::SeqCst) {
            let _ = tx.send(WakeMessage::Drained);
        } else if let Ok(mut map) = self.payment_waiters.lock() {
            map.entry(key).or_default().push(PaymentWaiter { id, min_refund, tx });
            trace!("🕰️ Payment waiter {id} registered");
        }
        PaymentTicket { registry: self, key, id, rx: Some(rx) }
    }

    /// Register an order-list poll for `instance_id` with the given filter.
    pub fn register_order_poll(&self, instance_id: &str, filter: OrderFilter) -> OrderTicket<'_> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.draining.load(Ordering::SeqCst) {
            let _ = tx.send(Vec::new());
        } else if let Ok(mut pollers) = self.order_pollers.lock() {
            pollers.push(OrderPoller { id, instance_id: instance_id.to_string(), filter, tx });
            trace!("🕰️ Order poller {id} for '{instance_id}' registered");
        }
        OrderTicket { registry: self, id, rx: Some(rx) }
    }

    /// Register-and-wait in one step, for callers with no check to interleave.
    pub async fn wait_for_payment(
        &self,
        key: EventKey,
        timeout: Duration,
        min_refund: Option<Amount>,
    ) -> WaitOutcome {
        self.register_payment(key, min_refund).wait(timeout).await
    }

    pub async fn wait_for_orders(
        &self,
        instance_id: &str,
        filter: OrderFilter,
        timeout: Duration,
    ) -> Vec<OrderSummary> {
        self.register_order_poll(instance_id, filter).wait(timeout).await
    }

    /// Feed a committed order change into the registry, waking every wait it satisfies. Called by the event pump
    /// for each change, in commit order.
    pub fn notify(&self, merchant_pub: &[u8], change: &OrderChange) {
        let key = payment_trigger_key(merchant_pub, change.order_id());
        self.resume_payment_waiters(&key, change.refund.as_ref());
        self.resume_order_pollers(change);
    }

    fn resume_payment_waiters(&self, key: &EventKey, refund: Option<&Amount>) {
        let Ok(mut map) = self.payment_waiters.lock() else { return };
        let Some(waiters) = map.get_mut(key) else { return };
        let mut kept = Vec::new();
        for waiter in waiters.drain(..) {
            let wake = match &waiter.min_refund {
                None => true,
                // cmp_currency errors on mismatched currency; such a refund never satisfies the threshold.
                Some(min) => refund
                    .map(|r| r.cmp_currency(min).map(|ord| ord.is_gt()).unwrap_or(false))
                    .unwrap_or(false),
            };
            if wake {
                trace!("🕰️ Waking payment waiter {}", waiter.id);
                let _ = waiter.tx.send(WakeMessage::Change(refund.cloned()));
            } else {
                kept.push(waiter);
            }
        }
        if kept.is_empty() {
            map.remove(key);
        } else {
            *waiters = kept;
        }
    }

    fn resume_order_pollers(&self, change: &OrderChange) {
        let Ok(mut pollers) = self.order_pollers.lock() else { return };
        let summary = &change.summary;
        let mut idx = 0;
        while idx < pollers.len() {
            let poller = &pollers[idx];
            let matches = poller.instance_id == change.instance_id
                && poller.filter.matches_flags(summary.paid, summary.refunded, summary.wired)
                && poller.filter.matches_pivot(summary.row_id, summary.created_at);
            if matches {
                let poller = pollers.swap_remove(idx);
                trace!("🕰️ Waking order poller {}", poller.id);
                let _ = poller.tx.send(vec![summary.clone()]);
            } else {
                idx += 1;
            }
        }
    }

    /// Force-resume every suspended wait; subsequent waits return immediately. Called once at shutdown, before
    /// the HTTP server is torn down.
    pub fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let waiters: Vec<PaymentWaiter> = match self.payment_waiters.lock() {
            Ok(mut map) => map.drain().flat_map(|(_, v)| v).collect(),
            Err(_) => Vec::new(),
        };
        let pollers: Vec<OrderPoller> = match self.order_pollers.lock() {
            Ok(mut pollers) => pollers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        info!("🕰️ Draining {} payment waiter(s) and {} order poller(s)", waiters.len(), pollers.len());
        for waiter in waiters {
            let _ = waiter.tx.send(WakeMessage::Drained);
        }
        for poller in pollers {
            let _ = poller.tx.send(Vec::new());
        }
    }

    /// Number of currently suspended payment waiters. Used by tests to verify bookkeeping.
    pub fn payment_waiter_count(&self) -> usize {
        self.payment_waiters.lock().map(|m| m.values().map(Vec::len).sum()).unwrap_or(0)
    }

    pub fn order_poller_count(&self) -> usize {
        self.order_pollers.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn remove_payment_waiter(&self, key: &EventKey, id: u64) {
        let Ok(mut map) = self.payment_waiters.lock() else { return };
        if let Some(waiters) = map.get_mut(key) {
            waiters.retain(|w| w.id != id);
            if waiters.is_empty() {
                map.remove(key);
            }
        }
    }

    fn remove_order_poller(&self, id: u64) {
        if let Ok(mut pollers) = self.order_pollers.lock() {
            pollers.retain(|p| p.id != id);
        }
    }
}

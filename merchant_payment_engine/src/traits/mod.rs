//! Interface contracts of the persistence backends.
//!
//! The HTTP layer never issues queries itself; it consumes these traits through the engine APIs. A backend has to
//! implement all of them to act as the store for the gateway:
//!
//! * [`TipManagement`] — tip authorization, status and the idempotent pickup debit.
//! * [`WireFeeStorage`] — wire-fee schedules learned from exchanges.
//! * [`ProductInventory`] — product stock and time-limited stock locks.
//! * [`OrderManagement`] — order storage and filtered listings.
//! * [`InstanceStorage`] — merchant instances and their bank accounts.
//! * [`MerchantDatabase`] — umbrella trait tying the above together.
mod instance_storage;
mod inventory;
mod merchant_database;
mod order_management;
mod tip_management;
mod wire_fees;

pub use instance_storage::InstanceStorage;
pub use inventory::ProductInventory;
pub use merchant_database::MerchantDatabase;
pub use order_management::OrderManagement;
pub use tip_management::{TipError, TipManagement};
pub use wire_fees::WireFeeStorage;

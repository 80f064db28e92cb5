//! Engine APIs wrapping a backend.
//!
//! Thin, cloneable wrappers over a [`crate::traits::MerchantDatabase`] implementation. Policy that does not belong
//! in the storage layer lives here, most importantly the bounded retry of transient (`Soft`) database failures.
mod instance_api;
mod inventory_api;
mod order_query_api;
mod tip_flow_api;

pub use instance_api::InstanceApi;
pub use inventory_api::InventoryApi;
pub use order_query_api::OrderQueryApi;
pub use tip_flow_api::TipFlowApi;

/// Upper bound on retries of a soft database failure at one call site.
pub(crate) const MAX_SOFT_RETRIES: u32 = 5;

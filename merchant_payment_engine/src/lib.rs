//! Merchant Payment Engine
//!
//! Core, HTTP-agnostic logic for the merchant payment gateway. The crate is split into:
//! 1. Database types and backend traits ([`db_types`], [`traits`]). SQLite (via sqlx) is the supported backend;
//!    server code should never touch the database directly but go through the engine APIs instead.
//! 2. The engine APIs ([`mpe_api`]): tip authorization and pickup flow, order queries, product stock locks and
//!    instance storage. These wrap a backend and add the cross-cutting policies (bounded retries on transient
//!    database errors).
//! 3. The order-change event channel ([`events`]): whoever mutates order state publishes an [`events::OrderChange`],
//!    and the HTTP layer routes it into its long-poll machinery.
pub mod db_types;
pub mod events;
pub mod traits;

mod mpe_api;
mod sqlite;

pub use mpe_api::{InstanceApi, InventoryApi, OrderQueryApi, TipFlowApi};
pub use sqlite::SqliteDatabase;

use crate::db_types::{DatabaseError, WireFeeEntry};

/// Storage for wire-fee schedules announced by exchanges.
#[allow(async_fn_in_trait)]
pub trait WireFeeStorage: Clone {
    /// Persist one fee entry for the exchange identified by its master public key.
    ///
    /// Duplicate entries (same exchange, method and start date) are silently tolerated; returns `false` when the
    /// entry already existed.
    async fn store_wire_fee_by_exchange(&self, master_pub: &str, entry: &WireFeeEntry) -> Result<bool, DatabaseError>;

    /// All stored fee entries for one exchange and wire method, ordered by start date.
    async fn lookup_wire_fees(&self, master_pub: &str, method: &str) -> Result<Vec<WireFeeEntry>, DatabaseError>;
}

use crate::traits::{InstanceStorage, OrderManagement, ProductInventory, TipManagement, WireFeeStorage};

/// The full backend contract for the merchant payment gateway.
pub trait MerchantDatabase:
    Clone + TipManagement + WireFeeStorage + ProductInventory + OrderManagement + InstanceStorage
{
    /// The URL of the database.
    fn url(&self) -> &str;
}

use crate::db_types::{DatabaseError, InstanceRow};

/// Storage for merchant instances and their bank accounts.
#[allow(async_fn_in_trait)]
pub trait InstanceStorage: Clone {
    /// All stored instances with their accounts. With `active_only`, inactive accounts are filtered out.
    async fn lookup_instances(&self, active_only: bool) -> Result<Vec<InstanceRow>, DatabaseError>;

    /// Store a new instance. Returns `false` without writing anything when the id is already taken.
    async fn insert_instance(&self, instance: &InstanceRow) -> Result<bool, DatabaseError>;
}

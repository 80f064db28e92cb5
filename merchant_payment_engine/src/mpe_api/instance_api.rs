use crate::{
    db_types::{DatabaseError, InstanceRow},
    traits::InstanceStorage,
};

/// API for instance storage.
#[derive(Clone)]
pub struct InstanceApi<B> {
    db: B,
}

impl<B: InstanceStorage> InstanceApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn fetch_instances(&self, active_only: bool) -> Result<Vec<InstanceRow>, DatabaseError> {
        self.db.lookup_instances(active_only).await
    }

    /// Returns `false` when the instance id already exists.
    pub async fn create_instance(&self, instance: &InstanceRow) -> Result<bool, DatabaseError> {
        self.db.insert_instance(instance).await
    }
}

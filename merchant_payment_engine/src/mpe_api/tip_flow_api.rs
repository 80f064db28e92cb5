use log::*;
use mpg_common::Amount;

use crate::{
    db_types::{DatabaseError, NewTipAuthorization, PickupId, Tip, TipAuthorization, TipId},
    mpe_api::MAX_SOFT_RETRIES,
    traits::{TipError, TipManagement},
};

/// API for the tip authorize / status / pickup flow.
#[derive(Clone)]
pub struct TipFlowApi<B> {
    db: B,
}

impl<B: TipManagement> TipFlowApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn tip_status(&self, tip_id: &TipId) -> Result<Tip, TipError> {
        self.db.lookup_tip_by_id(tip_id).await
    }

    /// Authorize a new tip against the instance's tipping reserve. The tip id is freshly generated.
    pub async fn authorize_tip(
        &self,
        instance_id: &str,
        auth: &NewTipAuthorization,
        reserve_priv: &str,
        exchange_url: &str,
    ) -> Result<TipAuthorization, TipError> {
        let tip_id = TipId::random();
        let expiration = self.db.authorize_tip(instance_id, &tip_id, auth, reserve_priv, exchange_url).await?;
        Ok(TipAuthorization { tip_id, expiration })
    }

    /// Debit the tip for one pickup, retrying transient database failures a bounded number of times.
    pub async fn pickup(&self, total: &Amount, tip_id: &TipId, pickup_id: &PickupId) -> Result<String, TipError> {
        let mut attempt = 0;
        loop {
            match self.db.pickup_tip(total, tip_id, pickup_id).await {
                Err(TipError::Database(DatabaseError::Soft(e))) if attempt < MAX_SOFT_RETRIES => {
                    attempt += 1;
                    debug!("🎁️ Transient failure on pickup {pickup_id} (attempt {attempt}). {e}");
                },
                other => return other,
            }
        }
    }
}

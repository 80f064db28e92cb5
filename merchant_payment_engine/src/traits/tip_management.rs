use chrono::{DateTime, Utc};
use mpg_common::{Amount, AmountError};
use thiserror::Error;

use crate::db_types::{DatabaseError, NewTipAuthorization, PickupId, Tip, TipId};

#[derive(Debug, Clone, Error)]
pub enum TipError {
    #[error("Tip id {0} is not known")]
    UnknownTipId(TipId),
    #[error("Requested {requested}, but only {left} is left on the tip")]
    InsufficientFunds { requested: Amount, left: Amount },
    #[error("Tip expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("Amount error on tip arithmetic. {0}")]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Tip storage contract.
#[allow(async_fn_in_trait)]
pub trait TipManagement: Clone {
    /// Fetch a tip by its public tip id.
    async fn lookup_tip_by_id(&self, tip_id: &TipId) -> Result<Tip, TipError>;

    /// Store a new tip authorization against the instance's tipping reserve and return its id and expiration.
    async fn authorize_tip(
        &self,
        instance_id: &str,
        tip_id: &TipId,
        auth: &NewTipAuthorization,
        reserve_priv: &str,
        exchange_url: &str,
    ) -> Result<DateTime<Utc>, TipError>;

    /// Debit `total` from the tip and return the reserve private key to withdraw with.
    ///
    /// Idempotent in `(tip_id, pickup_id)`: a repeated call returns the same reserve key and never debits the
    /// tip balance twice. This is what makes client retries of a pickup safe.
    async fn pickup_tip(&self, total: &Amount, tip_id: &TipId, pickup_id: &PickupId) -> Result<String, TipError>;
}

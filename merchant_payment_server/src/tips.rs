//! The tip pickup pipeline.
//!
//! A wallet redeems a tip by submitting up to [`MAX_PLANCHETS`] blinded coins. The pipeline validates the
//! planchets against the exchange's current denominations, sums up the amount being withdrawn (coin values plus
//! withdraw fees), debits the tip exactly once per distinct planchet set, and then withdraws the coins from the
//! tip reserve in parallel. The pickup id is the SHA-256 hash over the ordered planchet list, so a wallet retrying
//! the same request hits the same pickup row and is not charged twice.

use base64::decode as b64decode;
use ed25519_dalek::{Signer, SigningKey};
use futures::future::try_join_all;
use log::*;
use mpg_common::Amount;
use sha2::{Digest, Sha256};

use merchant_payment_engine::{
    db_types::{PickupId, Tip, TipId},
    traits::TipManagement,
    TipFlowApi,
};

use crate::{
    data_objects::{BlindSig, PickupRequest, PickupResponse},
    errors::{ExchangeFailure, ServerError},
    exchange::api::{ExchangeApiError, ExchangeClient, ExchangeKeys, WithdrawRequest},
    exchange::ExchangeHandle,
};

/// Upper bound on planchets in one pickup request.
pub const MAX_PLANCHETS: usize = 1024;

/// A planchet after syntactic validation.
struct ValidPlanchet {
    denom_pub_hash: String,
    coin_ev: String,
}

/// Validate the planchet list syntactically: bounds, hex denomination hashes, base64 coin envelopes.
fn validate_planchets(request: &PickupRequest) -> Result<Vec<ValidPlanchet>, ServerError> {
    if request.planchets.is_empty() {
        return Err(ServerError::ParameterMissing("planchets".to_string()));
    }
    if request.planchets.len() > MAX_PLANCHETS {
        return Err(ServerError::TooManyPlanchets(request.planchets.len()));
    }
    request
        .planchets
        .iter()
        .map(|p| {
            if hex::decode(&p.denom_pub_hash).map(|b| b.len() != 32).unwrap_or(true) {
                return Err(ServerError::ParameterMalformed(format!(
                    "denom_pub_hash '{}' is not a hex-encoded hash",
                    p.denom_pub_hash
                )));
            }
            if b64decode(&p.coin_ev).is_err() {
                return Err(ServerError::ParameterMalformed("coin_ev is not valid base64".to_string()));
            }
            Ok(ValidPlanchet { denom_pub_hash: p.denom_pub_hash.clone(), coin_ev: p.coin_ev.clone() })
        })
        .collect()
}

/// The pickup id commits to the full, ordered planchet list.
fn pickup_id(planchets: &[ValidPlanchet]) -> PickupId {
    let mut hasher = Sha256::new();
    for p in planchets {
        hasher.update(p.denom_pub_hash.as_bytes());
        hasher.update(p.coin_ev.as_bytes());
    }
    PickupId(hex::encode(hasher.finalize()))
}

/// Sum of coin values plus withdraw fees over the requested denominations.
fn pickup_total(keys: &ExchangeKeys, planchets: &[ValidPlanchet]) -> Result<Amount, ServerError> {
    let mut total: Option<Amount> = None;
    for p in planchets {
        let denom = keys
            .find_denom(&p.denom_pub_hash)
            .ok_or_else(|| ServerError::ExchangeLackedKey(p.denom_pub_hash.clone()))?;
        let with_fee = denom.value.checked_add(&denom.fee_withdraw)?;
        total = Some(match total {
            None => with_fee,
            Some(t) => t.checked_add(&with_fee)?,
        });
    }
    total.ok_or_else(|| ServerError::ParameterMissing("planchets".to_string()))
}

fn reserve_key_from_hex(reserve_priv: &str) -> Result<SigningKey, ServerError> {
    let bytes: [u8; 32] = hex::decode(reserve_priv)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ServerError::InternalInvariant("stored reserve key is corrupt".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Run one pickup end to end. Returns blind signatures in planchet order.
pub async fn run_pickup<B, C>(
    api: &TipFlowApi<B>,
    exchange: &ExchangeHandle,
    client: &C,
    tip: &Tip,
    tip_id: &TipId,
    request: &PickupRequest,
    correlation_id: Option<&str>,
) -> Result<PickupResponse, ServerError>
where
    B: TipManagement,
    C: ExchangeClient,
{
    let planchets = validate_planchets(request)?;
    if exchange.keys.denoms.is_empty() {
        return Err(ServerError::ExchangeLackedKeys);
    }
    let total = pickup_total(&exchange.keys, &planchets)?;
    let pickup_id = pickup_id(&planchets);
    debug!("🎁️ Pickup {pickup_id} on tip {tip_id} debits {total} ({} planchets)", planchets.len());

    // Debits at most once per pickup id; a retry of the same planchet set gets the reserve key back for free.
    let reserve_priv = api.pickup(&total, tip_id, &pickup_id).await?;
    let reserve_key = reserve_key_from_hex(&reserve_priv)?;
    let reserve_pub = hex::encode(reserve_key.verifying_key().to_bytes());

    let withdrawals = planchets.iter().map(|p| {
        let mut signed = Vec::with_capacity(p.denom_pub_hash.len() + p.coin_ev.len());
        signed.extend_from_slice(p.denom_pub_hash.as_bytes());
        signed.extend_from_slice(p.coin_ev.as_bytes());
        let reserve_sig = hex::encode(reserve_key.sign(&signed).to_bytes());
        let request = WithdrawRequest {
            denom_pub_hash: p.denom_pub_hash.clone(),
            coin_ev: p.coin_ev.clone(),
            reserve_pub: reserve_pub.clone(),
            reserve_sig,
        };
        let base_url = tip.exchange_url.clone();
        async move { client.withdraw(&base_url, &request, correlation_id).await }
    });
    // One failure aborts the batch; remaining withdrawals are dropped.
    let responses = try_join_all(withdrawals).await.map_err(withdraw_error)?;
    info!("🎁️ Pickup {pickup_id} on tip {tip_id} withdrew {} coin(s)", responses.len());
    Ok(PickupResponse { blind_sigs: responses.into_iter().map(|r| BlindSig { blind_sig: r.ev_sig }).collect() })
}

fn withdraw_error(e: ExchangeApiError) -> ServerError {
    match e {
        ExchangeApiError::Upstream { status, code, reply } => ServerError::WithdrawFailed(ExchangeFailure {
            exchange_http_status: status,
            exchange_code: code,
            exchange_reply: reply,
        }),
        other => ServerError::ExchangeDown(other.to_string()),
    }
}

//! Request and response bodies of the HTTP API.

use chrono::{DateTime, Utc};
use mpg_common::Amount;
use serde::{Deserialize, Serialize};

use merchant_payment_engine::db_types::{OrderSummary, Tip, TipId};

use crate::instances::MerchantInstance;

/// `GET /config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub currency: String,
    pub version: String,
    /// Instances served by this deployment.
    pub instances: Vec<InstanceInfo>,
}

/// One instance as rendered in `/config` and instance listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    /// Hex-encoded EdDSA public key of the instance.
    pub merchant_pub: String,
    /// Wire methods of the instance's active bank accounts.
    pub payment_targets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip_exchange: Option<String>,
}

impl InstanceInfo {
    pub fn from_instance(instance: &MerchantInstance) -> Self {
        let mut payment_targets: Vec<String> = instance.active_wire_methods().map(|m| m.method.clone()).collect();
        payment_targets.sort();
        payment_targets.dedup();
        Self {
            id: instance.id.clone(),
            name: instance.name.clone(),
            merchant_pub: instance.merchant_pub_hex(),
            payment_targets,
            tip_exchange: instance.tip_exchange.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceListResponse {
    pub instances: Vec<InstanceInfo>,
}

/// `POST /private/instances`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCreateRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payto_uris: Vec<String>,
    #[serde(default)]
    pub tip_exchange: Option<String>,
    /// Hex-encoded reserve private key for tipping. Accepted on creation, never echoed back.
    #[serde(default)]
    pub tip_reserve_priv: Option<String>,
}

/// Public `GET /tips/{tip_id}`: what a visitor's wallet is allowed to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipStatusResponse {
    pub exchange_url: String,
    pub amount: Amount,
    pub amount_left: Amount,
    pub stamp_created: DateTime<Utc>,
    pub stamp_expires: DateTime<Utc>,
    /// Free-form JSON the frontend attached when authorizing the tip, echoed verbatim.
    pub extra: serde_json::Value,
}

impl TipStatusResponse {
    pub fn from_tip(tip: &Tip, amount_left: Amount) -> Self {
        Self {
            exchange_url: tip.exchange_url.clone(),
            amount: tip.amount.clone(),
            amount_left,
            stamp_created: tip.created_at,
            stamp_expires: tip.expires_at,
            extra: parse_extra(&tip.extra),
        }
    }
}

/// The `extra` column holds raw JSON text; unreadable rows degrade to `null` rather than failing the status call.
pub(crate) fn parse_extra(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
}

/// Private `GET /private/tips/{tip_id}`: adds the merchant-facing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateTipStatusResponse {
    pub tip_id: TipId,
    pub exchange_url: String,
    pub amount: Amount,
    pub picked_up: Amount,
    pub justification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_url: Option<String>,
    pub extra: serde_json::Value,
    pub stamp_created: DateTime<Utc>,
    pub stamp_expires: DateTime<Utc>,
}

/// `POST /private/tips` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipAuthorizeResponse {
    pub tip_id: TipId,
    pub tip_expiration: DateTime<Utc>,
    /// `taler://tip` URI the merchant forwards to the visitor.
    pub taler_tip_uri: String,
}

/// One blinded coin the wallet wants signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanchetDetail {
    /// Hex-encoded hash of the denomination public key.
    pub denom_pub_hash: String,
    /// Base64-encoded blinded coin envelope.
    pub coin_ev: String,
}

/// `POST /tips/{tip_id}/pickup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupRequest {
    pub planchets: Vec<PlanchetDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindSig {
    pub blind_sig: String,
}

/// Blind signatures in planchet order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupResponse {
    pub blind_sigs: Vec<BlindSig>,
}

/// `POST /private/products/{product_id}/lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductLockRequest {
    pub lock_uuid: String,
    pub quantity: i64,
    /// How long to hold the reservation, in milliseconds.
    pub duration_ms: u64,
}

/// `POST /private/products`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductUpsertRequest {
    pub product_id: String,
    #[serde(default)]
    pub description: String,
    pub total_stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderSummary>,
}

/// `POST /private/orders` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
    /// `taler://pay` URI for this order, as seen from the request that created it.
    pub taler_pay_uri: String,
}

/// `GET /orders/{order_id}` (public payment-status poll) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub paid: bool,
    pub refunded: bool,
    pub taler_pay_uri: String,
}

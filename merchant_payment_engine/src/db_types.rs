use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use mpg_common::{Amount, AmountError};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------     TipId       -------------------------------------------------------------

/// Identifier under which a tip is offered to a visitor. Opaque to the engine; generated as 32 random bytes in
/// hex when a tip is authorized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct TipId(pub String);

impl TipId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TipId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

//--------------------------------------     PickupId       ----------------------------------------------------------

/// Hash committing to the full, ordered planchet list of one pickup request. Identical retries therefore map to
/// the same pickup id, which is what makes `pickup_tip` idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct PickupId(pub String);

impl PickupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PickupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------     Tips       --------------------------------------------------------------

/// A stored tip authorization.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tip {
    pub id: i64,
    pub tip_id: TipId,
    pub instance_id: String,
    pub exchange_url: String,
    pub reserve_priv: String,
    pub justification: String,
    /// Where the wallet should send the visitor after the pickup, if the frontend supplied one.
    pub next_url: Option<String>,
    /// Free-form JSON attached by the merchant frontend, returned verbatim in status replies.
    pub extra: String,
    pub amount: Amount,
    pub picked_up: Amount,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Tip {
    pub fn amount_left(&self) -> Result<Amount, AmountError> {
        self.amount.checked_sub(&self.picked_up)
    }
}

/// Parameters of a new tip authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTipAuthorization {
    pub amount: Amount,
    pub justification: String,
    #[serde(default)]
    pub next_url: Option<String>,
    /// Free-form JSON stored with the tip and echoed in status replies.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Result of authorizing a tip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipAuthorization {
    pub tip_id: TipId,
    pub expiration: DateTime<Utc>,
}

//--------------------------------------     Wire fees       ---------------------------------------------------------

/// One entry of an exchange's wire-fee schedule: fees for a single wire method over `[start_date, end_date)`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WireFeeEntry {
    pub method: String,
    pub wire_fee: Amount,
    pub closing_fee: Amount,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub master_sig: String,
}

//--------------------------------------     Orders       ------------------------------------------------------------

/// Tri-valued selector used by the order filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNoAll {
    Yes,
    No,
    #[default]
    All,
}

impl YesNoAll {
    pub fn matches(&self, value: bool) -> bool {
        match self {
            Self::Yes => value,
            Self::No => !value,
            Self::All => true,
        }
    }
}

impl FromStr for YesNoAll {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "all" => Ok(Self::All),
            other => Err(format!("expected yes/no/all, got {other}")),
        }
    }
}

impl Display for YesNoAll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::All => "all",
        };
        write!(f, "{s}")
    }
}

fn default_delta() -> i64 {
    -20
}

/// Selection criteria for listing or polling orders.
///
/// `delta > 0` walks forward from (`start_row`, `date`); `delta < 0` walks backward. When `start_row` is absent
/// the walk starts at the corresponding end of the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFilter {
    #[serde(default)]
    pub paid: YesNoAll,
    #[serde(default)]
    pub refunded: YesNoAll,
    #[serde(default)]
    pub wired: YesNoAll,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default = "default_delta")]
    pub delta: i64,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            paid: YesNoAll::All,
            refunded: YesNoAll::All,
            wired: YesNoAll::All,
            start: None,
            delta: default_delta(),
            date: None,
            timeout_ms: None,
        }
    }
}

impl OrderFilter {
    /// Whether an order with the given state passes the tri-valued part of the filter.
    pub fn matches_flags(&self, paid: bool, refunded: bool, wired: bool) -> bool {
        self.paid.matches(paid) && self.refunded.matches(refunded) && self.wired.matches(wired)
    }

    /// Whether a freshly changed order at (`serial`, `date`) lies on the side of the pivot this filter walks
    /// towards.
    pub fn matches_pivot(&self, serial: i64, date: DateTime<Utc>) -> bool {
        let start = self.start.unwrap_or(if self.delta >= 0 { 0 } else { i64::MAX });
        if self.delta >= 0 {
            serial > start && self.date.map(|d| date >= d).unwrap_or(true)
        } else {
            serial < start && self.date.map(|d| date <= d).unwrap_or(true)
        }
    }
}

impl Display for OrderFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "paid={} refunded={} wired={} delta={}", self.paid, self.refunded, self.wired, self.delta)
    }
}

/// A new order as submitted by the merchant frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_id: String,
    pub summary: String,
    pub total: Amount,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Order summary row, as returned from order listings and appended to long-polls.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OrderSummary {
    pub row_id: i64,
    pub order_id: String,
    pub summary: String,
    pub total: Amount,
    pub paid: bool,
    pub refunded: bool,
    pub wired: bool,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------     Instances       ---------------------------------------------------------

/// A stored merchant instance, with its bank accounts.
#[derive(Debug, Clone)]
pub struct InstanceRow {
    pub id: String,
    pub name: String,
    /// Hex-encoded EdDSA signing key.
    pub merchant_priv: String,
    pub tip_exchange: Option<String>,
    pub tip_reserve_priv: Option<String>,
    pub accounts: Vec<InstanceAccountRow>,
}

/// A bank account of an instance. `h_wire` is the salted hash over the account JSON that binds the account
/// on-chain; active accounts precede inactive ones in listings.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InstanceAccountRow {
    pub payto_uri: String,
    pub method: String,
    pub salt: String,
    pub h_wire: String,
    pub active: bool,
}

//--------------------------------------     Products       ----------------------------------------------------------

/// Outcome of a product stock-lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductLockOutcome {
    Applied,
    UnknownProduct,
    InsufficientStock,
}

//--------------------------------------     Database errors       ---------------------------------------------------

/// Backend failure, split by retry policy: `Soft` errors (lock contention, pool exhaustion) may be retried a
/// bounded number of times at the call site, `Hard` errors fail the request.
#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    #[error("Hard database error. {0}")]
    Hard(String),
    #[error("Transient database error. {0}")]
    Soft(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut => Self::Soft(e.to_string()),
            sqlx::Error::Database(db) => {
                let msg = db.message().to_ascii_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    Self::Soft(e.to_string())
                } else {
                    Self::Hard(e.to_string())
                }
            },
            _ => Self::Hard(e.to_string()),
        }
    }
}

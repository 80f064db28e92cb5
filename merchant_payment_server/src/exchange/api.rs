//! HTTP client for the exchange's REST API.
//!
//! Only the three endpoints the gateway needs are wrapped: `GET /keys`, `GET /wire` and
//! `POST /reserves/{reserve_pub}/withdraw`. The client is a trait so the cache and the tip pipeline can be tested
//! against a scripted implementation.

use chrono::{DateTime, Utc};
use log::*;
use mpg_common::Amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol major version this gateway implements.
pub const MERCHANT_EXCHANGE_PROTOCOL_VERSION: u32 = 8;

#[derive(Debug, Clone, Error)]
pub enum ExchangeApiError {
    #[error("Could not reach the exchange. {0}")]
    Network(String),
    #[error("The exchange sent a reply we could not make sense of. {0}")]
    Protocol(String),
    /// The exchange replied with a failure status. The body is preserved for the client-facing error.
    #[error("The exchange reported an error. HTTP {status}, code {code}")]
    Upstream { status: u16, code: u32, reply: Value },
}

/// Result of checking the exchange's announced protocol version against ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    Compatible,
    /// The exchange is too new and no longer speaks our protocol revision.
    IncompatibleNewer,
    /// The exchange is older than anything we can talk to.
    IncompatibleOlder,
}

/// One coin denomination offered by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Denomination {
    /// Hex-encoded hash of the denomination public key; planchets reference denominations by this.
    pub denom_pub_hash: String,
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub stamp_expire_withdraw: DateTime<Utc>,
}

/// The exchange's `/keys` response, reduced to what the gateway uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeKeys {
    /// Protocol version triple `current:revision:age`.
    pub version: String,
    pub currency: String,
    /// Hex-encoded EdDSA master public key; the anchor for the operator's trust decision.
    pub master_public_key: String,
    pub list_issue_date: DateTime<Utc>,
    /// When this key set expires and should be refetched.
    pub expiry: DateTime<Utc>,
    pub denoms: Vec<Denomination>,
}

impl ExchangeKeys {
    pub fn find_denom(&self, denom_pub_hash: &str) -> Option<&Denomination> {
        self.denoms.iter().find(|d| d.denom_pub_hash == denom_pub_hash)
    }

    /// Parse `current:revision:age` and decide whether we can talk to this exchange. An exchange is compatible
    /// when our version lies in `[current - age, current]`.
    pub fn version_check(&self) -> Result<VersionCheck, ExchangeApiError> {
        let mut parts = self.version.split(':').map(|p| p.parse::<u32>());
        let (current, _revision, age) = match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(c)), Some(Ok(r)), Some(Ok(a))) => (c, r, a),
            _ => {
                return Err(ExchangeApiError::Protocol(format!("unparsable version triple '{}'", self.version)));
            },
        };
        let ours = MERCHANT_EXCHANGE_PROTOCOL_VERSION;
        if ours > current {
            Ok(VersionCheck::IncompatibleOlder)
        } else if ours < current.saturating_sub(age) {
            Ok(VersionCheck::IncompatibleNewer)
        } else {
            Ok(VersionCheck::Compatible)
        }
    }
}

/// One wire-fee period as announced in `/wire`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFeePeriod {
    pub wire_fee: Amount,
    pub closing_fee: Amount,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAccount {
    pub payto_uri: String,
    pub master_sig: String,
}

/// The exchange's `/wire` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireInfo {
    pub accounts: Vec<WireAccount>,
    /// Fee schedule per wire method.
    pub fees: std::collections::HashMap<String, Vec<WireFeePeriod>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub denom_pub_hash: String,
    /// Base64-encoded blinded coin envelope.
    pub coin_ev: String,
    pub reserve_pub: String,
    pub reserve_sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawResponse {
    /// Blind signature over the coin envelope.
    pub ev_sig: String,
}

/// The exchange operations the gateway performs. Implemented over HTTP in production and scripted in tests.
#[allow(async_fn_in_trait)]
pub trait ExchangeClient: Clone + Send + Sync + 'static {
    async fn fetch_keys(&self, base_url: &str) -> Result<ExchangeKeys, ExchangeApiError>;
    async fn fetch_wire(&self, base_url: &str) -> Result<WireInfo, ExchangeApiError>;
    async fn withdraw(
        &self,
        base_url: &str,
        request: &WithdrawRequest,
        correlation_id: Option<&str>,
    ) -> Result<WithdrawResponse, ExchangeApiError>;
}

/// Production client over reqwest. Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpExchangeClient {
    client: reqwest::Client,
}

impl Default for HttpExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpExchangeClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    fn url(base_url: &str, path: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ExchangeApiError> {
        trace!("🏦️ GET {url}");
        let response = self.client.get(url).send().await.map_err(|e| ExchangeApiError::Network(e.to_string()))?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeApiError> {
        let status = response.status();
        if status.is_success() {
            response.json::<T>().await.map_err(|e| ExchangeApiError::Protocol(e.to_string()))
        } else {
            let reply = response.json::<Value>().await.unwrap_or(Value::Null);
            let code = reply.get("code").and_then(Value::as_u64).unwrap_or(0) as u32;
            Err(ExchangeApiError::Upstream { status: status.as_u16(), code, reply })
        }
    }
}

impl ExchangeClient for HttpExchangeClient {
    async fn fetch_keys(&self, base_url: &str) -> Result<ExchangeKeys, ExchangeApiError> {
        self.get_json(&Self::url(base_url, "keys")).await
    }

    async fn fetch_wire(&self, base_url: &str) -> Result<WireInfo, ExchangeApiError> {
        self.get_json(&Self::url(base_url, "wire")).await
    }

    async fn withdraw(
        &self,
        base_url: &str,
        request: &WithdrawRequest,
        correlation_id: Option<&str>,
    ) -> Result<WithdrawResponse, ExchangeApiError> {
        let url = Self::url(base_url, &format!("reserves/{}/withdraw", request.reserve_pub));
        trace!("🏦️ POST {url}");
        let mut builder = self.client.post(&url).json(request);
        if let Some(id) = correlation_id {
            builder = builder.header("Taler-Correlation-Id", id);
        }
        let response = builder.send().await.map_err(|e| ExchangeApiError::Network(e.to_string()))?;
        Self::handle_response(response).await
    }
}

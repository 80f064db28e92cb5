//! Shared scaffolding for the endpoint tests: an in-memory database, a scripted exchange and the assembled
//! application context.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use actix_web::web;
use chrono::{Duration as ChronoDuration, Utc};

use merchant_payment_engine::{
    events::order_change_channel,
    InstanceApi, InventoryApi, OrderQueryApi, SqliteDatabase, TipFlowApi,
};

use crate::{
    config::{ServerConfig, TrustedExchange},
    exchange::{
        api::{
            Denomination, ExchangeApiError, ExchangeClient, ExchangeKeys, WireFeePeriod, WireInfo, WithdrawRequest,
            WithdrawResponse,
        },
        ExchangeCache,
    },
    instances::InstanceRegistry,
    poll::WaitRegistry,
    server::{load_instances, start_event_pump, AppContext},
};

pub const EXCHANGE_URL: &str = "https://exchange.test";
pub const MASTER_PUB: &str = "abababababababababababababababababababababababababababababababab";
/// Denomination worth EUR:5 with a EUR:0.01 withdraw fee.
pub const DENOM_5: &str = "1111111111111111111111111111111111111111111111111111111111111111";
/// Denomination worth EUR:0.5 with a EUR:0.01 withdraw fee.
pub const DENOM_HALF: &str = "2222222222222222222222222222222222222222222222222222222222222222";
/// A reserve private key an instance can be created with.
pub const RESERVE_PRIV: &str = "cdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd";

fn amt(s: &str) -> mpg_common::Amount {
    s.parse().unwrap()
}

fn stub_keys() -> ExchangeKeys {
    let denom = |hash: &str, value: &str| Denomination {
        denom_pub_hash: hash.to_string(),
        value: amt(value),
        fee_withdraw: amt("EUR:0.01"),
        stamp_expire_withdraw: Utc::now() + ChronoDuration::days(30),
    };
    ExchangeKeys {
        version: "8:0:0".to_string(),
        currency: "EUR".to_string(),
        master_public_key: MASTER_PUB.to_string(),
        list_issue_date: Utc::now(),
        expiry: Utc::now() + ChronoDuration::hours(4),
        denoms: vec![denom(DENOM_5, "EUR:5"), denom(DENOM_HALF, "EUR:0.5")],
    }
}

fn stub_wire() -> WireInfo {
    let mut fees = std::collections::HashMap::new();
    fees.insert(
        "x-taler-bank".to_string(),
        vec![WireFeePeriod {
            wire_fee: amt("EUR:0.05"),
            closing_fee: amt("EUR:0.02"),
            start_date: Utc::now() - ChronoDuration::days(1),
            end_date: Utc::now() + ChronoDuration::days(365),
            sig: "feesig".to_string(),
        }],
    );
    WireInfo { accounts: Vec::new(), fees }
}

/// Scripted exchange. Echoes a signature derived from each coin envelope so tests can check ordering.
#[derive(Clone)]
pub struct StubExchange {
    keys: Arc<Mutex<Option<ExchangeKeys>>>,
    pub withdraw_calls: Arc<AtomicUsize>,
}

impl StubExchange {
    pub fn up() -> Self {
        Self { keys: Arc::new(Mutex::new(Some(stub_keys()))), withdraw_calls: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn down() -> Self {
        Self { keys: Arc::new(Mutex::new(None)), withdraw_calls: Arc::new(AtomicUsize::new(0)) }
    }

    /// Reachable, but announcing an empty denomination list.
    pub fn without_denoms() -> Self {
        let mut keys = stub_keys();
        keys.denoms.clear();
        Self { keys: Arc::new(Mutex::new(Some(keys))), withdraw_calls: Arc::new(AtomicUsize::new(0)) }
    }
}

impl ExchangeClient for StubExchange {
    async fn fetch_keys(&self, _base_url: &str) -> Result<ExchangeKeys, ExchangeApiError> {
        self.keys.lock().unwrap().clone().ok_or_else(|| ExchangeApiError::Network("connection refused".into()))
    }

    async fn fetch_wire(&self, _base_url: &str) -> Result<WireInfo, ExchangeApiError> {
        Ok(stub_wire())
    }

    async fn withdraw(
        &self,
        _base_url: &str,
        request: &WithdrawRequest,
        _correlation_id: Option<&str>,
    ) -> Result<WithdrawResponse, ExchangeApiError> {
        self.withdraw_calls.fetch_add(1, Ordering::SeqCst);
        Ok(WithdrawResponse { ev_sig: format!("sig-over-{}", request.coin_ev) })
    }
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.currency = "EUR".to_string();
    config.use_forwarded_headers = true;
    config.trusted_exchanges =
        vec![TrustedExchange { url: EXCHANGE_URL.to_string(), master_pub: MASTER_PUB.to_string() }];
    config.default_instance.name = "Test shop".to_string();
    config.default_instance.payto_uris = vec!["payto://x-taler-bank/bank.test/shop".to_string()];
    config.default_instance.tip_exchange = Some(EXCHANGE_URL.to_string());
    config.default_instance.tip_reserve_priv = Some(RESERVE_PRIV.to_string().into());
    config
}

/// A fully wired backend over an in-memory database, with the event pump running.
pub async fn test_context(stub: StubExchange) -> AppContext<SqliteDatabase, StubExchange> {
    let _ = env_logger::try_init();
    let config = test_config();
    let db = SqliteDatabase::new_with_url("sqlite::memory:", 1).await.unwrap();
    let (publisher, listener) = order_change_channel(16);
    let registry = Arc::new(InstanceRegistry::new());
    let waits = Arc::new(WaitRegistry::new());
    let instance_api = InstanceApi::new(db.clone());
    load_instances(&config, &instance_api, &registry).await.unwrap();
    start_event_pump(listener, Arc::clone(&registry), Arc::clone(&waits));
    AppContext {
        cache: web::Data::new(ExchangeCache::new(Arc::new(config.clone()), db.clone(), stub)),
        config: web::Data::new(config),
        registry: web::Data::from(registry),
        waits: web::Data::from(waits),
        tip_api: web::Data::new(TipFlowApi::new(db.clone())),
        order_api: web::Data::new(OrderQueryApi::with_publisher(db.clone(), publisher)),
        inventory_api: web::Data::new(InventoryApi::new(db.clone())),
        instance_api: web::Data::new(instance_api),
    }
}

/// Build the test service over a context. A macro because the service type cannot be named.
macro_rules! init_app {
    ($ctx:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .configure(|cfg| crate::server::register_app_data(cfg, &$ctx))
                .configure(crate::server::routing_table::<
                    merchant_payment_engine::SqliteDatabase,
                    crate::endpoint_tests::helpers::StubExchange,
                >)
                .default_service(actix_web::web::to(crate::routes::not_found)),
        )
        .await
    };
}
pub(crate) use init_app;

/// Read the numeric error code out of a JSON error body.
pub fn body_code(body: &serde_json::Value) -> u64 {
    body.get("code").and_then(serde_json::Value::as_u64).unwrap_or(0)
}

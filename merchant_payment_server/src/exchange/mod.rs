//! Exchange key and wire-fee cache.
//!
//! The gateway talks to exchanges on behalf of wallets (tip pickups) and merchants (fee lookups). `/keys` and
//! `/wire` replies are cached per exchange base URL; a slot is created on first use and lives until the process
//! exits. Fetch failures back off exponentially (doubling from 1ms up to a 60s cap), a successful fetch resets the
//! backoff, and client-requested forced reloads are rate-limited to one per fifteen minutes. Key sets are
//! refreshed at the advertised expiry or after two minutes, whichever comes first; an exchange announcing an
//! incompatible protocol version is left alone for an hour before we try again.
//!
//! Wire-fee schedules are checked for holes on ingestion: the periods for a method must tile time contiguously.
//! A hole fails the whole refresh, because quoting fees across a gap would mean inventing numbers.

pub mod api;

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use log::*;
use tokio::{sync::Mutex, time::Instant};

use merchant_payment_engine::{db_types::WireFeeEntry, traits::WireFeeStorage};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    exchange::api::{ExchangeClient, ExchangeKeys, VersionCheck, WireInfo},
};

/// Backoff cap for failed fetches.
pub const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Minimum spacing between client-requested forced reloads of one exchange.
pub const FORCED_RELOAD_DELAY: Duration = Duration::from_secs(15 * 60);
/// Upper bound on how long a cached key set is served without refetching.
pub const RELOAD_DELAY: Duration = Duration::from_secs(2 * 60);
/// How long to leave a version-incompatible exchange alone.
pub const VERSION_INCOMPAT_RETRY: Duration = Duration::from_secs(60 * 60);

/// A ready exchange as handed to request handlers.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    pub base_url: String,
    pub keys: Arc<ExchangeKeys>,
    /// Whether the operator lists this exchange's master key as trusted.
    pub trusted: bool,
    /// Fee entry covering the current time for the requested wire method, if one was requested and exists.
    pub wire_fee: Option<WireFeeEntry>,
}

struct SlotState {
    keys: Option<Arc<ExchangeKeys>>,
    trusted: bool,
    /// Merged (persisted and announced) fee schedule per wire method, sorted by start date.
    fees: HashMap<String, Vec<WireFeeEntry>>,
    retry_delay: Duration,
    /// Earliest time the next fetch attempt may run.
    next_attempt: Instant,
    /// Forced reloads before this instant are served from cache.
    earliest_forced_reload: Instant,
    /// When the cached key set goes stale.
    next_reload: Instant,
    last_error: Option<ServerError>,
}

struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn new() -> Self {
        let now = Instant::now();
        Slot {
            state: Mutex::new(SlotState {
                keys: None,
                trusted: false,
                fees: HashMap::new(),
                retry_delay: Duration::ZERO,
                next_attempt: now,
                earliest_forced_reload: now,
                next_reload: now,
                last_error: None,
            }),
        }
    }
}

/// Per-process cache of exchange state. `B` persists wire fees, `C` performs the HTTP requests.
pub struct ExchangeCache<B, C> {
    config: Arc<ServerConfig>,
    db: B,
    client: C,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl<B, C> ExchangeCache<B, C>
where
    B: WireFeeStorage,
    C: ExchangeClient,
{
    pub fn new(config: Arc<ServerConfig>, db: B, client: C) -> Self {
        Self { config, db, client, slots: Mutex::new(HashMap::new()) }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Locate (and if necessary fetch) the state of the exchange at `base_url`.
    ///
    /// With `wire_method` set, the handle carries the fee entry covering the current time for that method. With
    /// `force`, the cached key set is discarded first, subject to the fifteen-minute rate limit. Concurrent calls
    /// for one exchange serialize on its slot, so a burst of requests triggers a single fetch; every caller then
    /// sees either the fresh state or the failure that fetch produced.
    pub async fn find_exchange(
        &self,
        base_url: &str,
        wire_method: Option<&str>,
        force: bool,
    ) -> Result<ExchangeHandle, ServerError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let slot = self.slot(&base_url).await;
        let mut st = slot.state.lock().await;
        let now = Instant::now();
        if force && now >= st.earliest_forced_reload {
            debug!("🏦️ Forced reload of {base_url} requested");
            st.earliest_forced_reload = now + FORCED_RELOAD_DELAY;
            Self::bump_backoff(&mut st);
            st.keys = None;
            st.next_attempt = now;
        }
        let stale = st.keys.is_none() || now >= st.next_reload;
        if stale && now >= st.next_attempt {
            self.refresh(&base_url, &mut st).await;
        }
        match st.keys.clone() {
            Some(keys) => {
                let trusted = st.trusted;
                let wire_fee = wire_method.and_then(|m| Self::current_fee(&mut st, m));
                Ok(ExchangeHandle { base_url, keys, trusted, wire_fee })
            },
            // Cached refresh failures cascade as exchange-down; only a version incompatibility keeps its own
            // code, because wallets treat it differently from an outage.
            None => Err(match st.last_error.clone() {
                None => ServerError::ExchangeDown(format!("{base_url} has not been fetched yet")),
                Some(e @ ServerError::ExchangeDown(_)) | Some(e @ ServerError::ExchangeIncompatible(_)) => e,
                Some(other) => ServerError::ExchangeDown(other.to_string()),
            }),
        }
    }

    async fn slot(&self, base_url: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(base_url.to_string()).or_insert_with(|| Arc::new(Slot::new())))
    }

    /// Fetch `/keys` and `/wire` and fold the result into the slot. On failure the slot keeps no key set, records
    /// the error for queued callers and backs off.
    async fn refresh(&self, base_url: &str, st: &mut SlotState) {
        match self.try_refresh(base_url, st).await {
            Ok(()) => {
                st.retry_delay = Duration::ZERO;
                st.next_attempt = Instant::now();
                st.last_error = None;
            },
            Err(e) => {
                warn!("🏦️ Refreshing {base_url} failed: {e}");
                st.keys = None;
                if matches!(e, ServerError::ExchangeIncompatible(_)) {
                    st.retry_delay = VERSION_INCOMPAT_RETRY;
                } else {
                    Self::bump_backoff(st);
                }
                st.next_attempt = Instant::now() + st.retry_delay;
                st.last_error = Some(e);
            },
        }
    }

    async fn try_refresh(&self, base_url: &str, st: &mut SlotState) -> Result<(), ServerError> {
        let keys = self
            .client
            .fetch_keys(base_url)
            .await
            .map_err(|e| ServerError::ExchangeDown(format!("{base_url}: {e}")))?;
        if keys.version_check().map_err(|e| ServerError::ExchangeDown(e.to_string()))? != VersionCheck::Compatible {
            return Err(ServerError::ExchangeIncompatible(keys.version.clone()));
        }
        if keys.currency != self.config.currency {
            warn!("🏦️ {base_url} operates in {}, but we are configured for {}", keys.currency, self.config.currency);
        }
        let wire = self
            .client
            .fetch_wire(base_url)
            .await
            .map_err(|e| ServerError::ExchangeDown(format!("{base_url}: {e}")))?;
        let fees = self.ingest_fees(&keys, &wire).await?;
        let trusted = self.config.is_trusted(base_url, &keys.master_public_key);
        let expiry_in = (keys.expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        st.next_reload = Instant::now() + expiry_in.min(RELOAD_DELAY);
        st.trusted = trusted;
        st.fees = fees;
        st.keys = Some(Arc::new(keys));
        debug!("🏦️ {base_url} refreshed ({} denominations, trusted: {trusted})", st.keys.as_ref().map(|k| k.denoms.len()).unwrap_or(0));
        Ok(())
    }

    /// Merge persisted and announced fee schedules per method, verify the timeline has no holes, and persist any
    /// new entries.
    async fn ingest_fees(
        &self,
        keys: &ExchangeKeys,
        wire: &WireInfo,
    ) -> Result<HashMap<String, Vec<WireFeeEntry>>, ServerError> {
        let mut merged = HashMap::new();
        for (method, periods) in &wire.fees {
            let mut entries = self.db.lookup_wire_fees(&keys.master_public_key, method).await?;
            for period in periods {
                let entry = WireFeeEntry {
                    method: method.clone(),
                    wire_fee: period.wire_fee.clone(),
                    closing_fee: period.closing_fee.clone(),
                    start_date: period.start_date,
                    end_date: period.end_date,
                    master_sig: period.sig.clone(),
                };
                if !entries.iter().any(|e| e.start_date == entry.start_date) {
                    entries.push(entry);
                }
            }
            entries.sort_by_key(|e| e.start_date);
            for pair in entries.windows(2) {
                if pair[0].end_date != pair[1].start_date {
                    return Err(ServerError::WireFeeHole(method.clone()));
                }
            }
            for entry in &entries {
                self.db.store_wire_fee_by_exchange(&keys.master_public_key, entry).await?;
            }
            merged.insert(method.clone(), entries);
        }
        Ok(merged)
    }

    /// Fee entry covering now, discarding entries that have fully expired.
    fn current_fee(st: &mut SlotState, method: &str) -> Option<WireFeeEntry> {
        let now = Utc::now();
        let entries = st.fees.get_mut(method)?;
        entries.retain(|e| e.end_date > now);
        entries.iter().find(|e| e.start_date <= now).cloned()
    }

    fn bump_backoff(st: &mut SlotState) {
        st.retry_delay = (st.retry_delay.max(Duration::from_millis(1)) * 2).min(RETRY_BACKOFF_CAP);
    }

    #[cfg(test)]
    pub async fn retry_delay(&self, base_url: &str) -> Duration {
        let slot = self.slot(base_url.trim_end_matches('/')).await;
        let st = slot.state.lock().await;
        st.retry_delay
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex as StdMutex,
    };

    use chrono::{Duration as ChronoDuration, Utc};
    use mpg_common::Amount;

    use merchant_payment_engine::db_types::DatabaseError;

    use super::{
        api::{Denomination, ExchangeApiError, WireFeePeriod},
        *,
    };

    /// In-memory wire-fee store.
    #[derive(Clone, Default)]
    struct MemFees {
        entries: Arc<StdMutex<Vec<(String, WireFeeEntry)>>>,
    }

    impl WireFeeStorage for MemFees {
        async fn store_wire_fee_by_exchange(
            &self,
            master_pub: &str,
            entry: &WireFeeEntry,
        ) -> Result<bool, DatabaseError> {
            let mut entries = self.entries.lock().unwrap();
            let exists = entries
                .iter()
                .any(|(m, e)| m == master_pub && e.method == entry.method && e.start_date == entry.start_date);
            if !exists {
                entries.push((master_pub.to_string(), entry.clone()));
            }
            Ok(!exists)
        }

        async fn lookup_wire_fees(&self, master_pub: &str, method: &str) -> Result<Vec<WireFeeEntry>, DatabaseError> {
            let mut found: Vec<_> = self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, e)| m == master_pub && e.method == method)
                .map(|(_, e)| e.clone())
                .collect();
            found.sort_by_key(|e| e.start_date);
            Ok(found)
        }
    }

    /// Client that replays scripted responses and counts key fetches.
    #[derive(Clone)]
    struct ScriptedClient {
        keys: Arc<StdMutex<Option<ExchangeKeys>>>,
        wire: Arc<StdMutex<Option<WireInfo>>>,
        keys_calls: Arc<AtomicUsize>,
    }

    impl ScriptedClient {
        fn new(keys: Option<ExchangeKeys>, wire: Option<WireInfo>) -> Self {
            Self {
                keys: Arc::new(StdMutex::new(keys)),
                wire: Arc::new(StdMutex::new(wire)),
                keys_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ExchangeClient for ScriptedClient {
        async fn fetch_keys(&self, _base_url: &str) -> Result<ExchangeKeys, ExchangeApiError> {
            self.keys_calls.fetch_add(1, Ordering::SeqCst);
            self.keys.lock().unwrap().clone().ok_or_else(|| ExchangeApiError::Network("connection refused".into()))
        }

        async fn fetch_wire(&self, _base_url: &str) -> Result<WireInfo, ExchangeApiError> {
            self.wire.lock().unwrap().clone().ok_or_else(|| ExchangeApiError::Network("connection refused".into()))
        }

        async fn withdraw(
            &self,
            _base_url: &str,
            _request: &api::WithdrawRequest,
            _correlation_id: Option<&str>,
        ) -> Result<api::WithdrawResponse, ExchangeApiError> {
            Ok(api::WithdrawResponse { ev_sig: "sig".into() })
        }
    }

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn good_keys() -> ExchangeKeys {
        ExchangeKeys {
            version: "8:0:0".to_string(),
            currency: "EUR".to_string(),
            master_public_key: "ab".repeat(32),
            list_issue_date: Utc::now(),
            expiry: Utc::now() + ChronoDuration::hours(4),
            denoms: vec![Denomination {
                denom_pub_hash: "cd".repeat(32),
                value: amt("EUR:2"),
                fee_withdraw: amt("EUR:0.01"),
                stamp_expire_withdraw: Utc::now() + ChronoDuration::days(30),
            }],
        }
    }

    fn wire_with_periods(periods: Vec<WireFeePeriod>) -> WireInfo {
        let mut fees = HashMap::new();
        fees.insert("iban".to_string(), periods);
        WireInfo { accounts: Vec::new(), fees }
    }

    fn period(base: chrono::DateTime<Utc>, start_days: i64, end_days: i64) -> WireFeePeriod {
        WireFeePeriod {
            wire_fee: amt("EUR:0.05"),
            closing_fee: amt("EUR:0.02"),
            start_date: base + ChronoDuration::days(start_days),
            end_date: base + ChronoDuration::days(end_days),
            sig: "feesig".to_string(),
        }
    }

    fn cache_with(client: ScriptedClient) -> ExchangeCache<MemFees, ScriptedClient> {
        let mut config = ServerConfig::default();
        config.trusted_exchanges = vec![crate::config::TrustedExchange {
            url: "https://exchange.demo.net".into(),
            master_pub: "ab".repeat(32),
        }];
        ExchangeCache::new(Arc::new(config), MemFees::default(), client)
    }

    #[tokio::test]
    async fn ready_exchanges_report_trust_and_current_fee() {
        let base = Utc::now();
        let client = ScriptedClient::new(Some(good_keys()), Some(wire_with_periods(vec![period(base, -1, 30)])));
        let cache = cache_with(client);
        let handle = cache.find_exchange("https://exchange.demo.net/", Some("iban"), false).await.unwrap();
        assert!(handle.trusted);
        assert_eq!(handle.keys.denoms.len(), 1);
        assert_eq!(handle.wire_fee.unwrap().wire_fee, amt("EUR:0.05"));
        // Unknown method: ready, but no fee.
        let handle = cache.find_exchange("https://exchange.demo.net", Some("bitcoin"), false).await.unwrap();
        assert!(handle.wire_fee.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetches_back_off_exponentially_up_to_the_cap() {
        let client = ScriptedClient::new(None, None);
        let cache = cache_with(client);
        let mut last = Duration::ZERO;
        for _ in 0..25 {
            let err = cache.find_exchange("https://exchange.demo.net", None, false).await.unwrap_err();
            assert!(matches!(err, ServerError::ExchangeDown(_)));
            let delay = cache.retry_delay("https://exchange.demo.net").await;
            assert!(delay >= last, "backoff must not shrink on failure");
            assert!(delay <= RETRY_BACKOFF_CAP);
            last = delay;
            tokio::time::advance(RETRY_BACKOFF_CAP).await;
        }
        assert_eq!(last, RETRY_BACKOFF_CAP);
    }

    #[tokio::test(start_paused = true)]
    async fn callers_inside_the_backoff_window_fail_without_a_fetch() {
        let client = ScriptedClient::new(None, None);
        let calls = Arc::clone(&client.keys_calls);
        let cache = cache_with(client);
        assert!(cache.find_exchange("https://exchange.demo.net", None, false).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Within the backoff window nothing is fetched; the recorded error cascades to the caller.
        assert!(cache.find_exchange("https://exchange.demo.net", None, false).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_reloads_are_rate_limited() {
        let base = Utc::now();
        let client = ScriptedClient::new(Some(good_keys()), Some(wire_with_periods(vec![period(base, -1, 30)])));
        let calls = Arc::clone(&client.keys_calls);
        let cache = cache_with(client);
        cache.find_exchange("https://exchange.demo.net", None, true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // A second force right away is served from cache.
        cache.find_exchange("https://exchange.demo.net", None, true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::advance(FORCED_RELOAD_DELAY).await;
        cache.find_exchange("https://exchange.demo.net", None, true).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_hole_in_the_fee_timeline_fails_the_refresh() {
        // Periods [0,10) and [20,30): day 10 to 20 is uncovered.
        let base = Utc::now();
        let client = ScriptedClient::new(
            Some(good_keys()),
            Some(wire_with_periods(vec![period(base, 0, 10), period(base, 20, 30)])),
        );
        let cache = cache_with(client);
        // Callers see the exchange as down; the hole itself shows up in the hint.
        let err = cache.find_exchange("https://exchange.demo.net", Some("iban"), false).await.unwrap_err();
        assert!(matches!(&err, ServerError::ExchangeDown(hint) if hint.contains("hole")));
        // The failure cascades to callers arriving during the backoff window.
        let err = cache.find_exchange("https://exchange.demo.net", Some("iban"), false).await.unwrap_err();
        assert!(matches!(err, ServerError::ExchangeDown(_)));
    }

    #[tokio::test]
    async fn version_incompatible_exchanges_get_a_long_retry_floor() {
        let mut keys = good_keys();
        keys.version = "12:0:1".to_string();
        let client = ScriptedClient::new(Some(keys), Some(wire_with_periods(vec![period(Utc::now(), -1, 30)])));
        let cache = cache_with(client);
        let err = cache.find_exchange("https://exchange.demo.net", None, false).await.unwrap_err();
        assert!(matches!(err, ServerError::ExchangeIncompatible(_)));
        assert_eq!(cache.retry_delay("https://exchange.demo.net").await, VERSION_INCOMPAT_RETRY);
    }

    #[tokio::test]
    async fn persisted_fees_backfill_the_announced_schedule() {
        // First run stores [-1, 10). A restarted cache seeing only [10, 30) announced still has a contiguous
        // timeline, because the stored entry fills the front.
        let base = Utc::now();
        let store = MemFees::default();
        let client = ScriptedClient::new(Some(good_keys()), Some(wire_with_periods(vec![period(base, -1, 10)])));
        let cache = ExchangeCache::new(Arc::new(ServerConfig::default()), store.clone(), client);
        let handle = cache.find_exchange("https://exchange.demo.net", Some("iban"), false).await.unwrap();
        assert!(handle.wire_fee.is_some());
        let client2 = ScriptedClient::new(Some(good_keys()), Some(wire_with_periods(vec![period(base, 10, 30)])));
        let cache2 = ExchangeCache::new(Arc::new(ServerConfig::default()), store, client2);
        let handle = cache2.find_exchange("https://exchange.demo.net", Some("iban"), false).await.unwrap();
        assert!(handle.wire_fee.is_some());
    }
}

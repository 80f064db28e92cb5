//! Server configuration.
//!
//! Everything is driven by `MPG_*` environment variables, with logged fallbacks so that a misconfigured deployment
//! is visible in the logs rather than silently running on defaults.

use std::env;

use log::*;
use mpg_common::Secret;

pub const DEFAULT_MPG_HOST: &str = "127.0.0.1";
pub const DEFAULT_MPG_PORT: u16 = 4444;

/// An exchange whose master public key the merchant operator has audited and accepted.
#[derive(Debug, Clone)]
pub struct TrustedExchange {
    pub url: String,
    /// Hex-encoded EdDSA master public key announced by the exchange's `/keys`.
    pub master_pub: String,
}

/// Settings used to create the `default` instance when the database holds no instances at all.
#[derive(Debug, Clone)]
pub struct DefaultInstanceConfig {
    pub name: String,
    pub payto_uris: Vec<String>,
    pub tip_exchange: Option<String>,
    pub tip_reserve_priv: Option<Secret<String>>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Currency this deployment operates in. Amounts in other currencies are rejected at the door.
    pub currency: String,
    /// Trust `X-Forwarded-Host` / `X-Forwarded-Prefix` headers when building pay URIs.
    pub use_forwarded_headers: bool,
    pub trusted_exchanges: Vec<TrustedExchange>,
    pub default_instance: DefaultInstanceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MPG_HOST.into(),
            port: DEFAULT_MPG_PORT,
            database_url: "sqlite://data/merchant_gateway.db".into(),
            currency: "EUR".into(),
            use_forwarded_headers: true,
            trusted_exchanges: Vec::new(),
            default_instance: DefaultInstanceConfig {
                name: "Default merchant".into(),
                payto_uris: Vec::new(),
                tip_exchange: None,
                tip_reserve_priv: None,
            },
        }
    }
}

impl ServerConfig {
    pub fn from_env_or_default() -> Self {
        let host = env::var("MPG_HOST").ok().unwrap_or_else(|| {
            info!("🪛️ MPG_HOST is not set. Using the default, {DEFAULT_MPG_HOST}, instead.");
            DEFAULT_MPG_HOST.into()
        });
        let port = env::var("MPG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid port for MPG_PORT. {e} Using the default, {DEFAULT_MPG_PORT}.");
                    DEFAULT_MPG_PORT
                })
            })
            .unwrap_or(DEFAULT_MPG_PORT);
        let database_url = env::var("MPG_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ MPG_DATABASE_URL is not set. Using a database in the current directory.");
            "sqlite://data/merchant_gateway.db".into()
        });
        let currency = env::var("MPG_CURRENCY").ok().unwrap_or_else(|| {
            warn!("🪛️ MPG_CURRENCY is not set. Defaulting to EUR.");
            "EUR".into()
        });
        let use_forwarded_headers = mpg_common::helpers::env_flag("MPG_USE_FORWARDED_HEADERS", true);
        let trusted_exchanges = Self::trusted_exchanges_from_env();
        let default_instance = DefaultInstanceConfig {
            name: env::var("MPG_DEFAULT_INSTANCE_NAME").ok().unwrap_or_else(|| "Default merchant".into()),
            payto_uris: env::var("MPG_DEFAULT_PAYTO_URIS")
                .map(|s| s.split(',').map(|u| u.trim().to_string()).filter(|u| !u.is_empty()).collect())
                .unwrap_or_default(),
            tip_exchange: env::var("MPG_TIP_EXCHANGE").ok(),
            tip_reserve_priv: env::var("MPG_TIP_RESERVE_PRIV").ok().map(Secret::new),
        };
        if default_instance.payto_uris.is_empty() {
            warn!(
                "🪛️ MPG_DEFAULT_PAYTO_URIS is not set. A freshly created default instance will have no bank \
                 accounts and cannot receive wire transfers until one is added."
            );
        }
        Self {
            host,
            port,
            database_url,
            currency,
            use_forwarded_headers,
            trusted_exchanges,
            default_instance,
        }
    }

    /// `MPG_TRUSTED_EXCHANGES` is a comma-separated list of `url|master_pub` pairs.
    fn trusted_exchanges_from_env() -> Vec<TrustedExchange> {
        let Ok(raw) = env::var("MPG_TRUSTED_EXCHANGES") else {
            warn!("🪛️ MPG_TRUSTED_EXCHANGES is not set. No exchange will be treated as trusted.");
            return Vec::new();
        };
        raw.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .filter_map(|entry| {
                let mut parts = entry.trim().splitn(2, '|');
                match (parts.next(), parts.next()) {
                    (Some(url), Some(master_pub)) if !url.is_empty() && !master_pub.is_empty() => {
                        Some(TrustedExchange {
                            url: url.trim_end_matches('/').to_string(),
                            master_pub: master_pub.to_string(),
                        })
                    },
                    _ => {
                        error!("🪛️ Ignoring malformed MPG_TRUSTED_EXCHANGES entry: '{entry}'");
                        None
                    },
                }
            })
            .collect()
    }

    pub fn is_trusted(&self, exchange_url: &str, master_pub: &str) -> bool {
        let url = exchange_url.trim_end_matches('/');
        self.trusted_exchanges.iter().any(|t| t.url == url && t.master_pub == master_pub)
    }
}

use dotenvy::dotenv;
use eyre::{eyre, Result};
use std::{env, net::IpAddr, str::FromStr};
use tracing::{info, warn};

use crate::aggregator::DEFAULT_LIMIT;

pub const DEFAULT_PRICE_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_FALLBACK_PRICE_USD: f64 = 3_000.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub price_api_url: String,
    pub price_timeout_secs: u64,
    pub price_cache_secs: u64,
    pub fallback_price_usd: f64,
    pub extra_exchanges: Vec<String>,
    pub analysis_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "transfers.db".to_string(),
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            port: 8080,
            price_api_url: DEFAULT_PRICE_API_URL.to_string(),
            price_timeout_secs: 5,
            price_cache_secs: 60,
            fallback_price_usd: DEFAULT_FALLBACK_PRICE_USD,
            extra_exchanges: Vec::new(),
            analysis_limit: DEFAULT_LIMIT,
        }
    }
}

/// Parse an optional env var, keeping `default` (with a warning) when it is
/// set but unreadable.
fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Comma-separated address list; blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // ✅ Load from .env file

    let d = Config::default();

    let fallback_price_usd = parsed("FALLBACK_PRICE_USD", d.fallback_price_usd);
    if !fallback_price_usd.is_finite() || fallback_price_usd < 0.0 {
        return Err(eyre!("FALLBACK_PRICE_USD must be a non-negative number"));
    }

    let analysis_limit = parsed("ANALYSIS_LIMIT", d.analysis_limit);
    if analysis_limit == 0 {
        return Err(eyre!("ANALYSIS_LIMIT must be at least 1"));
    }

    let cfg = Config {
        db_path: env::var("DATABASE_URL").unwrap_or(d.db_path),
        bind_addr: parsed("BIND_ADDR", d.bind_addr),
        port: parsed("PORT", d.port),
        price_api_url: env::var("PRICE_API_URL").unwrap_or(d.price_api_url),
        price_timeout_secs: parsed("PRICE_TIMEOUT_SECS", d.price_timeout_secs),
        price_cache_secs: parsed("PRICE_CACHE_SECS", d.price_cache_secs),
        fallback_price_usd,
        extra_exchanges: env::var("EXCHANGE_ADDRESSES")
            .map(|s| split_list(&s))
            .unwrap_or_default(),
        analysis_limit,
    };

    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}

// src/price.rs
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::errors::PriceError;

pub const STABLECOINS: &[&str] = &["USDC", "USDT", "DAI", "BUSD", "TUSD", "USDP", "FRAX"];

/// Symbols the configured fallback price stands in for.
pub const FALLBACK_SYMBOLS: &[&str] = &["ETH", "WETH"];

/// What to price: a symbol, plus its token contract when the feed sent one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetRef {
    pub symbol: String,
    pub contract: Option<String>,
    pub network: String,
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.contract {
            Some(contract) => write!(f, "{} ({})", self.symbol, contract),
            None => f.write_str(&self.symbol),
        }
    }
}

/// Source of current USD prices.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price_usd(&self, asset: &AssetRef) -> Result<f64, PriceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Live,
    Fallback,
}

/// Price used when the oracle has none. Only ETH and WETH take the configured
/// fallback; any other token is recorded at zero.
pub fn fallback_estimate(symbol: &str, fallback_usd: f64) -> f64 {
    if FALLBACK_SYMBOLS.contains(&symbol.to_ascii_uppercase().as_str()) {
        fallback_usd
    } else {
        0.0
    }
}

/// Live price if the oracle has one, otherwise the fallback estimate.
/// Ingestion never fails on price.
pub async fn resolve_price(oracle: &dyn PriceOracle, asset: &AssetRef, fallback_usd: f64) -> (f64, PriceSource) {
    let estimate = fallback_estimate(&asset.symbol, fallback_usd);
    match oracle.price_usd(asset).await {
        Ok(price) if price.is_finite() && price >= 0.0 => (price, PriceSource::Live),
        Ok(price) => {
            warn!("Oracle returned unusable price {} for {}, using ${}", price, asset, estimate);
            (estimate, PriceSource::Fallback)
        }
        Err(e) => {
            warn!("Price unavailable for {} ({}), using ${}", asset, e, estimate);
            (estimate, PriceSource::Fallback)
        }
    }
}

fn coingecko_id(symbol: &str) -> Option<&'static str> {
    match symbol {
        "ETH" | "WETH" => Some("ethereum"),
        "BTC" | "WBTC" => Some("bitcoin"),
        "MATIC" | "POL" => Some("matic-network"),
        "LINK" => Some("chainlink"),
        "UNI" => Some("uniswap"),
        "ARB" => Some("arbitrum"),
        "OP" => Some("optimism"),
        _ => None,
    }
}

/// CoinGecko asset platform for a network name, for contract lookups.
fn coingecko_platform(network: &str) -> Option<&'static str> {
    match network {
        "ethereum" => Some("ethereum"),
        "polygon" => Some("polygon-pos"),
        "arbitrum" => Some("arbitrum-one"),
        "optimism" => Some("optimistic-ethereum"),
        "base" => Some("base"),
        _ => None,
    }
}

/// CoinGecko client with a TTL cache. Tokens are looked up by contract via
/// `simple/token_price`, bare symbols by coin id via `simple/price`.
pub struct CoinGeckoOracle {
    client: Client,
    base_url: String,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, f64)>>,
}

impl CoinGeckoOracle {
    pub fn new(base_url: &str, timeout: Duration, ttl: Duration) -> Result<Self, PriceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cache_key(asset: &AssetRef) -> String {
        match &asset.contract {
            Some(contract) => format!("{}:{}", asset.network, contract),
            None => asset.symbol.to_ascii_uppercase(),
        }
    }

    fn cached(&self, key: &str) -> Option<f64> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, price)| *price)
    }

    fn store(&self, key: &str, price: f64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key.to_string(), (Instant::now(), price));
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, PriceError> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn token_price(&self, platform: &str, contract: &str) -> Result<Option<f64>, PriceError> {
        info!("📡 Fetching token {} price on {} from {}", contract, platform, self.base_url);
        let body = self
            .get_json(
                &format!("/simple/token_price/{}", platform),
                &[("contract_addresses", contract), ("vs_currencies", "usd")],
            )
            .await?;
        Ok(body[contract]["usd"].as_f64())
    }

    async fn coin_price(&self, id: &str) -> Result<Option<f64>, PriceError> {
        info!("📡 Fetching {} price from {}", id, self.base_url);
        let body = self
            .get_json("/simple/price", &[("ids", id), ("vs_currencies", "usd")])
            .await?;
        Ok(body[id]["usd"].as_f64())
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    async fn price_usd(&self, asset: &AssetRef) -> Result<f64, PriceError> {
        let symbol = asset.symbol.to_ascii_uppercase();
        if STABLECOINS.contains(&symbol.as_str()) {
            return Ok(1.0);
        }
        let key = Self::cache_key(asset);
        if let Some(price) = self.cached(&key) {
            debug!("Price cache hit {} = {}", key, price);
            return Ok(price);
        }

        let mut price = None;
        if let (Some(contract), Some(platform)) = (&asset.contract, coingecko_platform(&asset.network)) {
            price = self.token_price(platform, contract).await?;
        }
        if price.is_none() {
            if let Some(id) = coingecko_id(&symbol) {
                price = self.coin_price(id).await?;
            }
        }

        let price = price.ok_or(PriceError::Unavailable { symbol })?;
        self.store(&key, price);
        Ok(price)
    }
}

/// Fixed price table keyed by symbol or by token contract. Anything else is
/// unavailable.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    prices: HashMap<String, f64>,
}

impl StaticPriceOracle {
    #[cfg(test)]
    pub fn new<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            prices: prices
                .into_iter()
                .map(|(s, p)| (s.into().to_ascii_uppercase(), p))
                .collect(),
        }
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn price_usd(&self, asset: &AssetRef) -> Result<f64, PriceError> {
        asset
            .contract
            .as_ref()
            .and_then(|c| self.prices.get(&c.to_ascii_uppercase()))
            .or_else(|| self.prices.get(&asset.symbol.to_ascii_uppercase()))
            .copied()
            .ok_or_else(|| PriceError::Unavailable {
                symbol: asset.symbol.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Map};

    const SHIB: &str = "0x95ad61b0a150d79219dcf64e1e6cc01f0b64c4ce";

    fn asset(symbol: &str, contract: Option<&str>, network: &str) -> AssetRef {
        AssetRef {
            symbol: symbol.to_string(),
            contract: contract.map(str::to_string),
            network: network.to_string(),
        }
    }

    /// Local stand-in for the CoinGecko API: knows LINK by id and SHIB by
    /// contract on ethereum.
    async fn fake_coingecko() -> String {
        async fn coin(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            let mut body = Map::new();
            if q.get("ids").map(String::as_str) == Some("chainlink") {
                body.insert("chainlink".into(), json!({ "usd": 14.5 }));
            }
            Json(Value::Object(body))
        }
        async fn token(Path(platform): Path<String>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
            let mut body = Map::new();
            if let Some(contract) = q.get("contract_addresses") {
                if platform == "ethereum" && contract == SHIB {
                    body.insert(contract.clone(), json!({ "usd": 0.00001 }));
                }
            }
            Json(Value::Object(body))
        }

        let app = Router::new()
            .route("/simple/price", get(coin))
            .route("/simple/token_price/:platform", get(token));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn live_price_is_used_when_available() {
        let oracle = StaticPriceOracle::new([("eth", 2_500.0)]);
        assert_eq!(
            resolve_price(&oracle, &asset("ETH", None, "ethereum"), 3_000.0).await,
            (2_500.0, PriceSource::Live)
        );
    }

    #[tokio::test]
    async fn only_eth_takes_the_fallback_price() {
        let oracle = StaticPriceOracle::default();
        assert_eq!(
            resolve_price(&oracle, &asset("WETH", None, "ethereum"), 3_000.0).await,
            (3_000.0, PriceSource::Fallback)
        );
        assert_eq!(
            resolve_price(&oracle, &asset("PEPE", None, "ethereum"), 3_000.0).await,
            (0.0, PriceSource::Fallback)
        );
        assert_eq!(
            resolve_price(&oracle, &asset("SHIB", Some(SHIB), "ethereum"), 3_000.0).await,
            (0.0, PriceSource::Fallback)
        );
    }

    #[tokio::test]
    async fn unusable_price_falls_back() {
        let oracle = StaticPriceOracle::new([("ETH", f64::NAN)]);
        assert_eq!(
            resolve_price(&oracle, &asset("ETH", None, "ethereum"), 3_000.0).await,
            (3_000.0, PriceSource::Fallback)
        );
    }

    #[tokio::test]
    async fn static_prices_match_contract_before_symbol() {
        let oracle = StaticPriceOracle::new([(SHIB, 0.00001), ("SHIB", 99.0)]);
        assert_eq!(oracle.price_usd(&asset("SHIB", Some(SHIB), "ethereum")).await.unwrap(), 0.00001);
        assert_eq!(oracle.price_usd(&asset("shib", None, "ethereum")).await.unwrap(), 99.0);
    }

    #[tokio::test]
    async fn coingecko_short_circuits_stables_and_unknowns() {
        // unroutable address; none of these paths may touch the network
        let oracle = CoinGeckoOracle::new("http://127.0.0.1:9", Duration::from_millis(50), Duration::from_secs(60)).unwrap();
        assert_eq!(oracle.price_usd(&asset("usdc", None, "ethereum")).await.unwrap(), 1.0);
        assert!(matches!(
            oracle.price_usd(&asset("NOPE", None, "ethereum")).await,
            Err(PriceError::Unavailable { .. })
        ));
        // no platform for testnets
        assert!(matches!(
            oracle.price_usd(&asset("NOPE", Some(SHIB), "sepolia")).await,
            Err(PriceError::Unavailable { .. })
        ));

        oracle.store("ETH", 3_100.0);
        assert_eq!(oracle.price_usd(&asset("eth", None, "ethereum")).await.unwrap(), 3_100.0);
        oracle.store(&format!("polygon:{}", SHIB), 0.5);
        assert_eq!(oracle.price_usd(&asset("SHIB", Some(SHIB), "polygon")).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn coingecko_prices_tokens_by_contract() {
        let base = fake_coingecko().await;
        let oracle = CoinGeckoOracle::new(&base, Duration::from_secs(5), Duration::from_secs(60)).unwrap();

        let shib = asset("SHIB", Some(SHIB), "ethereum");
        let price = oracle.price_usd(&shib).await.unwrap();
        assert!((price - 0.00001).abs() < 1e-12);
        assert_eq!(oracle.cached(&format!("ethereum:{}", SHIB)), Some(price));

        // unknown contract, known symbol: coin id lookup
        let link = asset("LINK", Some("0x0000000000000000000000000000000000000001"), "ethereum");
        assert_eq!(oracle.price_usd(&link).await.unwrap(), 14.5);

        // neither contract nor symbol known
        let junk = asset("JUNK", Some("0x0000000000000000000000000000000000000002"), "ethereum");
        assert!(matches!(oracle.price_usd(&junk).await, Err(PriceError::Unavailable { .. })));
        assert_eq!(resolve_price(&oracle, &junk, 3_000.0).await, (0.0, PriceSource::Fallback));
    }
}

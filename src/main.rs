mod aggregator;
mod api;
mod classifier;
mod config;
mod db;
mod errors;
mod ingest;
mod models;
mod parser;
mod price;

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aggregator::FlowAnalyzer;
use crate::api::AppState;
use crate::classifier::ExchangeRegistry;
use crate::db::SqliteStore;
use crate::ingest::Ingestor;
use crate::price::{CoinGeckoOracle, PriceOracle, StaticPriceOracle};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Whale flow service starting...");

    let cfg = config::load()?;
    info!("  DB Path: {}", cfg.db_path);
    info!("  Listen: {}:{}", cfg.bind_addr, cfg.port);
    info!("  Price API: {}", cfg.price_api_url);
    info!("  Fallback price: ${}", cfg.fallback_price_usd);

    let registry = Arc::new(ExchangeRegistry::new(&cfg.extra_exchanges));
    info!("  Exchanges tracked: {}", registry.exchange_count());

    // Migrations run on open
    let store = Arc::new(SqliteStore::open(&cfg.db_path)?);

    // PRICE_API_URL=off: ETH at the fallback, other tokens at zero
    let oracle: Arc<dyn PriceOracle> = if cfg.price_api_url.eq_ignore_ascii_case("off") {
        warn!(
            "Live prices disabled, ETH priced at ${} and other tokens at $0",
            cfg.fallback_price_usd
        );
        Arc::new(StaticPriceOracle::default())
    } else {
        Arc::new(CoinGeckoOracle::new(
            &cfg.price_api_url,
            Duration::from_secs(cfg.price_timeout_secs),
            Duration::from_secs(cfg.price_cache_secs),
        )?)
    };

    let state = AppState {
        ingestor: Arc::new(Ingestor::new(
            Arc::clone(&registry),
            oracle,
            store.clone(),
            cfg.fallback_price_usd,
        )),
        analyzer: FlowAnalyzer::new(store, registry, cfg.analysis_limit),
    };

    let api_handle = tokio::spawn({
        let cfg = cfg.clone();
        async move { api::serve(cfg, state).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Whale flow service stopped.");
    Ok(())
}

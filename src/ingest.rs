use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::classifier::{classify, ExchangeRegistry};
use crate::db::{InsertOutcome, TransferStore};
use crate::errors::{ActivityError, IngestError, StoreError};
use crate::models::{AssetField, RawActivity, WalletTransfer, WebhookPayload};
use crate::parser::{
    format_timestamp, normalize_address, parse_block_number, parse_decimals, parse_raw_amount,
    parse_timestamp, RawAmount, DEFAULT_DECIMALS,
};
use crate::price::{fallback_estimate, resolve_price, AssetRef, PriceOracle, PriceSource};

pub const DEFAULT_ASSET: &str = "ETH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub chain_id: i64,
}

/// Map a provider network id (`ETH_MAINNET`) to our name and chain id.
pub fn resolve_network(raw: Option<&str>) -> Network {
    let (name, chain_id) = match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
        None | Some("") | Some("ETH_MAINNET") => ("ethereum", 1),
        Some("ETH_SEPOLIA") => ("sepolia", 11_155_111),
        Some("MATIC_MAINNET") => ("polygon", 137),
        Some("ARB_MAINNET") => ("arbitrum", 42_161),
        Some("OPT_MAINNET") => ("optimism", 10),
        Some("BASE_MAINNET") => ("base", 8_453),
        Some(_) => {
            let name = raw.map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default();
            warn!("Unknown network {:?}, storing with chain_id 0", name);
            return Network { name, chain_id: 0 };
        }
    };
    Network {
        name: name.to_string(),
        chain_id,
    }
}

/// An activity record with every field validated, before pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedActivity {
    pub hash: String,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: String,
    pub amount: RawAmount,
    pub decimals: u8,
    pub asset_symbol: String,
    pub asset_address: Option<String>,
}

impl NormalizedActivity {
    /// Key for the price lookup: symbol and contract on this network.
    pub fn asset_ref(&self, network: &Network) -> AssetRef {
        AssetRef {
            symbol: self.asset_symbol.clone(),
            contract: self.asset_address.clone(),
            network: network.name.clone(),
        }
    }
}

fn required(field: Option<String>, name: &'static str) -> Result<String, ActivityError> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ActivityError::MissingField(name))
}

/// Validate one raw feed record. `received_at` stands in for a missing timestamp.
pub fn normalize_activity(raw: Value, received_at: DateTime<Utc>) -> Result<NormalizedActivity, ActivityError> {
    let activity: RawActivity =
        serde_json::from_value(raw).map_err(|e| ActivityError::Shape(e.to_string()))?;

    let hash = required(activity.hash, "hash")?;
    let from_address = normalize_address(&required(activity.from_address, "fromAddress")?);
    let to_address = normalize_address(&required(activity.to_address, "toAddress")?);

    let raw_contract = activity.raw_contract.unwrap_or_default();
    let value = raw_contract
        .raw_value
        .as_ref()
        .or(activity.value.as_ref())
        .ok_or(ActivityError::MissingField("value"))?;
    let amount = parse_raw_amount(value)?;

    let block_number = parse_block_number(
        activity
            .block_num
            .as_ref()
            .ok_or(ActivityError::MissingField("blockNum"))?,
    )?;

    let timestamp = match activity.timestamp.as_deref() {
        Some(ts) => parse_timestamp(ts)?,
        None => received_at,
    };

    let (symbol, meta_decimals, meta_address) = match activity.asset {
        Some(AssetField::Symbol(s)) => (Some(s), None, None),
        Some(AssetField::Meta(m)) => (m.symbol, m.decimals, m.address),
        None => (None, None, None),
    };

    let decimals = match meta_decimals.as_ref().or(raw_contract.decimals.as_ref()) {
        Some(d) => parse_decimals(d)?,
        None => DEFAULT_DECIMALS,
    };

    let asset_symbol = symbol
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ASSET.to_string());

    let asset_address = meta_address
        .or(raw_contract.address)
        .map(|a| normalize_address(&a))
        .filter(|a| !a.is_empty());

    Ok(NormalizedActivity {
        hash,
        block_number,
        timestamp,
        from_address,
        to_address,
        amount,
        decimals,
        asset_symbol,
        asset_address,
    })
}

/// Price and classify a validated activity into its persisted form.
pub fn build_transfer(
    registry: &ExchangeRegistry,
    activity: &NormalizedActivity,
    price_usd: f64,
    network: &Network,
) -> WalletTransfer {
    let value_usd = activity.amount.to_units(activity.decimals) * price_usd;
    let c = classify(registry, &activity.from_address, &activity.to_address, value_usd);

    WalletTransfer {
        transaction_hash: activity.hash.clone(),
        block_number: activity.block_number,
        timestamp: format_timestamp(activity.timestamp),
        from_address: activity.from_address.clone(),
        to_address: activity.to_address.clone(),
        value: activity.amount.to_decimal_string(),
        value_usd,
        asset_symbol: activity.asset_symbol.clone(),
        asset_address: activity.asset_address.clone(),
        token_decimals: activity.decimals,
        from_wallet_type: c.from_type,
        to_wallet_type: c.to_type,
        transfer_direction: c.direction,
        is_significant: c.is_significant,
        chain_id: network.chain_id,
        network: network.name.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedActivity {
    pub index: usize,
    pub hash: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub significant: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: Vec<SkippedActivity>,
    pub fallback_priced: Vec<String>,
}

/// Webhook ingestion: validate, price, classify, persist.
pub struct Ingestor {
    registry: Arc<ExchangeRegistry>,
    oracle: Arc<dyn PriceOracle>,
    store: Arc<dyn TransferStore>,
    fallback_price_usd: f64,
}

impl Ingestor {
    pub fn new(
        registry: Arc<ExchangeRegistry>,
        oracle: Arc<dyn PriceOracle>,
        store: Arc<dyn TransferStore>,
        fallback_price_usd: f64,
    ) -> Self {
        Self {
            registry,
            oracle,
            store,
            fallback_price_usd,
        }
    }

    pub async fn ingest(&self, body: &[u8]) -> Result<IngestReport, IngestError> {
        self.ingest_at(body, Utc::now()).await
    }

    pub async fn ingest_at(&self, body: &[u8], received_at: DateTime<Utc>) -> Result<IngestReport, IngestError> {
        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;
        let event = payload
            .event
            .ok_or_else(|| IngestError::MalformedPayload("missing `event`".into()))?;
        let activities = event
            .activity
            .ok_or_else(|| IngestError::MalformedPayload("missing `event.activity`".into()))?
            .into_vec();

        let network = resolve_network(event.network.as_deref());
        info!(
            "📥 Webhook {} on {}: {} activities",
            payload.webhook_id.as_deref().unwrap_or("-"),
            network.name,
            activities.len()
        );

        let mut skipped = Vec::new();
        let mut valid = Vec::with_capacity(activities.len());
        for (index, raw) in activities.into_iter().enumerate() {
            let hash = raw.get("hash").and_then(Value::as_str).map(str::to_string);
            match normalize_activity(raw, received_at) {
                Ok(a) => valid.push(a),
                Err(e) => {
                    warn!("Skipping activity #{} ({:?}): {}", index, hash, e);
                    skipped.push(SkippedActivity {
                        index,
                        hash,
                        reason: e.to_string(),
                    });
                }
            }
        }

        // one price lookup per distinct asset
        let mut assets: Vec<AssetRef> = valid.iter().map(|a| a.asset_ref(&network)).collect();
        assets.sort_unstable();
        assets.dedup();
        let resolved = join_all(
            assets
                .iter()
                .map(|asset| resolve_price(self.oracle.as_ref(), asset, self.fallback_price_usd)),
        )
        .await;

        let mut fallback_priced: Vec<String> = Vec::new();
        let mut prices = HashMap::new();
        for (asset, (price, source)) in assets.into_iter().zip(resolved) {
            if source == PriceSource::Fallback && !fallback_priced.contains(&asset.symbol) {
                fallback_priced.push(asset.symbol.clone());
            }
            prices.insert(asset, price);
        }

        let transfers: Vec<WalletTransfer> = valid
            .iter()
            .map(|a| {
                let price = prices
                    .get(&a.asset_ref(&network))
                    .copied()
                    .unwrap_or_else(|| fallback_estimate(&a.asset_symbol, self.fallback_price_usd));
                let t = build_transfer(&self.registry, a, price, &network);
                debug!(
                    "{} {} {} ${:.2} {} → {} ({})",
                    t.transaction_hash,
                    t.asset_symbol,
                    t.value,
                    t.value_usd,
                    t.from_wallet_type,
                    t.to_wallet_type,
                    t.transfer_direction
                );
                t
            })
            .collect();

        let significant = transfers.iter().filter(|t| t.is_significant).count();
        let outcome = self.persist(transfers.clone()).await?;

        info!(
            "💾 Inserted {} transfers ({} duplicates, {} skipped)",
            outcome.inserted,
            outcome.duplicates,
            skipped.len()
        );
        if significant > 0 {
            info!("🐋 Significant transfers detected: {}", significant);
        }

        Ok(IngestReport {
            processed: transfers.len(),
            significant,
            inserted: outcome.inserted,
            duplicates: outcome.duplicates,
            skipped,
            fallback_priced,
        })
    }

    async fn persist(&self, transfers: Vec<WalletTransfer>) -> Result<InsertOutcome, StoreError> {
        if transfers.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || store.insert_transfers(&transfers))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(|e| {
                error!("Error inserting transfers: {}", e);
                e
            })
    }
}

// src/aggregator.rs

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task;
use tracing::info;

use crate::classifier::ExchangeRegistry;
use crate::db::{TransferQuery, TransferStore};
use crate::errors::StoreError;
use crate::models::{
    LabelledTransfer, Signal, TradingPattern, TransferAnalysis, TransferDirection, WalletTransfer,
    WalletType, WhaleActivity, WhaleWallet,
};

pub const DEFAULT_WINDOW_HOURS: u32 = 24;
pub const DEFAULT_LIMIT: u32 = 100;

/// Exchange flow needed on the dominant side before BUY/SELL is considered.
pub const SIGNAL_FLOW_THRESHOLD_USD: f64 = 500_000.0;
/// Whale net flow must exceed this share of exchange volume to count.
pub const WHALE_SHARE: f64 = 0.1;
pub const HOLD_CONFIDENCE: f64 = 60.0;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FlowTotals {
    pub exchange_withdrawals: f64,
    pub exchange_deposits: f64,
    pub whale_inflows: f64,
    pub whale_outflows: f64,
}

impl FlowTotals {
    pub fn from_transfers(transfers: &[WalletTransfer]) -> Self {
        let mut totals = FlowTotals::default();
        for t in transfers {
            match t.transfer_direction {
                TransferDirection::ExchangeToWallet => totals.exchange_withdrawals += t.value_usd,
                TransferDirection::WalletToExchange => totals.exchange_deposits += t.value_usd,
                _ => {}
            }
            if t.from_wallet_type == WalletType::Whale {
                totals.whale_outflows += t.value_usd;
            }
            if t.to_wallet_type == WalletType::Whale {
                totals.whale_inflows += t.value_usd;
            }
        }
        totals
    }

    /// Withdrawals minus deposits; positive means coins leaving exchanges.
    pub fn net_flow(&self) -> f64 {
        self.exchange_withdrawals - self.exchange_deposits
    }

    pub fn whale_net_flow(&self) -> f64 {
        self.whale_inflows - self.whale_outflows
    }

    pub fn total_volume(&self) -> f64 {
        self.exchange_withdrawals + self.exchange_deposits
    }

    pub fn whale_accumulating(&self) -> bool {
        let net = self.whale_net_flow();
        self.total_volume() > 0.0 && net > 0.0 && net.abs() > self.total_volume() * WHALE_SHARE
    }

    pub fn whale_distributing(&self) -> bool {
        let net = self.whale_net_flow();
        self.total_volume() > 0.0 && net < 0.0 && net.abs() > self.total_volume() * WHALE_SHARE
    }
}

fn millions(usd: f64) -> String {
    format!("${:.2}M", usd / 1_000_000.0)
}

/// Derive the signal for a set of transfers. `None` when the set is empty.
pub fn analyze_transfers(
    asset_symbol: &str,
    hours: u32,
    transfers: &[WalletTransfer],
) -> Option<TransferAnalysis> {
    if transfers.is_empty() {
        return None;
    }

    let flows = FlowTotals::from_transfers(transfers);
    let net_flow = flows.net_flow();
    let whale_net_flow = flows.whale_net_flow();
    let total_volume = flows.total_volume();
    let accumulating = flows.whale_accumulating();
    let distributing = flows.whale_distributing();

    let (signal, mut confidence, mut reasoning) =
        if net_flow > 0.0 && flows.exchange_withdrawals > SIGNAL_FLOW_THRESHOLD_USD {
            let mut confidence = (50.0 + (net_flow / total_volume) * 40.0).min(90.0);
            let mut reasoning = format!(
                "Strong exchange outflows detected: {} withdrawn vs {} deposited. ",
                millions(flows.exchange_withdrawals),
                millions(flows.exchange_deposits)
            );
            if accumulating {
                confidence = (confidence + 10.0).min(95.0);
                reasoning.push_str(&format!(
                    "Whales are accumulating (+{}). ",
                    millions(whale_net_flow)
                ));
            }
            (Signal::Buy, confidence, reasoning)
        } else if net_flow < 0.0 && flows.exchange_deposits > SIGNAL_FLOW_THRESHOLD_USD {
            let mut confidence = (50.0 + (net_flow.abs() / total_volume) * 40.0).min(90.0);
            let mut reasoning = format!(
                "Strong exchange inflows detected: {} deposited vs {} withdrawn. ",
                millions(flows.exchange_deposits),
                millions(flows.exchange_withdrawals)
            );
            if distributing {
                confidence = (confidence + 10.0).min(95.0);
                reasoning.push_str(&format!(
                    "Whales are distributing (-{}). ",
                    millions(whale_net_flow.abs())
                ));
            }
            (Signal::Sell, confidence, reasoning)
        } else {
            let reasoning = format!(
                "Balanced flow activity: {} total volume with neutral sentiment. ",
                millions(total_volume)
            );
            (Signal::Hold, HOLD_CONFIDENCE, reasoning)
        };

    confidence = confidence.clamp(0.0, 100.0);
    reasoning.push_str(&format!(
        "Based on {} significant transfers in the last {}h.",
        transfers.len(),
        hours
    ));

    Some(TransferAnalysis {
        asset_symbol: asset_symbol.to_string(),
        signal,
        confidence,
        reasoning,
        whale_activity: WhaleActivity {
            inflows_usd: flows.whale_inflows,
            outflows_usd: flows.whale_outflows,
            net_flow_usd: whale_net_flow,
            exchange_withdrawals_usd: flows.exchange_withdrawals,
            exchange_deposits_usd: flows.exchange_deposits,
            whale_accumulating: accumulating,
            whale_distributing: distributing,
        },
        transfer_count: transfers.len(),
        timeframe: format!("{}h", hours),
    })
}

/// Attach exchange labels to both endpoints.
pub fn label_transfers(registry: &ExchangeRegistry, transfers: Vec<WalletTransfer>) -> Vec<LabelledTransfer> {
    transfers
        .into_iter()
        .map(|transfer| LabelledTransfer {
            from_label: registry.label(&transfer.from_address).map(str::to_string),
            to_label: registry.label(&transfer.to_address).map(str::to_string),
            transfer,
        })
        .collect()
}

/// Roll whale endpoints up per address, largest volume first.
pub fn summarize_whales(transfers: &[WalletTransfer]) -> Vec<WhaleWallet> {
    let mut by_address: HashMap<&str, WhaleWallet> = HashMap::new();

    for t in transfers {
        let mut legs = Vec::with_capacity(2);
        if t.to_wallet_type == WalletType::Whale {
            legs.push((t.to_address.as_str(), t.value_usd, 0.0));
        }
        if t.from_wallet_type == WalletType::Whale {
            legs.push((t.from_address.as_str(), 0.0, t.value_usd));
        }

        for (address, inflow, outflow) in legs {
            let w = by_address.entry(address).or_insert_with(|| WhaleWallet {
                address: address.to_string(),
                wallet_type: WalletType::Whale,
                total_transfers: 0,
                total_volume_usd: 0.0,
                inflow_usd: 0.0,
                outflow_usd: 0.0,
                trading_pattern: TradingPattern::Neutral,
            });
            w.total_transfers += 1;
            w.total_volume_usd += inflow + outflow;
            w.inflow_usd += inflow;
            w.outflow_usd += outflow;
        }
    }

    let mut wallets: Vec<WhaleWallet> = by_address
        .into_values()
        .map(|mut w| {
            w.trading_pattern = if w.inflow_usd > w.outflow_usd {
                TradingPattern::Accumulating
            } else if w.outflow_usd > w.inflow_usd {
                TradingPattern::Distributing
            } else {
                TradingPattern::Neutral
            };
            w
        })
        .collect();

    wallets.sort_by(|a, b| {
        b.total_volume_usd
            .total_cmp(&a.total_volume_usd)
            .then_with(|| a.address.cmp(&b.address))
    });
    wallets
}

/// Markdown summary of an analysis for downstream consumers.
pub fn format_analysis_report(analysis: Option<&TransferAnalysis>) -> String {
    let Some(a) = analysis else {
        return "No recent whale transfer activity detected for this asset.".to_string();
    };
    let w = &a.whale_activity;
    let status = if w.whale_accumulating {
        "ACCUMULATING"
    } else if w.whale_distributing {
        "DISTRIBUTING"
    } else {
        "NEUTRAL"
    };

    let mut out = format!("\n\n📊 **WHALE TRANSFER ANALYSIS** ({}):\n", a.timeframe);
    out += &format!("**Signal**: {} ({:.0}% confidence)\n\n", a.signal, a.confidence);
    out += "**Exchange Flows**:\n";
    out += &format!("- Withdrawals (Bullish): {}\n", millions(w.exchange_withdrawals_usd));
    out += &format!("- Deposits (Bearish): {}\n", millions(w.exchange_deposits_usd));
    out += &format!(
        "- Net Flow: {}\n\n",
        millions(w.exchange_withdrawals_usd - w.exchange_deposits_usd)
    );
    out += "**Whale Activity**:\n";
    out += &format!("- Inflows: {}\n", millions(w.inflows_usd));
    out += &format!("- Outflows: {}\n", millions(w.outflows_usd));
    out += &format!("- Status: {}\n\n", status);
    out += &format!("**Analysis**: {}\n", a.reasoning);
    out += &format!(
        "**Transfers Analyzed**: {} significant transactions\n",
        a.transfer_count
    );
    out
}

/// Read-side entry points over a [`TransferStore`].
#[derive(Clone)]
pub struct FlowAnalyzer {
    store: Arc<dyn TransferStore>,
    registry: Arc<ExchangeRegistry>,
    limit: u32,
}

impl FlowAnalyzer {
    pub fn new(store: Arc<dyn TransferStore>, registry: Arc<ExchangeRegistry>, limit: u32) -> Self {
        Self {
            store,
            registry,
            limit,
        }
    }

    pub async fn recent_transfers_at(
        &self,
        asset_symbol: &str,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<WalletTransfer>, StoreError> {
        let query = TransferQuery::window(asset_symbol, hours, now, self.limit);
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || store.recent_significant(&query))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub async fn labelled_transfers_at(
        &self,
        asset_symbol: &str,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<LabelledTransfer>, StoreError> {
        let transfers = self.recent_transfers_at(asset_symbol, hours, now).await?;
        Ok(label_transfers(&self.registry, transfers))
    }

    pub async fn labelled_transfers(&self, asset_symbol: &str, hours: u32) -> Result<Vec<LabelledTransfer>, StoreError> {
        self.labelled_transfers_at(asset_symbol, hours, Utc::now()).await
    }

    pub async fn analyze_at(
        &self,
        asset_symbol: &str,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<TransferAnalysis>, StoreError> {
        let transfers = self.recent_transfers_at(asset_symbol, hours, now).await?;
        let analysis = analyze_transfers(asset_symbol, hours, &transfers);
        match &analysis {
            Some(a) => info!(
                "📈 {} {}h: {} ({:.1}%) over {} transfers",
                asset_symbol, hours, a.signal, a.confidence, a.transfer_count
            ),
            None => info!("No significant {} transfers in the last {}h", asset_symbol, hours),
        }
        Ok(analysis)
    }

    pub async fn analyze(&self, asset_symbol: &str, hours: u32) -> Result<Option<TransferAnalysis>, StoreError> {
        self.analyze_at(asset_symbol, hours, Utc::now()).await
    }

    pub async fn whale_wallets_at(
        &self,
        asset_symbol: &str,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<WhaleWallet>, StoreError> {
        let transfers = self.recent_transfers_at(asset_symbol, hours, now).await?;
        Ok(summarize_whales(&transfers))
    }

    pub async fn whale_wallets(&self, asset_symbol: &str, hours: u32) -> Result<Vec<WhaleWallet>, StoreError> {
        self.whale_wallets_at(asset_symbol, hours, Utc::now()).await
    }
}

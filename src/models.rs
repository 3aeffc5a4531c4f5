// src/models.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Role of an address in a transfer, fixed at ingest time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    Exchange,
    Whale,
    SmartMoney,
    Normal,
}

impl WalletType {
    #[cfg(test)]
    pub const ALL: [WalletType; 4] = [
        WalletType::Exchange,
        WalletType::Whale,
        WalletType::SmartMoney,
        WalletType::Normal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Exchange => "exchange",
            WalletType::Whale => "whale",
            WalletType::SmartMoney => "smart_money",
            WalletType::Normal => "normal",
        }
    }
}

impl FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exchange" => Ok(WalletType::Exchange),
            "whale" => Ok(WalletType::Whale),
            "smart_money" => Ok(WalletType::SmartMoney),
            "normal" => Ok(WalletType::Normal),
            other => Err(format!("unknown wallet type '{}'", other)),
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    ExchangeToWallet,
    WalletToExchange,
    ExchangeToExchange,
    WalletToWallet,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::ExchangeToWallet => "exchange_to_wallet",
            TransferDirection::WalletToExchange => "wallet_to_exchange",
            TransferDirection::ExchangeToExchange => "exchange_to_exchange",
            TransferDirection::WalletToWallet => "wallet_to_wallet",
        }
    }
}

impl FromStr for TransferDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exchange_to_wallet" => Ok(TransferDirection::ExchangeToWallet),
            "wallet_to_exchange" => Ok(TransferDirection::WalletToExchange),
            "exchange_to_exchange" => Ok(TransferDirection::ExchangeToExchange),
            "wallet_to_wallet" => Ok(TransferDirection::WalletToWallet),
            other => Err(format!("unknown transfer direction '{}'", other)),
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified transfer as persisted in `wallet_transfers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransfer {
    pub transaction_hash: String,
    pub block_number: i64,
    pub timestamp: String, // RFC3339, UTC, millisecond precision
    pub from_address: String,
    pub to_address: String,
    pub value: String, // raw amount in smallest unit, decimal string
    pub value_usd: f64,
    pub asset_symbol: String,
    pub asset_address: Option<String>,
    pub token_decimals: u8,
    pub from_wallet_type: WalletType,
    pub to_wallet_type: WalletType,
    pub transfer_direction: TransferDirection,
    pub is_significant: bool,
    pub chain_id: i64,
    pub network: String,
}

/// A stored transfer with exchange labels resolved for its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelledTransfer {
    #[serde(flatten)]
    pub transfer: WalletTransfer,
    pub from_label: Option<String>,
    pub to_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhaleActivity {
    pub inflows_usd: f64,
    pub outflows_usd: f64,
    pub net_flow_usd: f64,
    pub exchange_withdrawals_usd: f64,
    pub exchange_deposits_usd: f64,
    pub whale_accumulating: bool,
    pub whale_distributing: bool,
}

/// Signal derived from a window of significant transfers. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferAnalysis {
    pub asset_symbol: String,
    pub signal: Signal,
    pub confidence: f64,
    pub reasoning: String,
    pub whale_activity: WhaleActivity,
    pub transfer_count: usize,
    pub timeframe: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingPattern {
    Accumulating,
    Distributing,
    Neutral,
}

/// Per-address rollup of whale endpoints seen in a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhaleWallet {
    pub address: String,
    pub wallet_type: WalletType,
    pub total_transfers: usize,
    pub total_volume_usd: f64,
    pub inflow_usd: f64,
    pub outflow_usd: f64,
    pub trading_pattern: TradingPattern,
}

// ---------- inbound webhook shapes ----------

/// Top-level Alchemy webhook body. Only `event` is required.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "webhookId")]
    pub webhook_id: Option<String>,
    pub event: Option<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub network: Option<String>,
    pub activity: Option<ActivityList>,
}

/// Activities arrive as a list, occasionally as a bare object. Records are
/// kept as raw JSON so one bad record cannot fail the whole payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ActivityList {
    Many(Vec<Value>),
    One(Value),
}

impl ActivityList {
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            ActivityList::Many(v) => v,
            ActivityList::One(v) => vec![v],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActivity {
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub value: Option<Value>,
    pub asset: Option<AssetField>,
    pub hash: Option<String>,
    pub block_num: Option<Value>,
    pub timestamp: Option<String>,
    pub raw_contract: Option<RawContract>,
}

/// `asset` is either a bare symbol ("ETH") or a metadata object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AssetField {
    Symbol(String),
    Meta(AssetMeta),
}

#[derive(Debug, Default, Deserialize)]
pub struct AssetMeta {
    pub symbol: Option<String>,
    pub decimals: Option<Value>,
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContract {
    pub raw_value: Option<Value>,
    pub decimals: Option<Value>,
    pub address: Option<String>,
}

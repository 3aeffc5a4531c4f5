// src/classifier.rs
// Registry is built once at startup and only read afterwards.

use std::collections::HashMap;

use crate::models::{TransferDirection, WalletType};
use crate::parser::normalize_address;

pub const WHALE_THRESHOLD_USD: f64 = 100_000.0;
pub const SMART_MONEY_THRESHOLD_USD: f64 = 10_000.0;
pub const SIGNIFICANT_THRESHOLD_USD: f64 = 50_000.0;
pub const EXCHANGE_WITHDRAWAL_THRESHOLD_USD: f64 = 10_000.0;

/// Custody wallets of centralized venues on Ethereum mainnet.
pub const KNOWN_EXCHANGES: &[(&str, &str)] = &[
    ("0x28c6c06298d514db089934071355e5743bf21d60", "Binance 14"),
    ("0x21a31ee1afc51d94c2efccaa2092ad1028285549", "Binance 15"),
    ("0x47ac0fb4f2d84898e4d9e7b4dab3c24507a6d503", "Binance-Peg"),
    ("0x3f5ce5fbfe3e9af3971dd833d26ba9b5c936f0be", "Binance Hot"),
    ("0xd551234ae421e3bcba99a0da6d736074f22192ff", "Binance Cold"),
    ("0x5041ed759dd4afc3a72b8192c143f72f4724081a", "Kraken"),
    ("0x267be1c1d684f78cb4f6a176c4911b741e4ffdc0", "Kraken 2"),
    ("0xae2d4617c862309a3d75a0ffb358c7a5009c673f", "Kraken 3"),
    ("0x0a869d79a7052c7f1b55a8ebabbea3420f0d1e13", "Kraken 4"),
    ("0x53d284357ec70ce289d6d64134dfac8e511c8a3d", "Kraken 5"),
    ("0x6cc5f688a315f3dc28a7781717a9a798a59fda7b", "OKX"),
    ("0xda9dfa130df4de4673b89022ee50ff26f6ea73cf", "Coinbase"),
    ("0x503828976d22510aad0201ac7ec88293211d23da", "Coinbase 2"),
    ("0xddfabcdc4d8ffc6d5beaf154f18b778f892a0740", "Coinbase 3"),
];

/// Immutable exchange allow-list keyed by lower-cased address.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRegistry {
    entries: HashMap<String, Option<String>>,
}

impl ExchangeRegistry {
    /// Built-in venues plus any extra (unlabelled) addresses.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: HashMap<String, Option<String>> = KNOWN_EXCHANGES
            .iter()
            .map(|(addr, label)| (addr.to_string(), Some(label.to_string())))
            .collect();

        for addr in extra {
            let addr = normalize_address(addr.as_ref());
            if !addr.is_empty() {
                entries.entry(addr).or_insert(None);
            }
        }

        Self { entries }
    }

    #[cfg(test)]
    pub fn builtin() -> Self {
        Self::new(std::iter::empty::<&str>())
    }

    pub fn is_exchange(&self, address: &str) -> bool {
        self.entries.contains_key(&normalize_address(address))
    }

    pub fn label(&self, address: &str) -> Option<&str> {
        self.entries
            .get(&normalize_address(address))
            .and_then(|l| l.as_deref())
    }

    pub fn exchange_count(&self) -> usize {
        self.entries.len()
    }
}

/// Exchange membership wins over any value threshold.
pub fn classify_wallet(registry: &ExchangeRegistry, address: &str, value_usd: f64) -> WalletType {
    if registry.is_exchange(address) {
        WalletType::Exchange
    } else if value_usd > WHALE_THRESHOLD_USD {
        WalletType::Whale
    } else if value_usd > SMART_MONEY_THRESHOLD_USD {
        WalletType::SmartMoney
    } else {
        WalletType::Normal
    }
}

pub fn transfer_direction(from: WalletType, to: WalletType) -> TransferDirection {
    match (from == WalletType::Exchange, to == WalletType::Exchange) {
        (true, false) => TransferDirection::ExchangeToWallet,
        (false, true) => TransferDirection::WalletToExchange,
        (true, true) => TransferDirection::ExchangeToExchange,
        (false, false) => TransferDirection::WalletToWallet,
    }
}

pub fn is_significant(
    value_usd: f64,
    from: WalletType,
    to: WalletType,
    direction: TransferDirection,
) -> bool {
    value_usd > SIGNIFICANT_THRESHOLD_USD
        || from == WalletType::Whale
        || to == WalletType::Whale
        || (direction == TransferDirection::ExchangeToWallet
            && value_usd > EXCHANGE_WITHDRAWAL_THRESHOLD_USD)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub from_type: WalletType,
    pub to_type: WalletType,
    pub direction: TransferDirection,
    pub is_significant: bool,
}

pub fn classify(registry: &ExchangeRegistry, from: &str, to: &str, value_usd: f64) -> Classification {
    let from_type = classify_wallet(registry, from, value_usd);
    let to_type = classify_wallet(registry, to, value_usd);
    let direction = transfer_direction(from_type, to_type);

    Classification {
        from_type,
        to_type,
        direction,
        is_significant: is_significant(value_usd, from_type, to_type, direction),
    }
}

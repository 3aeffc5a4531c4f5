use chrono::{DateTime, Duration, Utc};
use eyre::Result;
use rusqlite::{params, Connection, Row};
#[cfg(test)]
use rusqlite::OptionalExtension;
use std::sync::Mutex;

use crate::errors::StoreError;
use crate::models::WalletTransfer;
use crate::parser::format_timestamp;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_transfers (
  id                 INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at         TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
  transaction_hash   TEXT NOT NULL,
  block_number       INTEGER NOT NULL,
  timestamp          TEXT NOT NULL, -- RFC3339 UTC, fixed width
  from_address       TEXT NOT NULL,
  to_address         TEXT NOT NULL,
  value              TEXT NOT NULL, -- raw amount stored as string
  value_usd          REAL NOT NULL,
  asset_symbol       TEXT NOT NULL,
  asset_address      TEXT,
  token_decimals     INTEGER NOT NULL,
  from_wallet_type   TEXT NOT NULL CHECK (from_wallet_type IN ('exchange','whale','smart_money','normal')),
  to_wallet_type     TEXT NOT NULL CHECK (to_wallet_type IN ('exchange','whale','smart_money','normal')),
  transfer_direction TEXT NOT NULL CHECK (transfer_direction IN
                       ('exchange_to_wallet','wallet_to_exchange','exchange_to_exchange','wallet_to_wallet')),
  is_significant     INTEGER NOT NULL,
  chain_id           INTEGER NOT NULL,
  network            TEXT NOT NULL,
  UNIQUE(transaction_hash, network)
);

CREATE INDEX IF NOT EXISTS idx_wallet_transfers_signal
  ON wallet_transfers (asset_symbol, is_significant, timestamp);
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// Window filter for significant transfers of one asset.
#[derive(Debug, Clone)]
pub struct TransferQuery {
    pub asset_symbol: String,
    pub since: DateTime<Utc>,
    pub limit: u32,
}

impl TransferQuery {
    pub fn window(asset_symbol: &str, hours: u32, now: DateTime<Utc>, limit: u32) -> Self {
        Self {
            asset_symbol: asset_symbol.trim().to_string(),
            since: now
                .checked_sub_signed(Duration::hours(hours as i64))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            limit,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Append-only transfer storage.
pub trait TransferStore: Send + Sync {
    /// Insert a batch atomically. Rows colliding on `(transaction_hash, network)`
    /// are ignored and counted as duplicates.
    fn insert_transfers(&self, transfers: &[WalletTransfer]) -> Result<InsertOutcome, StoreError>;

    /// Significant transfers for the query window, newest first.
    fn recent_significant(&self, query: &TransferQuery) -> Result<Vec<WalletTransfer>, StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = connect(path)?;
        run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    #[cfg(test)]
    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(conn.query_row("SELECT COUNT(*) FROM wallet_transfers", [], |r| r.get(0))?)
    }

    #[cfg(test)]
    pub fn find(&self, transaction_hash: &str, network: &str) -> Result<Option<WalletTransfer>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let row = conn
            .query_row(
                &format!("{} WHERE transaction_hash = ?1 AND network = ?2", SELECT_SQL),
                params![transaction_hash, network],
                read_row,
            )
            .optional()?;
        row.map(RawRow::into_transfer).transpose()
    }
}

const SELECT_SQL: &str = "SELECT transaction_hash, block_number, timestamp, from_address, to_address,
        value, value_usd, asset_symbol, asset_address, token_decimals,
        from_wallet_type, to_wallet_type, transfer_direction, is_significant,
        chain_id, network
 FROM wallet_transfers";

// Symbols are stored upper-cased; keep the column bare so the signal index applies.
const WINDOW_FILTER_SQL: &str = "
    WHERE asset_symbol = UPPER(?1)
      AND is_significant = 1
      AND timestamp >= ?2
    ORDER BY timestamp DESC, id DESC
    LIMIT ?3";

/// Column values before the enum fields are validated.
struct RawRow {
    transfer: WalletTransfer,
    from_type: String,
    to_type: String,
    direction: String,
}

impl RawRow {
    fn into_transfer(self) -> Result<WalletTransfer, StoreError> {
        let mut t = self.transfer;
        t.from_wallet_type = self.from_type.parse().map_err(StoreError::Corrupt)?;
        t.to_wallet_type = self.to_type.parse().map_err(StoreError::Corrupt)?;
        t.transfer_direction = self.direction.parse().map_err(StoreError::Corrupt)?;
        Ok(t)
    }
}

fn read_row(r: &Row<'_>) -> rusqlite::Result<RawRow> {
    use crate::models::{TransferDirection, WalletType};

    Ok(RawRow {
        transfer: WalletTransfer {
            transaction_hash: r.get(0)?,
            block_number: r.get(1)?,
            timestamp: r.get(2)?,
            from_address: r.get(3)?,
            to_address: r.get(4)?,
            value: r.get(5)?,
            value_usd: r.get(6)?,
            asset_symbol: r.get(7)?,
            asset_address: r.get(8)?,
            token_decimals: r.get(9)?,
            // overwritten in into_transfer
            from_wallet_type: WalletType::Normal,
            to_wallet_type: WalletType::Normal,
            transfer_direction: TransferDirection::WalletToWallet,
            is_significant: r.get(13)?,
            chain_id: r.get(14)?,
            network: r.get(15)?,
        },
        from_type: r.get(10)?,
        to_type: r.get(11)?,
        direction: r.get(12)?,
    })
}

impl TransferStore for SqliteStore {
    fn insert_transfers(&self, transfers: &[WalletTransfer]) -> Result<InsertOutcome, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        // batch writes
        let tx = conn.transaction()?;
        let mut outcome = InsertOutcome::default();
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO wallet_transfers (
                    transaction_hash, block_number, timestamp,
                    from_address, to_address, value, value_usd,
                    asset_symbol, asset_address, token_decimals,
                    from_wallet_type, to_wallet_type, transfer_direction,
                    is_significant, chain_id, network
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
            )?;

            for t in transfers {
                let changed = stmt.execute(params![
                    t.transaction_hash,
                    t.block_number,
                    t.timestamp,
                    t.from_address,
                    t.to_address,
                    t.value,
                    t.value_usd,
                    t.asset_symbol,
                    t.asset_address,
                    t.token_decimals,
                    t.from_wallet_type.as_str(),
                    t.to_wallet_type.as_str(),
                    t.transfer_direction.as_str(),
                    t.is_significant,
                    t.chain_id,
                    t.network,
                ])?;
                if changed == 0 {
                    outcome.duplicates += 1;
                } else {
                    outcome.inserted += 1;
                }
            }
        }
        tx.commit()?; // commit batch

        Ok(outcome)
    }

    fn recent_significant(&self, query: &TransferQuery) -> Result<Vec<WalletTransfer>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(&format!("{} {}", SELECT_SQL, WINDOW_FILTER_SQL))?;

        let rows = stmt.query_map(
            params![query.asset_symbol, format_timestamp(query.since), query.limit as i64],
            read_row,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_transfer()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{TransferDirection, WalletType};
    use chrono::TimeZone;

    pub(crate) fn sample(hash: &str, symbol: &str, ts: DateTime<Utc>, significant: bool) -> WalletTransfer {
        WalletTransfer {
            transaction_hash: hash.to_string(),
            block_number: 19_000_000,
            timestamp: format_timestamp(ts),
            from_address: "0x28c6c06298d514db089934071355e5743bf21d60".to_string(),
            to_address: "0x742d35cc6634c0532925a3b844bc9e7595f0beb0".to_string(),
            value: "500000000000000000000".to_string(),
            value_usd: 1_500_000.0,
            asset_symbol: symbol.to_string(),
            asset_address: None,
            token_decimals: 18,
            from_wallet_type: WalletType::Exchange,
            to_wallet_type: WalletType::Whale,
            transfer_direction: TransferDirection::ExchangeToWallet,
            is_significant: significant,
            chain_id: 1,
            network: "ethereum".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn insert_and_read_back() {
        let store = SqliteStore::in_memory().unwrap();
        let t = sample("0xaaa", "ETH", now(), true);

        let outcome = store.insert_transfers(&[t.clone()]).unwrap();
        assert_eq!(outcome, InsertOutcome { inserted: 1, duplicates: 0 });
        assert_eq!(store.find("0xaaa", "ethereum").unwrap(), Some(t));
        assert_eq!(store.find("0xaaa", "polygon").unwrap(), None);
    }

    #[test]
    fn duplicate_hash_per_network_is_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        let t = sample("0xaaa", "ETH", now(), true);
        let mut other_net = t.clone();
        other_net.network = "polygon".to_string();
        other_net.chain_id = 137;

        let outcome = store.insert_transfers(&[t.clone(), t.clone(), other_net]).unwrap();
        assert_eq!(outcome, InsertOutcome { inserted: 2, duplicates: 1 });
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn window_filters_asset_significance_and_age() {
        let store = SqliteStore::in_memory().unwrap();
        let now = now();
        store
            .insert_transfers(&[
                sample("0x1", "ETH", now - Duration::hours(1), true),
                sample("0x2", "ETH", now - Duration::hours(2), true),
                sample("0x3", "ETH", now - Duration::hours(3), false),
                sample("0x4", "ETH", now - Duration::hours(30), true),
                sample("0x5", "USDC", now - Duration::hours(1), true),
            ])
            .unwrap();

        let rows = store
            .recent_significant(&TransferQuery::window("Eth", 24, now, 100))
            .unwrap();
        let hashes: Vec<_> = rows.iter().map(|t| t.transaction_hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x1", "0x2"]);
    }

    #[test]
    fn window_is_capped_newest_first() {
        let store = SqliteStore::in_memory().unwrap();
        let now = now();
        let batch: Vec<_> = (0..10)
            .map(|i| sample(&format!("0x{}", i), "ETH", now - Duration::minutes(i), true))
            .collect();
        store.insert_transfers(&batch).unwrap();

        let rows = store
            .recent_significant(&TransferQuery::window("ETH", 24, now, 3))
            .unwrap();
        let hashes: Vec<_> = rows.iter().map(|t| t.transaction_hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x0", "0x1", "0x2"]);
    }

    #[test]
    fn window_query_uses_signal_index() {
        let store = SqliteStore::in_memory().unwrap();
        let conn = store.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("EXPLAIN QUERY PLAN {} {}", SELECT_SQL, WINDOW_FILTER_SQL))
            .unwrap();
        let plan: Vec<String> = stmt
            .query_map(params!["eth", format_timestamp(now()), 100i64], |r| r.get::<_, String>(3))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(
            plan.iter().any(|d| d.contains("idx_wallet_transfers_signal")),
            "{:?}",
            plan
        );
    }
}

use thiserror::Error;

/// Failure of a whole webhook delivery.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid webhook payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Failure of a single activity record. The record is skipped, its siblings
/// are still ingested.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    #[error("malformed transfer value: {0}")]
    MalformedValue(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid token decimals: {0}")]
    InvalidDecimals(String),

    #[error("invalid block number: {0}")]
    InvalidBlockNumber(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid activity record: {0}")]
    Shape(String),
}

#[derive(Error, Debug)]
pub enum PriceError {
    #[error("no price available for {symbol}")]
    Unavailable { symbol: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage connection lock poisoned")]
    Poisoned,

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

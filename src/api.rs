use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::aggregator::{format_analysis_report, FlowAnalyzer, DEFAULT_WINDOW_HOURS};
use crate::config::Config;
use crate::errors::{IngestError, StoreError};
use crate::ingest::Ingestor;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub analyzer: FlowAnalyzer,
}

#[derive(Deserialize)]
pub struct WindowQuery {
    pub asset: String,
    pub hours: Option<u32>, // defaults to 24
}

impl WindowQuery {
    fn hours(&self) -> u32 {
        self.hours.unwrap_or(DEFAULT_WINDOW_HOURS)
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Whale flow API running" }))
        .route("/webhook", post(webhook))
        .route("/transfers", get(transfers))
        .route("/analysis", get(analysis))
        .route("/analysis/report", get(report))
        .route("/whales", get(whales))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(cfg: Config, state: AppState) -> eyre::Result<()> {
    let app = router(state);

    let addr = SocketAddr::new(cfg.bind_addr, cfg.port);
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn error_body(status: StatusCode, message: impl ToString) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.to_string() })))
}

fn storage_failure(e: StoreError) -> (StatusCode, Json<Value>) {
    error!("Storage failure: {}", e);
    error_body(StatusCode::INTERNAL_SERVER_ERROR, e)
}

pub async fn webhook(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    match state.ingestor.ingest(&body).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "processed": report.processed,
                "significant": report.significant,
                "inserted": report.inserted,
                "duplicates": report.duplicates,
                "skipped": report.skipped,
                "fallback_priced": report.fallback_priced,
            })),
        ),
        Err(IngestError::MalformedPayload(msg)) => {
            warn!("Rejected webhook: {}", msg);
            error_body(StatusCode::BAD_REQUEST, format!("Invalid webhook format: {}", msg))
        }
        Err(IngestError::Storage(e)) => storage_failure(e),
    }
}

pub async fn transfers(State(state): State<AppState>, Query(q): Query<WindowQuery>) -> (StatusCode, Json<Value>) {
    match state.analyzer.labelled_transfers(&q.asset, q.hours()).await {
        Ok(rows) => (StatusCode::OK, Json(json!(rows))),
        Err(e) => storage_failure(e),
    }
}

/// `null` body when there is nothing to analyze.
pub async fn analysis(State(state): State<AppState>, Query(q): Query<WindowQuery>) -> (StatusCode, Json<Value>) {
    match state.analyzer.analyze(&q.asset, q.hours()).await {
        Ok(a) => (StatusCode::OK, Json(json!(a))),
        Err(e) => storage_failure(e),
    }
}

pub async fn report(State(state): State<AppState>, Query(q): Query<WindowQuery>) -> (StatusCode, String) {
    match state.analyzer.analyze(&q.asset, q.hours()).await {
        Ok(a) => (StatusCode::OK, format_analysis_report(a.as_ref())),
        Err(e) => {
            error!("Storage failure: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn whales(State(state): State<AppState>, Query(q): Query<WindowQuery>) -> (StatusCode, Json<Value>) {
    match state.analyzer.whale_wallets(&q.asset, q.hours()).await {
        Ok(w) => (StatusCode::OK, Json(json!(w))),
        Err(e) => storage_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ExchangeRegistry;
    use crate::db::{InsertOutcome, SqliteStore, TransferQuery, TransferStore};
    use crate::models::WalletTransfer;
    use crate::price::StaticPriceOracle;

    struct BrokenStore;

    impl TransferStore for BrokenStore {
        fn insert_transfers(&self, _: &[WalletTransfer]) -> Result<InsertOutcome, StoreError> {
            Err(StoreError::Task("disk on fire".into()))
        }

        fn recent_significant(&self, _: &TransferQuery) -> Result<Vec<WalletTransfer>, StoreError> {
            Err(StoreError::Task("disk on fire".into()))
        }
    }

    fn state(store: Arc<dyn TransferStore>) -> AppState {
        let registry = Arc::new(ExchangeRegistry::builtin());
        let oracle = Arc::new(StaticPriceOracle::new([("ETH", 3_000.0)]));
        AppState {
            ingestor: Arc::new(Ingestor::new(Arc::clone(&registry), oracle, Arc::clone(&store), 3_000.0)),
            analyzer: FlowAnalyzer::new(store, registry, 100),
        }
    }

    fn sample_body() -> Bytes {
        // Binance 14 → wallet, 500 ETH
        Bytes::from(
            json!({
                "webhookId": "wh_test123",
                "type": "ADDRESS_ACTIVITY",
                "event": {
                    "network": "ETH_MAINNET",
                    "activity": [{
                        "fromAddress": "0x28C6c06298d514Db089934071355E5743bf21d60",
                        "toAddress": "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0",
                        "blockNum": "0x12A5C20",
                        "hash": "0xtest123456789abcdef",
                        "value": 500,
                        "asset": "ETH",
                        "category": "external",
                        "rawContract": { "rawValue": "0x1b1ae4d6e2ef500000", "decimals": 18 }
                    }]
                }
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn webhook_then_analysis() {
        let st = state(Arc::new(SqliteStore::in_memory().unwrap()));

        let (status, Json(body)) = webhook(State(st.clone()), sample_body()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["processed"], 1);
        assert_eq!(body["significant"], 1);

        let q = || Query(WindowQuery { asset: "eth".into(), hours: None });
        let (status, Json(rows)) = transfers(State(st.clone()), q()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows[0]["transfer_direction"], "exchange_to_wallet");
        assert_eq!(rows[0]["to_wallet_type"], "whale");
        assert_eq!(rows[0]["from_label"], "Binance 14");
        assert!(rows[0]["to_label"].is_null());

        let (_, Json(a)) = analysis(State(st.clone()), q()).await;
        assert_eq!(a["signal"], "BUY");
        assert_eq!(a["confidence"], 95.0);
        assert_eq!(a["timeframe"], "24h");

        let (_, Json(w)) = whales(State(st.clone()), q()).await;
        assert_eq!(w[0]["address"], "0x742d35cc6634c0532925a3b844bc9e7595f0beb0");
        assert_eq!(w[0]["trading_pattern"], "accumulating");

        let (_, text) = report(State(st), q()).await;
        assert!(text.contains("**Signal**: BUY (95% confidence)"));
    }

    #[tokio::test]
    async fn empty_analysis_is_null() {
        let st = state(Arc::new(SqliteStore::in_memory().unwrap()));
        let (status, Json(a)) = analysis(State(st), Query(WindowQuery { asset: "BTC".into(), hours: Some(1) })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(a.is_null());
    }

    #[tokio::test]
    async fn bad_payload_is_400() {
        let st = state(Arc::new(SqliteStore::in_memory().unwrap()));
        let (status, Json(body)) = webhook(State(st), Bytes::from_static(br#"{"event":{}}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid webhook format"));
    }

    #[tokio::test]
    async fn storage_failure_is_500() {
        let st = state(Arc::new(BrokenStore));
        let (status, Json(body)) = webhook(State(st.clone()), sample_body()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("disk on fire"));

        let (status, _) = analysis(State(st), Query(WindowQuery { asset: "ETH".into(), hours: None })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT_URL: &str = "http://127.0.0.1:8080/webhook";

#[tokio::main]
async fn main() -> Result<()> {
    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WEBHOOK_URL").ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    // Binance 14 → wallet, 500 ETH
    let payload = json!({
        "webhookId": "wh_test123",
        "id": "whevt_test456",
        "createdAt": chrono::Utc::now().to_rfc3339(),
        "type": "ADDRESS_ACTIVITY",
        "event": {
            "network": "ETH_MAINNET",
            "activity": [{
                "fromAddress": "0x28C6c06298d514Db089934071355E5743bf21d60",
                "toAddress": "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0",
                "blockNum": "0x12A5C20",
                "hash": format!("0xtest{:x}", chrono::Utc::now().timestamp_millis()),
                "value": 500,
                "asset": "ETH",
                "category": "external",
                "rawContract": {
                    "rawValue": "0x1b1ae4d6e2ef500000",
                    "decimals": 18
                }
            }]
        }
    });

    println!("Sending test transfer to {}", url);
    println!("From: 0x28C6...21d60 (Binance 14)");
    println!("To:   0x742d...0bEb0");
    println!("Amount: 500 ETH\n");

    let resp = Client::new()
        .post(&url)
        .json(&payload)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;

    let status = resp.status();
    let body: Value = resp.json().await.context("response was not JSON")?;

    println!("Status: {}", status);
    println!("Response = {:#}", body);

    if !status.is_success() {
        anyhow::bail!("webhook returned {}", status);
    }
    Ok(())
}

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use crate::error::{BotError, Result};
use crate::market::PriceProvider;
use crate::models::{PriceQuote, PriceSource};

const DEXSCREENER_API_BASE: &str = "https://api.dexscreener.com/latest/dex";
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 1000;

/// DexScreener price client for one token pair
///
/// The fast, generously rate-limited source, so it sits first in the
/// resolver's fallback order.
#[derive(Clone)]
pub struct DexScreenerClient {
    client: Client,
    base_url: String,
    mint_address: String,
}

#[derive(Debug, Deserialize)]
struct PairsResponse {
    pairs: Option<Vec<PairData>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairData {
    chain_id: String,
    price_usd: String,
    #[serde(default)]
    liquidity: Option<LiquidityData>,
}

#[derive(Debug, Deserialize, Default)]
struct LiquidityData {
    #[serde(default)]
    usd: f64,
}

impl DexScreenerClient {
    pub fn new(mint_address: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEXSCREENER_API_BASE.to_string(),
            mint_address: mint_address.into(),
        }
    }

    /// Point the client at a different endpoint (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch the current USD price with retry and exponential backoff
    pub async fn get_price(&self) -> Result<f64> {
        let mut last_error: Option<BotError> = None;

        for attempt in 1..=MAX_RETRIES {
            match self.fetch_price_once().await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                        tracing::warn!(
                            attempt,
                            max = MAX_RETRIES,
                            error = %e,
                            backoff_ms,
                            "dexscreener fetch failed, retrying"
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(BotError::Provider {
            source: PriceSource::DexScreener,
            reason: "all retries exhausted".to_string(),
        }))
    }

    async fn fetch_price_once(&self) -> Result<f64> {
        let url = format!("{}/tokens/{}", self.base_url, self.mint_address);

        let response: PairsResponse = self.client.get(&url).send().await?.json().await?;

        // Prefer the deepest Solana pair; DexScreener lists the same token
        // across many pools
        let pair = response
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.chain_id == "solana")
            .max_by(|a, b| {
                let la = a.liquidity.as_ref().map(|l| l.usd).unwrap_or(0.0);
                let lb = b.liquidity.as_ref().map(|l| l.usd).unwrap_or(0.0);
                la.total_cmp(&lb)
            })
            .ok_or_else(|| BotError::Provider {
                source: PriceSource::DexScreener,
                reason: "no solana pair in response".to_string(),
            })?;

        pair.price_usd.parse::<f64>().map_err(|e| BotError::Provider {
            source: PriceSource::DexScreener,
            reason: format!("unparseable priceUsd: {e}"),
        })
    }
}

#[async_trait]
impl PriceProvider for DexScreenerClient {
    fn source(&self) -> PriceSource {
        PriceSource::DexScreener
    }

    async fn fetch(&self) -> Result<PriceQuote> {
        let price = self.get_price().await?;
        Ok(PriceQuote {
            price,
            timestamp: Utc::now(),
            confidence: 0.9,
            source: PriceSource::DexScreener,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

    #[tokio::test]
    async fn test_get_price_parses_deepest_solana_pair() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{
            "pairs": [
                {"chainId": "solana", "priceUsd": "101.00", "liquidity": {"usd": 5000.0}},
                {"chainId": "solana", "priceUsd": "100.25", "liquidity": {"usd": 9000000.0}},
                {"chainId": "ethereum", "priceUsd": "55.00", "liquidity": {"usd": 99000000.0}}
            ]
        }"#;
        let mock = server
            .mock("GET", format!("/tokens/{SOL_MINT}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = DexScreenerClient::new(SOL_MINT).with_base_url(server.url());
        let price = client.get_price().await.unwrap();

        mock.assert_async().await;
        assert_eq!(price, 100.25);
    }

    #[tokio::test]
    async fn test_get_price_no_solana_pair() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", format!("/tokens/{SOL_MINT}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"pairs": []}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let client = DexScreenerClient::new(SOL_MINT).with_base_url(server.url());
        let result = client.get_price().await;

        assert!(matches!(result, Err(BotError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_provider_quote_carries_source() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", format!("/tokens/{SOL_MINT}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"pairs": [{"chainId": "solana", "priceUsd": "98.5", "liquidity": {"usd": 1.0}}]}"#,
            )
            .create_async()
            .await;

        let client = DexScreenerClient::new(SOL_MINT).with_base_url(server.url());
        let quote = client.fetch().await.unwrap();

        assert_eq!(quote.source, PriceSource::DexScreener);
        assert_eq!(quote.price, 98.5);
        assert!(quote.confidence > 0.0);
    }
}

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;

use crate::error::{BotError, Result};
use crate::market::PriceProvider;
use crate::models::{PriceQuote, PriceSource};

const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";
const RATE_LIMIT_RPM: u32 = 30; // demo tier
const MAX_RETRIES: u32 = 3;

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// CoinGecko client for one coin id, rate-limited for the demo tier
///
/// Serves two roles: a fallback spot-price provider and the historical
/// market-chart source used to bootstrap candles at startup.
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    coin_id: String,
    api_key: Option<String>,
    rate_limiter: Arc<DirectRateLimiter>,
}

/// Response from /coins/{id}/market_chart
#[derive(Debug, Deserialize)]
pub struct MarketChartData {
    pub prices: Vec<[f64; 2]>,        // [timestamp_ms, price]
    #[serde(default)]
    pub total_volumes: Vec<[f64; 2]>, // [timestamp_ms, volume_24h]
}

impl CoinGeckoClient {
    pub fn new(coin_id: impl Into<String>, api_key: Option<String>) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap());
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: COINGECKO_API_BASE.to_string(),
            coin_id: coin_id.into(),
            api_key,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Point the client at a different endpoint (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn key_param(&self) -> String {
        match &self.api_key {
            Some(key) => format!("&x_cg_demo_api_key={key}"),
            None => String::new(),
        }
    }

    /// Rate-limited GET with backoff on 429/5xx and network errors
    async fn make_request(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            status = %status,
                            attempt,
                            backoff_secs,
                            "coingecko request throttled, backing off"
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    return Err(BotError::Provider {
                        source: PriceSource::CoinGecko,
                        reason: format!("{status}: {text}"),
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(error = %e, attempt, backoff_secs, "coingecko network error");
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BotError::Provider {
            source: PriceSource::CoinGecko,
            reason: format!("failed after {MAX_RETRIES} retries"),
        })
    }

    /// Current USD spot price via /simple/price
    pub async fn get_simple_price(&self) -> Result<f64> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd{}",
            self.base_url,
            self.coin_id,
            self.key_param()
        );

        let response = self.make_request(&url).await?;
        let parsed: HashMap<String, HashMap<String, f64>> = response.json().await?;

        parsed
            .get(&self.coin_id)
            .and_then(|prices| prices.get("usd"))
            .copied()
            .ok_or_else(|| BotError::Provider {
                source: PriceSource::CoinGecko,
                reason: format!("no usd price for {}", self.coin_id),
            })
    }

    /// Price and volume time series via /coins/{id}/market_chart
    pub async fn get_market_chart(&self, days: u32) -> Result<MarketChartData> {
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}{}",
            self.base_url,
            self.coin_id,
            days,
            self.key_param()
        );

        let response = self.make_request(&url).await?;
        let data: MarketChartData = response.json().await?;

        tracing::debug!(
            points = data.prices.len(),
            coin = %self.coin_id,
            "fetched market chart"
        );

        Ok(data)
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoClient {
    fn source(&self) -> PriceSource {
        PriceSource::CoinGecko
    }

    async fn fetch(&self) -> Result<PriceQuote> {
        let price = self.get_simple_price().await?;
        Ok(PriceQuote {
            price,
            timestamp: Utc::now(),
            confidence: 0.8,
            source: PriceSource::CoinGecko,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_price() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/simple/price")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"solana": {"usd": 104.37}}"#)
            .create_async()
            .await;

        let client = CoinGeckoClient::new("solana", None).with_base_url(server.url());
        assert_eq!(client.get_simple_price().await.unwrap(), 104.37);
    }

    #[tokio::test]
    async fn test_simple_price_missing_coin() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/simple/price")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{}"#)
            .create_async()
            .await;

        let client = CoinGeckoClient::new("solana", None).with_base_url(server.url());
        let result = client.get_simple_price().await;
        assert!(matches!(result, Err(BotError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_market_chart_parses_series() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/coins/solana/market_chart")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "prices": [[1700000000000, 100.0], [1700000300000, 101.0]],
                    "total_volumes": [[1700000000000, 5000000.0], [1700000300000, 5100000.0]]
                }"#,
            )
            .create_async()
            .await;

        let client = CoinGeckoClient::new("solana", None).with_base_url(server.url());
        let chart = client.get_market_chart(1).await.unwrap();

        assert_eq!(chart.prices.len(), 2);
        assert_eq!(chart.prices[1][1], 101.0);
        assert_eq!(chart.total_volumes.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_quote_carries_source() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/simple/price")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"solana": {"usd": 99.0}}"#)
            .create_async()
            .await;

        let client = CoinGeckoClient::new("solana", None).with_base_url(server.url());
        let quote = client.fetch().await.unwrap();

        assert_eq!(quote.source, PriceSource::CoinGecko);
        assert_eq!(quote.price, 99.0);
    }
}

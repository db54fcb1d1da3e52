use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::error::{BotError, Result};
use crate::market::PriceProvider;
use crate::models::{PriceQuote, PriceSource};

const HERMES_API_BASE: &str = "https://hermes.pyth.network";

// Pyth encodes prices as integer * 10^expo; anything outside this window is
// a malformed or misparsed feed, not a real asset price
const MIN_SANE_EXPO: i32 = -12;
const MAX_SANE_EXPO: i32 = 0;

/// Pyth price-oracle client (Hermes HTTP endpoint)
///
/// Last resort in the resolver's fallback order. Quotes with a malformed
/// exponent are discarded rather than accepted at a garbage magnitude; the
/// resolver additionally clamps accepted oracle prices to a configured band.
#[derive(Clone)]
pub struct OracleClient {
    client: Client,
    base_url: String,
    feed_id: String,
}

#[derive(Debug, Deserialize)]
struct LatestPriceResponse {
    parsed: Vec<ParsedFeed>,
}

#[derive(Debug, Deserialize)]
struct ParsedFeed {
    #[allow(dead_code)]
    id: String,
    price: FeedPrice,
}

#[derive(Debug, Deserialize)]
struct FeedPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

impl OracleClient {
    pub fn new(feed_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: HERMES_API_BASE.to_string(),
            feed_id: feed_id.into(),
        }
    }

    /// Point the client at a different endpoint (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn get_price(&self) -> Result<PriceQuote> {
        let url = format!(
            "{}/v2/updates/price/latest?ids[]={}&parsed=true",
            self.base_url, self.feed_id
        );

        let response: LatestPriceResponse = self.client.get(&url).send().await?.json().await?;

        let feed = response
            .parsed
            .into_iter()
            .next()
            .ok_or_else(|| BotError::OracleQuote("empty parsed feed list".to_string()))?;

        Self::quote_from_feed(feed.price)
    }

    fn quote_from_feed(feed: FeedPrice) -> Result<PriceQuote> {
        if !(MIN_SANE_EXPO..=MAX_SANE_EXPO).contains(&feed.expo) {
            return Err(BotError::OracleQuote(format!(
                "malformed exponent {}",
                feed.expo
            )));
        }

        let raw: i64 = feed
            .price
            .parse()
            .map_err(|e| BotError::OracleQuote(format!("unparseable price: {e}")))?;
        if raw <= 0 {
            return Err(BotError::OracleQuote(format!("non-positive price {raw}")));
        }

        let scale = 10f64.powi(feed.expo);
        let price = raw as f64 * scale;

        // Confidence interval shrinks the quote's weight; a conf of 0 is a
        // fully confident quote
        let conf: i64 = feed.conf.parse().unwrap_or(0);
        let conf_fraction = (conf as f64 * scale / price).clamp(0.0, 1.0);

        let timestamp = Utc
            .timestamp_opt(feed.publish_time, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(PriceQuote {
            price,
            timestamp,
            confidence: 1.0 - conf_fraction,
            source: PriceSource::Oracle,
        })
    }
}

#[async_trait]
impl PriceProvider for OracleClient {
    fn source(&self) -> PriceSource {
        PriceSource::Oracle
    }

    async fn fetch(&self) -> Result<PriceQuote> {
        self.get_price().await
    }
}

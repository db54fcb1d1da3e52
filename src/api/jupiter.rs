use reqwest::Client;
use serde::Deserialize;

use crate::error::{BotError, Result};

// Jupiter Swap API v1
// Docs: https://dev.jup.ag/docs/swap-api/get-quote
const JUPITER_QUOTE_API: &str = "https://lite-api.jup.ag/swap/v1";

/// Client for the Jupiter aggregator quote endpoint
///
/// Quotes back the liquidity probe used by entry evaluation; actual swap
/// submission is an executor concern and lives outside the core.
#[derive(Clone)]
pub struct JupiterClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    in_amount: String,
    out_amount: String,
    price_impact_pct: String,
}

/// A swap quote in raw token units
#[derive(Debug, Clone)]
pub struct Quote {
    /// Output units per input unit (raw, caller handles decimals)
    pub price: f64,
    /// Price impact as a fraction (0.001 = 0.1%)
    pub price_impact: f64,
    pub in_amount: u64,
    pub out_amount: u64,
}

impl JupiterClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: JUPITER_QUOTE_API.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Get a quote for swapping `amount` raw units of `input_mint` into
    /// `output_mint` at the given slippage tolerance (basis points)
    pub async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<Quote> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url, input_mint, output_mint, amount, slippage_bps
        );

        let response: QuoteResponse = self.client.get(&url).send().await?.json().await?;

        let in_amount: u64 = response
            .in_amount
            .parse()
            .map_err(|e| BotError::Other(format!("jupiter inAmount: {e}")))?;
        let out_amount: u64 = response
            .out_amount
            .parse()
            .map_err(|e| BotError::Other(format!("jupiter outAmount: {e}")))?;

        if in_amount == 0 {
            return Err(BotError::Other("jupiter quoted zero input".to_string()));
        }

        let price_impact: f64 = response.price_impact_pct.parse().unwrap_or(0.0);

        Ok(Quote {
            price: out_amount as f64 / in_amount as f64,
            price_impact: price_impact.abs(),
            in_amount,
            out_amount,
        })
    }
}

impl Default for JupiterClient {
    fn default() -> Self {
        Self::new()
    }
}

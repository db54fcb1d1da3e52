use async_trait::async_trait;

use crate::api::JupiterClient;
use crate::error::{BotError, Result};
use crate::strategy::LiquidityInfo;

/// External microstructure query for a candidate trade size
#[async_trait]
pub trait LiquidityProbe: Send + Sync {
    async fn check(&self, price: f64, size_usd: f64) -> Result<LiquidityInfo>;
}

/// Liquidity probe backed by round-trip Jupiter quotes
///
/// Quotes quote->base for the candidate size and base->quote for the
/// resulting amount; the gap between the effective buy and sell prices is
/// the spread, and the worse of the two quoted impacts is the estimate.
pub struct JupiterLiquidity {
    client: JupiterClient,
    base_mint: String,
    quote_mint: String,
    base_decimals: u8,
    quote_decimals: u8,
}

impl JupiterLiquidity {
    pub fn new(
        client: JupiterClient,
        base_mint: impl Into<String>,
        quote_mint: impl Into<String>,
        base_decimals: u8,
        quote_decimals: u8,
    ) -> Self {
        Self {
            client,
            base_mint: base_mint.into(),
            quote_mint: quote_mint.into(),
            base_decimals,
            quote_decimals,
        }
    }
}

#[async_trait]
impl LiquidityProbe for JupiterLiquidity {
    async fn check(&self, _price: f64, size_usd: f64) -> Result<LiquidityInfo> {
        if size_usd <= 0.0 {
            return Err(BotError::Other("non-positive probe size".to_string()));
        }

        let quote_units = (size_usd * 10f64.powi(self.quote_decimals as i32)) as u64;

        // Leg 1: quote -> base for the candidate size
        let buy = self
            .client
            .get_quote(&self.quote_mint, &self.base_mint, quote_units.max(1), 50)
            .await?;
        if buy.out_amount == 0 {
            return Err(BotError::Other("zero-output buy quote".to_string()));
        }

        let base_scale = 10f64.powi(self.base_decimals as i32);
        let quote_scale = 10f64.powi(self.quote_decimals as i32);
        let base_amount = buy.out_amount as f64 / base_scale;
        let buy_price = size_usd / base_amount;

        // Leg 2: the acquired base back into quote
        let sell = self
            .client
            .get_quote(&self.base_mint, &self.quote_mint, buy.out_amount, 50)
            .await?;
        let proceeds = sell.out_amount as f64 / quote_scale;
        let sell_price = proceeds / base_amount;

        let mid = (buy_price + sell_price) / 2.0;
        let spread = if mid > 0.0 {
            ((buy_price - sell_price) / mid).max(0.0)
        } else {
            f64::INFINITY
        };

        let estimated_impact = buy.price_impact.max(sell.price_impact);
        // Rough depth estimate: the notional that would move the pool ~1%
        let depth_usd = if estimated_impact > 1e-9 {
            size_usd * 0.01 / estimated_impact
        } else {
            f64::MAX
        };

        Ok(LiquidityInfo {
            spread,
            depth_usd,
            estimated_impact,
        })
    }
}

/// Constant liquidity conditions, for tests and offline paper trading
#[derive(Debug, Clone, Copy)]
pub struct FixedLiquidity(pub LiquidityInfo);

impl FixedLiquidity {
    pub fn deep() -> Self {
        Self(LiquidityInfo {
            spread: 0.0005,
            depth_usd: 10_000_000.0,
            estimated_impact: 0.0005,
        })
    }
}

#[async_trait]
impl LiquidityProbe for FixedLiquidity {
    async fn check(&self, _price: f64, _size_usd: f64) -> Result<LiquidityInfo> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
    const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    #[tokio::test]
    async fn test_fixed_liquidity_is_constant() {
        let probe = FixedLiquidity::deep();
        let a = probe.check(100.0, 1000.0).await.unwrap();
        let b = probe.check(55.0, 99_999.0).await.unwrap();

        assert_eq!(a.spread, b.spread);
        assert_eq!(a.depth_usd, b.depth_usd);
    }

    #[tokio::test]
    async fn test_jupiter_probe_round_trip_math() {
        let mut server = mockito::Server::new_async().await;
        // Buy leg: $1000 (1e9 units at 6 decimals) -> 9.9 SOL
        // Sell leg: 9.9 SOL -> $980
        server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::Regex(format!(
                "inputMint={USDC_MINT}.*"
            )))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"inAmount": "1000000000", "outAmount": "9900000000", "priceImpactPct": "0.002"}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::Regex(format!("inputMint={SOL_MINT}.*")))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"inAmount": "9900000000", "outAmount": "980000000", "priceImpactPct": "0.003"}"#,
            )
            .create_async()
            .await;

        let client = JupiterClient::new().with_base_url(server.url());
        let probe = JupiterLiquidity::new(client, SOL_MINT, USDC_MINT, 9, 6);

        let info = probe.check(101.0, 1000.0).await.unwrap();

        // buy price = 1000 / 9.9 = 101.01, sell price = 980 / 9.9 = 98.99
        assert!(info.spread > 0.015 && info.spread < 0.025, "{}", info.spread);
        assert!((info.estimated_impact - 0.003).abs() < 1e-9);
        // depth = 1000 * 0.01 / 0.003
        assert!((info.depth_usd - 3333.33).abs() < 1.0);
    }
}

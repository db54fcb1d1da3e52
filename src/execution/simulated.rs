use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::error::Result;
use crate::execution::{Balances, ExecutionResult, Executor};
use crate::market::PriceResolver;

/// Paper-trading executor: fills at the resolver's current price with a fee
/// and optional random slippage jitter
///
/// Shares the resolver with the market-data service, so simulated fills see
/// the same prices the strategy just acted on.
pub struct SimulatedExecutor {
    resolver: Arc<PriceResolver>,
    base: f64,
    quote: f64,
    fee_rate: f64,
    jitter: bool,
}

impl SimulatedExecutor {
    pub fn new(resolver: Arc<PriceResolver>, starting_quote: f64, fee_rate: f64) -> Self {
        Self {
            resolver,
            base: 0.0,
            quote: starting_quote,
            fee_rate,
            jitter: true,
        }
    }

    /// Deterministic fills for tests
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn draw_slippage(&self, max_slippage_bps: u32) -> f64 {
        if !self.jitter {
            return 0.0;
        }
        // Uniform draw up to half the allowed slippage
        let max_fraction = max_slippage_bps as f64 / 10_000.0;
        rand::thread_rng().gen_range(0.0..=max_fraction / 2.0)
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            quote = self.quote,
            fee_rate = self.fee_rate,
            "simulated executor ready"
        );
        Ok(())
    }

    async fn buy(&mut self, amount_quote: f64, max_slippage_bps: u32) -> Result<ExecutionResult> {
        if amount_quote <= 0.0 {
            return Ok(ExecutionResult::failure("non-positive buy amount"));
        }
        if amount_quote > self.quote {
            return Ok(ExecutionResult::failure(format!(
                "insufficient quote balance: need {:.2}, have {:.2}",
                amount_quote, self.quote
            )));
        }

        let mark = self.resolver.get_price(false).await?.price;
        let slippage = self.draw_slippage(max_slippage_bps);
        // Buys fill above the mark
        let fill_price = mark * (1.0 + slippage);
        let fee = amount_quote * self.fee_rate;
        let base_received = (amount_quote - fee) / fill_price;

        self.quote -= amount_quote;
        self.base += base_received;

        tracing::info!(
            fill_price,
            amount = base_received,
            fee,
            slippage,
            "simulated buy filled"
        );

        Ok(ExecutionResult {
            success: true,
            price: fill_price,
            amount: base_received,
            fee,
            slippage,
            tx_id: Some(format!("sim-{}", Uuid::new_v4())),
            timestamp: Utc::now(),
            error: None,
        })
    }

    async fn sell(&mut self, amount_base: f64, max_slippage_bps: u32) -> Result<ExecutionResult> {
        if amount_base <= 0.0 {
            return Ok(ExecutionResult::failure("non-positive sell amount"));
        }
        if amount_base > self.base * (1.0 + 1e-9) {
            return Ok(ExecutionResult::failure(format!(
                "insufficient base balance: need {:.6}, have {:.6}",
                amount_base, self.base
            )));
        }

        let mark = self.resolver.get_price(false).await?.price;
        let slippage = self.draw_slippage(max_slippage_bps);
        // Sells fill below the mark
        let fill_price = mark * (1.0 - slippage);
        let gross = amount_base * fill_price;
        let fee = gross * self.fee_rate;

        self.base -= amount_base.min(self.base);
        self.quote += gross - fee;

        tracing::info!(
            fill_price,
            amount = amount_base,
            fee,
            slippage,
            "simulated sell filled"
        );

        Ok(ExecutionResult {
            success: true,
            price: fill_price,
            amount: amount_base,
            fee,
            slippage,
            tx_id: Some(format!("sim-{}", Uuid::new_v4())),
            timestamp: Utc::now(),
            error: None,
        })
    }

    async fn balance(&self) -> Result<Balances> {
        Ok(Balances {
            base: self.base,
            quote: self.quote,
        })
    }
}

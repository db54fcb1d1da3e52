// Execution boundary: the core drives trades through these contracts and
// never inspects execution internals beyond them
pub mod liquidity;
pub mod simulated;

pub use liquidity::{FixedLiquidity, JupiterLiquidity, LiquidityProbe};
pub use simulated::SimulatedExecutor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Outcome of one buy or sell attempt
///
/// Execution failures are reported here, not as errors: a failed fill leaves
/// position state untouched and the loop moves on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Effective fill price in quote currency
    pub price: f64,
    /// Base-currency amount bought or sold
    pub amount: f64,
    /// Fee paid, quote currency
    pub fee: f64,
    /// Realized slippage as a fraction
    pub slippage: f64,
    pub tx_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            price: 0.0,
            amount: 0.0,
            fee: 0.0,
            slippage: 0.0,
            tx_id: None,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Account balances in the traded pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub base: f64,
    pub quote: f64,
}

impl Balances {
    pub fn equity(&self, price: f64) -> f64 {
        self.quote + self.base * price
    }
}

/// Trade execution abstraction, simulated or live
#[async_trait]
pub trait Executor: Send + Sync {
    async fn initialize(&mut self) -> Result<()>;

    /// Spend `amount_quote` of quote currency buying the base asset
    async fn buy(&mut self, amount_quote: f64, max_slippage_bps: u32) -> Result<ExecutionResult>;

    /// Sell `amount_base` of the base asset into quote currency
    async fn sell(&mut self, amount_base: f64, max_slippage_bps: u32) -> Result<ExecutionResult>;

    async fn balance(&self) -> Result<Balances>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balances_equity() {
        let balances = Balances {
            base: 2.0,
            quote: 500.0,
        };
        assert_eq!(balances.equity(100.0), 700.0);
    }

    #[test]
    fn test_failure_result() {
        let result = ExecutionResult::failure("insufficient balance");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("insufficient balance"));
        assert!(result.tx_id.is_none());
    }
}

use serde::Deserialize;

use crate::indicators::{calculate_rsi, donchian_high};
use crate::models::Candle;

/// Market microstructure snapshot for a candidate trade size
///
/// Produced by an external liquidity probe (aggregator quote); the evaluator
/// only checks it against configured ceilings and floors.
#[derive(Debug, Clone, Copy)]
pub struct LiquidityInfo {
    /// Round-trip bid/ask spread as a fraction of mid
    pub spread: f64,
    /// Notional depth available near the top of book, USD
    pub depth_usd: f64,
    /// Estimated price impact of the candidate size, as a fraction
    pub estimated_impact: f64,
}

#[derive(Debug, Clone)]
pub struct EntrySignal {
    pub should_enter: bool,
    pub confidence: f64,
    pub entry_price: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    pub donchian_period: usize,
    pub rsi_period: usize,
    pub rsi_low: f64,
    pub rsi_high: f64,
    pub max_spread: f64,
    pub min_depth_usd: f64,
    pub max_impact: f64,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            donchian_period: 20,
            rsi_period: 14,
            rsi_low: 50.0,
            rsi_high: 75.0,
            max_spread: 0.005,
            min_depth_usd: 50_000.0,
            max_impact: 0.01,
        }
    }
}

// Multiplier applied to confidence for every failed check
const FAIL_DISCOUNT: f64 = 0.2;

/// Evaluates breakout, momentum and liquidity conditions on the fast
/// timeframe
///
/// Every check must pass for `should_enter`; each check also scales the
/// confidence multiplicatively, so a near-miss entry reads very differently
/// from a clean triple confirmation in the audit log.
pub struct EntryEvaluator {
    config: EntryConfig,
}

impl EntryEvaluator {
    pub fn new(config: EntryConfig) -> Self {
        Self { config }
    }

    /// Candles required before breakout and momentum are defined
    pub fn min_candles(&self) -> usize {
        (self.config.donchian_period + 1).max(self.config.rsi_period + 2)
    }

    pub fn evaluate(&self, candles: &[Candle], liquidity: &LiquidityInfo) -> EntrySignal {
        let mut reasons = Vec::new();

        let Some(last) = candles.last() else {
            return EntrySignal {
                should_enter: false,
                confidence: 0.0,
                entry_price: 0.0,
                reasons: vec!["no candles".to_string()],
            };
        };
        let entry_price = last.close;

        if candles.len() < self.min_candles() {
            return EntrySignal {
                should_enter: false,
                confidence: 0.0,
                entry_price,
                reasons: vec![format!(
                    "insufficient history: {} candles, need {}",
                    candles.len(),
                    self.min_candles()
                )],
            };
        }

        let mut should_enter = true;
        let mut confidence: f64 = 1.0;

        // 1. Breakout: close above the Donchian high of the prior N candles
        let prior = &candles[..candles.len() - 1];
        match donchian_high(prior, self.config.donchian_period) {
            Some(channel_high) if entry_price > channel_high => {
                let margin = (entry_price - channel_high) / channel_high;
                let factor = 0.7 + 0.3 * (margin / 0.005).clamp(0.0, 1.0);
                confidence *= factor;
                reasons.push(format!(
                    "breakout: close {entry_price:.4} above {}-period high {channel_high:.4}",
                    self.config.donchian_period
                ));
            }
            Some(channel_high) => {
                should_enter = false;
                confidence *= FAIL_DISCOUNT;
                reasons.push(format!(
                    "no breakout: close {entry_price:.4} within channel (high {channel_high:.4})"
                ));
            }
            None => {
                should_enter = false;
                confidence *= FAIL_DISCOUNT;
                reasons.push("no breakout: channel undefined".to_string());
            }
        }

        // 2. Momentum: RSI inside the band and rising against its prior value
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi_now = calculate_rsi(&closes, self.config.rsi_period);
        let rsi_prev = calculate_rsi(&closes[..closes.len() - 1], self.config.rsi_period);
        match (rsi_now, rsi_prev) {
            (Some(now), Some(prev)) => {
                let in_band = now >= self.config.rsi_low && now <= self.config.rsi_high;
                let rising = now > prev;
                if in_band && rising {
                    let band_pos = (now - self.config.rsi_low)
                        / (self.config.rsi_high - self.config.rsi_low);
                    confidence *= 0.7 + 0.3 * band_pos.clamp(0.0, 1.0);
                    reasons.push(format!(
                        "momentum: RSI {now:.1} in [{:.0}, {:.0}] and rising from {prev:.1}",
                        self.config.rsi_low, self.config.rsi_high
                    ));
                } else {
                    should_enter = false;
                    confidence *= FAIL_DISCOUNT;
                    reasons.push(format!(
                        "momentum rejected: RSI {now:.1} (prev {prev:.1}, band [{:.0}, {:.0}])",
                        self.config.rsi_low, self.config.rsi_high
                    ));
                }
            }
            _ => {
                should_enter = false;
                confidence *= FAIL_DISCOUNT;
                reasons.push("momentum rejected: RSI undefined".to_string());
            }
        }

        // 3. Liquidity ceilings and floors for the candidate size
        let liq_ok = liquidity.spread <= self.config.max_spread
            && liquidity.depth_usd >= self.config.min_depth_usd
            && liquidity.estimated_impact <= self.config.max_impact;
        if liq_ok {
            reasons.push(format!(
                "liquidity ok: spread {:.4}, depth ${:.0}, impact {:.4}",
                liquidity.spread, liquidity.depth_usd, liquidity.estimated_impact
            ));
        } else {
            should_enter = false;
            confidence *= FAIL_DISCOUNT;
            reasons.push(format!(
                "liquidity rejected: spread {:.4} (max {:.4}), depth ${:.0} (min ${:.0}), impact {:.4} (max {:.4})",
                liquidity.spread,
                self.config.max_spread,
                liquidity.depth_usd,
                self.config.min_depth_usd,
                liquidity.estimated_impact,
                self.config.max_impact
            ));
        }

        EntrySignal {
            should_enter,
            confidence: confidence.max(0.0),
            entry_price,
            reasons,
        }
    }
}

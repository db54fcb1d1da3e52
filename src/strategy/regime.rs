use serde::{Deserialize, Serialize};

use crate::indicators::{calculate_adx, calculate_ema};
use crate::models::Candle;

/// Macro trend classification gating whether entries are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Regime::Bull => "BULL",
            Regime::Bear => "BEAR",
            Regime::Sideways => "SIDEWAYS",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RegimeAnalysis {
    pub regime: Regime,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegimeConfig {
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub adx_period: usize,
    pub adx_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            ema_fast_period: 20,
            ema_slow_period: 50,
            adx_period: 14,
            adx_threshold: 22.0,
        }
    }
}

// Normalization caps for confidence blending: an EMA gap of 2% or an ADX
// surplus equal to the threshold both count as maximal evidence
const EMA_GAP_FULL_SCALE: f64 = 0.02;
const BEAR_DISTANCE_FULL_SCALE: f64 = 0.03;
// Confidence reported for the mixed case (trending but not aligned)
const MIXED_CONFIDENCE: f64 = 0.25;

/// Classifies the macro trend from slow-timeframe candles
///
/// Fails soft: with insufficient history it reports Sideways at zero
/// confidence instead of erroring, and the control loop simply skips.
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Candles required before the classifier stops soft-failing
    pub fn min_candles(&self) -> usize {
        self.config
            .ema_slow_period
            .max(self.config.adx_period + 1)
            + 1
    }

    /// Classify the regime from slow candles, preferring the live price over
    /// the last close when one is supplied
    pub fn analyze(&self, candles: &[Candle], live_price: Option<f64>) -> RegimeAnalysis {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let fast_ema = calculate_ema(&closes, self.config.ema_fast_period);
        let slow_ema = calculate_ema(&closes, self.config.ema_slow_period);
        let adx = calculate_adx(candles, self.config.adx_period).map(|(adx, _, _)| adx);

        let (Some(fast), Some(slow), Some(strength)) = (fast_ema, slow_ema, adx) else {
            return RegimeAnalysis {
                regime: Regime::Sideways,
                confidence: 0.0,
                reasons: vec![format!(
                    "insufficient history: {} candles, need {}",
                    candles.len(),
                    self.min_candles()
                )],
            };
        };

        let price = live_price
            .or_else(|| closes.last().copied())
            .unwrap_or(fast);
        let threshold = self.config.adx_threshold;

        if price > fast && fast > slow && strength > threshold {
            let gap_norm = (((fast - slow) / slow) / EMA_GAP_FULL_SCALE).clamp(0.0, 1.0);
            let strength_norm = ((strength - threshold) / threshold).clamp(0.0, 1.0);
            return RegimeAnalysis {
                regime: Regime::Bull,
                confidence: (gap_norm + strength_norm) / 2.0,
                reasons: vec![
                    format!("price {price:.4} > fast EMA {fast:.4} > slow EMA {slow:.4}"),
                    format!("trend strength {strength:.1} > {threshold:.1}"),
                ],
            };
        }

        if price < fast {
            let below_norm = (((fast - price) / fast) / BEAR_DISTANCE_FULL_SCALE).clamp(0.0, 1.0);
            return RegimeAnalysis {
                regime: Regime::Bear,
                confidence: below_norm,
                reasons: vec![format!("price {price:.4} below fast EMA {fast:.4}")],
            };
        }

        if strength < threshold {
            return RegimeAnalysis {
                regime: Regime::Sideways,
                confidence: (1.0 - strength / threshold).clamp(0.0, 1.0),
                reasons: vec![format!(
                    "trend strength {strength:.1} below threshold {threshold:.1}"
                )],
            };
        }

        RegimeAnalysis {
            regime: Regime::Sideways,
            confidence: MIXED_CONFIDENCE,
            reasons: vec![format!(
                "mixed: price above fast EMA but EMAs not aligned (fast {fast:.4}, slow {slow:.4})"
            )],
        }
    }

    /// New entries are permitted only in a bull regime
    pub fn can_trade(&self, regime: Regime) -> bool {
        regime == Regime::Bull
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::hours(i as i64),
                open: close * 0.995,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    fn classifier() -> RegimeClassifier {
        RegimeClassifier::new(RegimeConfig {
            ema_fast_period: 5,
            ema_slow_period: 10,
            adx_period: 5,
            adx_threshold: 22.0,
        })
    }

    #[test]
    fn test_insufficient_history_soft_fails() {
        let analysis = classifier().analyze(&candles_from_closes(&[100.0, 101.0]), None);

        assert_eq!(analysis.regime, Regime::Sideways);
        assert_eq!(analysis.confidence, 0.0);
        assert!(analysis.reasons[0].contains("insufficient history"));
    }

    #[test]
    fn test_uptrend_classified_bull() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let analysis = classifier().analyze(&candles_from_closes(&closes), None);

        assert_eq!(analysis.regime, Regime::Bull);
        assert!(analysis.confidence > 0.0);
        assert!(classifier().can_trade(analysis.regime));
    }

    #[test]
    fn test_downtrend_classified_bear() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 * 0.99f64.powi(i)).collect();
        let analysis = classifier().analyze(&candles_from_closes(&closes), None);

        assert_eq!(analysis.regime, Regime::Bear);
        assert!(analysis.confidence > 0.0);
        assert!(!classifier().can_trade(analysis.regime));
    }

    #[test]
    fn test_live_price_overrides_last_close() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let candles = candles_from_closes(&closes);

        // Same candles, but the live price has already collapsed below the EMAs
        let analysis = classifier().analyze(&candles, Some(50.0));
        assert_eq!(analysis.regime, Regime::Bear);
    }

    #[test]
    fn test_deterministic_given_identical_input() {
        let closes: Vec<f64> = (0..30)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0)
            .collect();
        let candles = candles_from_closes(&closes);
        let c = classifier();

        let a = c.analyze(&candles, Some(101.0));
        let b = c.analyze(&candles, Some(101.0));

        assert_eq!(a.regime, b.regime);
        assert!((a.confidence - b.confidence).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_bounded() {
        // Extreme trend must not push confidence past 1.0
        let closes: Vec<f64> = (0..30).map(|i| 100.0 * 1.2f64.powi(i)).collect();
        let analysis = classifier().analyze(&candles_from_closes(&closes), None);

        assert!(analysis.confidence <= 1.0);
        assert!(analysis.confidence >= 0.0);
    }

    #[test]
    fn test_flat_market_classified_sideways() {
        let closes = vec![100.0; 30];
        let analysis = classifier().analyze(&candles_from_closes(&closes), None);

        assert_eq!(analysis.regime, Regime::Sideways);
        // Zero directional movement maximizes low-trend-strength confidence
        assert!(analysis.confidence > 0.9);
    }

    #[test]
    fn test_only_bull_is_tradable() {
        let c = classifier();
        assert!(c.can_trade(Regime::Bull));
        assert!(!c.can_trade(Regime::Bear));
        assert!(!c.can_trade(Regime::Sideways));
    }
}

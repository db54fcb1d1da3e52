use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::calculate_ema;
use crate::models::{Candle, Position};

/// Exit kinds, in the priority order they are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitType {
    Stop,
    PartialTp,
    Trailing,
    Time,
}

impl std::fmt::Display for ExitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitType::Stop => "stop",
            ExitType::PartialTp => "partial_tp",
            ExitType::Trailing => "trailing",
            ExitType::Time => "time",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub should_exit: bool,
    pub exit_type: Option<ExitType>,
    /// Fraction of the position to close, in (0, 1]
    pub percentage: f64,
    pub exit_price: f64,
    /// Stop adjustment accompanying a partial take-profit
    pub new_stop: Option<f64>,
    pub r_multiple: f64,
}

impl ExitSignal {
    fn hold(price: f64, r_multiple: f64) -> Self {
        Self {
            should_exit: false,
            exit_type: None,
            percentage: 0.0,
            exit_price: price,
            new_stop: None,
            r_multiple,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExitConfig {
    /// Stop distance in ATR multiples, used at entry time by the control loop
    pub atr_multiplier: f64,
    pub atr_period: usize,
    pub partial_tp_r_multiple: f64,
    pub partial_tp_percent: f64,
    pub trailing_ema_period: usize,
    pub time_exit_hours: i64,
    pub time_exit_min_r: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            atr_multiplier: 2.0,
            atr_period: 14,
            partial_tp_r_multiple: 1.5,
            partial_tp_percent: 0.5,
            trailing_ema_period: 9,
            time_exit_hours: 48,
            time_exit_min_r: 0.5,
        }
    }
}

/// Exit lifecycle of the single open position, as a pure decision function
///
/// All state is carried in the `Position` value; the evaluator holds only
/// configuration. First matching rule wins.
pub struct ExitEvaluator {
    config: ExitConfig,
}

impl ExitEvaluator {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    pub fn check_exit(
        &self,
        position: &Position,
        fast_candles: &[Candle],
        current_price: f64,
        now: DateTime<Utc>,
    ) -> ExitSignal {
        let r_multiple = position.r_multiple(current_price);

        // 1. Hard stop
        if current_price <= position.stop_price {
            return ExitSignal {
                should_exit: true,
                exit_type: Some(ExitType::Stop),
                percentage: 1.0,
                exit_price: current_price,
                new_stop: None,
                r_multiple,
            };
        }

        // 2. Partial take-profit with breakeven stop move
        if !position.partial_taken && r_multiple >= self.config.partial_tp_r_multiple {
            return ExitSignal {
                should_exit: true,
                exit_type: Some(ExitType::PartialTp),
                percentage: self.config.partial_tp_percent.clamp(0.0, 1.0),
                exit_price: current_price,
                new_stop: Some(position.entry_price),
                r_multiple,
            };
        }

        // 3. Trailing exit once the runner phase is active
        if position.partial_taken || position.trailing_stop_active {
            let closes: Vec<f64> = fast_candles.iter().map(|c| c.close).collect();
            if let Some(trail_ema) = calculate_ema(&closes, self.config.trailing_ema_period) {
                if current_price < trail_ema {
                    return ExitSignal {
                        should_exit: true,
                        exit_type: Some(ExitType::Trailing),
                        percentage: 1.0,
                        exit_price: current_price,
                        new_stop: None,
                        r_multiple,
                    };
                }
            }
        }

        // 4. Time exit for positions going nowhere
        let held_hours = (now - position.entry_time).num_hours();
        if held_hours >= self.config.time_exit_hours && r_multiple < self.config.time_exit_min_r {
            return ExitSignal {
                should_exit: true,
                exit_type: Some(ExitType::Time),
                percentage: 1.0,
                exit_price: current_price,
                new_stop: None,
                r_multiple,
            };
        }

        ExitSignal::hold(current_price, r_multiple)
    }

    /// Fold an exit signal back into the position value
    ///
    /// A partial take-profit returns the shrunken position with the stop at
    /// breakeven and the runner flags set; terminal exits return None and the
    /// caller discards the position.
    pub fn apply(position: Position, signal: &ExitSignal) -> Option<Position> {
        if !signal.should_exit {
            return Some(position);
        }

        match signal.exit_type {
            Some(ExitType::PartialTp) => {
                let mut updated = position;
                updated.partial_taken = true;
                updated.trailing_stop_active = true;
                if let Some(stop) = signal.new_stop {
                    updated.stop_price = stop;
                }
                updated.amount *= 1.0 - signal.percentage;
                Some(updated)
            }
            _ => None,
        }
    }
}

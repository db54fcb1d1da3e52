use crate::error::{BotError, Result};

/// A sized trade, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct SizePlan {
    pub size_usd: f64,
    pub size_asset: f64,
    pub potential_loss: f64,
    pub percent_of_equity: f64,
}

// Realized loss may exceed the risk budget by this factor before validation
// rejects the plan (slippage and rounding eat into the budget)
const RISK_BUDGET_TOLERANCE: f64 = 1.10;

/// Converts equity, entry and stop into a risk-bounded trade size
pub struct PositionSizer {
    /// Absolute floor below which trades are not worth their fees
    pub min_position_usd: f64,
}

impl PositionSizer {
    pub fn new(min_position_usd: f64) -> Self {
        Self { min_position_usd }
    }

    /// Risk-based sizing: the asset amount that loses `equity * risk_percent`
    /// if the stop is hit, capped at `equity * max_position_percent` notional
    pub fn calculate(
        &self,
        equity: f64,
        entry_price: f64,
        stop_price: f64,
        risk_percent: f64,
        max_position_percent: f64,
    ) -> Result<SizePlan> {
        let stop_distance = (entry_price - stop_price).abs();
        if stop_distance <= f64::EPSILON {
            return Err(BotError::InvalidStop { entry: entry_price });
        }
        if equity <= 0.0 || entry_price <= 0.0 {
            return Err(BotError::InvalidTradeSize(format!(
                "non-positive equity {equity} or entry {entry_price}"
            )));
        }

        let risk_amount = equity * risk_percent;
        let raw_size_asset = risk_amount / stop_distance;
        let raw_size_usd = raw_size_asset * entry_price;

        let cap_usd = equity * max_position_percent;
        let size_usd = raw_size_usd.min(cap_usd);
        let size_asset = size_usd / entry_price;

        Ok(SizePlan {
            size_usd,
            size_asset,
            potential_loss: size_asset * stop_distance,
            percent_of_equity: size_usd / equity,
        })
    }

    /// Reject plans below the floor, above the cap, or whose realized
    /// potential loss blows the per-trade risk budget
    pub fn validate(
        &self,
        plan: &SizePlan,
        equity: f64,
        risk_percent: f64,
        max_position_percent: f64,
    ) -> Result<()> {
        if plan.size_usd < self.min_position_usd {
            return Err(BotError::InvalidTradeSize(format!(
                "${:.2} below minimum ${:.2}",
                plan.size_usd, self.min_position_usd
            )));
        }

        let cap_usd = equity * max_position_percent;
        if plan.size_usd > cap_usd * (1.0 + 1e-9) {
            return Err(BotError::InvalidTradeSize(format!(
                "${:.2} exceeds max position ${:.2}",
                plan.size_usd, cap_usd
            )));
        }

        let risk_budget = equity * risk_percent;
        if plan.potential_loss > risk_budget * RISK_BUDGET_TOLERANCE {
            return Err(BotError::InvalidTradeSize(format!(
                "potential loss ${:.2} exceeds risk budget ${:.2} (+10%)",
                plan.potential_loss, risk_budget
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sizer() -> PositionSizer {
        PositionSizer::new(10.0)
    }

    #[test]
    fn test_uncapped_sizing() {
        // equity 10000, entry 105, stop 102, 1% risk, 40% cap:
        // risk amount 100, stop distance 3, raw size 33.33 units = $3500,
        // cap $4000 does not bind
        let plan = sizer()
            .calculate(10_000.0, 105.0, 102.0, 0.01, 0.40)
            .unwrap();

        assert_relative_eq!(plan.size_usd, 3500.0);
        assert_relative_eq!(plan.size_asset, 100.0 / 3.0);
        assert_relative_eq!(plan.potential_loss, 100.0);
        assert_relative_eq!(plan.percent_of_equity, 0.35);

        sizer().validate(&plan, 10_000.0, 0.01, 0.40).unwrap();
    }

    #[test]
    fn test_cap_binds_with_tight_risk() {
        // Wide risk budget against a tight stop: cap at 10% of equity binds
        let plan = sizer()
            .calculate(10_000.0, 100.0, 99.0, 0.02, 0.10)
            .unwrap();

        assert_relative_eq!(plan.size_usd, 1000.0);
        assert_relative_eq!(plan.size_asset, 10.0);
        // Potential loss shrinks with the cap: 10 units * $1 stop distance
        assert_relative_eq!(plan.potential_loss, 10.0);

        sizer().validate(&plan, 10_000.0, 0.02, 0.10).unwrap();
    }

    #[test]
    fn test_zero_stop_distance_rejected() {
        let result = sizer().calculate(10_000.0, 105.0, 105.0, 0.01, 0.40);
        assert!(matches!(result, Err(BotError::InvalidStop { .. })));
    }

    #[test]
    fn test_validate_rejects_below_floor() {
        let plan = sizer().calculate(100.0, 105.0, 102.0, 0.001, 0.40).unwrap();
        assert!(plan.size_usd < 10.0);

        let result = sizer().validate(&plan, 100.0, 0.001, 0.40);
        assert!(matches!(result, Err(BotError::InvalidTradeSize(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_plan() {
        let plan = SizePlan {
            size_usd: 5000.0,
            size_asset: 50.0,
            potential_loss: 100.0,
            percent_of_equity: 0.5,
        };

        let result = sizer().validate(&plan, 10_000.0, 0.01, 0.40);
        assert!(matches!(result, Err(BotError::InvalidTradeSize(_))));
    }

    #[test]
    fn test_validate_rejects_risk_budget_blowout() {
        let plan = SizePlan {
            size_usd: 3500.0,
            size_asset: 100.0 / 3.0,
            potential_loss: 115.0, // budget is 100, tolerance tops out at 110
            percent_of_equity: 0.35,
        };

        let result = sizer().validate(&plan, 10_000.0, 0.01, 0.40);
        assert!(matches!(result, Err(BotError::InvalidTradeSize(_))));
    }

    #[test]
    fn test_validate_tolerates_ten_percent_overshoot() {
        let plan = SizePlan {
            size_usd: 3500.0,
            size_asset: 100.0 / 3.0,
            potential_loss: 109.0,
            percent_of_equity: 0.35,
        };

        sizer().validate(&plan, 10_000.0, 0.01, 0.40).unwrap();
    }

    #[test]
    fn test_stop_above_entry_uses_absolute_distance() {
        // A stop above entry still yields a positive size via |distance|
        let plan = sizer()
            .calculate(10_000.0, 100.0, 103.0, 0.01, 0.40)
            .unwrap();
        assert!(plan.size_usd > 0.0);
        assert_relative_eq!(plan.potential_loss, 100.0);
    }
}

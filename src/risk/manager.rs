use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::risk::KillSwitch;

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub max_drawdown_percent: f64,
    /// Window after startup during which the drawdown gate is suspended
    pub grace_period_secs: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_percent: 0.20,
            grace_period_secs: 60,
        }
    }
}

/// Answer to "may we trade this cycle?"
#[derive(Debug, Clone)]
pub struct RiskStatus {
    pub can_trade: bool,
    pub reason: Option<String>,
    pub current_drawdown: f64,
    pub high_water_mark: f64,
    pub current_equity: f64,
}

// Fraction of the max drawdown at which a soft warning is emitted
const WARN_FRACTION: f64 = 0.8;

/// Tracks equity against its high-water-mark and owns the kill switch
///
/// The HWM only ever rises. Drawdown is measured from it, and the startup
/// grace window suppresses spurious halts while the mark is still settling.
pub struct RiskManager {
    current_equity: f64,
    high_water_mark: f64,
    started_at: DateTime<Utc>,
    config: RiskConfig,
    kill_switch: KillSwitch,
    warned: bool,
}

impl RiskManager {
    pub fn new(initial_equity: f64, config: RiskConfig, kill_switch: KillSwitch) -> Self {
        Self {
            current_equity: initial_equity,
            high_water_mark: initial_equity,
            started_at: Utc::now(),
            config,
            kill_switch,
            warned: false,
        }
    }

    /// Record the latest equity, raising the high-water-mark if exceeded
    pub fn update_equity(&mut self, equity: f64) {
        self.current_equity = equity;
        if equity > self.high_water_mark {
            self.high_water_mark = equity;
        }
    }

    pub fn current_equity(&self) -> f64 {
        self.current_equity
    }

    pub fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    pub fn drawdown(&self) -> f64 {
        if self.high_water_mark <= 0.0 {
            return 0.0;
        }
        ((self.high_water_mark - self.current_equity) / self.high_water_mark).max(0.0)
    }

    pub fn drawdown_breached(&self) -> bool {
        self.drawdown() >= self.config.max_drawdown_percent
    }

    pub fn kill_switch(&mut self) -> &mut KillSwitch {
        &mut self.kill_switch
    }

    fn in_grace_period(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at < Duration::seconds(self.config.grace_period_secs)
    }

    /// Gate evaluated once per cycle, after the same cycle's equity update
    pub fn can_trade(&mut self) -> RiskStatus {
        self.can_trade_at(Utc::now())
    }

    pub fn can_trade_at(&mut self, now: DateTime<Utc>) -> RiskStatus {
        let drawdown = self.drawdown();
        let status = |can_trade: bool, reason: Option<String>, s: &Self| RiskStatus {
            can_trade,
            reason,
            current_drawdown: drawdown,
            high_water_mark: s.high_water_mark,
            current_equity: s.current_equity,
        };

        // While the high-water-mark settles right after startup, never halt.
        // Once the window closes the gate applies to the accumulated mark on
        // the very next cycle; grace-period trades are not re-checked
        // retroactively.
        if self.in_grace_period(now) {
            return status(true, None, self);
        }

        if self.kill_switch.is_triggered() {
            let reason = self
                .kill_switch
                .last_event()
                .map(|e| format!("kill switch latched ({})", e.kind))
                .unwrap_or_else(|| "kill switch latched".to_string());
            return status(false, Some(reason), self);
        }

        if drawdown >= self.config.max_drawdown_percent {
            return status(
                false,
                Some(format!(
                    "drawdown {:.2}% >= max {:.2}%",
                    drawdown * 100.0,
                    self.config.max_drawdown_percent * 100.0
                )),
                self,
            );
        }

        let warn_level = self.config.max_drawdown_percent * WARN_FRACTION;
        if drawdown >= warn_level {
            if !self.warned {
                self.warned = true;
                tracing::warn!(
                    drawdown_pct = drawdown * 100.0,
                    max_pct = self.config.max_drawdown_percent * 100.0,
                    "drawdown approaching maximum"
                );
            }
        } else {
            self.warned = false;
        }

        status(true, None, self)
    }

    #[cfg(test)]
    pub(crate) fn set_started_at(&mut self, started_at: DateTime<Utc>) {
        self.started_at = started_at;
    }
}

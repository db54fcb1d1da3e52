use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::market::ResolverConfig;
use crate::models::Timeframe;
use crate::risk::RiskConfig;
use crate::strategy::{EntryConfig, ExitConfig, RegimeConfig};

const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
// Pyth SOL/USD price feed
const SOL_USD_FEED: &str = "ef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d";

/// Full configuration surface, layered from `swingbot.toml` (optional) and
/// `SWINGBOT__*` environment overrides
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pair: PairSettings,
    pub engine: EngineSettings,
    pub price: PriceSettings,
    pub market: MarketSettings,
    pub regime: RegimeSettings,
    pub entry: EntrySettings,
    pub liquidity: LiquiditySettings,
    pub exit: ExitSettings,
    pub risk: RiskSettings,
    pub persistence: PersistenceSettings,
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or("swingbot")).required(false))
            .add_source(
                Environment::with_prefix("SWINGBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PairSettings {
    pub base_symbol: String,
    pub base_mint: String,
    pub base_decimals: u8,
    pub quote_symbol: String,
    pub quote_mint: String,
    pub quote_decimals: u8,
    pub coingecko_id: String,
    pub oracle_feed_id: String,
}

impl Default for PairSettings {
    fn default() -> Self {
        Self {
            base_symbol: "SOL".to_string(),
            base_mint: SOL_MINT.to_string(),
            base_decimals: 9,
            quote_symbol: "USDC".to_string(),
            quote_mint: USDC_MINT.to_string(),
            quote_decimals: 6,
            coingecko_id: "solana".to_string(),
            oracle_feed_id: SOL_USD_FEED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub cycle_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Cross-validate the price feed every N cycles
    pub health_check_every_cycles: u64,
    /// Consecutive failed cycles before the kill switch latches
    pub max_consecutive_errors: u32,
    pub max_slippage_bps: u32,
    pub bootstrap_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 30,
            heartbeat_interval_secs: 60,
            health_check_every_cycles: 20,
            max_consecutive_errors: 5,
            max_slippage_bps: 50,
            bootstrap_days: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub cache_ttl_secs: u64,
    pub provider_timeout_secs: u64,
    pub min_price_usd: f64,
    pub max_price_usd: f64,
    pub oracle_min_usd: f64,
    pub oracle_max_usd: f64,
    pub divergence_tolerance: f64,
    pub coingecko_api_key: Option<String>,
}

impl Default for PriceSettings {
    fn default() -> Self {
        let d = ResolverConfig::default();
        Self {
            cache_ttl_secs: d.cache_ttl_secs,
            provider_timeout_secs: d.provider_timeout_secs,
            min_price_usd: d.min_price_usd,
            max_price_usd: d.max_price_usd,
            oracle_min_usd: d.oracle_min_usd,
            oracle_max_usd: d.oracle_max_usd,
            divergence_tolerance: d.divergence_tolerance,
            coingecko_api_key: None,
        }
    }
}

impl PriceSettings {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            cache_ttl_secs: self.cache_ttl_secs,
            provider_timeout_secs: self.provider_timeout_secs,
            min_price_usd: self.min_price_usd,
            max_price_usd: self.max_price_usd,
            oracle_min_usd: self.oracle_min_usd,
            oracle_max_usd: self.oracle_max_usd,
            divergence_tolerance: self.divergence_tolerance,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub candle_history_cap: usize,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            candle_history_cap: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegimeSettings {
    pub timeframe: Timeframe,
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub adx_period: usize,
    pub adx_threshold: f64,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        let d = RegimeConfig::default();
        Self {
            timeframe: Timeframe::H1,
            ema_fast_period: d.ema_fast_period,
            ema_slow_period: d.ema_slow_period,
            adx_period: d.adx_period,
            adx_threshold: d.adx_threshold,
        }
    }
}

impl RegimeSettings {
    pub fn config(&self) -> RegimeConfig {
        RegimeConfig {
            ema_fast_period: self.ema_fast_period,
            ema_slow_period: self.ema_slow_period,
            adx_period: self.adx_period,
            adx_threshold: self.adx_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntrySettings {
    pub timeframe: Timeframe,
    pub donchian_period: usize,
    pub rsi_period: usize,
    pub rsi_low: f64,
    pub rsi_high: f64,
}

impl Default for EntrySettings {
    fn default() -> Self {
        let d = EntryConfig::default();
        Self {
            timeframe: Timeframe::M5,
            donchian_period: d.donchian_period,
            rsi_period: d.rsi_period,
            rsi_low: d.rsi_low,
            rsi_high: d.rsi_high,
        }
    }
}

impl EntrySettings {
    pub fn config(&self, liquidity: &LiquiditySettings) -> EntryConfig {
        EntryConfig {
            donchian_period: self.donchian_period,
            rsi_period: self.rsi_period,
            rsi_low: self.rsi_low,
            rsi_high: self.rsi_high,
            max_spread: liquidity.max_spread,
            min_depth_usd: liquidity.min_depth_usd,
            max_impact: liquidity.max_impact,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiquiditySettings {
    pub max_spread: f64,
    pub min_depth_usd: f64,
    pub max_impact: f64,
}

impl Default for LiquiditySettings {
    fn default() -> Self {
        let d = EntryConfig::default();
        Self {
            max_spread: d.max_spread,
            min_depth_usd: d.min_depth_usd,
            max_impact: d.max_impact,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExitSettings {
    pub atr_multiplier: f64,
    pub atr_period: usize,
    pub partial_tp_r_multiple: f64,
    pub partial_tp_percent: f64,
    pub trailing_ema_period: usize,
    pub time_exit_hours: i64,
    pub time_exit_min_r: f64,
}

impl Default for ExitSettings {
    fn default() -> Self {
        let d = ExitConfig::default();
        Self {
            atr_multiplier: d.atr_multiplier,
            atr_period: d.atr_period,
            partial_tp_r_multiple: d.partial_tp_r_multiple,
            partial_tp_percent: d.partial_tp_percent,
            trailing_ema_period: d.trailing_ema_period,
            time_exit_hours: d.time_exit_hours,
            time_exit_min_r: d.time_exit_min_r,
        }
    }
}

impl ExitSettings {
    pub fn config(&self) -> ExitConfig {
        ExitConfig {
            atr_multiplier: self.atr_multiplier,
            atr_period: self.atr_period,
            partial_tp_r_multiple: self.partial_tp_r_multiple,
            partial_tp_percent: self.partial_tp_percent,
            trailing_ema_period: self.trailing_ema_period,
            time_exit_hours: self.time_exit_hours,
            time_exit_min_r: self.time_exit_min_r,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub risk_per_trade: f64,
    pub max_position_percent: f64,
    pub max_drawdown_percent: f64,
    pub grace_period_secs: i64,
    pub kill_switch_enabled: bool,
    pub kill_switch_path: String,
    pub min_position_usd: f64,
    /// Starting equity when the executor's real balance is unavailable
    pub default_equity: f64,
    /// Simulated executor fee rate
    pub fee_rate: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
            max_position_percent: 0.40,
            max_drawdown_percent: 0.20,
            grace_period_secs: 60,
            kill_switch_enabled: true,
            kill_switch_path: "swingbot.kill".to_string(),
            min_position_usd: 10.0,
            default_equity: 10_000.0,
            fee_rate: 0.001,
        }
    }
}

impl RiskSettings {
    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            max_drawdown_percent: self.max_drawdown_percent,
            grace_period_secs: self.grace_period_secs,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    pub database_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_coherent() {
        let settings = Settings::default();

        assert_eq!(settings.pair.base_symbol, "SOL");
        assert_eq!(settings.regime.timeframe, Timeframe::H1);
        assert_eq!(settings.entry.timeframe, Timeframe::M5);
        assert!(settings.risk.max_drawdown_percent > 0.0);
        assert!(settings.market.candle_history_cap >= 100);

        // Derived component configs carry the same values
        let entry_cfg = settings.entry.config(&settings.liquidity);
        assert_eq!(entry_cfg.donchian_period, settings.entry.donchian_period);
        assert_eq!(entry_cfg.max_spread, settings.liquidity.max_spread);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("SWINGBOT__RISK__MAX_DRAWDOWN_PERCENT", "0.35");
        let settings = Settings::load(Some("does-not-exist")).unwrap();
        std::env::remove_var("SWINGBOT__RISK__MAX_DRAWDOWN_PERCENT");

        assert!((settings.risk.max_drawdown_percent - 0.35).abs() < 1e-9);
        // Untouched values fall back to defaults
        assert_eq!(settings.engine.cycle_interval_secs, 30);
    }
}

// Technical indicators used by the regime, entry and exit evaluators

pub mod adx;
pub mod atr;
pub mod donchian;
pub mod moving_average;
pub mod rsi;

pub use adx::calculate_adx;
pub use atr::calculate_atr;
pub use donchian::donchian_high;
pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;

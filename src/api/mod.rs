pub mod coingecko;
pub mod dexscreener;
pub mod jupiter;
pub mod oracle;

pub use coingecko::{CoinGeckoClient, MarketChartData};
pub use dexscreener::DexScreenerClient;
pub use jupiter::{JupiterClient, Quote};
pub use oracle::OracleClient;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single price observation from the live feed
///
/// Ephemeral input to the candle aggregator, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub volume: f64,
}

impl Tick {
    pub fn new(price: f64, timestamp: DateTime<Utc>, volume: f64) -> Self {
        Self {
            price,
            timestamp,
            volume,
        }
    }
}

/// Candle timeframes tracked by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
}

impl Timeframe {
    pub const fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
        }
    }

    /// Align a millisecond timestamp to the start of its bucket
    pub fn bucket_start_ms(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.duration_ms()) * self.duration_ms()
    }

    /// Align a timestamp to the start of its bucket
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let ms = self.bucket_start_ms(ts.timestamp_millis());
        Utc.timestamp_millis_opt(ms).single().unwrap_or(ts)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            other => Err(format!("unknown timeframe: {}", other)),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

/// OHLCV candlestick data
///
/// `timestamp` is the inclusive start of the bucket. Closed candles are
/// immutable; exactly one open (in-progress) candle exists per timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Open a fresh candle from the first tick of a bucket
    pub fn open_from_tick(bucket_start: DateTime<Utc>, tick: &Tick) -> Self {
        Self {
            timestamp: bucket_start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
        }
    }

    /// Fold another tick of the same bucket into this candle
    pub fn update(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.volume;
    }

    /// OHLC ordering invariant: low <= min(open, close) <= max(open, close) <= high
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high && self.high >= self.low
    }
}

/// Identifier of the provider a quote came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    DexScreener,
    CoinGecko,
    Oracle,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriceSource::DexScreener => "dexscreener",
            PriceSource::CoinGecko => "coingecko",
            PriceSource::Oracle => "oracle",
        };
        f.write_str(s)
    }
}

impl std::error::Error for PriceSource {}

/// A resolved price, fresh from a provider or served from the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub source: PriceSource,
}

impl PriceQuote {
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

/// The single open position, owned by the control loop
///
/// Passed by value to the exit evaluator, which returns an updated copy.
/// `initial_stop` freezes the entry-time risk distance so the R-multiple
/// stays defined after the stop is moved to breakeven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub entry_price: f64,
    pub amount: f64,
    pub stop_price: f64,
    pub initial_stop: f64,
    pub entry_time: DateTime<Utc>,
    pub partial_taken: bool,
    pub trailing_stop_active: bool,
}

impl Position {
    pub fn open(entry_price: f64, amount: f64, stop_price: f64, entry_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_price,
            amount,
            stop_price,
            initial_stop: stop_price,
            entry_time,
            partial_taken: false,
            trailing_stop_active: false,
        }
    }

    /// Risked distance per unit at entry time
    pub fn risk_distance(&self) -> f64 {
        self.entry_price - self.initial_stop
    }

    /// Profit or loss at `price` as a multiple of the initial risked distance
    ///
    /// Zero when the entry-time stop distance is degenerate.
    pub fn r_multiple(&self, price: f64) -> f64 {
        let distance = self.risk_distance();
        if distance <= f64::EPSILON {
            return 0.0;
        }
        (price - self.entry_price) / distance
    }

    /// Current notional value in quote currency
    pub fn notional(&self, price: f64) -> f64 {
        self.amount * price
    }
}

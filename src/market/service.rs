use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::api::coingecko::CoinGeckoClient;
use crate::error::Result;
use crate::market::{CandleAggregator, PriceResolver};
use crate::models::{Candle, PriceQuote, Tick, Timeframe};

/// Unified market-data surface for the strategy layer
///
/// Owns the resolver and the aggregator; bootstraps historical candles at
/// startup so strategy timeframes are populated before the first live tick.
pub struct MarketDataService {
    resolver: Arc<PriceResolver>,
    aggregator: CandleAggregator,
    history_source: Option<CoinGeckoClient>,
}

impl MarketDataService {
    pub fn new(
        resolver: Arc<PriceResolver>,
        aggregator: CandleAggregator,
        history_source: Option<CoinGeckoClient>,
    ) -> Self {
        Self {
            resolver,
            aggregator,
            history_source,
        }
    }

    /// Seed every tracked timeframe from the history source
    ///
    /// Best-effort at the call site: the caller decides whether a failed
    /// bootstrap is fatal (it is not; timeframes fill from live ticks).
    pub async fn bootstrap(&mut self, days: u32) -> Result<()> {
        let Some(source) = &self.history_source else {
            tracing::info!("no history source configured, skipping candle bootstrap");
            return Ok(());
        };

        let chart = source.get_market_chart(days).await?;
        tracing::info!(
            points = chart.prices.len(),
            days,
            "bootstrapping candles from market chart"
        );

        for timeframe in self.aggregator.timeframes() {
            let candles = candles_from_chart(&chart.prices, &chart.total_volumes, timeframe);
            let injected = self.aggregator.inject_history(timeframe, candles)?;
            tracing::info!(timeframe = %timeframe, injected, "seeded timeframe history");
        }

        Ok(())
    }

    /// Force-fetch a fresh price and feed it into the aggregator
    pub async fn refresh(&mut self) -> Result<PriceQuote> {
        let quote = self.resolver.get_price(true).await?;
        self.aggregator
            .add_tick(&Tick::new(quote.price, quote.timestamp, 0.0));
        Ok(quote)
    }

    pub async fn current_price(&self, force: bool) -> Result<PriceQuote> {
        self.resolver.get_price(force).await
    }

    pub fn candles(&self, timeframe: Timeframe, count: Option<usize>) -> Vec<Candle> {
        self.aggregator.get_candles(timeframe, count)
    }

    pub fn current_candle(&self, timeframe: Timeframe) -> Option<Candle> {
        self.aggregator.current_candle(timeframe)
    }

    pub fn candle_count(&self, timeframe: Timeframe) -> usize {
        self.aggregator.candle_count(timeframe)
    }

    pub fn has_enough_data(&self, timeframe: Timeframe, needed: usize) -> bool {
        self.aggregator.has_enough(timeframe, needed)
    }

    pub fn resolver(&self) -> Arc<PriceResolver> {
        self.resolver.clone()
    }
}

/// Convert irregular `[timestamp_ms, value]` chart points into bucketed
/// candles for one timeframe
///
/// Points are sorted and grouped by bucket; each bucket becomes one candle
/// with open/close from the first/last point and high/low from the extremes.
/// The newest bucket is dropped because it is still forming and live ticks
/// own it from here on.
pub fn candles_from_chart(
    prices: &[[f64; 2]],
    volumes: &[[f64; 2]],
    timeframe: Timeframe,
) -> Vec<Candle> {
    let mut points: Vec<(i64, f64)> = prices
        .iter()
        .filter(|p| p[1].is_finite() && p[1] > 0.0)
        .map(|p| (p[0] as i64, p[1]))
        .collect();
    points.sort_by_key(|(ts, _)| *ts);
    points.dedup_by_key(|(ts, _)| *ts);

    let mut volume_by_bucket: BTreeMap<i64, f64> = BTreeMap::new();
    for v in volumes {
        let bucket = timeframe.bucket_start_ms(v[0] as i64);
        volume_by_bucket.insert(bucket, v[1]);
    }

    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for (ts, price) in points {
        buckets
            .entry(timeframe.bucket_start_ms(ts))
            .or_default()
            .push(price);
    }

    let mut candles: Vec<Candle> = buckets
        .into_iter()
        .filter_map(|(bucket_ms, prices)| {
            let timestamp = Utc.timestamp_millis_opt(bucket_ms).single()?;
            let open = *prices.first()?;
            let close = *prices.last()?;
            let high = prices.iter().cloned().fold(f64::MIN, f64::max);
            let low = prices.iter().cloned().fold(f64::MAX, f64::min);
            Some(Candle {
                timestamp,
                open,
                high,
                low,
                close,
                volume: volume_by_bucket.get(&bucket_ms).copied().unwrap_or(0.0),
            })
        })
        .collect();

    candles.pop();
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use crate::market::{PriceProvider, ResolverConfig};
    use crate::models::PriceSource;
    use async_trait::async_trait;

    struct FixedPriceProvider(f64);

    #[async_trait]
    impl PriceProvider for FixedPriceProvider {
        fn source(&self) -> PriceSource {
            PriceSource::DexScreener
        }

        async fn fetch(&self) -> std::result::Result<PriceQuote, BotError> {
            Ok(PriceQuote {
                price: self.0,
                timestamp: Utc::now(),
                confidence: 0.9,
                source: PriceSource::DexScreener,
            })
        }
    }

    fn chart_points(timeframe: Timeframe, closes: &[f64]) -> Vec<[f64; 2]> {
        // Two points per bucket so open != close
        let step = timeframe.duration_ms() as f64;
        closes
            .iter()
            .enumerate()
            .flat_map(|(i, &close)| {
                let bucket = i as f64 * step;
                [[bucket, close - 0.5], [bucket + step / 2.0, close]]
            })
            .collect()
    }

    #[test]
    fn test_candles_from_chart_buckets_points() {
        let prices = chart_points(Timeframe::M5, &[100.0, 101.0, 102.0, 103.0]);
        let candles = candles_from_chart(&prices, &[], Timeframe::M5);

        // Last bucket dropped as still-forming
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].open, 99.5);
        assert_eq!(candles[0].close, 100.0);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(candles.iter().all(|c| c.is_well_formed()));
    }

    #[test]
    fn test_candles_from_chart_unsorted_input() {
        let mut prices = chart_points(Timeframe::M5, &[100.0, 101.0, 102.0]);
        prices.reverse();
        let candles = candles_from_chart(&prices, &[], Timeframe::M5);

        assert_eq!(candles.len(), 2);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_candles_from_chart_attaches_volume() {
        let prices = chart_points(Timeframe::M5, &[100.0, 101.0]);
        let volumes = vec![[0.0, 5_000.0], [Timeframe::M5.duration_ms() as f64, 6_000.0]];
        let candles = candles_from_chart(&prices, &volumes, Timeframe::M5);

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].volume, 5_000.0);
    }

    #[test]
    fn test_candles_from_chart_skips_bad_points() {
        let prices = vec![[0.0, 100.0], [1000.0, -5.0], [2000.0, f64::NAN]];
        let candles = candles_from_chart(&prices, &[], Timeframe::M1);
        // Single surviving bucket is dropped as still-forming
        assert!(candles.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_feeds_aggregator() {
        let resolver = Arc::new(PriceResolver::new(
            vec![Box::new(FixedPriceProvider(123.0))],
            ResolverConfig::default(),
        ));
        let aggregator = CandleAggregator::new(&[Timeframe::M5], 100);
        let mut service = MarketDataService::new(resolver, aggregator, None);

        let quote = service.refresh().await.unwrap();
        assert_eq!(quote.price, 123.0);

        let current = service.current_candle(Timeframe::M5).unwrap();
        assert_eq!(current.close, 123.0);
        assert_eq!(service.candle_count(Timeframe::M5), 0);
        assert!(!service.has_enough_data(Timeframe::M5, 1));
    }

    #[tokio::test]
    async fn test_bootstrap_without_source_is_noop() {
        let resolver = Arc::new(PriceResolver::new(
            vec![Box::new(FixedPriceProvider(123.0))],
            ResolverConfig::default(),
        ));
        let aggregator = CandleAggregator::new(&[Timeframe::M5], 100);
        let mut service = MarketDataService::new(resolver, aggregator, None);

        service.bootstrap(1).await.unwrap();
        assert_eq!(service.candle_count(Timeframe::M5), 0);
    }
}

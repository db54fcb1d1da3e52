use crate::models::Candle;

/// Average True Range with Wilder smoothing
///
/// True range per candle is the greatest of high-low, |high - prev close|
/// and |low - prev close|. Used to derive stop distances from volatility.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period + 1 || period == 0 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .collect();

    if true_ranges.len() < period {
        return None;
    }

    // Seed with the simple average, then apply Wilder smoothing
    let mut atr: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    for tr in &true_ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }

    Some(atr)
}

fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    (candle.high - candle.low)
        .max((candle.high - prev_close).abs())
        .max((candle.low - prev_close).abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles_from_ohlc(rows: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let start = Utc::now();
        rows.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: start + Duration::minutes(5 * i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_atr_quiet_market() {
        let rows = vec![(100.0, 101.0, 99.0, 100.0); 15];
        let atr = calculate_atr(&candles_from_ohlc(&rows), 14).unwrap();

        // Every true range is exactly the 2.0 high-low span
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_reflects_volatility() {
        let quiet = vec![(100.0, 101.0, 99.0, 100.0); 15];
        let wild = vec![(100.0, 110.0, 90.0, 105.0); 15];

        let quiet_atr = calculate_atr(&candles_from_ohlc(&quiet), 14).unwrap();
        let wild_atr = calculate_atr(&candles_from_ohlc(&wild), 14).unwrap();

        assert!(wild_atr > 5.0 * quiet_atr);
    }

    #[test]
    fn test_atr_includes_gaps() {
        // Flat candles but a large gap between closes inflates the true range
        let rows = vec![
            (100.0, 100.5, 99.5, 100.0),
            (120.0, 120.5, 119.5, 120.0),
            (120.0, 120.5, 119.5, 120.0),
        ];
        let atr = calculate_atr(&candles_from_ohlc(&rows), 2).unwrap();
        assert!(atr > 5.0, "gap should dominate the ATR, got {atr}");
    }

    #[test]
    fn test_atr_insufficient_data() {
        let rows = vec![(100.0, 101.0, 99.0, 100.0); 5];
        assert!(calculate_atr(&candles_from_ohlc(&rows), 14).is_none());
    }
}

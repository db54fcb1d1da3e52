use crate::models::Candle;

/// Donchian channel high: the highest high over the last `period` candles
///
/// The entry evaluator passes the window *excluding* the candle under test,
/// so a close above this value is a breakout of the prior range.
pub fn donchian_high(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period || period == 0 {
        return None;
    }

    candles[candles.len() - period..]
        .iter()
        .map(|c| c.high)
        .fold(None, |acc, h| match acc {
            None => Some(h),
            Some(best) => Some(best.max(h)),
        })
}

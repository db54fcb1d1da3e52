/// Relative Strength Index over closing prices
///
/// Averages gains and losses over the trailing `period` changes. 100 when
/// the window contains no losses, 0 when it contains no gains.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 || period == 0 {
        return None;
    }

    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;

    for window in prices[prices.len() - period - 1..].windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gain_sum += change;
        } else {
            loss_sum += -change;
        }
    }

    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

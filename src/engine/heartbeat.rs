use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::models::Position;
use crate::strategy::Regime;

/// Read-mostly snapshot the control loop publishes once per cycle
///
/// The heartbeat task is the only other reader; it never influences trading
/// decisions, and its failures are swallowed.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatState {
    pub last_price: Option<f64>,
    pub equity: Option<f64>,
    pub drawdown: Option<f64>,
    pub regime: Option<Regime>,
    pub regime_confidence: Option<f64>,
    pub entry_confidence: Option<f64>,
    pub position: Option<Position>,
    pub cycle: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

pub type SharedHeartbeat = Arc<RwLock<HeartbeatState>>;

/// Periodically log the shared snapshot for operator visibility
pub fn spawn_heartbeat(state: SharedHeartbeat, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let snapshot = match state.read() {
                Ok(guard) => guard.clone(),
                Err(_) => continue,
            };

            let regime = snapshot
                .regime
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());

            match &snapshot.position {
                Some(position) => {
                    let unrealized = snapshot
                        .last_price
                        .map(|p| (p - position.entry_price) * position.amount);
                    tracing::info!(
                        cycle = snapshot.cycle,
                        price = snapshot.last_price,
                        equity = snapshot.equity,
                        drawdown = snapshot.drawdown,
                        regime = %regime,
                        entry_price = position.entry_price,
                        amount = position.amount,
                        stop = position.stop_price,
                        unrealized_pnl = unrealized,
                        "heartbeat: position open"
                    );
                }
                None => {
                    tracing::info!(
                        cycle = snapshot.cycle,
                        price = snapshot.last_price,
                        equity = snapshot.equity,
                        drawdown = snapshot.drawdown,
                        regime = %regime,
                        entry_confidence = snapshot.entry_confidence,
                        "heartbeat: flat"
                    );
                }
            }
        }
    })
}

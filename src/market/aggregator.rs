use std::collections::HashMap;
use std::collections::VecDeque;

use crate::error::{BotError, Result};
use crate::models::{Candle, Tick, Timeframe};

/// Per-timeframe candle state: bounded closed history plus the one open candle
struct FrameState {
    history: VecDeque<Candle>,
    current: Option<Candle>,
}

impl FrameState {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            current: None,
        }
    }
}

/// Converts a stream of price ticks into closed OHLCV candles for several
/// timeframes simultaneously
///
/// Each tick updates the in-progress candle of every tracked timeframe.
/// Crossing a bucket boundary seals the open candle into history (oldest
/// evicted past the cap) and opens a new one at O=H=L=C=tick price.
pub struct CandleAggregator {
    frames: HashMap<Timeframe, FrameState>,
    history_cap: usize,
}

impl CandleAggregator {
    pub fn new(timeframes: &[Timeframe], history_cap: usize) -> Self {
        let frames = timeframes
            .iter()
            .map(|tf| (*tf, FrameState::new()))
            .collect();
        Self {
            frames,
            history_cap: history_cap.max(1),
        }
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.frames.keys().copied().collect()
    }

    /// Feed one tick into every tracked timeframe
    ///
    /// Non-positive prices are dropped; a tick older than the open candle's
    /// bucket is dropped rather than corrupting sealed history.
    pub fn add_tick(&mut self, tick: &Tick) {
        if tick.price <= 0.0 || !tick.price.is_finite() {
            tracing::warn!(price = tick.price, "dropping tick with unusable price");
            return;
        }

        for (tf, frame) in self.frames.iter_mut() {
            let bucket = tf.bucket_start(tick.timestamp);

            match frame.current.as_mut() {
                None => {
                    frame.current = Some(Candle::open_from_tick(bucket, tick));
                }
                Some(current) if current.timestamp == bucket => {
                    current.update(tick);
                }
                Some(current) if bucket < current.timestamp => {
                    tracing::warn!(
                        timeframe = %tf,
                        tick_ts = %tick.timestamp,
                        open_bucket = %current.timestamp,
                        "dropping tick older than the open candle"
                    );
                }
                Some(_) => {
                    // Bucket advanced: seal the open candle and start the next
                    if let Some(sealed) = frame.current.take() {
                        tracing::debug!(
                            timeframe = %tf,
                            bucket = %sealed.timestamp,
                            close = sealed.close,
                            "sealed candle"
                        );
                        frame.history.push_back(sealed);
                        while frame.history.len() > self.history_cap {
                            frame.history.pop_front();
                        }
                    }
                    frame.current = Some(Candle::open_from_tick(bucket, tick));
                }
            }
        }
    }

    /// Closed candles for a timeframe, oldest first; optionally only the
    /// most recent `count`
    pub fn get_candles(&self, timeframe: Timeframe, count: Option<usize>) -> Vec<Candle> {
        let Some(frame) = self.frames.get(&timeframe) else {
            return Vec::new();
        };

        match count {
            Some(n) => {
                let skip = frame.history.len().saturating_sub(n);
                frame.history.iter().skip(skip).cloned().collect()
            }
            None => frame.history.iter().cloned().collect(),
        }
    }

    /// The in-progress candle, if any tick has arrived for this timeframe
    pub fn current_candle(&self, timeframe: Timeframe) -> Option<Candle> {
        self.frames
            .get(&timeframe)
            .and_then(|frame| frame.current.clone())
    }

    pub fn candle_count(&self, timeframe: Timeframe) -> usize {
        self.frames
            .get(&timeframe)
            .map(|frame| frame.history.len())
            .unwrap_or(0)
    }

    pub fn has_enough(&self, timeframe: Timeframe, needed: usize) -> bool {
        self.candle_count(timeframe) >= needed
    }

    /// Seed a timeframe's closed history directly, bypassing tick aggregation
    ///
    /// Contract: candles must be strictly ascending in time. Timestamps are
    /// normalized to their bucket start; candles at or before the newest
    /// already-stored candle are skipped; candles at or after the open
    /// candle's bucket are rejected outright. Returns the number injected.
    pub fn inject_history(&mut self, timeframe: Timeframe, candles: Vec<Candle>) -> Result<usize> {
        let frame = self
            .frames
            .get_mut(&timeframe)
            .ok_or_else(|| BotError::InvalidHistory(format!("untracked timeframe {timeframe}")))?;

        let current_bucket = frame.current.as_ref().map(|c| c.timestamp);
        let mut last_ts = frame.history.back().map(|c| c.timestamp);
        let mut injected = 0usize;
        let mut skipped = 0usize;
        let mut prev_incoming = None;

        for mut candle in candles {
            candle.timestamp = timeframe.bucket_start(candle.timestamp);

            if !candle.is_well_formed() {
                return Err(BotError::InvalidHistory(format!(
                    "malformed OHLC at {}",
                    candle.timestamp
                )));
            }

            if let Some(prev) = prev_incoming {
                if candle.timestamp <= prev {
                    return Err(BotError::InvalidHistory(format!(
                        "candles not strictly ascending at {}",
                        candle.timestamp
                    )));
                }
            }
            prev_incoming = Some(candle.timestamp);

            if let Some(open_bucket) = current_bucket {
                if candle.timestamp >= open_bucket {
                    return Err(BotError::InvalidHistory(format!(
                        "candle at {} does not precede the open bucket {}",
                        candle.timestamp, open_bucket
                    )));
                }
            }

            // Overlap with already-stored history is dropped, not an error,
            // so repeated bootstraps stay idempotent
            if let Some(last) = last_ts {
                if candle.timestamp <= last {
                    skipped += 1;
                    continue;
                }
            }

            last_ts = Some(candle.timestamp);
            frame.history.push_back(candle);
            injected += 1;
        }

        while frame.history.len() > self.history_cap {
            frame.history.pop_front();
        }

        if skipped > 0 {
            tracing::debug!(
                timeframe = %timeframe,
                skipped,
                "skipped overlapping candles during injection"
            );
        }

        Ok(injected)
    }
}

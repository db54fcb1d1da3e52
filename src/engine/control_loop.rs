use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::Settings;
use crate::engine::heartbeat::{HeartbeatState, SharedHeartbeat};
use crate::error::Result;
use crate::execution::{Balances, Executor, LiquidityProbe};
use crate::indicators::calculate_atr;
use crate::market::MarketDataService;
use crate::models::{Candle, Position, PriceQuote};
use crate::persistence::PostgresPersistence;
use crate::risk::{PositionSizer, RiskManager, TriggerKind};
use crate::strategy::{EntryEvaluator, ExitEvaluator, ExitType, RegimeClassifier};

/// What a single cycle concluded, mostly for logging and tests
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Kill switch latched; the loop stops
    Halted,
    /// Risk gate refused trading this cycle
    RiskBlocked(String),
    /// Transient data problem; retry next cycle
    SkippedData(String),
    /// No position and no entry signal
    Flat,
    Entered,
    Held,
    PartialExit,
    FullExit(ExitType),
}

/// The scheduler: one fixed-interval cycle driving market data, risk,
/// regime, entry/exit evaluation and execution, strictly in that order
///
/// Owns the single `Position`; decision components receive it by value and
/// never hold it across cycles.
pub struct ControlLoop {
    settings: Settings,
    market: MarketDataService,
    regime: RegimeClassifier,
    entry: EntryEvaluator,
    exits: ExitEvaluator,
    sizer: PositionSizer,
    risk: RiskManager,
    executor: Box<dyn Executor>,
    liquidity: Box<dyn LiquidityProbe>,
    store: Option<PostgresPersistence>,
    heartbeat: SharedHeartbeat,
    position: Option<Position>,
    cycle_count: u64,
    consecutive_errors: u32,
    halted: bool,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        market: MarketDataService,
        risk: RiskManager,
        executor: Box<dyn Executor>,
        liquidity: Box<dyn LiquidityProbe>,
        store: Option<PostgresPersistence>,
        heartbeat: SharedHeartbeat,
    ) -> Self {
        let regime = RegimeClassifier::new(settings.regime.config());
        let entry = EntryEvaluator::new(settings.entry.config(&settings.liquidity));
        let exits = ExitEvaluator::new(settings.exit.config());
        let sizer = PositionSizer::new(settings.risk.min_position_usd);

        Self {
            settings,
            market,
            regime,
            entry,
            exits,
            sizer,
            risk,
            executor,
            liquidity,
            store,
            heartbeat,
            position: None,
            cycle_count: 0,
            consecutive_errors: 0,
            halted: false,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Adopt a position recovered from persistence at startup
    pub fn resume_position(&mut self, position: Position) {
        tracing::info!(
            entry_price = position.entry_price,
            amount = position.amount,
            stop = position.stop_price,
            "resuming open position from persistence"
        );
        self.position = Some(position);
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    #[cfg(test)]
    pub(crate) fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    /// Run cycles until the kill switch halts trading or shutdown is signaled
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.executor.initialize().await?;

        let mut ticker = interval(Duration::from_secs(
            self.settings.engine.cycle_interval_secs.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(CycleOutcome::Halted) => {
                            tracing::error!("trading halted, stopping control loop");
                            break;
                        }
                        Ok(outcome) => {
                            self.consecutive_errors = 0;
                            tracing::debug!(?outcome, cycle = self.cycle_count, "cycle complete");
                        }
                        Err(e) => {
                            self.consecutive_errors += 1;
                            tracing::error!(
                                error = %e,
                                consecutive = self.consecutive_errors,
                                "cycle failed"
                            );
                            if self.consecutive_errors >= self.settings.engine.max_consecutive_errors {
                                self.risk.kill_switch().trigger(
                                    TriggerKind::SystemError,
                                    serde_json::json!({
                                        "error": e.to_string(),
                                        "consecutive_failures": self.consecutive_errors,
                                    }),
                                );
                                self.flatten("repeated cycle failures").await;
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One full cycle; public so tests can drive the loop tick by tick
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.cycle_count += 1;

        // 1. Kill switch: flatten and stop before touching anything else
        if self.risk.kill_switch().is_triggered() {
            if !self.halted {
                self.halted = true;
                self.audit(
                    "kill_switch",
                    "halted",
                    &["kill switch latched".to_string()],
                    serde_json::json!({}),
                )
                .await;
                self.flatten("kill switch latched").await;
            }
            return Ok(CycleOutcome::Halted);
        }

        // 2. Refresh market data: one forced fetch feeding the aggregator
        let quote = match self.market.refresh().await {
            Ok(quote) => quote,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "price refresh failed, skipping cycle");
                return Ok(CycleOutcome::SkippedData(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        // 3. Equity from the same cycle's price, before the risk gate looks
        let balances = match self.executor.balance().await {
            Ok(balances) => balances,
            Err(e) => {
                tracing::warn!(error = %e, "balance fetch failed, skipping cycle");
                return Ok(CycleOutcome::SkippedData("balance unavailable".to_string()));
            }
        };
        let equity = balances.equity(quote.price);
        self.risk.update_equity(equity);
        self.persist_equity(equity, balances).await;

        // 4. Risk gate; a fresh drawdown breach escalates to the kill switch
        let status = self.risk.can_trade();
        self.beat(|hb| {
            hb.cycle = self.cycle_count;
            hb.last_price = Some(quote.price);
            hb.equity = Some(equity);
            hb.drawdown = Some(status.current_drawdown);
            hb.position = self.position.clone();
            hb.updated_at = Some(Utc::now());
        });
        if !status.can_trade {
            let reason = status.reason.unwrap_or_else(|| "risk gate".to_string());
            if self.risk.drawdown_breached() && !self.risk.kill_switch().is_triggered() {
                self.risk.kill_switch().trigger(
                    TriggerKind::Drawdown,
                    serde_json::json!({
                        "drawdown": status.current_drawdown,
                        "high_water_mark": status.high_water_mark,
                        "equity": status.current_equity,
                    }),
                );
                self.audit(
                    "kill_switch",
                    "drawdown",
                    &[reason.clone()],
                    serde_json::json!({"drawdown": status.current_drawdown}),
                )
                .await;
                self.flatten("max drawdown breached").await;
            } else {
                self.audit("risk", "blocked", &[reason.clone()], serde_json::json!({}))
                    .await;
            }
            return Ok(CycleOutcome::RiskBlocked(reason));
        }

        // 5. Periodic feed cross-validation
        if self.settings.engine.health_check_every_cycles > 0
            && self.cycle_count % self.settings.engine.health_check_every_cycles == 0
        {
            match self.market.resolver().check_health().await {
                Ok(health) if !health.healthy => {
                    self.risk.kill_switch().trigger(
                        TriggerKind::OracleDivergence,
                        serde_json::json!({
                            "divergence": health.divergence,
                            "primary": health.primary.to_string(),
                            "reference": health.reference.to_string(),
                        }),
                    );
                    self.audit(
                        "kill_switch",
                        "oracle_divergence",
                        &[format!("feed divergence {:.4}", health.divergence)],
                        serde_json::json!({"divergence": health.divergence}),
                    )
                    .await;
                    self.flatten("price feed divergence").await;
                    return Ok(CycleOutcome::RiskBlocked("feed divergence".to_string()));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "feed health check failed"),
            }
        }

        // 6. Slow-timeframe readiness
        let slow_tf = self.settings.regime.timeframe;
        let slow_needed = self.regime.min_candles();
        if !self.market.has_enough_data(slow_tf, slow_needed) {
            tracing::info!(
                timeframe = %slow_tf,
                have = self.market.candle_count(slow_tf),
                needed = slow_needed,
                "collecting slow-timeframe history"
            );
            return Ok(CycleOutcome::SkippedData("slow history".to_string()));
        }

        // 7/8. Exactly one of entry or exit evaluation per cycle
        match self.position.clone() {
            Some(position) => self.evaluate_exit(position, &quote).await,
            None => self.evaluate_entry(&quote, equity).await,
        }
    }

    async fn evaluate_entry(&mut self, quote: &PriceQuote, equity: f64) -> Result<CycleOutcome> {
        let slow_candles = self
            .market
            .candles(self.settings.regime.timeframe, None);
        let analysis = self.regime.analyze(&slow_candles, Some(quote.price));

        self.beat(|hb| {
            hb.regime = Some(analysis.regime);
            hb.regime_confidence = Some(analysis.confidence);
        });
        self.audit(
            "regime",
            &analysis.regime.to_string(),
            &analysis.reasons,
            serde_json::json!({"confidence": analysis.confidence, "price": quote.price}),
        )
        .await;

        if !self.regime.can_trade(analysis.regime) {
            tracing::debug!(regime = %analysis.regime, "regime gate closed");
            return Ok(CycleOutcome::Flat);
        }

        let fast_candles = self.fast_candles_with_current();
        if fast_candles.len() < self.entry.min_candles() {
            return Ok(CycleOutcome::SkippedData("fast history".to_string()));
        }

        // Probe liquidity for the largest size we could take
        let candidate_size = equity * self.settings.risk.max_position_percent;
        let liquidity = match self.liquidity.check(quote.price, candidate_size).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "liquidity probe failed, skipping entry");
                return Ok(CycleOutcome::SkippedData("liquidity unavailable".to_string()));
            }
        };

        let signal = self.entry.evaluate(&fast_candles, &liquidity);
        self.beat(|hb| hb.entry_confidence = Some(signal.confidence));
        self.audit(
            "entry",
            if signal.should_enter { "enter" } else { "pass" },
            &signal.reasons,
            serde_json::json!({"confidence": signal.confidence, "price": signal.entry_price}),
        )
        .await;

        if !signal.should_enter {
            return Ok(CycleOutcome::Flat);
        }

        // ATR-derived stop under the breakout close
        let Some(atr) = calculate_atr(&fast_candles, self.exits.config().atr_period) else {
            tracing::info!("ATR undefined, cannot derive stop yet");
            return Ok(CycleOutcome::SkippedData("atr undefined".to_string()));
        };
        let stop_price = signal.entry_price - atr * self.exits.config().atr_multiplier;
        if stop_price <= 0.0 {
            tracing::warn!(atr, "stop distance swallows the whole price, skipping");
            return Ok(CycleOutcome::Flat);
        }

        // Size and validate before any execution call
        let plan = match self.sizer.calculate(
            equity,
            signal.entry_price,
            stop_price,
            self.settings.risk.risk_per_trade,
            self.settings.risk.max_position_percent,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "sizing rejected entry");
                self.audit("entry", "rejected", &[e.to_string()], serde_json::json!({}))
                    .await;
                return Ok(CycleOutcome::Flat);
            }
        };
        if let Err(e) = self.sizer.validate(
            &plan,
            equity,
            self.settings.risk.risk_per_trade,
            self.settings.risk.max_position_percent,
        ) {
            tracing::warn!(error = %e, "size validation rejected entry");
            self.audit("entry", "rejected", &[e.to_string()], serde_json::json!({}))
                .await;
            return Ok(CycleOutcome::Flat);
        }

        let result = self
            .executor
            .buy(plan.size_usd, self.settings.engine.max_slippage_bps)
            .await?;
        if !result.success {
            tracing::warn!(error = ?result.error, "buy failed, no position opened");
            self.audit(
                "entry",
                "execution_failed",
                &[result.error.clone().unwrap_or_default()],
                serde_json::json!({"size_usd": plan.size_usd}),
            )
            .await;
            return Ok(CycleOutcome::Flat);
        }

        self.persist_trade("buy", &result).await;

        let position = Position::open(result.price, result.amount, stop_price, result.timestamp);
        tracing::info!(
            entry_price = position.entry_price,
            amount = position.amount,
            stop = position.stop_price,
            size_usd = plan.size_usd,
            confidence = signal.confidence,
            "position opened"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.record_position_open(&position, plan.size_usd).await {
                tracing::warn!(error = %e, "failed to persist position open");
            }
        }

        self.beat(|hb| hb.position = Some(position.clone()));
        self.position = Some(position);
        Ok(CycleOutcome::Entered)
    }

    async fn evaluate_exit(
        &mut self,
        position: Position,
        quote: &PriceQuote,
    ) -> Result<CycleOutcome> {
        let fast_candles = self.fast_candles_with_current();
        let signal = self
            .exits
            .check_exit(&position, &fast_candles, quote.price, Utc::now());

        let outcome_label = signal
            .exit_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "hold".to_string());
        self.audit(
            "exit",
            &outcome_label,
            &[],
            serde_json::json!({
                "price": quote.price,
                "r_multiple": signal.r_multiple,
                "percentage": signal.percentage,
            }),
        )
        .await;

        if !signal.should_exit {
            return Ok(CycleOutcome::Held);
        }

        let sell_amount = position.amount * signal.percentage;
        let result = self
            .executor
            .sell(sell_amount, self.settings.engine.max_slippage_bps)
            .await?;
        if !result.success {
            // No state mutation on a failed fill; same signal fires next cycle
            tracing::warn!(error = ?result.error, "sell failed, position unchanged");
            return Ok(CycleOutcome::Held);
        }

        self.persist_trade("sell", &result).await;

        match ExitEvaluator::apply(position.clone(), &signal) {
            Some(updated) => {
                tracing::info!(
                    exit_type = %outcome_label,
                    sold = result.amount,
                    remaining = updated.amount,
                    new_stop = updated.stop_price,
                    "partial exit"
                );
                if let Some(store) = &self.store {
                    if let Err(e) = store.record_position_update(&updated).await {
                        tracing::warn!(error = %e, "failed to persist position update");
                    }
                }
                self.beat(|hb| hb.position = Some(updated.clone()));
                self.position = Some(updated);
                Ok(CycleOutcome::PartialExit)
            }
            None => {
                let realized_pnl = (result.price - position.entry_price) * result.amount;
                let r_multiple = position.r_multiple(result.price);
                let hold_hours =
                    (Utc::now() - position.entry_time).num_seconds() as f64 / 3600.0;
                tracing::info!(
                    exit_type = %outcome_label,
                    exit_price = result.price,
                    realized_pnl,
                    r_multiple,
                    hold_hours,
                    "position closed"
                );
                if let Some(store) = &self.store {
                    if let Err(e) = store
                        .record_position_close(
                            &position,
                            result.price,
                            realized_pnl,
                            r_multiple,
                            &outcome_label,
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "failed to persist position close");
                    }
                }
                self.beat(|hb| hb.position = None);
                self.position = None;
                let exit_type = signal.exit_type.unwrap_or(ExitType::Stop);
                Ok(CycleOutcome::FullExit(exit_type))
            }
        }
    }

    /// Closed fast-timeframe candles plus the in-progress one, so the live
    /// price participates in breakout and trailing checks
    fn fast_candles_with_current(&self) -> Vec<Candle> {
        let tf = self.settings.entry.timeframe;
        let mut candles = self.market.candles(tf, None);
        if let Some(current) = self.market.current_candle(tf) {
            candles.push(current);
        }
        candles
    }

    /// Sell everything we hold, now; used by the kill switch, drawdown
    /// breaches and graceful shutdown
    async fn flatten(&mut self, reason: &str) {
        let Some(position) = self.position.take() else {
            return;
        };

        tracing::warn!(reason, amount = position.amount, "flattening open position");
        match self
            .executor
            .sell(position.amount, self.settings.engine.max_slippage_bps)
            .await
        {
            Ok(result) if result.success => {
                self.persist_trade("sell", &result).await;
                let realized_pnl = (result.price - position.entry_price) * result.amount;
                let r_multiple = position.r_multiple(result.price);
                if let Some(store) = &self.store {
                    if let Err(e) = store
                        .record_position_close(
                            &position,
                            result.price,
                            realized_pnl,
                            r_multiple,
                            &format!("flatten: {reason}"),
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "failed to persist flatten");
                    }
                }
                self.beat(|hb| hb.position = None);
            }
            Ok(result) => {
                tracing::error!(
                    error = ?result.error,
                    "flatten sell failed, keeping position for retry"
                );
                self.position = Some(position);
            }
            Err(e) => {
                tracing::error!(error = %e, "flatten sell errored, keeping position for retry");
                self.position = Some(position);
            }
        }
    }

    /// Graceful shutdown: flatten and release persistent resources
    async fn shutdown(&mut self) {
        self.flatten("shutdown").await;
        tracing::info!(
            cycles = self.cycle_count,
            equity = self.risk.current_equity(),
            "control loop stopped"
        );
    }

    async fn persist_equity(&self, equity: f64, balances: Balances) {
        if let Some(store) = &self.store {
            if let Err(e) = store
                .record_equity(
                    equity,
                    balances.base,
                    balances.quote,
                    self.risk.drawdown(),
                    self.risk.high_water_mark(),
                )
                .await
            {
                tracing::warn!(error = %e, "failed to persist equity snapshot");
            }
        }
    }

    async fn persist_trade(&self, side: &str, result: &crate::execution::ExecutionResult) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_trade(side, result).await {
                tracing::warn!(error = %e, "failed to persist trade");
            }
        }
    }

    async fn audit(&self, kind: &str, outcome: &str, reasons: &[String], data: serde_json::Value) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_decision(kind, outcome, reasons, data).await {
                tracing::warn!(error = %e, "failed to persist decision");
            }
        }
    }

    fn beat<F: FnOnce(&mut HeartbeatState)>(&self, update: F) {
        if let Ok(mut guard) = self.heartbeat.write() {
            update(&mut guard);
        }
    }
}

//! The trade coordinator owns every position and is the only writer.
//!
//! Price samples, ticks, manual commands and execution reports all arrive as
//! events on one queue, so mutations for an asset are applied strictly one at
//! a time. Submissions run in spawned tasks and report back through the same
//! queue; the position sits in `Pending` or `Closing` until they do.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use uuid::Uuid;

use super::guard::{ExecutionGuard, ExecutionReport, FillOutcome};
use super::position_store::{PositionMutation, PositionStore};
use super::price_feed::PriceFeed;
use super::SampleBuffer;
use crate::config::EngineConfig;
use crate::error::{Result, TradeError};
use crate::models::{
    is_valid_asset_address, Command, Direction, ExitReason, Position, PositionStatus,
    PriceSample, RiskParams, TradeIntent, Urgency,
};
use crate::risk::{CircuitBreakers, RiskConfig, RiskEvaluator, TradingState};

// Tolerance when comparing a sell amount against the held quantity
const QUANTITY_EPSILON: f64 = 1e-9;

type Reply = oneshot::Sender<Result<Position>>;

enum Event {
    Price(PriceSample),
    Tick(DateTime<Utc>),
    Command { command: Command, reply: Reply },
    List { reply: oneshot::Sender<Vec<Position>> },
    Executed(ExecutionReport),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Purpose {
    Entry { limit: bool },
    Exit { reason: ExitReason },
}

/// Bookkeeping for an intent handed to the guard
struct InFlight {
    purpose: Purpose,
    observed_at: DateTime<Utc>,
    reply: Option<Reply>,
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap, cloneable front door to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<Event>,
}

impl CoordinatorHandle {
    async fn send(&self, event: Event) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| TradeError::Channel("coordinator has stopped".to_string()))
    }

    /// Run one manual command and wait for its result
    ///
    /// Commands that submit a trade (`buy`, `sell`) resolve once the
    /// execution report is in.
    pub async fn execute(&self, command: Command) -> Result<Position> {
        let (reply, response) = oneshot::channel();
        self.send(Event::Command { command, reply }).await?;
        response
            .await
            .map_err(|_| TradeError::Channel("coordinator dropped the reply".to_string()))?
    }

    pub async fn buy(&self, asset: &str, amount: f64, risk: RiskParams) -> Result<Position> {
        self.execute(Command::Buy {
            asset: asset.to_string(),
            amount,
            risk,
        })
        .await
    }

    pub async fn sell(&self, asset: &str, amount: Option<f64>) -> Result<Position> {
        self.execute(Command::Sell {
            asset: asset.to_string(),
            amount,
        })
        .await
    }

    pub async fn limit(
        &self,
        asset: &str,
        amount: f64,
        price: f64,
        risk: RiskParams,
    ) -> Result<Position> {
        self.execute(Command::Limit {
            asset: asset.to_string(),
            amount,
            price,
            risk,
        })
        .await
    }

    pub async fn update(&self, asset: &str, risk: RiskParams) -> Result<Position> {
        self.execute(Command::Update {
            asset: asset.to_string(),
            risk,
        })
        .await
    }

    pub async fn cancel(&self, asset: &str) -> Result<Position> {
        self.execute(Command::Cancel {
            asset: asset.to_string(),
        })
        .await
    }

    pub async fn status(&self, asset: &str) -> Result<Position> {
        self.execute(Command::Status {
            asset: asset.to_string(),
        })
        .await
    }

    /// Feed one sample; returns once it is queued, not once it is evaluated
    pub async fn push_price(&self, sample: PriceSample) -> Result<()> {
        self.send(Event::Price(sample)).await
    }

    /// Re-evaluate open positions at their last price as of `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        self.send(Event::Tick(now)).await
    }

    pub async fn list(&self) -> Result<Vec<Position>> {
        let (reply, response) = oneshot::channel();
        self.send(Event::List { reply }).await?;
        response
            .await
            .map_err(|_| TradeError::Channel("coordinator dropped the reply".to_string()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Event::Shutdown).await
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct TradeCoordinator {
    store: PositionStore,
    feed: PriceFeed,
    evaluator: RiskEvaluator,
    breakers: CircuitBreakers,
    trading_state: TradingState,
    guard: Arc<ExecutionGuard>,
    inbox: mpsc::Receiver<Event>,
    reports: mpsc::WeakSender<Event>,
    in_flight: HashMap<Uuid, InFlight>,
    tick_interval: Duration,
    /// Engine time, never behind the wall clock or any sample seen
    clock: DateTime<Utc>,
}

impl TradeCoordinator {
    /// Build a coordinator and the handle that talks to it
    ///
    /// # Arguments
    /// * `samples` - Window shared with the guard; the feed writes into it
    pub fn new(
        engine: &EngineConfig,
        risk: RiskConfig,
        breakers: CircuitBreakers,
        guard: Arc<ExecutionGuard>,
        samples: SampleBuffer,
    ) -> (Self, CoordinatorHandle) {
        let (sender, inbox) = mpsc::channel(engine.inbox_capacity.max(1));

        let coordinator = Self {
            store: PositionStore::new(),
            feed: PriceFeed::new(samples),
            evaluator: RiskEvaluator::new(risk),
            breakers,
            trading_state: TradingState::new(Utc::now()),
            guard,
            inbox,
            reports: sender.downgrade(),
            in_flight: HashMap::new(),
            tick_interval: Duration::from_millis(engine.tick_interval_ms.max(1)),
            clock: Utc::now(),
        };

        (coordinator, CoordinatorHandle { sender })
    }

    /// Start from previously saved records instead of an empty table
    pub fn with_store(mut self, store: PositionStore) -> Self {
        self.store = store;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until shutdown or until every handle is gone
    pub async fn run(mut self) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("🚀 Trade coordinator started");

        loop {
            tokio::select! {
                event = self.inbox.recv() => match event {
                    Some(Event::Shutdown) | None => break,
                    Some(event) => self.handle(event),
                },
                _ = ticker.tick() => self.on_tick(Utc::now()),
            }
        }

        tracing::info!(
            in_flight = self.in_flight.len(),
            positions = self.store.active().count(),
            "Trade coordinator stopped"
        );
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Price(sample) => self.on_price(sample),
            Event::Tick(now) => self.on_tick(now),
            Event::Command { command, reply } => {
                let name = command.name();
                let asset = command.asset().to_string();
                if let Some((reply, result)) = self.on_command(command, reply) {
                    if let Err(e) = &result {
                        tracing::debug!(asset = %asset, command = name, "Command rejected: {}", e);
                    }
                    let _ = reply.send(result);
                }
            }
            Event::List { reply } => {
                let _ = reply.send(self.store.list());
            }
            Event::Executed(report) => self.on_executed(report),
            Event::Shutdown => {}
        }
    }

    // ------------------------------------------------------------------------
    // Price samples and ticks
    // ------------------------------------------------------------------------

    /// Move engine time forward to `observed` or the wall clock, whichever is later
    fn advance_clock(&mut self, observed: DateTime<Utc>) -> DateTime<Utc> {
        self.clock = self.clock.max(observed).max(Utc::now());
        self.clock
    }

    fn on_price(&mut self, sample: PriceSample) {
        let sample = match self.feed.ingest(sample) {
            Ok(Some(sample)) => sample,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to ingest sample: {}", e);
                return;
            }
        };
        let now = self.advance_clock(sample.timestamp);

        let Some(position) = self.store.get(&sample.asset) else {
            return;
        };
        if !position.is_active() {
            return;
        }

        let position = match self.store.upsert(
            &sample.asset,
            PositionMutation::ObservePrice {
                price: sample.price,
            },
            sample.timestamp,
        ) {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!(asset = %sample.asset, "Could not record price: {}", e);
                return;
            }
        };

        match position.status {
            PositionStatus::Open => self.evaluate(&position, sample.price, now),
            PositionStatus::Pending => self.check_limit_fill(&position, &sample),
            PositionStatus::Closing | PositionStatus::Closed => {}
        }
    }

    fn on_tick(&mut self, now: DateTime<Utc>) {
        let now = self.advance_clock(now);
        self.trading_state.reset_if_new_day(now);

        let due: Vec<(Position, f64)> = self
            .store
            .active()
            .filter(|p| p.status == PositionStatus::Open)
            .filter_map(|p| p.last_price.map(|price| (p.clone(), price)))
            .collect();

        for (position, price) in due {
            self.evaluate(&position, price, now);
        }
    }

    fn evaluate(&mut self, position: &Position, price: f64, now: DateTime<Utc>) {
        let Some(trigger) = self.evaluator.evaluate(position, price, now) else {
            tracing::debug!(asset = %position.asset, price, "No exit condition");
            return;
        };

        tracing::warn!(
            asset = %trigger.asset,
            trigger = ?trigger.kind,
            price,
            entry = position.entry_price,
            highest = position.highest_price,
            "⚠️  Exit triggered"
        );

        let intent = TradeIntent::new(
            &trigger.asset,
            Direction::Sell,
            trigger.quantity,
            trigger.kind.urgency(),
            price,
            now,
        );
        let reason = ExitReason::Trigger(trigger.kind);

        match self.begin_exit(&intent, reason) {
            Ok(()) => self.dispatch(intent, Purpose::Exit { reason }, None),
            Err(e) => tracing::error!(asset = %trigger.asset, "Could not start exit: {}", e),
        }
    }

    fn check_limit_fill(&mut self, position: &Position, sample: &PriceSample) {
        let Some(limit_price) = position.limit_price else {
            return;
        };
        if position.in_flight.is_some() || sample.price > limit_price {
            return;
        }

        let intent = TradeIntent::new(
            &position.asset,
            Direction::Buy,
            position.quantity,
            Urgency::Normal,
            sample.price,
            sample.timestamp,
        );

        if let Err(e) = self.store.upsert(
            &position.asset,
            PositionMutation::BeginEntry {
                intent_id: intent.id,
            },
            sample.timestamp,
        ) {
            tracing::error!(asset = %position.asset, "Could not start limit fill: {}", e);
            return;
        }

        tracing::info!(
            asset = %position.asset,
            limit_price,
            price = sample.price,
            "🎯 Limit price reached, buying"
        );

        self.dispatch(intent, Purpose::Entry { limit: true }, None);
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Returns the reply to send now, or `None` when the reply waits on an execution
    fn on_command(&mut self, command: Command, reply: Reply) -> Option<(Reply, Result<Position>)> {
        let result = match command {
            Command::Status { asset } => self
                .store
                .get(&asset)
                .ok_or(TradeError::NotFound(asset)),
            Command::Limit {
                asset,
                amount,
                price,
                risk,
            } => self.place_limit(&asset, amount, price, risk),
            Command::Update { asset, risk } => self.update_risk(&asset, risk),
            Command::Cancel { asset } => self.cancel(&asset),
            Command::Buy {
                asset,
                amount,
                risk,
            } => match self.market_buy(&asset, amount, risk) {
                Ok(intent) => {
                    self.dispatch(intent, Purpose::Entry { limit: false }, Some(reply));
                    return None;
                }
                Err(e) => Err(e),
            },
            Command::Sell { asset, amount } => {
                let reason = ExitReason::Manual;
                match self
                    .manual_sell(&asset, amount)
                    .and_then(|intent| self.begin_exit(&intent, reason).map(|_| intent))
                {
                    Ok(intent) => {
                        self.dispatch(intent, Purpose::Exit { reason }, Some(reply));
                        return None;
                    }
                    Err(e) => Err(e),
                }
            }
        };

        Some((reply, result))
    }

    fn active_position(&self, asset: &str) -> Result<Position> {
        self.store
            .get(asset)
            .filter(Position::is_active)
            .ok_or_else(|| TradeError::NotFound(asset.to_string()))
    }

    /// Entry checks shared by `buy` and `limit`
    fn check_entry(&mut self, asset: &str, amount: f64, price: f64, risk: &RiskParams) -> Result<()> {
        validate_asset(asset)?;
        validate_amount(amount)?;
        validate_risk(risk)?;

        if let Some(existing) = self.store.get(asset).filter(Position::is_active) {
            return Err(TradeError::invalid_state(
                asset,
                existing.status,
                "already have an active position",
            ));
        }

        let now = Utc::now();
        self.trading_state.reset_if_new_day(now);
        if let Err(trip) = self.breakers.check(&self.trading_state) {
            tracing::warn!(asset = %asset, trip = ?trip, "Entry refused by circuit breaker");
            return Err(TradeError::invalid_state(
                asset,
                PositionStatus::Closed,
                format!("trading halted by circuit breaker: {:?}", trip),
            ));
        }

        let notional = amount * price;
        if self.breakers.check_size(notional).is_err() {
            return Err(TradeError::Validation(format!(
                "notional {:.4} exceeds max position size {:.4}",
                notional, self.breakers.max_position_size
            )));
        }

        Ok(())
    }

    fn new_position(&self, asset: &str, amount: f64, price: f64, risk: RiskParams) -> Position {
        let risk = self.evaluator.config().with_defaults(risk);
        let now = Utc::now();

        Position {
            id: Uuid::new_v4(),
            asset: asset.to_string(),
            status: PositionStatus::Pending,
            entry_price: price,
            quantity: amount,
            highest_price: price,
            last_price: None,
            entry_time: now,
            updated_at: now,
            limit_price: None,
            take_profit: risk.take_profit,
            stop_loss: risk.stop_loss,
            trailing_stop: risk.trailing_stop,
            max_holding_secs: risk.max_holding_secs,
            in_flight: None,
            realized_pnl: 0.0,
            exit_reason: None,
        }
    }

    fn market_buy(&mut self, asset: &str, amount: f64, risk: RiskParams) -> Result<TradeIntent> {
        validate_asset(asset)?;
        let current = self.feed.current(asset)?.ok_or_else(|| {
            TradeError::Validation(format!("no price observed yet for {}", asset))
        })?;

        self.check_entry(asset, amount, current.price, &risk)?;

        let intent = TradeIntent::new(
            asset,
            Direction::Buy,
            amount,
            Urgency::Normal,
            current.price,
            current.timestamp,
        );

        let mut position = self.new_position(asset, amount, current.price, risk);
        position.last_price = Some(current.price);
        position.in_flight = Some(intent.id);
        self.store
            .upsert(asset, PositionMutation::Create(position), Utc::now())?;

        tracing::info!(asset = %asset, amount, price = current.price, "Market buy submitted");
        Ok(intent)
    }

    fn place_limit(&mut self, asset: &str, amount: f64, price: f64, risk: RiskParams) -> Result<Position> {
        if !price.is_finite() || price <= 0.0 {
            return Err(TradeError::Validation(format!("invalid limit price {}", price)));
        }
        self.check_entry(asset, amount, price, &risk)?;

        let mut position = self.new_position(asset, amount, price, risk);
        position.limit_price = Some(price);
        let position = self
            .store
            .upsert(asset, PositionMutation::Create(position), Utc::now())?;

        tracing::info!(asset = %asset, amount, limit_price = price, "📋 Limit order placed");
        Ok(position)
    }

    fn update_risk(&mut self, asset: &str, risk: RiskParams) -> Result<Position> {
        validate_risk(&risk)?;
        if risk.is_empty() {
            return Err(TradeError::Validation("update carries no risk fields".to_string()));
        }
        // The store answers NotFound, or InvalidState once Closing or Closed
        let position = self
            .store
            .upsert(asset, PositionMutation::UpdateRisk(risk), Utc::now())?;

        tracing::info!(
            asset = %asset,
            take_profit = ?position.take_profit,
            stop_loss = ?position.stop_loss,
            trailing_stop = ?position.trailing_stop,
            "Risk parameters updated"
        );
        Ok(position)
    }

    fn cancel(&mut self, asset: &str) -> Result<Position> {
        self.active_position(asset)?;
        let position = self
            .store
            .upsert(asset, PositionMutation::Cancel, Utc::now())?;

        tracing::info!(asset = %asset, "Limit order canceled");
        Ok(position)
    }

    fn manual_sell(&mut self, asset: &str, amount: Option<f64>) -> Result<TradeIntent> {
        let position = self.active_position(asset)?;
        if position.status != PositionStatus::Open {
            return Err(TradeError::invalid_state(
                asset,
                position.status,
                "only open positions can be sold",
            ));
        }

        let (quantity, urgency) = match amount {
            None => (position.quantity, Urgency::Immediate),
            Some(amount) => {
                validate_amount(amount)?;
                if amount > position.quantity + QUANTITY_EPSILON {
                    return Err(TradeError::Validation(format!(
                        "cannot sell {} of {} held",
                        amount, position.quantity
                    )));
                }
                (amount.min(position.quantity), Urgency::Normal)
            }
        };

        let current = self.feed.current(asset)?;
        let reference_price = position
            .last_price
            .or(current.as_ref().map(|s| s.price))
            .unwrap_or(position.entry_price);
        let observed_at = current.map(|s| s.timestamp).unwrap_or_else(Utc::now);

        Ok(TradeIntent::new(
            asset,
            Direction::Sell,
            quantity,
            urgency,
            reference_price,
            observed_at,
        ))
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Move the position to `Closing` for this intent
    fn begin_exit(&mut self, intent: &TradeIntent, reason: ExitReason) -> Result<()> {
        self.store.upsert(
            &intent.asset,
            PositionMutation::BeginExit {
                intent_id: intent.id,
            },
            intent.observed_at,
        )?;

        tracing::info!(
            asset = %intent.asset,
            intent = %intent.id,
            quantity = intent.quantity,
            urgency = ?intent.urgency,
            reason = ?reason,
            "Position closing"
        );
        Ok(())
    }

    /// Hand an intent to the guard in its own task
    fn dispatch(&mut self, intent: TradeIntent, purpose: Purpose, reply: Option<Reply>) {
        self.in_flight.insert(
            intent.id,
            InFlight {
                purpose,
                observed_at: intent.observed_at,
                reply,
            },
        );

        let Some(reports) = self.reports.upgrade() else {
            let report = ExecutionReport::not_submitted(&intent, "coordinator is shutting down");
            self.on_executed(report);
            return;
        };

        let guard = self.guard.clone();
        tokio::spawn(async move {
            let report = guard.execute(intent).await;
            if reports.send(Event::Executed(report)).await.is_err() {
                tracing::error!("Coordinator gone before execution report was delivered");
            }
        });
    }

    fn on_executed(&mut self, report: ExecutionReport) {
        let Some(in_flight) = self.in_flight.remove(&report.intent_id) else {
            tracing::warn!(intent = %report.intent_id, "Discarding report for unknown intent");
            return;
        };

        let result = match in_flight.purpose {
            Purpose::Entry { limit } => self.settle_entry(&report, limit, in_flight.observed_at),
            Purpose::Exit { reason } => self.settle_exit(&report, reason),
        };

        match in_flight.reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::warn!(asset = %report.asset, "Automatic execution did not complete: {}", e);
                }
            }
        }
    }

    fn settle_entry(
        &mut self,
        report: &ExecutionReport,
        limit: bool,
        observed_at: DateTime<Utc>,
    ) -> Result<Position> {
        let now = Utc::now();
        let asset = report.asset.as_str();

        let price = match (report.outcome(), report.average_price) {
            (FillOutcome::Failed, _) | (_, None) => {
                if limit {
                    self.store.upsert(
                        asset,
                        PositionMutation::EntryFailed {
                            intent_id: report.intent_id,
                        },
                        now,
                    )?;
                    tracing::warn!(asset = %asset, "Limit fill failed, order back to waiting");
                } else {
                    self.store.remove(asset);
                    tracing::warn!(asset = %asset, "Market buy failed, position discarded");
                }
                return Err(report.to_error());
            }
            (_, Some(price)) => price,
        };

        let highest_price = self
            .feed
            .max_since(asset, observed_at)?
            .unwrap_or(price)
            .max(price);
        let entry_time = self.advance_clock(observed_at);

        let position = self.store.upsert(
            asset,
            PositionMutation::Fill {
                intent_id: report.intent_id,
                price,
                quantity: report.filled,
                entry_time,
                highest_price,
            },
            now,
        )?;
        self.trading_state.record_entry();

        if report.outcome() == FillOutcome::Partial {
            tracing::warn!(
                asset = %asset,
                filled = report.filled,
                requested = report.requested,
                "Entry only partially filled"
            );
        }

        tracing::info!(
            asset = %asset,
            entry_price = position.entry_price,
            quantity = position.quantity,
            stop_loss = ?position.stop_loss,
            take_profit = ?position.take_profit,
            "✅ Position opened"
        );

        // Samples that arrived during the fill may already trip a rule
        if let Some(current) = self.feed.current(asset)? {
            if current.timestamp > observed_at {
                let observed = self.store.upsert(
                    asset,
                    PositionMutation::ObservePrice {
                        price: current.price,
                    },
                    current.timestamp,
                )?;
                let now = self.advance_clock(current.timestamp);
                self.evaluate(&observed, current.price, now);
            }
        }

        Ok(position)
    }

    fn settle_exit(&mut self, report: &ExecutionReport, reason: ExitReason) -> Result<Position> {
        let now = Utc::now();
        let asset = report.asset.as_str();

        let (outcome, price) = match (report.outcome(), report.average_price) {
            (FillOutcome::Failed, _) | (_, None) => {
                self.store.upsert(
                    asset,
                    PositionMutation::RevertOpen {
                        intent_id: report.intent_id,
                    },
                    now,
                )?;
                tracing::error!(
                    asset = %asset,
                    reason = %report.failure_reason(),
                    "❌ Exit failed, position reopened for risk evaluation"
                );
                return Err(report.to_error());
            }
            (outcome, Some(price)) => (outcome, price),
        };

        let realized_before = self.store.get(asset).map(|p| p.realized_pnl).unwrap_or(0.0);
        let position = self.store.upsert(
            asset,
            PositionMutation::Reduce {
                intent_id: report.intent_id,
                filled: report.filled,
                price,
                reason,
            },
            now,
        )?;
        self.trading_state
            .record_exit(position.realized_pnl - realized_before);

        if position.status == PositionStatus::Closed {
            tracing::info!(
                asset = %asset,
                exit_price = price,
                realized_pnl = position.realized_pnl,
                reason = ?reason,
                "🔒 Position closed"
            );
        } else {
            tracing::warn!(
                asset = %asset,
                filled = report.filled,
                remaining = position.quantity,
                "Exit partially filled, position stays open"
            );
        }

        match outcome {
            FillOutcome::Partial => Err(report.to_error()),
            _ => Ok(position),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_asset(asset: &str) -> Result<()> {
    if !is_valid_asset_address(asset) {
        return Err(TradeError::Validation(format!(
            "{} is not a valid asset address",
            asset
        )));
    }
    Ok(())
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(TradeError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

fn validate_risk(risk: &RiskParams) -> Result<()> {
    let positive = |value: Option<f64>| value.map_or(true, |v| v.is_finite() && v > 0.0);

    if !positive(risk.take_profit) || !positive(risk.stop_loss) {
        return Err(TradeError::Validation(
            "take_profit and stop_loss must be positive multipliers".to_string(),
        ));
    }
    if let Some(trailing) = risk.trailing_stop {
        if !(trailing > 0.0 && trailing < 1.0) {
            return Err(TradeError::Validation(format!(
                "trailing_stop must be in (0, 1), got {}",
                trailing
            )));
        }
    }
    if risk.max_holding_secs.is_some_and(|secs| secs <= 0) {
        return Err(TradeError::Validation(
            "max_holding_secs must be positive".to_string(),
        ));
    }
    Ok(())
}

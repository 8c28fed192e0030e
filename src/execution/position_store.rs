use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, TradeError};
use crate::models::{ExitReason, Position, PositionStatus, RiskParams};

// Residual quantity below this counts as fully exited
const QUANTITY_EPSILON: f64 = 1e-9;

/// A requested change to one asset's record
///
/// Every legal transition of the position state machine is one variant; the
/// store rejects anything else with `InvalidState`.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionMutation {
    /// Insert a new record (market entry in flight, resting limit, or filled)
    Create(Position),
    /// Fold a new price into `last_price` / `highest_price`
    ObservePrice { price: f64 },
    /// Change TP/SL/trailing/max-holding on a pending or open record
    UpdateRisk(RiskParams),
    /// A limit order's buy has been sent
    BeginEntry { intent_id: Uuid },
    /// The buy for a pending record filled
    Fill {
        intent_id: Uuid,
        price: f64,
        quantity: f64,
        entry_time: DateTime<Utc>,
        highest_price: f64,
    },
    /// The buy for a resting limit order failed, it goes back to waiting
    EntryFailed { intent_id: Uuid },
    /// An exit has been handed to the execution guard
    BeginExit { intent_id: Uuid },
    /// The exit filled `filled` units at `price`
    Reduce {
        intent_id: Uuid,
        filled: f64,
        price: f64,
        reason: ExitReason,
    },
    /// The exit failed outright, risk evaluation resumes
    RevertOpen { intent_id: Uuid },
    /// Cancel a resting limit order
    Cancel,
}

impl PositionMutation {
    fn name(&self) -> &'static str {
        match self {
            PositionMutation::Create(_) => "create",
            PositionMutation::ObservePrice { .. } => "observe_price",
            PositionMutation::UpdateRisk(_) => "update_risk",
            PositionMutation::BeginEntry { .. } => "begin_entry",
            PositionMutation::Fill { .. } => "fill",
            PositionMutation::EntryFailed { .. } => "entry_failed",
            PositionMutation::BeginExit { .. } => "begin_exit",
            PositionMutation::Reduce { .. } => "reduce",
            PositionMutation::RevertOpen { .. } => "revert_open",
            PositionMutation::Cancel => "cancel",
        }
    }
}

/// The authoritative table of positions and limit orders, keyed by asset
///
/// Only the coordinator task holds it, so every mutation is serialized;
/// everyone else gets cloned snapshots.
#[derive(Debug, Default)]
pub struct PositionStore {
    positions: HashMap<String, Position>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously saved records
    pub fn with_positions(positions: Vec<Position>) -> Self {
        let positions: HashMap<String, Position> = positions
            .into_iter()
            .map(|p| (p.asset.clone(), p))
            .collect();

        tracing::info!("Restored {} positions", positions.len());

        Self { positions }
    }

    pub fn get(&self, asset: &str) -> Option<Position> {
        self.positions.get(asset).cloned()
    }

    /// Snapshot of every record, in no particular order
    pub fn list(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn active(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_active())
    }

    pub fn remove(&mut self, asset: &str) -> Option<Position> {
        self.positions.remove(asset)
    }

    /// Apply one mutation and return the resulting snapshot
    pub fn upsert(
        &mut self,
        asset: &str,
        mutation: PositionMutation,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        if let PositionMutation::Create(mut position) = mutation {
            if let Some(existing) = self.positions.get(asset) {
                if existing.is_active() {
                    return Err(TradeError::invalid_state(
                        asset,
                        existing.status,
                        "already have an active position",
                    ));
                }
            }
            position.updated_at = now;
            self.positions.insert(asset.to_string(), position.clone());
            return Ok(position);
        }

        let position = self
            .positions
            .get_mut(asset)
            .ok_or_else(|| TradeError::NotFound(asset.to_string()))?;

        if position.status == PositionStatus::Closed {
            return Err(TradeError::invalid_state(
                asset,
                PositionStatus::Closed,
                format!("{} on a closed position", mutation.name()),
            ));
        }

        apply(position, mutation)?;
        position.updated_at = now;

        Ok(position.clone())
    }
}

fn reject(position: &Position, reason: impl Into<String>) -> TradeError {
    TradeError::invalid_state(position.asset.clone(), position.status, reason)
}

fn expect_in_flight(position: &Position, intent_id: Uuid) -> Result<()> {
    if position.in_flight != Some(intent_id) {
        return Err(reject(
            position,
            format!("intent {} is not the one in flight", intent_id),
        ));
    }
    Ok(())
}

fn apply(position: &mut Position, mutation: PositionMutation) -> Result<()> {
    use PositionStatus::*;

    match mutation {
        PositionMutation::Create(_) => {
            return Err(reject(position, "already have an active position"));
        }

        PositionMutation::ObservePrice { price } => {
            position.last_price = Some(price);
            if matches!(position.status, Open | Closing) && price > position.highest_price {
                position.highest_price = price;
            }
        }

        PositionMutation::UpdateRisk(params) => {
            if !matches!(position.status, Open | Pending) {
                return Err(reject(position, "risk fields are frozen once an exit is in flight"));
            }
            if let Some(tp) = params.take_profit {
                position.take_profit = Some(tp);
            }
            if let Some(sl) = params.stop_loss {
                position.stop_loss = Some(sl);
            }
            if let Some(trailing) = params.trailing_stop {
                position.trailing_stop = Some(trailing);
            }
            if let Some(secs) = params.max_holding_secs {
                position.max_holding_secs = Some(secs);
            }
        }

        PositionMutation::BeginEntry { intent_id } => {
            if !position.is_limit_order() || position.in_flight.is_some() {
                return Err(reject(position, "no resting limit order to fill"));
            }
            position.in_flight = Some(intent_id);
        }

        PositionMutation::Fill {
            intent_id,
            price,
            quantity,
            entry_time,
            highest_price,
        } => {
            if position.status != Pending {
                return Err(reject(position, "only pending entries can fill"));
            }
            expect_in_flight(position, intent_id)?;
            position.status = Open;
            position.entry_price = price;
            position.quantity = quantity;
            position.entry_time = entry_time;
            position.highest_price = highest_price.max(price);
            position.last_price = Some(price);
            position.in_flight = None;
        }

        PositionMutation::EntryFailed { intent_id } => {
            if !position.is_limit_order() {
                return Err(reject(position, "only limit orders return to waiting"));
            }
            expect_in_flight(position, intent_id)?;
            position.in_flight = None;
        }

        PositionMutation::BeginExit { intent_id } => {
            if position.status != Open {
                return Err(reject(position, "only open positions can exit"));
            }
            position.status = Closing;
            position.in_flight = Some(intent_id);
        }

        PositionMutation::Reduce {
            intent_id,
            filled,
            price,
            reason,
        } => {
            if position.status != Closing {
                return Err(reject(position, "no exit in flight"));
            }
            expect_in_flight(position, intent_id)?;

            let filled = filled.clamp(0.0, position.quantity);
            position.realized_pnl += (price - position.entry_price) * filled;
            position.quantity -= filled;
            position.in_flight = None;

            if position.quantity <= QUANTITY_EPSILON {
                position.quantity = 0.0;
                position.status = Closed;
                position.exit_reason = Some(reason);
            } else {
                position.status = Open;
            }
        }

        PositionMutation::RevertOpen { intent_id } => {
            if position.status != Closing {
                return Err(reject(position, "no exit in flight"));
            }
            expect_in_flight(position, intent_id)?;
            position.status = Open;
            position.in_flight = None;
        }

        PositionMutation::Cancel => {
            if !position.is_limit_order() {
                return Err(reject(position, "only pending limit orders can be canceled"));
            }
            if position.in_flight.is_some() {
                return Err(reject(position, "limit fill already in flight"));
            }
            position.status = Closed;
            position.exit_reason = Some(ExitReason::Canceled);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerKind;
    use chrono::Duration;

    const SOL: &str = "So11111111111111111111111111111111111111112";

    fn position(status: PositionStatus, limit_price: Option<f64>) -> Position {
        let now = Utc::now();
        Position {
            id: Uuid::new_v4(),
            asset: SOL.to_string(),
            status,
            entry_price: 100.0,
            quantity: 2.0,
            highest_price: 100.0,
            last_price: None,
            entry_time: now,
            updated_at: now,
            limit_price,
            take_profit: None,
            stop_loss: Some(0.9),
            trailing_stop: None,
            max_holding_secs: None,
            in_flight: None,
            realized_pnl: 0.0,
            exit_reason: None,
        }
    }

    fn store_with(position: Position) -> PositionStore {
        let mut store = PositionStore::new();
        store
            .upsert(SOL, PositionMutation::Create(position), Utc::now())
            .unwrap();
        store
    }

    #[test]
    fn test_create_and_get() {
        let store = store_with(position(PositionStatus::Open, None));

        let stored = store.get(SOL).unwrap();
        assert_eq!(stored.status, PositionStatus::Open);
        assert_eq!(stored.quantity, 2.0);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_prevent_duplicate_active_positions() {
        let mut store = store_with(position(PositionStatus::Open, None));

        let result = store.upsert(
            SOL,
            PositionMutation::Create(position(PositionStatus::Open, None)),
            Utc::now(),
        );
        assert!(matches!(result, Err(TradeError::InvalidState { .. })));
    }

    #[test]
    fn test_closed_record_can_be_replaced() {
        let mut store = store_with(position(PositionStatus::Closed, None));

        let result = store.upsert(
            SOL,
            PositionMutation::Create(position(PositionStatus::Open, None)),
            Utc::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_mutation_on_missing_asset_is_not_found() {
        let mut store = PositionStore::new();
        let result = store.upsert(SOL, PositionMutation::Cancel, Utc::now());
        assert_eq!(result, Err(TradeError::NotFound(SOL.to_string())));
    }

    #[test]
    fn test_mutation_timestamps_record() {
        let mut store = store_with(position(PositionStatus::Open, None));
        let later = Utc::now() + Duration::seconds(30);

        let updated = store
            .upsert(SOL, PositionMutation::ObservePrice { price: 101.0 }, later)
            .unwrap();
        assert_eq!(updated.updated_at, later);
    }

    #[test]
    fn test_highest_price_is_monotonic() {
        let mut store = store_with(position(PositionStatus::Open, None));

        for price in [105.0, 103.0, 110.0, 90.0] {
            store
                .upsert(SOL, PositionMutation::ObservePrice { price }, Utc::now())
                .unwrap();
        }

        let stored = store.get(SOL).unwrap();
        assert_eq!(stored.highest_price, 110.0);
        assert_eq!(stored.last_price, Some(90.0));
    }

    #[test]
    fn test_full_exit_closes() {
        let mut store = store_with(position(PositionStatus::Open, None));
        let intent_id = Uuid::new_v4();

        store
            .upsert(SOL, PositionMutation::BeginExit { intent_id }, Utc::now())
            .unwrap();
        let closed = store
            .upsert(
                SOL,
                PositionMutation::Reduce {
                    intent_id,
                    filled: 2.0,
                    price: 110.0,
                    reason: ExitReason::Trigger(TriggerKind::TakeProfit),
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.quantity, 0.0);
        assert_eq!(closed.realized_pnl, 20.0);
        assert_eq!(
            closed.exit_reason,
            Some(ExitReason::Trigger(TriggerKind::TakeProfit))
        );
    }

    #[test]
    fn test_partial_exit_stays_open() {
        let mut store = store_with(position(PositionStatus::Open, None));
        let intent_id = Uuid::new_v4();

        store
            .upsert(SOL, PositionMutation::BeginExit { intent_id }, Utc::now())
            .unwrap();
        let reduced = store
            .upsert(
                SOL,
                PositionMutation::Reduce {
                    intent_id,
                    filled: 0.5,
                    price: 95.0,
                    reason: ExitReason::Manual,
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(reduced.status, PositionStatus::Open);
        assert_eq!(reduced.quantity, 1.5);
        assert_eq!(reduced.in_flight, None);
        assert_eq!(reduced.realized_pnl, -2.5);
    }

    #[test]
    fn test_stale_exit_result_rejected() {
        let mut store = store_with(position(PositionStatus::Open, None));
        let intent_id = Uuid::new_v4();

        store
            .upsert(SOL, PositionMutation::BeginExit { intent_id }, Utc::now())
            .unwrap();

        let result = store.upsert(
            SOL,
            PositionMutation::RevertOpen {
                intent_id: Uuid::new_v4(),
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(TradeError::InvalidState { .. })));
        assert_eq!(store.get(SOL).unwrap().status, PositionStatus::Closing);
    }

    #[test]
    fn test_update_rejected_while_closing() {
        let mut store = store_with(position(PositionStatus::Open, None));
        store
            .upsert(
                SOL,
                PositionMutation::BeginExit {
                    intent_id: Uuid::new_v4(),
                },
                Utc::now(),
            )
            .unwrap();

        let result = store.upsert(
            SOL,
            PositionMutation::UpdateRisk(RiskParams {
                take_profit: Some(2.0),
                ..Default::default()
            }),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(TradeError::InvalidState {
                status: PositionStatus::Closing,
                ..
            })
        ));
    }

    #[test]
    fn test_update_only_touches_given_fields() {
        let mut store = store_with(position(PositionStatus::Pending, Some(95.0)));

        let updated = store
            .upsert(
                SOL,
                PositionMutation::UpdateRisk(RiskParams {
                    take_profit: Some(1.5),
                    ..Default::default()
                }),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(updated.take_profit, Some(1.5));
        assert_eq!(updated.stop_loss, Some(0.9));
    }

    #[test]
    fn test_cancel_pending_limit() {
        let mut store = store_with(position(PositionStatus::Pending, Some(95.0)));

        let canceled = store
            .upsert(SOL, PositionMutation::Cancel, Utc::now())
            .unwrap();
        assert_eq!(canceled.status, PositionStatus::Closed);
        assert_eq!(canceled.exit_reason, Some(ExitReason::Canceled));
    }

    #[test]
    fn test_cancel_rejected_for_open_and_in_flight_fill() {
        let mut store = store_with(position(PositionStatus::Open, None));
        assert!(store
            .upsert(SOL, PositionMutation::Cancel, Utc::now())
            .is_err());

        let mut store = store_with(position(PositionStatus::Pending, Some(95.0)));
        store
            .upsert(
                SOL,
                PositionMutation::BeginEntry {
                    intent_id: Uuid::new_v4(),
                },
                Utc::now(),
            )
            .unwrap();
        assert!(store
            .upsert(SOL, PositionMutation::Cancel, Utc::now())
            .is_err());
    }

    #[test]
    fn test_limit_fill_opens() {
        let mut store = store_with(position(PositionStatus::Pending, Some(95.0)));
        let intent_id = Uuid::new_v4();
        let filled_at = Utc::now();

        store
            .upsert(SOL, PositionMutation::BeginEntry { intent_id }, filled_at)
            .unwrap();
        let opened = store
            .upsert(
                SOL,
                PositionMutation::Fill {
                    intent_id,
                    price: 94.5,
                    quantity: 2.0,
                    entry_time: filled_at,
                    highest_price: 94.5,
                },
                filled_at,
            )
            .unwrap();

        assert_eq!(opened.status, PositionStatus::Open);
        assert_eq!(opened.entry_price, 94.5);
        assert_eq!(opened.entry_time, filled_at);
        assert_eq!(opened.in_flight, None);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut store = store_with(position(PositionStatus::Closed, None));
        let before = store.get(SOL).unwrap();

        let mutations = vec![
            PositionMutation::ObservePrice { price: 1.0 },
            PositionMutation::UpdateRisk(RiskParams {
                stop_loss: Some(0.5),
                ..Default::default()
            }),
            PositionMutation::BeginExit {
                intent_id: Uuid::new_v4(),
            },
            PositionMutation::Cancel,
        ];

        for mutation in mutations {
            assert!(store.upsert(SOL, mutation, Utc::now()).is_err());
        }
        assert_eq!(store.get(SOL).unwrap(), before);
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Position, PositionStatus, RiskParams, RiskTrigger, TriggerKind};

/// Exit thresholds. Quick-loss is global; the rest seed new positions when a
/// command leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub quick_loss_threshold: f64, // Fractional drop from entry
    pub quick_loss_window_secs: i64,
    pub default_stop_loss: Option<f64>,
    pub default_take_profit: Option<f64>,
    pub default_trailing_stop: Option<f64>,
    pub default_max_holding_secs: Option<i64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            quick_loss_threshold: 0.05,         // 5% drop...
            quick_loss_window_secs: 60,         // ...within the first minute
            default_stop_loss: Some(0.85),      // -15% from entry
            default_take_profit: None,
            default_trailing_stop: Some(0.10),  // -10% from highest
            default_max_holding_secs: Some(3600), // 1 hour max hold
        }
    }
}

impl RiskConfig {
    /// Fill the gaps of a command's risk fields with the configured defaults
    pub fn with_defaults(&self, params: RiskParams) -> RiskParams {
        RiskParams {
            take_profit: params.take_profit.or(self.default_take_profit),
            stop_loss: params.stop_loss.or(self.default_stop_loss),
            trailing_stop: params.trailing_stop.or(self.default_trailing_stop),
            max_holding_secs: params.max_holding_secs.or(self.default_max_holding_secs),
        }
    }
}

/// Pure exit-rule evaluation over (position, price, time)
#[derive(Debug, Clone)]
pub struct RiskEvaluator {
    config: RiskConfig,
}

impl RiskEvaluator {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Returns the first rule that holds, in fixed priority order.
    ///
    /// Boundaries are inclusive. The highest price is taken from the position
    /// as-is; callers fold the current price into it before evaluating.
    pub fn evaluate(
        &self,
        position: &Position,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<RiskTrigger> {
        if position.status != PositionStatus::Open || position.quantity <= 0.0 {
            return None;
        }
        if !price.is_finite() || position.entry_price <= 0.0 {
            return None;
        }

        let held = now - position.entry_time;
        let kind = self.first_matching_rule(position, price, held)?;

        Some(RiskTrigger {
            kind,
            asset: position.asset.clone(),
            quantity: position.quantity,
        })
    }

    fn first_matching_rule(
        &self,
        position: &Position,
        price: f64,
        held: Duration,
    ) -> Option<TriggerKind> {
        let entry = position.entry_price;

        // 1. Quick loss: a smaller drop inside the opening window
        let drop = (entry - price) / entry;
        if drop >= self.config.quick_loss_threshold
            && held <= Duration::seconds(self.config.quick_loss_window_secs)
        {
            return Some(TriggerKind::QuickLoss);
        }

        // 2. Regular stop loss relative to entry
        if let Some(sl) = position.stop_loss {
            if price <= entry * sl {
                return Some(TriggerKind::RegularStopLoss);
            }
        }

        // 3. Trailing stop relative to the highest observed price
        if let Some(trailing) = position.trailing_stop {
            if price <= position.highest_price * (1.0 - trailing) {
                return Some(TriggerKind::TrailingStopLoss);
            }
        }

        // 4. Take profit
        if let Some(tp) = position.take_profit {
            if price >= entry * tp {
                return Some(TriggerKind::TakeProfit);
            }
        }

        // 5. Max holding time, regardless of price
        if let Some(max_holding) = position.max_holding() {
            if held >= max_holding {
                return Some(TriggerKind::MaxHoldingTime);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn open_position(entry_price: f64, entry_time: DateTime<Utc>) -> Position {
        Position {
            id: Uuid::new_v4(),
            asset: "So11111111111111111111111111111111111111112".to_string(),
            status: PositionStatus::Open,
            entry_price,
            quantity: 10.0,
            highest_price: entry_price,
            last_price: Some(entry_price),
            entry_time,
            updated_at: entry_time,
            limit_price: None,
            take_profit: None,
            stop_loss: None,
            trailing_stop: None,
            max_holding_secs: None,
            in_flight: None,
            realized_pnl: 0.0,
            exit_reason: None,
        }
    }

    fn evaluator() -> RiskEvaluator {
        RiskEvaluator::new(RiskConfig::default())
    }

    fn kind(position: &Position, price: f64, now: DateTime<Utc>) -> Option<TriggerKind> {
        evaluator().evaluate(position, price, now).map(|t| t.kind)
    }

    #[test]
    fn test_no_trigger_in_normal_range() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.stop_loss = Some(0.85);
        position.take_profit = Some(1.5);
        position.trailing_stop = Some(0.1);
        position.max_holding_secs = Some(3600);

        assert_eq!(kind(&position, 1.02, t0 + Duration::seconds(120)), None);
    }

    #[test]
    fn test_quick_loss_inside_window() {
        let t0 = Utc::now();
        let position = open_position(1.0, t0);

        // 6% drop after 30 seconds
        assert_eq!(
            kind(&position, 0.94, t0 + Duration::seconds(30)),
            Some(TriggerKind::QuickLoss)
        );
        // Same drop after the window is no longer a quick loss
        assert_eq!(kind(&position, 0.94, t0 + Duration::seconds(61)), None);
    }

    #[test]
    fn test_quick_loss_window_boundary_is_inclusive() {
        let t0 = Utc::now();
        let position = open_position(1.0, t0);

        assert_eq!(
            kind(&position, 0.95, t0 + Duration::seconds(60)),
            Some(TriggerKind::QuickLoss)
        );
    }

    #[test]
    fn test_quick_loss_preempts_take_profit() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        // A take-profit multiplier below the current price makes both rules hold
        position.take_profit = Some(0.5);

        let trigger = evaluator()
            .evaluate(&position, 0.9, t0 + Duration::seconds(10))
            .unwrap();
        assert_eq!(trigger.kind, TriggerKind::QuickLoss);
        assert_eq!(trigger.quantity, 10.0);
    }

    #[test]
    fn test_regular_stop_loss_boundary() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.stop_loss = Some(0.85);
        let later = t0 + Duration::seconds(600);

        assert_eq!(
            kind(&position, 1.0 * 0.85, later),
            Some(TriggerKind::RegularStopLoss)
        );
        assert_eq!(kind(&position, 0.86, later), None);
    }

    #[test]
    fn test_trailing_stop_boundary_is_inclusive() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.trailing_stop = Some(0.1);
        position.highest_price = 1.5;
        let later = t0 + Duration::seconds(600);

        let boundary = 1.5 * (1.0 - 0.1);
        assert_eq!(
            kind(&position, boundary, later),
            Some(TriggerKind::TrailingStopLoss)
        );
        assert_eq!(kind(&position, boundary + 0.01, later), None);
    }

    #[test]
    fn test_stop_loss_preempts_trailing() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.stop_loss = Some(0.85);
        position.trailing_stop = Some(0.1);
        position.highest_price = 1.2;

        assert_eq!(
            kind(&position, 0.84, t0 + Duration::seconds(240)),
            Some(TriggerKind::RegularStopLoss)
        );
    }

    #[test]
    fn test_take_profit() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.take_profit = Some(1.5);
        let later = t0 + Duration::seconds(300);

        assert_eq!(kind(&position, 1.5, later), Some(TriggerKind::TakeProfit));
        assert_eq!(kind(&position, 1.49, later), None);
    }

    #[test]
    fn test_max_holding_time_at_unchanged_price() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.max_holding_secs = Some(3600);

        assert_eq!(kind(&position, 1.0, t0 + Duration::seconds(3599)), None);
        assert_eq!(
            kind(&position, 1.0, t0 + Duration::seconds(3600)),
            Some(TriggerKind::MaxHoldingTime)
        );
    }

    #[test]
    fn test_non_open_positions_never_trigger() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.stop_loss = Some(0.85);

        for status in [
            PositionStatus::Pending,
            PositionStatus::Closing,
            PositionStatus::Closed,
        ] {
            position.status = status;
            assert_eq!(kind(&position, 0.5, t0 + Duration::seconds(600)), None);
        }
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let t0 = Utc::now();
        let mut position = open_position(1.0, t0);
        position.trailing_stop = Some(0.1);
        position.highest_price = 1.3;
        let now = t0 + Duration::seconds(900);

        let first = evaluator().evaluate(&position, 1.17, now);
        for _ in 0..10 {
            assert_eq!(evaluator().evaluate(&position, 1.17, now), first);
        }
    }

    #[test]
    fn test_defaults_fill_missing_params() {
        let config = RiskConfig::default();
        let params = config.with_defaults(RiskParams {
            take_profit: Some(2.0),
            ..Default::default()
        });

        assert_eq!(params.take_profit, Some(2.0));
        assert_eq!(params.stop_loss, Some(0.85));
        assert_eq!(params.trailing_stop, Some(0.10));
        assert_eq!(params.max_holding_secs, Some(3600));
    }
}

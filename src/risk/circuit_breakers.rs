use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breakers that stop new entries after losses pile up.
/// Exits are never subject to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakers {
    pub max_daily_loss: f64,     // Quote units
    pub max_consecutive_losses: u32,
    pub max_position_size: f64,  // Entry notional, quote units
    pub max_daily_trades: u32,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            max_daily_loss: 100.0,
            max_consecutive_losses: 5,
            max_position_size: 1000.0,
            max_daily_trades: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradingState {
    pub daily_pnl: f64,
    pub consecutive_losses: u32,
    pub daily_trades: u32,
    pub last_reset: DateTime<Utc>,
}

impl TradingState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_pnl: 0.0,
            consecutive_losses: 0,
            daily_trades: 0,
            last_reset: now,
        }
    }

    /// Roll the daily counters over at the UTC day boundary
    pub fn reset_if_new_day(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.last_reset.date_naive() {
            tracing::info!(
                daily_pnl = self.daily_pnl,
                trades = self.daily_trades,
                "Resetting daily trading state"
            );
            self.daily_pnl = 0.0;
            self.daily_trades = 0;
            self.last_reset = now;
        }
    }

    /// Count a filled entry against the daily trade limit
    pub fn record_entry(&mut self) {
        self.daily_trades += 1;
    }

    /// Record the realized P&L of an exit
    ///
    /// Each partial fill is its own exit here, for both P&L and the loss
    /// streak. Trades are counted on entry, not here.
    pub fn record_exit(&mut self, pnl: f64) {
        self.daily_pnl += pnl;

        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerTrip {
    DailyLoss,
    ConsecutiveLosses,
    DailyTradeLimit,
    PositionSize,
}

impl CircuitBreakers {
    pub fn check(&self, state: &TradingState) -> Result<(), CircuitBreakerTrip> {
        if state.daily_pnl <= -self.max_daily_loss {
            return Err(CircuitBreakerTrip::DailyLoss);
        }

        if state.consecutive_losses >= self.max_consecutive_losses {
            return Err(CircuitBreakerTrip::ConsecutiveLosses);
        }

        if state.daily_trades >= self.max_daily_trades {
            return Err(CircuitBreakerTrip::DailyTradeLimit);
        }

        Ok(())
    }

    pub fn check_size(&self, notional: f64) -> Result<(), CircuitBreakerTrip> {
        if notional > self.max_position_size {
            return Err(CircuitBreakerTrip::PositionSize);
        }
        Ok(())
    }
}

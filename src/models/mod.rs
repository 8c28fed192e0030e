use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Check that an asset is a plausible Solana mint address (base58, 32 bytes encoded)
pub fn is_valid_asset_address(address: &str) -> bool {
    (32..=44).contains(&address.len()) && address.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// One observation from the price/liquidity feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub asset: String,
    pub price: f64,
    #[serde(default)]
    pub liquidity: f64, // Pool depth, in asset units
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Pending,
    Open,
    Closing,
    Closed,
}

/// The five price/time exit rules, listed in evaluation priority order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerKind {
    QuickLoss,
    RegularStopLoss,
    TrailingStopLoss,
    TakeProfit,
    MaxHoldingTime,
}

impl TriggerKind {
    /// Stop-loss style exits go out immediately, jitter would only deepen the loss
    pub fn urgency(self) -> Urgency {
        match self {
            TriggerKind::QuickLoss | TriggerKind::RegularStopLoss => Urgency::Immediate,
            TriggerKind::TrailingStopLoss | TriggerKind::TakeProfit | TriggerKind::MaxHoldingTime => {
                Urgency::Normal
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    Trigger(TriggerKind),
    Manual,
    Canceled,
}

/// A position (or pending limit order) for one asset
///
/// While `Pending`, `limit_price` distinguishes a resting limit order (`Some`)
/// from a market entry whose fill is in flight (`None`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub asset: String,
    pub status: PositionStatus,
    pub entry_price: f64,
    pub quantity: f64,
    pub highest_price: f64,
    pub last_price: Option<f64>,
    pub entry_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub limit_price: Option<f64>,
    pub take_profit: Option<f64>,  // Multiplier of entry price
    pub stop_loss: Option<f64>,    // Multiplier of entry price
    pub trailing_stop: Option<f64>, // Fraction below the highest price
    pub max_holding_secs: Option<i64>,
    pub in_flight: Option<Uuid>, // Intent currently executing against this record
    pub realized_pnl: f64,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn max_holding(&self) -> Option<Duration> {
        self.max_holding_secs.map(Duration::seconds)
    }

    pub fn is_limit_order(&self) -> bool {
        self.status == PositionStatus::Pending && self.limit_price.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    /// Unrealized P&L in percent at the last observed price
    pub fn unrealized_pnl_pct(&self) -> Option<f64> {
        if self.status != PositionStatus::Open || self.entry_price <= 0.0 {
            return None;
        }
        self.last_price
            .map(|price| (price - self.entry_price) / self.entry_price * 100.0)
    }
}

/// Risk fields shared by `buy`, `limit` and `update`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskParams {
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub trailing_stop: Option<f64>,
    #[serde(default)]
    pub max_holding_secs: Option<i64>,
}

impl RiskParams {
    pub fn is_empty(&self) -> bool {
        self.take_profit.is_none()
            && self.stop_loss.is_none()
            && self.trailing_stop.is_none()
            && self.max_holding_secs.is_none()
    }
}

/// Exit condition produced by the risk evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct RiskTrigger {
    pub kind: TriggerKind,
    pub asset: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Urgency {
    Immediate,
    Normal,
}

/// Request from the coordinator to the execution guard, consumed exactly once
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TradeIntent {
    pub id: Uuid,
    pub asset: String,
    pub direction: Direction,
    pub quantity: f64,
    pub urgency: Urgency,
    pub reference_price: f64,
    pub observed_at: DateTime<Utc>, // Timestamp of the sample that caused the intent
}

impl TradeIntent {
    pub fn new(
        asset: &str,
        direction: Direction,
        quantity: f64,
        urgency: Urgency,
        reference_price: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset: asset.to_string(),
            direction,
            quantity,
            urgency,
            reference_price,
            observed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubmissionChannel {
    ProtectedRelay,
    Direct,
}

/// What the submission collaborator reports for one signed transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FillResult {
    pub quantity_filled: f64,
    pub price_realized: f64,
}

/// The manual command surface; one command is one transition or read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Buy {
        asset: String,
        amount: f64,
        #[serde(flatten)]
        risk: RiskParams,
    },
    Sell {
        asset: String,
        #[serde(default)]
        amount: Option<f64>,
    },
    Limit {
        asset: String,
        amount: f64,
        price: f64,
        #[serde(flatten)]
        risk: RiskParams,
    },
    Update {
        asset: String,
        #[serde(flatten)]
        risk: RiskParams,
    },
    Cancel {
        asset: String,
    },
    Status {
        asset: String,
    },
}

impl Command {
    pub fn asset(&self) -> &str {
        match self {
            Command::Buy { asset, .. }
            | Command::Sell { asset, .. }
            | Command::Limit { asset, .. }
            | Command::Update { asset, .. }
            | Command::Cancel { asset }
            | Command::Status { asset } => asset,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Buy { .. } => "buy",
            Command::Sell { .. } => "sell",
            Command::Limit { .. } => "limit",
            Command::Update { .. } => "update",
            Command::Cancel { .. } => "cancel",
            Command::Status { .. } => "status",
        }
    }
}

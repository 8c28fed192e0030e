//! Boundary to the transaction submission and signing collaborators

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

use super::guard::SubIntent;
use super::SampleBuffer;
use crate::error::{Result, TradeError};
use crate::models::{Direction, FillResult, SubmissionChannel};

/// A sub-intent after the key service has signed it
#[derive(Debug, Clone, Serialize)]
pub struct SignedIntent {
    pub intent_id: Uuid,
    pub leg: usize,
    pub asset: String,
    pub direction: Direction,
    pub quantity: f64,
    pub reference_price: f64,
    pub payload: Vec<u8>,
}

/// Opaque signing service
#[async_trait]
pub trait IntentSigner: Send + Sync {
    /// Failures must surface as `TradeError::SigningFailed`
    async fn sign(&self, leg: &SubIntent) -> Result<SignedIntent>;
}

/// Transaction submission collaborator
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    async fn submit(&self, tx: &SignedIntent, channel: SubmissionChannel) -> Result<FillResult>;

    /// Whether a protected relay path is currently reachable
    fn relay_available(&self) -> bool;
}

/// Signs by serializing the leg; stands in for a wallet in paper trading
#[derive(Debug, Default, Clone)]
pub struct PaperSigner;

#[async_trait]
impl IntentSigner for PaperSigner {
    async fn sign(&self, leg: &SubIntent) -> Result<SignedIntent> {
        let payload =
            serde_json::to_vec(leg).map_err(|e| TradeError::SigningFailed(e.to_string()))?;

        Ok(SignedIntent {
            intent_id: leg.parent,
            leg: leg.index,
            asset: leg.asset.clone(),
            direction: leg.direction,
            quantity: leg.quantity,
            reference_price: leg.reference_price,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub intent_id: Uuid,
    pub leg: usize,
    pub direction: Direction,
    pub quantity: f64,
    pub channel: SubmissionChannel,
}

/// Fills every submission against the latest observed price
pub struct PaperSubmitter {
    samples: SampleBuffer,
    fill_ratio: f64,
    relay: bool,
    log: Mutex<Vec<SubmissionRecord>>,
}

impl PaperSubmitter {
    pub fn new(samples: SampleBuffer) -> Self {
        Self {
            samples,
            fill_ratio: 1.0,
            relay: true,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Fill only this fraction of each submission
    pub fn with_fill_ratio(mut self, fill_ratio: f64) -> Self {
        self.fill_ratio = fill_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TxSubmitter for PaperSubmitter {
    async fn submit(&self, tx: &SignedIntent, channel: SubmissionChannel) -> Result<FillResult> {
        let price = self
            .samples
            .latest(&tx.asset)?
            .map(|s| s.price)
            .unwrap_or(tx.reference_price);

        self.log
            .lock()
            .map_err(|e| TradeError::Internal(e.to_string()))?
            .push(SubmissionRecord {
                intent_id: tx.intent_id,
                leg: tx.leg,
                direction: tx.direction,
                quantity: tx.quantity,
                channel,
            });

        tracing::info!(
            asset = %tx.asset,
            direction = ?tx.direction,
            quantity = tx.quantity,
            price,
            channel = ?channel,
            "Paper fill"
        );

        Ok(FillResult {
            quantity_filled: tx.quantity * self.fill_ratio,
            price_realized: price,
        })
    }

    fn relay_available(&self) -> bool {
        self.relay
    }
}

//! MEV protection layer between a trade intent and the submission collaborator
//!
//! An intent is turned into a plan of legs (split by observed liquidity, each
//! with its own random delay), and every leg is screened for sandwich patterns,
//! signed, and submitted with a deadline and bounded retries. Whatever
//! happens, the caller gets exactly one `ExecutionReport` per intent.

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

use super::submit::{IntentSigner, SignedIntent, TxSubmitter};
use super::SampleBuffer;
use crate::error::{Result, TradeError};
use crate::models::{
    Direction, FillResult, PriceSample, SubmissionChannel, TradeIntent, Urgency,
};

// Samples inspected for sandwich patterns before each leg
const SANDWICH_LOOKBACK: usize = 3;
const FILL_EPSILON: f64 = 1e-9;

type SubmissionRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Largest leg as a fraction of the latest liquidity estimate
    pub split_liquidity_fraction: f64,
    pub max_splits: usize,
    /// Unexplained relative price move between two samples that counts as a sandwich
    pub sandwich_price_delta: f64,
    pub sandwich_max_rechecks: u32,
    pub sample_interval_ms: u64,
    pub submit_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub prefer_relay: bool,
    pub max_submissions_per_sec: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            jitter_min_ms: 100,
            jitter_max_ms: 2000,
            split_liquidity_fraction: 0.01, // Max 1% of liquidity per leg
            max_splits: 5,
            sandwich_price_delta: 0.03,
            sandwich_max_rechecks: 3,
            sample_interval_ms: 400, // About one Solana slot
            submit_timeout_ms: 5000,
            max_attempts: 3,
            backoff_base_ms: 250,
            prefer_relay: true,
            max_submissions_per_sec: 10,
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(TradeError::Configuration(format!(
                "jitter range is inverted: {}ms > {}ms",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        if !(self.split_liquidity_fraction > 0.0 && self.split_liquidity_fraction <= 1.0) {
            return Err(TradeError::Configuration(
                "split_liquidity_fraction must be in (0, 1]".to_string(),
            ));
        }
        if self.max_splits == 0 || self.max_attempts == 0 || self.max_submissions_per_sec == 0 {
            return Err(TradeError::Configuration(
                "max_splits, max_attempts and max_submissions_per_sec must be positive"
                    .to_string(),
            ));
        }
        if self.sandwich_price_delta <= 0.0 {
            return Err(TradeError::Configuration(
                "sandwich_price_delta must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// One leg of a split intent
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubIntent {
    pub parent: Uuid,
    pub index: usize,
    pub asset: String,
    pub direction: Direction,
    pub quantity: f64,
    pub urgency: Urgency,
    pub reference_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLeg {
    pub leg: SubIntent,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub intent_id: Uuid,
    pub legs: Vec<PlannedLeg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardWarning {
    /// Submitted although the sandwich pattern persisted through every recheck
    SandwichRiskAccepted { leg: usize, rechecks: u32 },
    /// The relay failed and the leg moved to direct submission
    RelayFallback { leg: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegOutcome {
    pub index: usize,
    pub requested: f64,
    pub filled: f64,
    pub price: Option<f64>,
    pub channel: Option<SubmissionChannel>,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionFailure {
    Signing(String),
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Full,
    Partial,
    Failed,
}

/// The single logical result of one intent, aggregated over its legs
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub intent_id: Uuid,
    pub asset: String,
    pub direction: Direction,
    pub requested: f64,
    pub filled: f64,
    pub average_price: Option<f64>,
    pub legs: Vec<LegOutcome>,
    pub warnings: Vec<GuardWarning>,
    pub failure: Option<ExecutionFailure>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Report for an intent that never reached the submitter
    pub fn not_submitted(intent: &TradeIntent, reason: impl Into<String>) -> Self {
        Self {
            intent_id: intent.id,
            asset: intent.asset.clone(),
            direction: intent.direction,
            requested: intent.quantity,
            filled: 0.0,
            average_price: None,
            legs: Vec::new(),
            warnings: Vec::new(),
            failure: Some(ExecutionFailure::Exhausted {
                attempts: 0,
                last_error: reason.into(),
            }),
            completed_at: Utc::now(),
        }
    }

    pub fn outcome(&self) -> FillOutcome {
        if self.filled <= FILL_EPSILON {
            FillOutcome::Failed
        } else if self.requested - self.filled > FILL_EPSILON * self.requested.max(1.0) {
            FillOutcome::Partial
        } else {
            FillOutcome::Full
        }
    }

    /// Channels actually used, in leg order
    pub fn channels(&self) -> Vec<SubmissionChannel> {
        self.legs.iter().filter_map(|l| l.channel).collect()
    }

    pub fn failure_reason(&self) -> String {
        match &self.failure {
            Some(ExecutionFailure::Signing(reason)) => format!("signing failed: {}", reason),
            Some(ExecutionFailure::Exhausted {
                attempts,
                last_error,
            }) => format!("gave up after {} attempts: {}", attempts, last_error),
            None if self.outcome() == FillOutcome::Partial => "partial fill".to_string(),
            None => "no fill".to_string(),
        }
    }

    /// Map a failed or partial report to the caller-facing error
    pub fn to_error(&self) -> TradeError {
        match &self.failure {
            Some(ExecutionFailure::Signing(reason)) if self.filled <= FILL_EPSILON => {
                TradeError::SigningFailed(reason.clone())
            }
            _ => TradeError::ExecutionFailed {
                asset: self.asset.clone(),
                filled: self.filled,
                reason: self.failure_reason(),
            },
        }
    }
}

/// Split `quantity` into at most `max_splits` equal legs, none larger than
/// `liquidity * fraction` when that is achievable
pub fn split_sizes(quantity: f64, liquidity: f64, fraction: f64, max_splits: usize) -> Vec<f64> {
    let max_leg = liquidity * fraction;
    if !(max_leg > 0.0) || quantity <= max_leg || max_splits <= 1 {
        return vec![quantity];
    }

    let legs = ((quantity / max_leg).ceil() as usize).clamp(1, max_splits);
    let leg = quantity / legs as f64;
    let mut sizes = vec![leg; legs];

    // Last leg absorbs rounding so the legs sum to the requested quantity
    let allocated: f64 = sizes[..legs - 1].iter().sum();
    sizes[legs - 1] = quantity - allocated;
    sizes
}

/// Look for a price jump between two consecutive samples, at most one
/// interval apart, that the liquidity change does not explain
pub fn detect_sandwich(samples: &[PriceSample], max_delta: f64, interval: chrono::Duration) -> bool {
    samples.windows(2).any(|pair| {
        let (before, after) = (&pair[0], &pair[1]);
        if after.timestamp - before.timestamp > interval || before.price <= 0.0 {
            return false;
        }

        let price_move = ((after.price - before.price) / before.price).abs();
        let liquidity_move = if before.liquidity > 0.0 {
            ((after.liquidity - before.liquidity) / before.liquidity).abs()
        } else {
            0.0
        };

        price_move - liquidity_move > max_delta
    })
}

/// Delay after the `attempt`-th failure: base, 2x base, 4x base, ...
fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

pub struct ExecutionGuard {
    config: GuardConfig,
    submitter: Arc<dyn TxSubmitter>,
    signer: Arc<dyn IntentSigner>,
    samples: SampleBuffer,
    rng: Mutex<StdRng>,
    rate_limiter: SubmissionRateLimiter,
}

impl ExecutionGuard {
    /// # Arguments
    /// * `rng` - Source of jitter; seed it to make delays reproducible
    pub fn new(
        config: GuardConfig,
        submitter: Arc<dyn TxSubmitter>,
        signer: Arc<dyn IntentSigner>,
        samples: SampleBuffer,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;

        let per_second = NonZeroU32::new(config.max_submissions_per_sec).ok_or_else(|| {
            TradeError::Configuration("max_submissions_per_sec must be positive".to_string())
        })?;

        Ok(Self {
            config,
            submitter,
            signer,
            samples,
            rng: Mutex::new(rng),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Decide leg sizes and delays for an intent
    pub fn plan(&self, intent: &TradeIntent) -> ExecutionPlan {
        let liquidity = match self.samples.latest(&intent.asset) {
            Ok(sample) => sample.map(|s| s.liquidity).unwrap_or(0.0),
            Err(e) => {
                tracing::warn!(asset = %intent.asset, "No liquidity estimate, not splitting: {}", e);
                0.0
            }
        };

        let sizes = split_sizes(
            intent.quantity,
            liquidity,
            self.config.split_liquidity_fraction,
            self.config.max_splits,
        );

        let legs = sizes
            .into_iter()
            .enumerate()
            .map(|(index, quantity)| PlannedLeg {
                delay: self.jitter(intent.urgency),
                leg: SubIntent {
                    parent: intent.id,
                    index,
                    asset: intent.asset.clone(),
                    direction: intent.direction,
                    quantity,
                    urgency: intent.urgency,
                    reference_price: intent.reference_price,
                },
            })
            .collect();

        ExecutionPlan {
            intent_id: intent.id,
            legs,
        }
    }

    fn jitter(&self, urgency: Urgency) -> Duration {
        if urgency == Urgency::Immediate {
            return Duration::ZERO;
        }

        let (min, max) = (self.config.jitter_min_ms, self.config.jitter_max_ms);
        let millis = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(min..=max),
            Err(_) => max,
        };
        Duration::from_millis(millis)
    }

    /// Run an intent to completion. Never fails: problems end up in the report.
    pub async fn execute(&self, intent: TradeIntent) -> ExecutionReport {
        let plan = self.plan(&intent);

        tracing::info!(
            asset = %intent.asset,
            intent = %intent.id,
            direction = ?intent.direction,
            quantity = intent.quantity,
            urgency = ?intent.urgency,
            legs = plan.legs.len(),
            "Executing trade intent"
        );

        let mut legs = Vec::with_capacity(plan.legs.len());
        let mut warnings = Vec::new();
        let mut failure = None;

        for PlannedLeg { leg, delay } in plan.legs {
            if !delay.is_zero() {
                sleep(delay).await;
            }

            self.screen_for_sandwich(&leg, &mut warnings).await;

            let signed = match self.signer.sign(&leg).await {
                Ok(signed) => signed,
                Err(e) => {
                    tracing::error!(asset = %leg.asset, leg = leg.index, "Signing failed: {}", e);
                    legs.push(LegOutcome {
                        index: leg.index,
                        requested: leg.quantity,
                        filled: 0.0,
                        price: None,
                        channel: None,
                        attempts: 0,
                        error: Some(e.to_string()),
                    });
                    failure = Some(ExecutionFailure::Signing(e.to_string()));
                    break;
                }
            };

            match self.submit_with_retries(&signed, &mut warnings).await {
                Ok((fill, channel, attempts)) => {
                    legs.push(LegOutcome {
                        index: leg.index,
                        requested: leg.quantity,
                        filled: fill.quantity_filled.clamp(0.0, leg.quantity),
                        price: Some(fill.price_realized),
                        channel: Some(channel),
                        attempts,
                        error: None,
                    });
                }
                Err((attempts, last_error)) => {
                    legs.push(LegOutcome {
                        index: leg.index,
                        requested: leg.quantity,
                        filled: 0.0,
                        price: None,
                        channel: None,
                        attempts,
                        error: Some(last_error.clone()),
                    });
                    // Later legs are not sent once one has exhausted its retries
                    failure = Some(ExecutionFailure::Exhausted {
                        attempts,
                        last_error,
                    });
                    break;
                }
            }
        }

        let filled: f64 = legs.iter().map(|l| l.filled).sum();
        let notional: f64 = legs
            .iter()
            .filter_map(|l| l.price.map(|p| p * l.filled))
            .sum();
        let average_price = (filled > FILL_EPSILON).then(|| notional / filled);

        let report = ExecutionReport {
            intent_id: intent.id,
            asset: intent.asset,
            direction: intent.direction,
            requested: intent.quantity,
            filled,
            average_price,
            legs,
            warnings,
            failure,
            completed_at: Utc::now(),
        };

        tracing::info!(
            asset = %report.asset,
            intent = %report.intent_id,
            outcome = ?report.outcome(),
            filled = report.filled,
            requested = report.requested,
            channels = ?report.channels(),
            "Trade intent resolved"
        );

        report
    }

    /// Defer while the recent samples look like a sandwich, up to the recheck
    /// budget, then let the leg through with a warning
    async fn screen_for_sandwich(&self, leg: &SubIntent, warnings: &mut Vec<GuardWarning>) {
        let interval = chrono::Duration::milliseconds(self.config.sample_interval_ms as i64);
        let mut rechecks = 0;

        loop {
            let recent = match self.samples.recent(&leg.asset, SANDWICH_LOOKBACK) {
                Ok(recent) => recent,
                Err(e) => {
                    tracing::warn!(asset = %leg.asset, "Cannot read samples for sandwich check: {}", e);
                    return;
                }
            };

            if !detect_sandwich(&recent, self.config.sandwich_price_delta, interval) {
                return;
            }

            if rechecks >= self.config.sandwich_max_rechecks {
                tracing::warn!(
                    asset = %leg.asset,
                    leg = leg.index,
                    rechecks,
                    "Sandwich pattern persists, submitting anyway (SandwichRiskAccepted)"
                );
                warnings.push(GuardWarning::SandwichRiskAccepted {
                    leg: leg.index,
                    rechecks,
                });
                return;
            }

            rechecks += 1;
            tracing::debug!(asset = %leg.asset, leg = leg.index, rechecks, "Sandwich pattern detected, deferring");
            sleep(self.config.sample_interval()).await;
        }
    }

    async fn submit_with_retries(
        &self,
        signed: &SignedIntent,
        warnings: &mut Vec<GuardWarning>,
    ) -> std::result::Result<(FillResult, SubmissionChannel, u32), (u32, String)> {
        let deadline = Duration::from_millis(self.config.submit_timeout_ms);
        let mut channel = if self.config.prefer_relay && self.submitter.relay_available() {
            SubmissionChannel::ProtectedRelay
        } else {
            SubmissionChannel::Direct
        };
        let mut last_error = String::from("not submitted");

        for attempt in 1..=self.config.max_attempts {
            self.rate_limiter.until_ready().await;

            match timeout(deadline, self.submitter.submit(signed, channel)).await {
                Ok(Ok(fill)) => {
                    if attempt > 1 {
                        tracing::info!(
                            asset = %signed.asset,
                            leg = signed.leg,
                            "✓ Submitted after {} attempts",
                            attempt
                        );
                    }
                    return Ok((fill, channel, attempt));
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("deadline of {}ms expired", self.config.submit_timeout_ms)
                }
            }

            tracing::warn!(
                asset = %signed.asset,
                leg = signed.leg,
                channel = ?channel,
                "Attempt {}/{} failed: {}",
                attempt,
                self.config.max_attempts,
                last_error
            );

            if channel == SubmissionChannel::ProtectedRelay {
                channel = SubmissionChannel::Direct;
                warnings.push(GuardWarning::RelayFallback { leg: signed.leg });
            }

            if attempt < self.config.max_attempts {
                sleep(backoff(self.config.backoff_base_ms, attempt)).await;
            }
        }

        Err((self.config.max_attempts, last_error))
    }
}

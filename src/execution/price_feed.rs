use super::SampleBuffer;
use crate::error::Result;
use crate::models::PriceSample;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Normalizes the raw sample stream into a strictly increasing sequence per asset
///
/// The feed is at-least-once: duplicates and late samples are dropped here so
/// downstream evaluation only ever moves forward in time.
pub struct PriceFeed {
    buffer: SampleBuffer,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl PriceFeed {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            last_seen: HashMap::new(),
        }
    }

    /// Accept a sample if it is valid and newer than the last one for its asset
    ///
    /// Returns `None` for rejected samples.
    pub fn ingest(&mut self, sample: PriceSample) -> Result<Option<PriceSample>> {
        if !sample.price.is_finite() || sample.price <= 0.0 {
            tracing::warn!(asset = %sample.asset, price = sample.price, "Dropping invalid price sample");
            return Ok(None);
        }

        if let Some(last) = self.last_seen.get(&sample.asset) {
            if sample.timestamp <= *last {
                tracing::debug!(
                    asset = %sample.asset,
                    timestamp = %sample.timestamp,
                    last = %last,
                    "Dropping stale or duplicate sample"
                );
                return Ok(None);
            }
        }

        let mut sample = sample;
        if !sample.liquidity.is_finite() || sample.liquidity < 0.0 {
            sample.liquidity = 0.0;
        }

        self.last_seen
            .insert(sample.asset.clone(), sample.timestamp);
        self.buffer.push(sample.clone())?;

        Ok(Some(sample))
    }

    pub fn current(&self, asset: &str) -> Result<Option<PriceSample>> {
        self.buffer.latest(asset)
    }

    /// Running maximum over the buffered samples at or after `since`
    pub fn max_since(&self, asset: &str, since: DateTime<Utc>) -> Result<Option<f64>> {
        let samples = self.buffer.recent(asset, usize::MAX)?;
        Ok(samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .map(|s| s.price)
            .fold(None, |max: Option<f64>, p| Some(max.map_or(p, |m| m.max(p)))))
    }
}

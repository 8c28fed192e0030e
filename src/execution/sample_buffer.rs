use crate::error::{Result, TradeError};
use crate::models::PriceSample;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Thread-safe rolling window of recent samples per asset
///
/// The price feed writes it; the execution guard reads it from its own tasks
/// to size splits and look for sandwich patterns. Clones share the same data.
#[derive(Clone)]
pub struct SampleBuffer {
    data: Arc<RwLock<HashMap<String, VecDeque<PriceSample>>>>,
    max_samples: usize,
}

impl SampleBuffer {
    /// Create a new sample buffer
    ///
    /// # Arguments
    /// * `max_samples` - Maximum number of samples to keep per asset
    pub fn new(max_samples: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_samples: max_samples.max(1),
        }
    }

    /// Append a sample, evicting the oldest once the window is full
    pub fn push(&self, sample: PriceSample) -> Result<()> {
        let mut data = self.data.write().map_err(poisoned)?;

        let samples = data
            .entry(sample.asset.clone())
            .or_insert_with(VecDeque::new);

        samples.push_back(sample);

        while samples.len() > self.max_samples {
            samples.pop_front();
        }

        Ok(())
    }

    /// The N most recent samples for an asset, oldest first
    pub fn recent(&self, asset: &str, n: usize) -> Result<Vec<PriceSample>> {
        let data = self.data.read().map_err(poisoned)?;

        Ok(data
            .get(asset)
            .map(|deque| deque.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default())
    }

    pub fn latest(&self, asset: &str) -> Result<Option<PriceSample>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(asset).and_then(|deque| deque.back().cloned()))
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> TradeError {
    TradeError::Internal(format!("sample buffer lock poisoned: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample(asset: &str, price: f64, offset_secs: i64) -> PriceSample {
        PriceSample {
            asset: asset.to_string(),
            price,
            liquidity: 1000.0,
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_new_buffer() {
        let buffer = SampleBuffer::new(100);
        assert_eq!(buffer.max_samples, 100);
        assert!(buffer.latest("SOL").unwrap().is_none());
    }

    #[test]
    fn test_window_limit() {
        let buffer = SampleBuffer::new(5);

        for i in 0..10 {
            buffer.push(sample("SOL", 100.0 + i as f64, i)).unwrap();
        }

        let samples = buffer.recent("SOL", 100).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].price, 105.0);
        assert_eq!(samples[4].price, 109.0);
    }

    #[test]
    fn test_recent_and_latest() {
        let buffer = SampleBuffer::new(100);

        for i in 0..10 {
            buffer.push(sample("SOL", 100.0 + i as f64, i)).unwrap();
        }

        let recent = buffer.recent("SOL", 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].price, 107.0);
        assert_eq!(recent[2].price, 109.0);
        assert_eq!(buffer.latest("SOL").unwrap().unwrap().price, 109.0);
        assert!(buffer.latest("JUP").unwrap().is_none());
    }

    #[test]
    fn test_assets_are_independent() {
        let buffer = SampleBuffer::new(100);

        buffer.push(sample("SOL", 100.0, 0)).unwrap();
        buffer.push(sample("SOL", 101.0, 1)).unwrap();
        buffer.push(sample("JUP", 1.0, 0)).unwrap();

        assert_eq!(buffer.recent("SOL", usize::MAX).unwrap().len(), 2);
        assert_eq!(buffer.recent("JUP", usize::MAX).unwrap().len(), 1);
        assert_eq!(buffer.latest("JUP").unwrap().unwrap().price, 1.0);
        assert_eq!(buffer.recent("BONK", usize::MAX).unwrap().len(), 0);
    }

    #[test]
    fn test_clones_share_data() {
        use std::thread;

        let buffer = SampleBuffer::new(100);
        let writer = buffer.clone();

        let handle = thread::spawn(move || {
            for i in 0..50 {
                writer.push(sample("SOL", 100.0 + i as f64, i)).unwrap();
            }
        });

        for i in 50..100 {
            buffer.push(sample("SOL", 100.0 + i as f64, i)).unwrap();
        }

        handle.join().unwrap();

        assert_eq!(buffer.recent("SOL", usize::MAX).unwrap().len(), 100);
    }
}

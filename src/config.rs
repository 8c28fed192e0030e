//! Layered configuration: built-in defaults, an optional TOML file, then
//! `TRADEGUARD__SECTION__FIELD` environment overrides

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TradeError};
use crate::execution::GuardConfig;
use crate::risk::{CircuitBreakers, RiskConfig};

const ENV_PREFIX: &str = "TRADEGUARD";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound of the coordinator's event queue
    pub inbox_capacity: usize,
    pub tick_interval_ms: u64,
    /// Samples kept per asset for sandwich checks and split sizing
    pub sample_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
            tick_interval_ms: 1000,
            sample_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub risk: RiskConfig,
    pub guard: GuardConfig,
    pub breakers: CircuitBreakers,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration
    ///
    /// # Arguments
    /// * `path` - Optional TOML file; a missing path is an error, `None` skips the file layer
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let path = path.to_str().ok_or_else(|| {
                TradeError::Configuration(format!("non UTF-8 config path: {}", path.display()))
            })?;
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document, used by tests and `check-config`
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;
        if !(risk.quick_loss_threshold > 0.0 && risk.quick_loss_threshold < 1.0) {
            return Err(TradeError::Configuration(
                "risk.quick_loss_threshold must be in (0, 1)".to_string(),
            ));
        }
        if risk.quick_loss_window_secs < 0 {
            return Err(TradeError::Configuration(
                "risk.quick_loss_window_secs must not be negative".to_string(),
            ));
        }
        if let Some(sl) = risk.default_stop_loss {
            if !(sl > 0.0 && sl < 1.0) {
                return Err(TradeError::Configuration(
                    "risk.default_stop_loss must be a multiplier in (0, 1)".to_string(),
                ));
            }
        }
        if let Some(trailing) = risk.default_trailing_stop {
            if !(trailing > 0.0 && trailing < 1.0) {
                return Err(TradeError::Configuration(
                    "risk.default_trailing_stop must be in (0, 1)".to_string(),
                ));
            }
        }

        self.guard.validate()?;

        if self.engine.inbox_capacity == 0 || self.engine.tick_interval_ms == 0 {
            return Err(TradeError::Configuration(
                "engine.inbox_capacity and engine.tick_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

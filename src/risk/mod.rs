// Risk management module
pub mod circuit_breakers;
pub mod evaluator;

pub use circuit_breakers::{CircuitBreakerTrip, CircuitBreakers, TradingState};
pub use evaluator::{RiskConfig, RiskEvaluator};

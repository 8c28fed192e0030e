// Core modules
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod risk;

// Re-export commonly used types
pub use error::{Result, TradeError};
pub use models::*;

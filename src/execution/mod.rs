// Position state, price intake and MEV-protected order execution
pub mod coordinator;
pub mod guard;
pub mod position_store;
pub mod price_feed;
pub mod sample_buffer;
pub mod submit;

pub use coordinator::{CoordinatorHandle, TradeCoordinator};
pub use guard::{
    ExecutionFailure, ExecutionGuard, ExecutionPlan, ExecutionReport, FillOutcome, GuardConfig,
    GuardWarning, LegOutcome, SubIntent,
};
pub use position_store::{PositionMutation, PositionStore};
pub use price_feed::PriceFeed;
pub use sample_buffer::SampleBuffer;
pub use submit::{IntentSigner, PaperSigner, PaperSubmitter, SignedIntent, TxSubmitter};

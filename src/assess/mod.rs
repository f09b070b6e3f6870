//! The assessment pipeline: per-pair resolution, comparison, arbitration
//! and incremental commits to the verdict store.

mod orchestrator;
mod resolve;
mod types;

pub use orchestrator::Orchestrator;
pub use types::{
    ObserverError, PairError, PairEvent, PairObserver, PairOutcome, RunError, RunOptions,
    RunSummary,
};

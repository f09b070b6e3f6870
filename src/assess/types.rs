//! Options, outcomes and errors for an assessment run.

use std::fmt;

use uuid::Uuid;

use crate::cache::{CacheError, CallRole};
use crate::gateway::ProviderError;
use crate::store::StoreError;
use crate::verdict::ExtractError;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Re-assess pairs whose record is already complete.
    pub override_complete: bool,
    /// Ignore existing cache files. Fresh responses are still written.
    pub no_cache: bool,
    pub run_id: Uuid,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            override_complete: false,
            no_cache: false,
            run_id: Uuid::new_v4(),
        }
    }
}

/// What happened to one document × metric pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Record already complete; no calls made.
    Skipped,
    /// Both evaluators chose `value`; evaluator A's verdict became final.
    Agreed { value: String },
    /// Evaluators disagreed and the arbiter chose `value`.
    Arbitrated {
        evaluator_a: String,
        evaluator_b: String,
        value: String,
    },
    /// The pair failed; nothing was written for it.
    Aborted { reason: String },
}

/// Reported to a [`PairObserver`] after every pair.
#[derive(Debug, Clone)]
pub struct PairEvent {
    pub document: String,
    pub metric: String,
    pub outcome: PairOutcome,
}

impl fmt::Display for PairEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}: ", self.document, self.metric)?;
        match &self.outcome {
            PairOutcome::Skipped => write!(f, "skipped (complete)"),
            PairOutcome::Agreed { value } => write!(f, "agreed on {value}"),
            PairOutcome::Arbitrated {
                evaluator_a,
                evaluator_b,
                value,
            } => write!(f, "arbitrated {evaluator_a} vs {evaluator_b} -> {value}"),
            PairOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("{0}")]
    Message(String),
}

/// Per-pair side effects such as progress output.
#[async_trait::async_trait]
pub trait PairObserver: Send + Sync {
    async fn on_pair(&self, event: PairEvent) -> Result<(), ObserverError>;
}

/// Why a single pair was abandoned. Never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum PairError {
    #[error("{role} call failed: {source}")]
    Provider {
        role: CallRole,
        #[source]
        source: ProviderError,
    },
    #[error("{role} output malformed after correction: {source}")]
    Malformed {
        role: CallRole,
        #[source]
        source: ExtractError,
    },
}

/// Fatal run errors: the store or cache could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pairs: usize,
    pub skipped: usize,
    pub agreed: usize,
    pub arbitrated: usize,
    pub aborted: usize,
    /// Live provider calls, including correction retries.
    pub provider_calls: usize,
    pub cache_hits: usize,
}

impl RunSummary {
    pub(crate) fn record(&mut self, outcome: &PairOutcome) {
        self.pairs += 1;
        match outcome {
            PairOutcome::Skipped => self.skipped += 1,
            PairOutcome::Agreed { .. } => self.agreed += 1,
            PairOutcome::Arbitrated { .. } => self.arbitrated += 1,
            PairOutcome::Aborted { .. } => self.aborted += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pairs: {} skipped, {} agreed, {} arbitrated, {} aborted ({} provider calls, {} cache hits)",
            self.pairs,
            self.skipped,
            self.agreed,
            self.arbitrated,
            self.aborted,
            self.provider_calls,
            self.cache_hits
        )
    }
}

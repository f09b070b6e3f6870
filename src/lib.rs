#![forbid(unsafe_code)]

//! # codebook-assess
//!
//! Assess research documents against metric codebooks with two independent
//! LLM evaluators and a third arbiter call when they disagree.
//!
//! Each document × metric pair yields three verdicts (evaluator A,
//! evaluator B, final) in a JSON verdict store that survives across runs:
//! complete records are skipped, raw provider responses are cached on disk,
//! and a malformed response gets exactly one corrective retry.

pub mod assess;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod evaluator;
pub mod gateway;
pub mod prompts;
pub mod report;
pub mod store;
pub mod verdict;

pub use assess::{
    ObserverError, Orchestrator, PairError, PairEvent, PairObserver, PairOutcome, RunError,
    RunOptions, RunSummary,
};
pub use cache::{CallRole, FsResponseCache, ResponseCache, ResponseCacheKey};
pub use config::{PanelConfig, PanelOverrides};
pub use corpus::{discover_documents, discover_metrics, Document, Metric};
pub use evaluator::{Arbiter, EvaluationPanel, Evaluator, GatewayArbiter, GatewayEvaluator};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use report::{summarize, StoreSummary};
pub use store::{AssessmentRecord, VerdictStore};
pub use verdict::{extract_verdict, Verdict};

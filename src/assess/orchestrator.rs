//! Drives every document × metric pair through evaluation, comparison,
//! arbitration and commit.
//!
//! Documents are the outer loop and metrics the inner loop, both in the
//! order given. Pairs run strictly one after another and the store is
//! rewritten after every commit.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{stem_collisions, CallRole, ResponseCache};
use crate::corpus::{Document, Metric};
use crate::evaluator::EvaluationPanel;
use crate::store::VerdictStore;

use super::resolve::{resolve, CallSite, PairCost, StepError};
use super::types::{
    PairError, PairEvent, PairObserver, PairOutcome, RunError, RunOptions, RunSummary,
};

pub struct Orchestrator {
    panel: EvaluationPanel,
    cache: Arc<dyn ResponseCache>,
    store: VerdictStore,
    options: RunOptions,
    observer: Option<Arc<dyn PairObserver>>,
}

impl Orchestrator {
    pub fn new(
        panel: EvaluationPanel,
        cache: Arc<dyn ResponseCache>,
        store: VerdictStore,
        options: RunOptions,
    ) -> Self {
        Self {
            panel,
            cache,
            store,
            options,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PairObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &VerdictStore {
        &self.store
    }

    pub fn into_store(self) -> VerdictStore {
        self.store
    }

    /// Assess the cross product of `documents` and `metrics`.
    ///
    /// Pair failures are logged and skipped. Store and cache I/O failures
    /// stop the run.
    pub async fn run(
        &mut self,
        documents: &[Document],
        metrics: &[Metric],
    ) -> Result<RunSummary, RunError> {
        info!(
            run_id = %self.options.run_id,
            documents = documents.len(),
            metrics = metrics.len(),
            override_complete = self.options.override_complete,
            no_cache = self.options.no_cache,
            "Starting assessment run"
        );

        let documents: Vec<Document> = documents.iter().map(|d| self.keyed(d)).collect();
        let pairs = documents
            .iter()
            .flat_map(|d| metrics.iter().map(move |m| (d.cache_key.as_str(), m.name.as_str())));
        for collision in stem_collisions(pairs) {
            warn!(
                stem = %collision.stem,
                first = ?collision.first,
                second = ?collision.second,
                "Cache file name shared by two pairs"
            );
        }

        let mut summary = RunSummary::default();
        for document in &documents {
            for metric in metrics {
                let (outcome, cost) = self.assess_pair(document, metric).await?;
                summary.record(&outcome);
                summary.provider_calls += cost.provider_calls;
                summary.cache_hits += cost.cache_hits;
                self.notify(document, metric, outcome).await;
            }
        }

        self.store.save()?;
        info!(run_id = %self.options.run_id, %summary, "Assessment run finished");
        Ok(summary)
    }

    /// Cache files are named by citation key when the store has one.
    fn keyed(&self, document: &Document) -> Document {
        match self.store.citation_key(&document.id) {
            Some(key) => document.clone().with_cache_key(key),
            None => document.clone(),
        }
    }

    async fn assess_pair(
        &mut self,
        document: &Document,
        metric: &Metric,
    ) -> Result<(PairOutcome, PairCost), RunError> {
        if !self.options.override_complete && self.store.is_complete(&document.id, &metric.name) {
            info!(document = %document.id, metric = %metric.name, "Skipping complete record");
            return Ok((PairOutcome::Skipped, PairCost::default()));
        }

        let mut cost = PairCost::default();
        match self.evaluate_pair(document, metric, &mut cost).await {
            Ok(outcome) => {
                self.store.save()?;
                info!(document = %document.id, metric = %metric.name, "Committed");
                Ok((outcome, cost))
            }
            Err(StepError::Cache(e)) => Err(e.into()),
            Err(StepError::Pair(e)) => {
                warn!(
                    document = %document.id,
                    metric = %metric.name,
                    error = %e,
                    "Pair aborted"
                );
                Ok((PairOutcome::from(e), cost))
            }
        }
    }

    /// Resolve A, resolve B, compare, arbitrate on disagreement, commit.
    async fn evaluate_pair(
        &mut self,
        document: &Document,
        metric: &Metric,
        cost: &mut PairCost,
    ) -> Result<PairOutcome, StepError> {
        let cache = self.cache.as_ref();
        let no_cache = self.options.no_cache;

        let a_site = CallSite::Evaluator(self.panel.evaluator_a.as_ref());
        let a = resolve(&a_site, CallRole::EvaluatorA, document, metric, cache, no_cache, cost)
            .await?;

        let b_site = CallSite::Evaluator(self.panel.evaluator_b.as_ref());
        let b = resolve(&b_site, CallRole::EvaluatorB, document, metric, cache, no_cache, cost)
            .await?;

        if a.verdict.agrees_with(&b.verdict) {
            let value = a.verdict.value.clone();
            let final_verdict = a.verdict.clone();
            self.store
                .commit(&document.id, &metric.name, a.verdict, b.verdict, final_verdict);
            return Ok(PairOutcome::Agreed { value });
        }

        info!(
            document = %document.id,
            metric = %metric.name,
            evaluator_a = %a.verdict.value,
            evaluator_b = %b.verdict.value,
            "Evaluators disagree, arbitrating"
        );
        let arbiter_site = CallSite::Arbiter {
            arbiter: self.panel.arbiter.as_ref(),
            evaluator_a_raw: &a.raw,
            evaluator_b_raw: &b.raw,
        };
        let arbitrated = resolve(
            &arbiter_site,
            CallRole::Arbitrator,
            document,
            metric,
            cache,
            no_cache,
            cost,
        )
        .await?;

        let outcome = PairOutcome::Arbitrated {
            evaluator_a: a.verdict.value.clone(),
            evaluator_b: b.verdict.value.clone(),
            value: arbitrated.verdict.value.clone(),
        };
        self.store.commit(
            &document.id,
            &metric.name,
            a.verdict,
            b.verdict,
            arbitrated.verdict,
        );
        Ok(outcome)
    }

    async fn notify(&self, document: &Document, metric: &Metric, outcome: PairOutcome) {
        let Some(observer) = &self.observer else {
            return;
        };
        let event = PairEvent {
            document: document.id.clone(),
            metric: metric.name.clone(),
            outcome,
        };
        if let Err(e) = observer.on_pair(event).await {
            warn!(document = %document.id, metric = %metric.name, error = %e, "Observer failed");
        }
    }
}

impl From<PairError> for PairOutcome {
    fn from(e: PairError) -> Self {
        PairOutcome::Aborted {
            reason: e.to_string(),
        }
    }
}

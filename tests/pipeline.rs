use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codebook_assess::assess::{
    ObserverError, Orchestrator, PairEvent, PairObserver, PairOutcome, RunError, RunOptions,
};
use codebook_assess::cache::{CallRole, FsResponseCache, ResponseCacheKey};
use codebook_assess::corpus::{Document, Metric};
use codebook_assess::evaluator::{Arbiter, EvaluationPanel, Evaluator};
use codebook_assess::gateway::ProviderError;
use codebook_assess::prompts::CORRECTION_HINT;
use codebook_assess::store::VerdictStore;
use serde_json::Value;
use tempfile::TempDir;

// =============================================================================
// Scripted panel
// =============================================================================

#[derive(Debug, Clone)]
struct Call {
    document: String,
    metric: String,
    correction: Option<String>,
    evaluator_raws: Option<(String, String)>,
}

struct Scripted {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<Call>>,
}

impl Scripted {
    fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Arc<Self> {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    fn with_results(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn silent() -> Arc<Self> {
        Self::new(Vec::<String>::new())
    }

    fn next(&self, call: Call) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(call);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::provider("scripted", "no reply scripted")))
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn evaluate(
        &self,
        document: &Document,
        metric: &Metric,
        correction: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.next(Call {
            document: document.id.clone(),
            metric: metric.name.clone(),
            correction: correction.map(str::to_string),
            evaluator_raws: None,
        })
    }
}

#[async_trait]
impl Arbiter for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn reconcile(
        &self,
        metric: &Metric,
        document: &Document,
        evaluator_a_raw: &str,
        evaluator_b_raw: &str,
        correction: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.next(Call {
            document: document.id.clone(),
            metric: metric.name.clone(),
            correction: correction.map(str::to_string),
            evaluator_raws: Some((evaluator_a_raw.to_string(), evaluator_b_raw.to_string())),
        })
    }
}

#[derive(Default)]
struct CollectingObserver {
    events: Mutex<Vec<PairEvent>>,
}

#[async_trait]
impl PairObserver for CollectingObserver {
    async fn on_pair(&self, event: PairEvent) -> Result<(), ObserverError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn verdict(value: &str) -> String {
    format!(r#"{{"value": "{value}", "why": "because {value}", "evidence": "p. 3"}}"#)
}

struct Harness {
    dir: TempDir,
    a: Arc<Scripted>,
    b: Arc<Scripted>,
    arbiter: Arc<Scripted>,
    observer: Arc<CollectingObserver>,
}

impl Harness {
    fn new(a: Arc<Scripted>, b: Arc<Scripted>, arbiter: Arc<Scripted>) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            a,
            b,
            arbiter,
            observer: Arc::new(CollectingObserver::default()),
        }
    }

    fn store_path(&self) -> std::path::PathBuf {
        self.dir.path().join("assessments.json")
    }

    fn cache_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("llm_responses")
    }

    fn cache_file(&self, doc_key: &str, metric: &str, role: CallRole) -> std::path::PathBuf {
        self.cache_dir()
            .join(ResponseCacheKey::new(doc_key, metric, role).file_name())
    }

    fn seed_cache(&self, doc_key: &str, metric: &str, role: CallRole, raw: &str) {
        std::fs::create_dir_all(self.cache_dir()).unwrap();
        std::fs::write(self.cache_file(doc_key, metric, role), raw).unwrap();
    }

    fn seed_store(&self, json: &str) {
        std::fs::write(self.store_path(), json).unwrap();
    }

    async fn run(
        &self,
        documents: &[&str],
        metrics: &[&str],
        override_complete: bool,
        no_cache: bool,
    ) -> (codebook_assess::RunSummary, VerdictStore) {
        let panel = EvaluationPanel::new(self.a.clone(), self.b.clone(), self.arbiter.clone());
        let options = RunOptions {
            override_complete,
            no_cache,
            ..RunOptions::default()
        };
        let (mut orchestrator, documents, metrics) =
            self.orchestrator(panel, options, documents, metrics);
        let summary = orchestrator.run(&documents, &metrics).await.unwrap();
        (summary, orchestrator.into_store())
    }

    fn orchestrator(
        &self,
        panel: EvaluationPanel,
        options: RunOptions,
        documents: &[&str],
        metrics: &[&str],
    ) -> (Orchestrator, Vec<Document>, Vec<Metric>) {
        let cache = FsResponseCache::new(self.cache_dir()).unwrap();
        let store = VerdictStore::load(self.store_path()).unwrap();
        let documents = documents
            .iter()
            .map(|id| Document::from_path(format!("/corpus/{id}.pdf")).unwrap())
            .collect();
        let metrics = metrics
            .iter()
            .map(|name| Metric::new(*name, format!("{name} codebook")))
            .collect();
        let orchestrator = Orchestrator::new(panel, Arc::new(cache), store, options)
            .with_observer(self.observer.clone());
        (orchestrator, documents, metrics)
    }

    fn outcomes(&self) -> Vec<PairOutcome> {
        self.observer
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.outcome.clone())
            .collect()
    }

    fn on_disk(&self) -> Value {
        serde_json::from_str(&std::fs::read_to_string(self.store_path()).unwrap()).unwrap()
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// =============================================================================
// Agreement and arbitration
// =============================================================================

#[tokio::test]
async fn agreement_commits_evaluator_a_without_arbitration() {
    let h = Harness::new(
        Scripted::new([verdict("High")]),
        Scripted::new([verdict("High")]),
        Scripted::silent(),
    );
    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;

    assert_eq!(summary.agreed, 1);
    assert_eq!(summary.provider_calls, 2);
    assert!(h.arbiter.calls().is_empty());

    let record = store.record("P1", "f1").unwrap();
    assert!(record.is_complete());
    assert_eq!(record.final_verdict, record.evaluator_a);
    assert_eq!(record.final_verdict.as_ref().unwrap().value, "High");

    assert!(h.cache_file("P1", "f1", CallRole::EvaluatorA).exists());
    assert!(h.cache_file("P1", "f1", CallRole::EvaluatorB).exists());
    assert!(!h.cache_file("P1", "f1", CallRole::Arbitrator).exists());

    let disk = h.on_disk();
    assert_eq!(disk["P1"]["f1"]["final"]["value"], "High");
    assert_eq!(disk["P1"]["f1"]["evaluatorB"]["why"], "because High");
}

#[tokio::test]
async fn disagreement_is_arbitrated_once() {
    let raw_a = verdict("Low");
    let raw_b = format!("Here you go:\n```json\n{}\n```", verdict("High"));
    let h = Harness::new(
        Scripted::new([raw_a.clone()]),
        Scripted::new([raw_b.clone()]),
        Scripted::new([verdict("Medium")]),
    );
    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;

    assert_eq!(summary.arbitrated, 1);
    let arbiter_calls = h.arbiter.calls();
    assert_eq!(arbiter_calls.len(), 1);
    assert_eq!(arbiter_calls[0].evaluator_raws, Some((raw_a.clone(), raw_b.clone())));
    assert_eq!(arbiter_calls[0].correction, None);

    let record = store.record("P1", "f1").unwrap();
    assert_eq!(record.evaluator_a.as_ref().unwrap().value, "Low");
    assert_eq!(record.evaluator_b.as_ref().unwrap().value, "High");
    assert_eq!(record.final_verdict.as_ref().unwrap().value, "Medium");
    assert_eq!(
        read(&h.cache_file("P1", "f1", CallRole::Arbitrator)),
        verdict("Medium")
    );
    assert_eq!(
        h.outcomes(),
        vec![PairOutcome::Arbitrated {
            evaluator_a: "Low".into(),
            evaluator_b: "High".into(),
            value: "Medium".into(),
        }]
    );
}

#[tokio::test]
async fn values_compare_exactly() {
    let h = Harness::new(
        Scripted::new([verdict("High")]),
        Scripted::new([verdict("high")]),
        Scripted::new([verdict("High")]),
    );
    let (summary, _) = h.run(&["P1"], &["f1"], false, false).await;
    assert_eq!(summary.arbitrated, 1);
    assert_eq!(h.arbiter.calls().len(), 1);
}

// =============================================================================
// Skip, override and cache policy
// =============================================================================

const COMPLETE_P1_F1: &str = r#"{
  "P1": {
    "category": "detection",
    "f1": {
      "evaluatorA": {"value": "High", "why": "w", "evidence": "e"},
      "evaluatorB": {"value": "High", "why": "w", "evidence": "e"},
      "final": {"value": "High", "why": "w", "evidence": "e"},
      "manual": "High"
    }
  }
}"#;

#[tokio::test]
async fn complete_records_are_skipped_without_calls() {
    let h = Harness::new(Scripted::silent(), Scripted::silent(), Scripted::silent());
    h.seed_store(COMPLETE_P1_F1);

    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.provider_calls, 0);
    assert!(h.a.calls().is_empty() && h.b.calls().is_empty() && h.arbiter.calls().is_empty());
    assert_eq!(h.outcomes(), vec![PairOutcome::Skipped]);
    assert_eq!(store.record("P1", "f1").unwrap().manual_value(), Some("High"));
}

#[tokio::test]
async fn partial_records_are_reassessed() {
    let h = Harness::new(
        Scripted::new([verdict("Low")]),
        Scripted::new([verdict("Low")]),
        Scripted::silent(),
    );
    h.seed_store(
        r#"{"P1": {"f1": {"evaluatorA": {"value": "High", "why": "w", "evidence": "e"}}}}"#,
    );

    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;
    assert_eq!(summary.agreed, 1);
    assert_eq!(store.record("P1", "f1").unwrap().evaluator_a.as_ref().unwrap().value, "Low");
}

#[tokio::test]
async fn override_reuses_cache_and_keeps_extra_keys() {
    let h = Harness::new(Scripted::silent(), Scripted::silent(), Scripted::silent());
    h.seed_store(COMPLETE_P1_F1);
    h.seed_cache("P1", "f1", CallRole::EvaluatorA, &verdict("Low"));
    h.seed_cache("P1", "f1", CallRole::EvaluatorB, &verdict("Low"));

    let (summary, store) = h.run(&["P1"], &["f1"], true, false).await;

    assert_eq!(summary.agreed, 1);
    assert_eq!(summary.provider_calls, 0);
    assert_eq!(summary.cache_hits, 2);
    let record = store.record("P1", "f1").unwrap();
    assert_eq!(record.final_verdict.as_ref().unwrap().value, "Low");
    assert_eq!(record.manual_value(), Some("High"));
    assert_eq!(h.on_disk()["P1"]["category"], "detection");
}

#[tokio::test]
async fn no_cache_calls_live_and_overwrites_cache() {
    let h = Harness::new(
        Scripted::new([verdict("Medium")]),
        Scripted::new([verdict("Medium")]),
        Scripted::silent(),
    );
    h.seed_cache("P1", "f1", CallRole::EvaluatorA, &verdict("Low"));

    let (summary, _) = h.run(&["P1"], &["f1"], false, true).await;

    assert_eq!(summary.provider_calls, 2);
    assert_eq!(summary.cache_hits, 0);
    assert_eq!(
        read(&h.cache_file("P1", "f1", CallRole::EvaluatorA)),
        verdict("Medium")
    );
}

#[tokio::test]
async fn cached_arbitration_is_reused() {
    let h = Harness::new(
        Scripted::new([verdict("Low")]),
        Scripted::new([verdict("High")]),
        Scripted::silent(),
    );
    h.seed_cache("P1", "f1", CallRole::Arbitrator, &verdict("Medium"));

    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;
    assert_eq!(summary.arbitrated, 1);
    assert!(h.arbiter.calls().is_empty());
    assert_eq!(
        store.record("P1", "f1").unwrap().final_verdict.as_ref().unwrap().value,
        "Medium"
    );
}

#[tokio::test]
async fn cache_files_use_citation_key() {
    let h = Harness::new(
        Scripted::new([verdict("High")]),
        Scripted::new([verdict("High")]),
        Scripted::silent(),
    );
    h.seed_store(r#"{"P1": {"key": "smith2021phish"}}"#);

    h.run(&["P1"], &["f1"], false, false).await;

    assert!(h.cache_file("smith2021phish", "f1", CallRole::EvaluatorA).exists());
    assert!(!h.cache_file("P1", "f1", CallRole::EvaluatorA).exists());
    assert_eq!(h.on_disk()["P1"]["key"], "smith2021phish");
}

// =============================================================================
// Malformed output
// =============================================================================

#[tokio::test]
async fn malformed_output_is_retried_once_with_correction() {
    let corrected = format!("```json\n{}\n```", verdict("High"));
    let h = Harness::new(
        Scripted::new(["I think the answer is High.".to_string(), corrected.clone()]),
        Scripted::new([verdict("High")]),
        Scripted::silent(),
    );
    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;

    assert_eq!(summary.agreed, 1);
    let calls = h.a.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].correction, None);
    assert_eq!(calls[1].correction.as_deref(), Some(CORRECTION_HINT));
    assert_eq!(store.record("P1", "f1").unwrap().evaluator_a.as_ref().unwrap().value, "High");
    assert_eq!(read(&h.cache_file("P1", "f1", CallRole::EvaluatorA)), corrected);
}

#[tokio::test]
async fn double_malformed_output_aborts_without_writing() {
    let h = Harness::new(
        Scripted::new(["nope", "still nope"]),
        Scripted::new([verdict("High")]),
        Scripted::silent(),
    );
    h.seed_store(r#"{"P1": {"year": 2021}}"#);

    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;

    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.provider_calls, 2);
    assert_eq!(h.a.calls().len(), 2);
    assert!(h.b.calls().is_empty());
    assert!(store.record("P1", "f1").is_none());
    assert!(h.on_disk()["P1"].get("f1").is_none());
    assert_eq!(read(&h.cache_file("P1", "f1", CallRole::EvaluatorA)), "still nope");
    assert!(matches!(
        &h.outcomes()[0],
        PairOutcome::Aborted { reason } if reason.contains("evaluator_a")
    ));
}

#[tokio::test]
async fn malformed_cache_entry_gets_one_live_correction() {
    let h = Harness::new(
        Scripted::new([verdict("Low")]),
        Scripted::new([verdict("Low")]),
        Scripted::silent(),
    );
    h.seed_cache("P1", "f1", CallRole::EvaluatorA, "garbage");

    let (summary, _) = h.run(&["P1"], &["f1"], false, false).await;

    assert_eq!(summary.agreed, 1);
    let calls = h.a.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].correction.as_deref(), Some(CORRECTION_HINT));
    assert_eq!(read(&h.cache_file("P1", "f1", CallRole::EvaluatorA)), verdict("Low"));
}

#[tokio::test]
async fn malformed_arbitration_is_corrected() {
    let h = Harness::new(
        Scripted::new([verdict("Low")]),
        Scripted::new([verdict("High")]),
        Scripted::new(["Medium, probably".to_string(), verdict("Medium")]),
    );
    let (summary, store) = h.run(&["P1"], &["f1"], false, false).await;

    assert_eq!(summary.arbitrated, 1);
    let calls = h.arbiter.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].correction.as_deref(), Some(CORRECTION_HINT));
    assert_eq!(
        store.record("P1", "f1").unwrap().final_verdict.as_ref().unwrap().value,
        "Medium"
    );
}

// =============================================================================
// Failures and ordering
// =============================================================================

/// Replaces the cache directory with a plain file before answering its
/// `break_on`-th call (1-based), so the following cache write fails.
struct CacheBreaker {
    inner: Arc<Scripted>,
    cache_dir: PathBuf,
    break_on: usize,
}

#[async_trait]
impl Evaluator for CacheBreaker {
    fn name(&self) -> &str {
        "cache-breaker"
    }

    async fn evaluate(
        &self,
        document: &Document,
        metric: &Metric,
        correction: Option<&str>,
    ) -> Result<String, ProviderError> {
        if self.inner.calls().len() + 1 == self.break_on {
            std::fs::remove_dir_all(&self.cache_dir).unwrap();
            std::fs::write(&self.cache_dir, "not a directory").unwrap();
        }
        self.inner.evaluate(document, metric, correction).await
    }
}

#[tokio::test]
async fn cache_write_failure_stops_the_run_after_saving_earlier_pairs() {
    let h = Harness::new(
        Scripted::new([verdict("High"), verdict("Low")]),
        Scripted::new([verdict("High"), verdict("Low")]),
        Scripted::silent(),
    );
    let breaker = Arc::new(CacheBreaker {
        inner: h.a.clone(),
        cache_dir: h.cache_dir(),
        break_on: 2,
    });
    let panel = EvaluationPanel::new(breaker, h.b.clone(), h.arbiter.clone());
    let (mut orchestrator, documents, metrics) =
        h.orchestrator(panel, RunOptions::default(), &["P1", "P2"], &["f1"]);

    let err = orchestrator.run(&documents, &metrics).await.unwrap_err();

    assert!(matches!(err, RunError::Cache(_)), "{err}");
    assert_eq!(h.a.calls().len(), 2);
    assert_eq!(h.b.calls().len(), 1);
    let on_disk = h.on_disk();
    assert_eq!(on_disk["P1"]["f1"]["final"]["value"], "High");
    assert!(on_disk.get("P2").is_none());
}

#[tokio::test]
async fn store_write_failure_stops_the_run() {
    let h = Harness::new(
        Scripted::new([verdict("High"), verdict("High")]),
        Scripted::new([verdict("High"), verdict("High")]),
        Scripted::silent(),
    );
    // The store's parent directory is a plain file, so the first save fails.
    let blocker = h.dir.path().join("blocked");
    std::fs::write(&blocker, "").unwrap();
    let store = VerdictStore::empty(blocker.join("assessments.json"));
    let cache = FsResponseCache::new(h.cache_dir()).unwrap();
    let panel = EvaluationPanel::new(h.a.clone(), h.b.clone(), h.arbiter.clone());
    let mut orchestrator =
        Orchestrator::new(panel, Arc::new(cache), store, RunOptions::default());
    let documents = vec![
        Document::from_path("/corpus/P1.pdf").unwrap(),
        Document::from_path("/corpus/P2.pdf").unwrap(),
    ];

    let err = orchestrator
        .run(&documents, &[Metric::new("f1", "f1 codebook")])
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Store(_)), "{err}");
    // The run stopped at P1; P2 was never evaluated.
    assert_eq!(h.a.calls().len(), 1);
    assert_eq!(h.b.calls().len(), 1);
}

#[tokio::test]
async fn provider_failure_skips_the_pair_and_continues() {
    let h = Harness::new(
        Scripted::new([verdict("High"), verdict("Low")]),
        Scripted::with_results(vec![
            Err(ProviderError::provider("scripted", "upstream 502")),
            Ok(verdict("Low")),
        ]),
        Scripted::silent(),
    );
    let (summary, store) = h.run(&["P1", "P2"], &["f1"], false, false).await;

    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.agreed, 1);
    // The failed B call counts alongside A's call for P1.
    assert_eq!(summary.provider_calls, 4);
    assert!(store.record("P1", "f1").is_none());
    assert!(store.is_complete("P2", "f1"));
    // A's response was cached before B failed; the next run reuses it.
    assert!(h.cache_file("P1", "f1", CallRole::EvaluatorA).exists());
    assert!(!h.cache_file("P1", "f1", CallRole::EvaluatorB).exists());
}

#[tokio::test]
async fn documents_are_outer_loop_in_given_order() {
    let replies = vec![
        verdict("High"),
        verdict("High"),
        verdict("High"),
        verdict("High"),
    ];
    let h = Harness::new(
        Scripted::new(replies.clone()),
        Scripted::new(replies.clone()),
        Scripted::silent(),
    );
    h.run(&["P2", "P1"], &["f2", "f1"], false, false).await;

    let order: Vec<(String, String)> = h
        .a
        .calls()
        .into_iter()
        .map(|c| (c.document, c.metric))
        .collect();
    assert_eq!(
        order,
        vec![
            ("P2".to_string(), "f2".to_string()),
            ("P2".to_string(), "f1".to_string()),
            ("P1".to_string(), "f2".to_string()),
            ("P1".to_string(), "f1".to_string()),
        ]
    );
    let lines: Vec<String> = h
        .observer
        .events
        .lock()
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(lines[0], "P2 / f2: agreed on High");
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let h = Harness::new(
        Scripted::new([verdict("Low")]),
        Scripted::new([verdict("High")]),
        Scripted::new([verdict("Medium")]),
    );
    h.run(&["P1"], &["f1"], false, false).await;
    let first = h.on_disk();

    let (summary, _) = h.run(&["P1"], &["f1"], false, false).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.a.calls().len(), 1);
    assert_eq!(h.arbiter.calls().len(), 1);
    assert_eq!(h.on_disk(), first);
}

//! Read-only summaries of a verdict store.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::store::{AssessmentRecord, VerdictStore};

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSummary {
    pub documents: usize,
    pub metrics: Vec<MetricSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    pub metric: String,
    pub complete: usize,
    pub partial: usize,
    /// Records holding both evaluator verdicts.
    pub compared: usize,
    pub agreements: usize,
    pub agreement_rate: Option<f64>,
    /// Complete records whose final verdict came from the arbiter.
    pub arbitrations: usize,
    pub final_values: BTreeMap<String, usize>,
    /// Complete records that also carry an expert verdict.
    pub manual_compared: usize,
    pub manual_matches: usize,
    pub manual_agreement_rate: Option<f64>,
}

impl MetricSummary {
    fn new(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            ..Default::default()
        }
    }

    fn add(&mut self, record: &AssessmentRecord) {
        if record.is_complete() {
            self.complete += 1;
        } else if record.evaluator_a.is_some()
            || record.evaluator_b.is_some()
            || record.final_verdict.is_some()
        {
            self.partial += 1;
        }

        if let Some(agree) = record.evaluators_agree() {
            self.compared += 1;
            if agree {
                self.agreements += 1;
            } else if record.is_complete() {
                self.arbitrations += 1;
            }
        }

        let Some(final_verdict) = record.final_verdict.as_ref() else {
            return;
        };
        if record.is_complete() {
            *self
                .final_values
                .entry(final_verdict.value.clone())
                .or_default() += 1;
        }

        if let Some(manual) = record.manual_value().and_then(normalize_manual) {
            if record.is_complete() {
                self.manual_compared += 1;
                if normalize(&final_verdict.value) == manual {
                    self.manual_matches += 1;
                }
            }
        }
    }

    fn finish(&mut self) {
        self.agreement_rate = rate(self.agreements, self.compared);
        self.manual_agreement_rate = rate(self.manual_matches, self.manual_compared);
    }
}

fn rate(hits: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Expert placeholders `-` and empty mean "not assessed".
fn normalize_manual(value: &str) -> Option<String> {
    let value = normalize(value);
    (!value.is_empty() && value != "-").then_some(value)
}

/// Per-metric counts across every document, metrics sorted by name.
pub fn summarize(store: &VerdictStore) -> StoreSummary {
    let mut by_metric: BTreeMap<&str, MetricSummary> = BTreeMap::new();
    for (_, entry) in store.documents() {
        for (metric, record) in entry.assessments() {
            by_metric
                .entry(metric)
                .or_insert_with(|| MetricSummary::new(metric))
                .add(record);
        }
    }

    let metrics = by_metric
        .into_values()
        .map(|mut m| {
            m.finish();
            m
        })
        .collect();
    StoreSummary {
        documents: store.len(),
        metrics,
    }
}

fn fmt_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "-".to_string(),
    }
}

impl StoreSummary {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text table, one row per metric, then final value counts.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "documents: {}", self.documents);
        if self.metrics.is_empty() {
            let _ = writeln!(out, "no assessments");
            return out;
        }

        let width = self
            .metrics
            .iter()
            .map(|m| m.metric.len())
            .max()
            .unwrap_or(0)
            .max("metric".len());
        let _ = writeln!(
            out,
            "{:<width$}  {:>8}  {:>7}  {:>9}  {:>11}  {:>7}",
            "metric", "complete", "partial", "agreement", "arbitration", "manual"
        );
        for m in &self.metrics {
            let _ = writeln!(
                out,
                "{:<width$}  {:>8}  {:>7}  {:>9}  {:>11}  {:>7}",
                m.metric,
                m.complete,
                m.partial,
                fmt_rate(m.agreement_rate),
                m.arbitrations,
                fmt_rate(m.manual_agreement_rate),
            );
        }

        let _ = writeln!(out);
        for m in &self.metrics {
            let values: Vec<String> = m
                .final_values
                .iter()
                .map(|(value, count)| format!("{value}={count}"))
                .collect();
            let _ = writeln!(out, "{}: {}", m.metric, values.join(", "));
        }
        out
    }
}

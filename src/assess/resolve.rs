//! Obtain one parsed verdict for one call role.
//!
//! Cache first (unless bypassed), otherwise a live call. Every obtained
//! response is written to the cache before it is parsed. A response that
//! does not parse gets exactly one live retry with the correction hint; the
//! retry's output is used as-is and overwrites the cached text.

use tracing::{debug, warn};

use crate::cache::{CacheError, CallRole, ResponseCache, ResponseCacheKey};
use crate::corpus::{Document, Metric};
use crate::evaluator::{Arbiter, Evaluator};
use crate::gateway::ProviderError;
use crate::prompts::CORRECTION_HINT;
use crate::verdict::{extract_verdict, Verdict};

use super::types::PairError;

/// Who answers a call.
pub(crate) enum CallSite<'a> {
    Evaluator(&'a dyn Evaluator),
    Arbiter {
        arbiter: &'a dyn Arbiter,
        evaluator_a_raw: &'a str,
        evaluator_b_raw: &'a str,
    },
}

impl CallSite<'_> {
    fn name(&self) -> &str {
        match self {
            CallSite::Evaluator(evaluator) => evaluator.name(),
            CallSite::Arbiter { arbiter, .. } => arbiter.name(),
        }
    }

    async fn invoke(
        &self,
        document: &Document,
        metric: &Metric,
        correction: Option<&str>,
    ) -> Result<String, ProviderError> {
        match self {
            CallSite::Evaluator(evaluator) => {
                evaluator.evaluate(document, metric, correction).await
            }
            CallSite::Arbiter {
                arbiter,
                evaluator_a_raw,
                evaluator_b_raw,
            } => {
                arbiter
                    .reconcile(metric, document, evaluator_a_raw, evaluator_b_raw, correction)
                    .await
            }
        }
    }
}

/// A verdict with the raw text it was parsed from.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub verdict: Verdict,
    pub raw: String,
}

/// Calls and cache hits spent on one pair, whatever its outcome.
#[derive(Debug, Default)]
pub(crate) struct PairCost {
    pub provider_calls: usize,
    pub cache_hits: usize,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum StepError {
    #[error(transparent)]
    Pair(#[from] PairError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub(crate) async fn resolve(
    site: &CallSite<'_>,
    role: CallRole,
    document: &Document,
    metric: &Metric,
    cache: &dyn ResponseCache,
    no_cache: bool,
    cost: &mut PairCost,
) -> Result<Resolved, StepError> {
    let key = ResponseCacheKey::new(&document.cache_key, &metric.name, role);

    let cached = if no_cache { None } else { cache.get(&key).await? };
    let cache_hit = cached.is_some();
    let first = match cached {
        Some(raw) => {
            debug!(document = %document.id, metric = %metric.name, role = %role, "Cache hit");
            cost.cache_hits += 1;
            raw
        }
        None => {
            cost.provider_calls += 1;
            let raw = call(site, role, document, metric, None).await?;
            cache.put(&key, &raw).await?;
            raw
        }
    };

    let first_error = match extract_verdict(&first) {
        Ok(verdict) => return Ok(Resolved { verdict, raw: first }),
        Err(e) => e,
    };
    warn!(
        document = %document.id,
        metric = %metric.name,
        role = %role,
        model = site.name(),
        cached = cache_hit,
        error = %first_error,
        "Malformed verdict, retrying with correction"
    );

    cost.provider_calls += 1;
    let corrected = call(site, role, document, metric, Some(CORRECTION_HINT)).await?;
    cache.put(&key, &corrected).await?;

    match extract_verdict(&corrected) {
        Ok(verdict) => Ok(Resolved {
            verdict,
            raw: corrected,
        }),
        Err(source) => Err(PairError::Malformed { role, source }.into()),
    }
}

async fn call(
    site: &CallSite<'_>,
    role: CallRole,
    document: &Document,
    metric: &Metric,
    correction: Option<&str>,
) -> Result<String, PairError> {
    site.invoke(document, metric, correction)
        .await
        .map_err(|source| PairError::Provider { role, source })
}

//! Usage tracking via the UsageSink trait.
//!
//! The gateway logs all calls through a UsageSink. This decouples the gateway
//! from any specific storage backend:
//! - The CLI uses TracingUsageSink
//! - Tests use NoopUsageSink or a collecting sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of a provider API call for logging.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// Provider name: "openrouter".
    pub provider: &'static str,
    /// Endpoint: "chat/completions".
    pub endpoint: &'static str,
    /// Model used.
    pub model: String,
    /// Input tokens consumed.
    pub input_tokens: i32,
    /// Output tokens generated.
    pub output_tokens: i32,
    /// Cost in nanodollars (1e-9 USD).
    pub cost_nanodollars: i64,
    /// Provider-reported upstream inference cost in nanodollars, if available.
    pub upstream_cost_nanodollars: Option<i64>,
    /// Run this request is part of (if any).
    pub job_id: Option<Uuid>,
    /// Latency in milliseconds.
    pub latency_ms: i32,
    /// Call status.
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            upstream_cost_nanodollars: None,
            job_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: i32, output: i32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn cost(mut self, nanodollars: i64) -> Self {
        self.cost_nanodollars = nanodollars;
        self
    }

    pub fn upstream_cost(mut self, nanodollars: Option<i64>) -> Self {
        self.upstream_cost_nanodollars = nanodollars;
        self
    }

    pub fn job(mut self, job_id: Option<Uuid>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn latency(mut self, ms: i32) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }
}

/// Trait for recording provider call usage.
///
/// Implement this trait to customize where usage data is stored.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {
        // Discard
    }
}

/// Usage sink that emits one structured `tracing` event per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        tracing::info!(
            target: "codebook_assess::usage",
            provider = record.provider,
            endpoint = record.endpoint,
            model = %record.model,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost_nanos = record.cost_nanodollars,
            upstream_cost_nanos = ?record.upstream_cost_nanodollars,
            latency_ms = record.latency_ms,
            status = record.status.as_str(),
            error_code = ?record.error_code,
            caller = record.caller,
            job_id = ?record.job_id,
            "provider call"
        );
    }
}

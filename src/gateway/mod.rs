//! Provider gateway for OpenRouter chat completions.

pub mod error;
pub mod openrouter;
pub mod pricing;
pub mod types;
pub mod usage;

use std::sync::Arc;

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{CallStatus, ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use pricing::*;
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Routes chat requests to the provider and records usage for every call.
///
/// Failed calls are returned as-is. Transport failures are never retried
/// here; the only retry in the pipeline is the malformed-output correction.
pub struct ProviderGateway<U: UsageSinkTrait> {
    openrouter: OpenRouterAdapter,
    usage_sink: Arc<U>,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let openrouter = OpenRouterAdapter::from_env()?;
        Ok(Self::new(openrouter, usage_sink))
    }

    pub fn new(openrouter: OpenRouterAdapter, usage_sink: Arc<U>) -> Self {
        Self {
            openrouter,
            usage_sink,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        match self.openrouter.chat(&req).await {
            Ok(resp) => {
                self.record_usage(&req, &resp, CallStatus::Success, None)
                    .await;
                Ok(resp)
            }
            Err(err) => {
                let code = err.code().to_string();
                self.record_usage(&req, &ChatResponse::empty(), CallStatus::Error, Some(code))
                    .await;
                Err(err)
            }
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        status: CallStatus,
        error_code: Option<String>,
    ) {
        let record = ProviderCallRecord::new(
            req.model.provider(),
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens as i32, resp.output_tokens as i32)
        .cost(resp.cost_nanodollars)
        .upstream_cost(resp.upstream_cost_nanodollars)
        .job(req.attribution.job_id)
        .latency(resp.latency.as_millis() as i32);

        let record = if status == CallStatus::Error {
            record.error(error_code.unwrap_or_else(|| "provider_error".to_string()))
        } else {
            record
        };

        self.usage_sink.record(record).await;
    }
}

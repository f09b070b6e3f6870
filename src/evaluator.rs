//! Evaluator and arbiter seams, plus their gateway-backed implementations.
//!
//! Both return the provider's raw text. Parsing and the correction retry
//! live in the assessment pipeline, not here.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::PanelConfig;
use crate::corpus::{Document, Metric};
use crate::gateway::{
    Attachment, Attribution, ChatGateway, ChatModel, ChatRequest, Message, ProviderError,
};
use crate::prompts::{arbitration_messages, evaluation_messages};

/// One independent scorer.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Model or label used in logs.
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        document: &Document,
        metric: &Metric,
        correction: Option<&str>,
    ) -> Result<String, ProviderError>;
}

/// Resolves a disagreement between the two evaluators.
#[async_trait]
pub trait Arbiter: Send + Sync {
    fn name(&self) -> &str;

    async fn reconcile(
        &self,
        metric: &Metric,
        document: &Document,
        evaluator_a_raw: &str,
        evaluator_b_raw: &str,
        correction: Option<&str>,
    ) -> Result<String, ProviderError>;
}

// =============================================================================
// Gateway-backed implementations
// =============================================================================

/// Request settings shared by evaluator and arbiter calls.
#[derive(Debug, Clone)]
struct CallSettings {
    model: String,
    caller: &'static str,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    run_id: Option<Uuid>,
}

impl CallSettings {
    fn request(&self, messages: Vec<Message>) -> ChatRequest {
        let mut attribution = Attribution::new(self.caller);
        if let Some(run_id) = self.run_id {
            attribution = attribution.with_job(run_id);
        }
        let mut req = ChatRequest::new(ChatModel::openrouter(&self.model), messages, attribution);
        if let Some(t) = self.temperature {
            req = req.temperature(t);
        }
        if let Some(max) = self.max_tokens {
            req = req.max_tokens(max);
        }
        req
    }
}

async fn load_document(document: &Document) -> Result<Attachment, ProviderError> {
    document
        .load_attachment()
        .await
        .map_err(|e| ProviderError::invalid_request(format!("document {}: {e}", document.id)))
}

pub struct GatewayEvaluator {
    gateway: Arc<dyn ChatGateway>,
    settings: CallSettings,
}

impl GatewayEvaluator {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            gateway,
            settings: CallSettings {
                model: model.into(),
                caller,
                temperature: None,
                max_tokens: None,
                run_id: None,
            },
        }
    }

    pub fn temperature(mut self, t: Option<f32>) -> Self {
        self.settings.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: Option<u32>) -> Self {
        self.settings.max_tokens = max;
        self
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.settings.run_id = Some(run_id);
        self
    }
}

#[async_trait]
impl Evaluator for GatewayEvaluator {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn evaluate(
        &self,
        document: &Document,
        metric: &Metric,
        correction: Option<&str>,
    ) -> Result<String, ProviderError> {
        let attachment = load_document(document).await?;
        let messages = evaluation_messages(&metric.text, attachment, correction);
        let response = self.gateway.chat(self.settings.request(messages)).await?;
        Ok(response.content)
    }
}

pub struct GatewayArbiter {
    gateway: Arc<dyn ChatGateway>,
    settings: CallSettings,
}

impl GatewayArbiter {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            settings: CallSettings {
                model: model.into(),
                caller: "arbiter",
                temperature: None,
                max_tokens: None,
                run_id: None,
            },
        }
    }

    pub fn temperature(mut self, t: Option<f32>) -> Self {
        self.settings.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: Option<u32>) -> Self {
        self.settings.max_tokens = max;
        self
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.settings.run_id = Some(run_id);
        self
    }
}

#[async_trait]
impl Arbiter for GatewayArbiter {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn reconcile(
        &self,
        metric: &Metric,
        document: &Document,
        evaluator_a_raw: &str,
        evaluator_b_raw: &str,
        correction: Option<&str>,
    ) -> Result<String, ProviderError> {
        let attachment = load_document(document).await?;
        let messages = arbitration_messages(
            &metric.text,
            attachment,
            evaluator_a_raw,
            evaluator_b_raw,
            correction,
        );
        let response = self.gateway.chat(self.settings.request(messages)).await?;
        Ok(response.content)
    }
}

/// The two evaluators and the arbiter for one run.
#[derive(Clone)]
pub struct EvaluationPanel {
    pub evaluator_a: Arc<dyn Evaluator>,
    pub evaluator_b: Arc<dyn Evaluator>,
    pub arbiter: Arc<dyn Arbiter>,
}

impl EvaluationPanel {
    pub fn new(
        evaluator_a: Arc<dyn Evaluator>,
        evaluator_b: Arc<dyn Evaluator>,
        arbiter: Arc<dyn Arbiter>,
    ) -> Self {
        Self {
            evaluator_a,
            evaluator_b,
            arbiter,
        }
    }

    /// Gateway-backed panel built from `config`; every call carries `run_id`.
    pub fn from_config(gateway: Arc<dyn ChatGateway>, config: &PanelConfig, run_id: Uuid) -> Self {
        let evaluator_a =
            GatewayEvaluator::new(gateway.clone(), &config.evaluator_a_model, "evaluator_a")
                .temperature(config.temperature)
                .max_tokens(config.max_output_tokens)
                .run_id(run_id);
        let evaluator_b =
            GatewayEvaluator::new(gateway.clone(), &config.evaluator_b_model, "evaluator_b")
                .temperature(config.temperature)
                .max_tokens(config.max_output_tokens)
                .run_id(run_id);
        let arbiter = GatewayArbiter::new(gateway, &config.arbiter_model)
            .temperature(config.temperature)
            .max_tokens(config.max_output_tokens)
            .run_id(run_id);
        Self::new(Arc::new(evaluator_a), Arc::new(evaluator_b), Arc::new(arbiter))
    }
}

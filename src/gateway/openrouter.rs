//! OpenRouter adapter for chat completions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::chat_cost;
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// OPENROUTER ADAPTER
// =============================================================================

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed inline text characters (~250k tokens). File attachments
/// are not counted; the provider enforces its own limits on those.
const MAX_INPUT_CHARS: usize = 1_000_000;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Reasoning models routinely take minutes on a full paper.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// OpenRouter API adapter for chat completions.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    /// Create from API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, None, None)
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let referer = std::env::var("OPENROUTER_REFERER").ok();
        let app_title = std::env::var("OPENROUTER_APP_TITLE").ok();

        Self::with_config(api_key, base_url, timeout, referer, app_title)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        if api_key.trim().is_empty() {
            return Err(ProviderError::config("OpenRouter API key is empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(ref r) = referer {
            if let Ok(v) = HeaderValue::from_str(r) {
                headers.insert("HTTP-Referer", v);
            }
        }

        if let Some(ref t) = app_title {
            if let Ok(v) = HeaderValue::from_str(t) {
                headers.insert("X-Title", v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Check if message indicates a refusal.
    fn is_refusal(msg: &str) -> bool {
        let l = msg.trim_start().to_lowercase();
        let first_line = l.lines().next().unwrap_or("");

        const PREFIXES: &[&str] = &[
            "refus",
            "i cannot",
            "i can't",
            "i won't",
            "i will not",
            "i am unable to",
            "i'm unable to",
            "unable to comply",
            "unable to assist",
            "unable to help",
        ];

        PREFIXES.iter().any(|p| first_line.starts_with(p)) || l.contains("request was refused")
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

/// Plain string content, or a list of parts once attachments are present.
#[derive(Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiPart {
    Text { text: String },
    File { file: ApiFile },
}

#[derive(Serialize)]
struct ApiFile {
    filename: String,
    file_data: String,
}

impl From<&Attachment> for ApiPart {
    fn from(a: &Attachment) -> Self {
        match a {
            Attachment::File {
                filename,
                mime_type,
                data,
            } => ApiPart::File {
                file: ApiFile {
                    filename: filename.clone(),
                    file_data: format!("data:{mime_type};base64,{}", BASE64.encode(data)),
                },
            },
            Attachment::Text(text) => ApiPart::Text { text: text.clone() },
        }
    }
}

impl From<&Message> for ApiMessage {
    fn from(m: &Message) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = if m.attachments.is_empty() {
            ApiContent::Text(m.content.clone())
        } else {
            let mut parts = vec![ApiPart::Text {
                text: m.content.clone(),
            }];
            parts.extend(m.attachments.iter().map(ApiPart::from));
            ApiContent::Parts(parts)
        };
        Self { role, content }
    }
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    #[serde(default)]
    cost_details: Option<CostDetails>,
}

#[derive(Deserialize)]
struct CostDetails {
    upstream_inference_cost: Option<f64>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_chars: usize = req
            .messages
            .iter()
            .map(|m| {
                m.content.len() + m.attachments.iter().map(Attachment::text_len).sum::<usize>()
            })
            .sum();

        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let messages: Vec<ApiMessage> = req.messages.iter().map(ApiMessage::from).collect();

        let api_req = ChatApiRequest {
            model: req.model.model_id(),
            messages: &messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: if req.json_mode {
                Some(ResponseFormat {
                    format_type: "json_object",
                })
            } else {
                None
            },
        };

        let mut response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    "openrouter",
                    format!("Response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            let parsed_error = serde_json::from_str::<ChatApiResponse>(&body)
                .ok()
                .and_then(|p| p.error);
            let (message, ctx) = match parsed_error {
                Some(error) => {
                    let ctx = match error.code {
                        Some(serde_json::Value::String(code)) => ctx.with_code(code),
                        Some(other) => ctx.with_code(other.to_string()),
                        None => ctx,
                    };
                    (error.message.unwrap_or_default(), ctx)
                }
                None => (format!("HTTP {}", status.as_u16()), ctx),
            };

            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
                401 | 403 => ProviderError::config(format!("authentication rejected: {message}")),
                _ => ProviderError::provider_with_context("openrouter", message, ctx),
            });
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider("openrouter", format!("Invalid JSON: {e}")))?;

        // Check for API-level error
        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            if Self::is_refusal(&message) {
                return Err(ProviderError::refused(message));
            }
            return Err(ProviderError::provider("openrouter", message));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider("openrouter", "No choices in response"))?;

        let mut content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        if content.len() > MAX_RESPONSE_LEN {
            content.truncate(MAX_RESPONSE_LEN);
        }

        if Self::is_refusal(&content) {
            return Err(ProviderError::refused(content));
        }

        let (input_tokens, output_tokens, upstream_cost_nanodollars) = match parsed.usage {
            Some(usage) => (
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage
                    .cost_details
                    .and_then(|d| d.upstream_inference_cost)
                    .map(|usd| ((usd * 1_000_000_000.0).round() as i64).max(0)),
            ),
            None => (0, 0, None),
        };

        let latency = start.elapsed();
        let cost = chat_cost(req.model.model_id(), input_tokens, output_tokens);

        Ok(ChatResponse {
            content: content.trim().to_string(),
            input_tokens,
            output_tokens,
            cost_nanodollars: cost,
            upstream_cost_nanodollars,
            latency,
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_prefixes_are_detected_on_first_line() {
        assert!(OpenRouterAdapter::is_refusal("I cannot help with that."));
        assert!(OpenRouterAdapter::is_refusal("  Refused: policy"));
        assert!(!OpenRouterAdapter::is_refusal(
            "{\"value\": \"High\", \"why\": \"I cannot see flaws\", \"evidence\": \"-\"}"
        ));
    }

    #[test]
    fn message_without_attachments_serializes_as_string() {
        let api = ApiMessage::from(&Message::user("Codebook:\nF1"));
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Codebook:\nF1");
    }

    #[test]
    fn pdf_attachment_serializes_as_file_part() {
        let msg =
            Message::user("Codebook:\nF1").attach(Attachment::pdf("p1.pdf", b"%PDF".to_vec()));
        let json = serde_json::to_value(ApiMessage::from(&msg)).unwrap();
        let parts = json["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "file");
        assert_eq!(parts[1]["file"]["filename"], "p1.pdf");
        assert_eq!(
            parts[1]["file"]["file_data"],
            "data:application/pdf;base64,JVBERg=="
        );
    }

    #[test]
    fn empty_api_key_is_a_config_error() {
        let err = OpenRouterAdapter::new("  ").unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}

//! Chat-completion clients.
//!
//! [`ChatModel`] is the seam between the analysis/chat flows and a hosted
//! model. Implementations:
//! - **[`OpenAiCompatibleModel`]**: `POST {base}/chat/completions`; serves
//!   both Groq (the default deployment) and OpenAI.
//! - **[`OllamaChatModel`]**: `POST {base}/api/chat` with streaming off.
//! - **[`DisabledModel`]**: always errors.
//!
//! Every call is bounded by `llm.timeout_secs`. Retries are off by default;
//! with `llm.max_retries > 0`, 429/5xx responses and transport failures are
//! retried with exponential backoff (1s, 2s, 4s, ... capped at 32s).

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::header;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::models::ChatMessage;
use crate::response::CompletionPayload;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

const SNIPPET_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("{provider} API key missing: set {env}")]
    MissingApiKey { provider: String, env: String },

    #[error("{provider} returned {status}: {snippet}")]
    HttpStatus {
        provider: String,
        status: reqwest::StatusCode,
        snippet: String,
    },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} response could not be decoded: {detail}")]
    Decode { provider: String, detail: String },

    #[error("completion provider is disabled")]
    Disabled,
}

impl CompletionError {
    /// Rate limits, server errors and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::HttpStatus { status, .. } => {
                status.as_u16() == 429 || status.is_server_error()
            }
            CompletionError::Transport { .. } => true,
            _ => false,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Send the messages in order and return the first completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionPayload>;
}

/// Messages in the OpenAI chat wire format.
pub fn messages_to_wire(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({"role": m.role.as_wire(), "content": m.content}))
        .collect()
}

fn make_snippet(text: &str) -> String {
    let mut snippet: String = text.chars().take(SNIPPET_CHARS).collect();
    if text.chars().count() > SNIPPET_CHARS {
        snippet.push('…');
    }
    snippet
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// POST `body` to `url`, decoding the JSON reply or a status error.
async fn post_json(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    body: &Value,
) -> Result<Value, CompletionError> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|source| CompletionError::Transport {
            provider: provider.to_string(),
            source,
        })?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(CompletionError::HttpStatus {
            provider: provider.to_string(),
            status,
            snippet: make_snippet(&text),
        });
    }

    resp.json::<Value>()
        .await
        .map_err(|e| CompletionError::Decode {
            provider: provider.to_string(),
            detail: e.to_string(),
        })
}

/// Run `call` up to `max_retries + 1` times, retrying retryable failures.
async fn with_retries<F, Fut>(
    provider: &str,
    max_retries: u32,
    call: F,
) -> Result<CompletionPayload, CompletionError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<CompletionPayload, CompletionError>>,
{
    let mut attempt = 0u32;
    loop {
        let started = Instant::now();
        match call().await {
            Ok(payload) => {
                debug!(
                    provider,
                    attempt,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "completion received"
                );
                return Ok(payload);
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff(attempt);
                warn!(provider, attempt, delay_secs = delay.as_secs(), error = %e, "retrying completion");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    provider,
                    attempt,
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "completion failed"
                );
                return Err(e);
            }
        }
    }
}

// ============ OpenAI-compatible (Groq, OpenAI) ============

pub struct OpenAiCompatibleModel {
    provider: String,
    model: String,
    url_chat: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatibleModel {
    /// Build a client for `provider` at `base_url` (e.g.
    /// `https://api.groq.com/openai/v1`).
    pub fn new(provider: &str, base_url: &str, api_key: &str, config: &LlmConfig) -> Result<Self> {
        let base = base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            bail!("llm.base_url must start with http:// or https://: {}", base_url);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| anyhow::anyhow!("invalid API key header: {}", e))?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        let url_chat = format!("{}/chat/completions", base.trim_end_matches('/'));

        info!(
            provider,
            model = %config.model,
            url = %url_chat,
            timeout_secs = config.timeout_secs,
            "chat model initialized"
        );

        Ok(Self {
            provider: provider.to_string(),
            model: config.model.clone(),
            url_chat,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages_to_wire(messages),
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

/// `choices[0].message.content` of an OpenAI-style reply.
fn openai_content(provider: &str, reply: Value) -> Result<CompletionPayload, CompletionError> {
    let content = reply
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .cloned()
        .ok_or_else(|| CompletionError::Decode {
            provider: provider.to_string(),
            detail: "expected `choices[0].message.content`".to_string(),
        })?;
    Ok(CompletionPayload::from_content(content))
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionPayload> {
        let body = self.request_body(messages);
        debug!(
            provider = %self.provider,
            model = %self.model,
            messages = messages.len(),
            "POST {}", self.url_chat
        );

        let (client, provider, url, body) = (
            &self.client,
            self.provider.as_str(),
            self.url_chat.as_str(),
            &body,
        );
        let payload = with_retries(provider, self.max_retries, move || async move {
            let reply = post_json(client, provider, url, body).await?;
            openai_content(provider, reply)
        })
        .await?;
        Ok(payload)
    }
}

// ============ Ollama ============

pub struct OllamaChatModel {
    model: String,
    url_chat: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChatModel {
    pub fn new(base_url: &str, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url_chat = format!("{}/api/chat", base_url.trim().trim_end_matches('/'));

        info!(model = %config.model, url = %url_chat, "ollama chat model initialized");

        Ok(Self {
            model: config.model.clone(),
            url_chat,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionPayload> {
        let body = json!({
            "model": self.model,
            "messages": messages_to_wire(messages),
            "stream": false,
            "options": {"temperature": self.temperature},
        });

        let (client, url, body) = (&self.client, self.url_chat.as_str(), &body);
        let payload = with_retries("ollama", self.max_retries, move || async move {
            let reply = post_json(client, "ollama", url, body).await?;
            let content = reply
                .get("message")
                .and_then(|m| m.get("content"))
                .cloned()
                .ok_or_else(|| CompletionError::Decode {
                    provider: "ollama".to_string(),
                    detail: "expected `message.content`".to_string(),
                })?;
            Ok(CompletionPayload::from_content(content))
        })
        .await?;
        Ok(payload)
    }
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl ChatModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<CompletionPayload> {
        Err(CompletionError::Disabled.into())
    }
}

fn api_key(provider: &str, env: &str) -> Result<String> {
    match std::env::var(env) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(CompletionError::MissingApiKey {
            provider: provider.to_string(),
            env: env.to_string(),
        }
        .into()),
    }
}

/// Create the configured [`ChatModel`].
///
/// | Config Value | Model | Key |
/// |-------------|-------|-----|
/// | `"groq"` | [`OpenAiCompatibleModel`] | `GROQ_API_KEY` |
/// | `"openai"` | [`OpenAiCompatibleModel`] | `OPENAI_API_KEY` |
/// | `"ollama"` | [`OllamaChatModel`] | none |
/// | `"disabled"` | [`DisabledModel`] | none |
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "groq" => {
            let key = api_key("groq", "GROQ_API_KEY")?;
            let base = config.base_url.as_deref().unwrap_or(GROQ_BASE_URL);
            Ok(Arc::new(OpenAiCompatibleModel::new("groq", base, &key, config)?))
        }
        "openai" => {
            let key = api_key("openai", "OPENAI_API_KEY")?;
            let base = config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            Ok(Arc::new(OpenAiCompatibleModel::new("openai", base, &key, config)?))
        }
        "ollama" => {
            let base = config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
            Ok(Arc::new(OllamaChatModel::new(base, config)?))
        }
        "disabled" => Ok(Arc::new(DisabledModel)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

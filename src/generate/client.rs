//! HTTP Completion Client
//!
//! Wraps an OpenAI-compatible server. Thinking goes through the raw
//! `/v1/completions` continuation endpoint; when that fails for any
//! reason, the same prompt is reframed as a chat exchange against
//! `/v1/chat/completions`.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::types::{Completion, CompletionClient, SamplingParams};

/// Timeout for the `/v1/models` connectivity check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for generation calls. Local models can be slow.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);

/// System framing for the chat fallback: the task is to continue the
/// context, not to answer it.
const FALLBACK_SYSTEM_PROMPT: &str =
    "You are an autonomous thinking system. Freely generate the continuation \
     of the context below. It is not a question to answer; it is a thought \
     to continue.";

/// Error from a single endpoint attempt.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Completion client over a local OpenAI-compatible HTTP server.
pub struct HttpCompletionClient {
    api_url: String,
    /// Model id learned from the connection check. Included in request
    /// bodies once known.
    model_name: Mutex<Option<String>>,
    http: Client,
}

impl HttpCompletionClient {
    /// Create a client for the given base URL (e.g. `http://localhost:1234`).
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            model_name: Mutex::new(None),
            http: Client::new(),
        }
    }

    /// Primary path: raw continuation via `/v1/completions`.
    async fn complete(
        &self,
        prompt: &str,
        params: SamplingParams,
    ) -> std::result::Result<Completion, CompletionError> {
        let mut body = serde_json::json!({
            "prompt": prompt,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": 0.9,
            "repeat_penalty": 1.15,
            "stream": false,
        });
        if let Some(model) = self.model_name.lock().unwrap().clone() {
            body["model"] = serde_json::json!(model);
        }

        let url = format!("{}/v1/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = resp.json().await?;
        parse_completion(&data)
    }

    /// Fallback path: the same prompt submitted as a chat exchange.
    async fn chat_fallback(
        &self,
        prompt: &str,
        params: SamplingParams,
    ) -> std::result::Result<Completion, CompletionError> {
        let messages = serde_json::json!([
            { "role": "system", "content": FALLBACK_SYSTEM_PROMPT },
            { "role": "user", "content": prompt },
        ]);

        let mut body = serde_json::json!({
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": 0.9,
            "repeat_penalty": 1.15,
            "stream": false,
        });
        if let Some(model) = self.model_name.lock().unwrap().clone() {
            body["model"] = serde_json::json!(model);
        }

        let url = format!("{}/v1/chat/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = resp.json().await?;
        parse_chat(&data)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    /// Generate a continuation: completions endpoint first, chat
    /// fallback on any failure. Only when both fail does the error
    /// reach the caller.
    async fn generate(
        &self,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<Completion> {
        match self.complete(prompt, params).await {
            Ok(completion) => Ok(completion),
            Err(err) => {
                debug!("Completion endpoint failed, trying chat fallback: {}", err);
                self.chat_fallback(prompt, params)
                    .await
                    .context("Both completion and chat endpoints failed")
            }
        }
    }

    /// `GET /v1/models` with a short timeout. Remembers the first
    /// listed model id for subsequent request bodies.
    async fn check_connection(&self) -> Result<String> {
        let url = format!("{}/v1/models", self.api_url);
        let resp = self
            .http
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .context("Connection check failed")?;

        let data: Value = resp
            .json()
            .await
            .context("Failed to parse models response")?;

        let model = data["data"][0]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No model loaded on the server"))?
            .to_string();

        *self.model_name.lock().unwrap() = Some(model.clone());
        Ok(model)
    }

    fn model_name(&self) -> Option<String> {
        self.model_name.lock().unwrap().clone()
    }
}

/// Pull text and token count out of a `/v1/completions` response.
fn parse_completion(data: &Value) -> std::result::Result<Completion, CompletionError> {
    let text = data["choices"][0]["text"]
        .as_str()
        .ok_or_else(|| CompletionError::Malformed("missing choices[0].text".to_string()))?;

    Ok(Completion {
        text: text.trim().to_string(),
        tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    })
}

/// Pull text and token count out of a `/v1/chat/completions` response.
fn parse_chat(data: &Value) -> std::result::Result<Completion, CompletionError> {
    let text = data["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            CompletionError::Malformed("missing choices[0].message.content".to_string())
        })?;

    Ok(Completion {
        text: text.trim().to_string(),
        tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    })
}

//! OpenAI-compatible chat-completions adapter.
//!
//! Epistemic foundation:
//! - K_i: The chat-completions schema is the de facto standard
//! - B_i: The API will respond within the timeout (might fail)
//! - B_i: The response will be valid JSON (might fail)
//!
//! One call here is one attempt. Retry and admission control live in the
//! worker pool; this adapter only reports what happened.

use crate::client::RateLimiter;
use crate::models::{ErgonError, ProviderConfig, Result, Task};
use crate::pool::{CallResponse, CompletionClient};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Single-attempt client for any OpenAI-compatible endpoint.
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    timeout: Duration,
    rate_limiter: Arc<RateLimiter>,
}

impl ChatClient {
    /// Create a client from provider configuration and a resolved API key.
    pub fn new(provider: &ProviderConfig, api_key: String) -> Result<Self> {
        let timeout = Duration::from_secs(provider.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ErgonError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            model: provider.model.clone(),
            system_prompt: provider.system_prompt.clone(),
            temperature: provider.temperature,
            top_p: provider.top_p,
            timeout,
            rate_limiter: Arc::new(RateLimiter::new()),
        })
    }

    /// Get the rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn messages_for(&self, question: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(question));
        messages
    }
}

#[async_trait]
impl CompletionClient for ChatClient {
    /// Issue one chat-completion call.
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    async fn complete(&self, task: &Task) -> Result<CallResponse> {
        self.rate_limiter.wait_if_needed(&self.model).await;

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: self.messages_for(&task.question),
            temperature: self.temperature,
            top_p: self.top_p,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ErgonError::Timeout(self.timeout)
                } else {
                    ErgonError::Network(e)
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<f64>().ok());

        self.rate_limiter
            .record_request(&self.model, status, retry_after);

        if status == 429 {
            return Err(ErgonError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(1.0),
            });
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorResponse>(&error_body) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_body,
            };
            return Err(ErgonError::Api { status, message });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ErgonError::ParseError(format!("Failed to parse response: {e}")))?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ErgonError::ParseError("No choices in response".to_string()))?;

        Ok(CallResponse {
            content,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            total_tokens: body.usage.map_or(0, |u| u.total_tokens),
        })
    }
}

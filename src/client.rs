/*!
 * Translation client for OpenAI-compatible chat-completion providers.
 *
 * Performs one request/response cycle per unit: builds the chat request,
 * posts it through a [`ChatTransport`], classifies the reply, and retries
 * transparently on rate-limit signals with a fixed 60 second backoff. Fatal
 * errors (config, transport, parse) propagate to the dispatcher unchanged.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::errors::ClientError;
use crate::registry::Provider;

/// Fixed backoff applied after a rate-limit signal
const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(60_000);

/// Maximum length of a response body quoted inside an error message
const ERROR_SNIPPET_LEN: usize = 200;

/// Chat message object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system or user)
    pub role: String,
    /// Content of the message
    pub content: String,
}

/// Chat-completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model name to use for generation
    model: String,
    /// Sampling temperature
    temperature: f32,
    /// Messages of the conversation
    messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Create a new chat request with no messages
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self { model: model.into(), temperature, messages: Vec::new() }
    }

    /// Append a system message
    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage { role: "system".to_string(), content: content.into() });
        self
    }

    /// Append a user message
    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage { role: "user".to_string(), content: content.into() });
        self
    }
}

/// Raw HTTP reply, decoupled from the reqwest types for testability
#[derive(Debug, Clone)]
pub struct HttpReply {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

/// Transport seam for posting chat requests
///
/// The production implementation is [`HttpTransport`]; tests substitute a
/// scripted fake so the retry loop runs without the network.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post one chat request and return the raw reply
    async fn post_chat(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<HttpReply, ClientError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    /// HTTP client for API requests
    http: Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn post_chat(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<HttpReply, ClientError> {
        let response = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Request(format!("failed to send request to {}: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Request(format!("failed to read response body: {}", e)))?;

        Ok(HttpReply { status, body })
    }
}

/// Options controlling client retry behavior
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Cap on rate-limit retries per request; `None` retries indefinitely
    pub max_rate_limit_retries: Option<u32>,
}

/// Seam consumed by the dispatcher
///
/// Implemented by [`TranslationClient`] in production and by mock backends in
/// tests, so dispatch policy can be exercised without HTTP.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Translate one unit's text through the given provider
    async fn translate(
        &self,
        text: &str,
        provider: &Provider,
        system_prompt: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, ClientError>;
}

/// HTTP translation client
pub struct TranslationClient {
    /// Transport used to post requests
    transport: Arc<dyn ChatTransport>,
    /// Retry options
    options: ClientOptions,
}

impl Default for TranslationClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

/// Outcome of classifying one raw reply
enum Interpretation {
    /// Usable translated content
    Content(String),
    /// Rate-limit signal; retry after backoff
    RateLimited(String),
    /// Fatal for this attempt
    Fatal(ClientError),
}

impl TranslationClient {
    /// Create a client backed by the reqwest transport
    pub fn new(options: ClientOptions) -> Self {
        Self { transport: Arc::new(HttpTransport::default()), options }
    }

    /// Create a client over a custom transport
    pub fn with_transport(transport: Arc<dyn ChatTransport>, options: ClientOptions) -> Self {
        Self { transport, options }
    }

    /// Send one unit through a provider, retrying on rate-limit signals.
    ///
    /// Retries sleep a fixed 60 seconds and re-send the identical request,
    /// indefinitely unless [`ClientOptions::max_rate_limit_retries`] is set or
    /// the cancel token fires.
    pub async fn send(
        &self,
        text: &str,
        provider: &Provider,
        system_prompt: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, ClientError> {
        if provider.api_key.is_empty() {
            return Err(ClientError::MissingApiKey(provider.id.clone()));
        }

        let mut request = ChatRequest::new(&provider.model, provider.temperature);
        if let Some(prompt) = system_prompt {
            request = request.system(prompt);
        }
        let request = request.user(text);
        let url = format!("{}/chat/completions", provider.api_base_url.trim_end_matches('/'));

        let mut retries: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let reply = self.transport.post_chat(&url, &provider.api_key, &request).await?;
            match interpret_reply(&reply) {
                Interpretation::Content(translated) => return Ok(translated),
                Interpretation::Fatal(err) => return Err(err),
                Interpretation::RateLimited(message) => {
                    retries += 1;
                    if let Some(cap) = self.options.max_rate_limit_retries {
                        if retries > cap {
                            return Err(ClientError::RateLimitExhausted(message));
                        }
                    }
                    warn!(
                        "Provider '{}' rate limited ({}), retrying in {:?}",
                        provider.id, message, RATE_LIMIT_BACKOFF
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(RATE_LIMIT_BACKOFF) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TranslationBackend for TranslationClient {
    async fn translate(
        &self,
        text: &str,
        provider: &Provider,
        system_prompt: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, ClientError> {
        self.send(text, provider, system_prompt, cancel).await
    }
}

/// Whether a reply is a rate-limit signal: HTTP 429, or a body matching any
/// of the known rate-limit phrases case-insensitively
fn is_rate_limit_signal(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let lower = body.to_lowercase();
    ["rate limit", "too many requests", "rpm"].iter().any(|pattern| lower.contains(pattern))
}

/// Classify one raw reply into content, a retryable signal, or a fatal error
fn interpret_reply(reply: &HttpReply) -> Interpretation {
    if !(200..300).contains(&reply.status) {
        if is_rate_limit_signal(reply.status, &reply.body) {
            return Interpretation::RateLimited(format!(
                "status {}: {}",
                reply.status,
                snippet(&reply.body)
            ));
        }
        let message =
            extract_error_message(&reply.body).unwrap_or_else(|| snippet(&reply.body));
        return Interpretation::Fatal(ClientError::Api { status: reply.status, message });
    }

    match extract_content(&reply.body) {
        Ok(translated) => Interpretation::Content(translated),
        Err(err) => {
            // Some providers report throttling inside a 2xx error body
            if is_rate_limit_signal(reply.status, &reply.body) {
                Interpretation::RateLimited(snippet(&reply.body))
            } else {
                Interpretation::Fatal(err)
            }
        }
    }
}

/// Extract the translated text from a 2xx response body.
///
/// Reads `choices[0].message.content`, falling back to `choices[0].text`. A
/// body that parses but yields no usable string is a parse error carrying any
/// `error.message` found in the body.
fn extract_content(body: &str) -> Result<String, ClientError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClientError::Parse(format!("response is not valid JSON: {}", e)))?;

    let choice = value.pointer("/choices/0");
    if let Some(content) = choice.and_then(|c| c.pointer("/message/content")).and_then(Value::as_str) {
        return Ok(content.to_string());
    }
    if let Some(content) = choice.and_then(|c| c.get("text")).and_then(Value::as_str) {
        return Ok(content.to_string());
    }

    let message = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "response contained no translated content".to_string());
    Err(ClientError::Parse(message))
}

/// Pull `error.message` out of an error body, if present
fn extract_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Bounded quote of a response body for error messages
fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= ERROR_SNIPPET_LEN {
        trimmed.to_string()
    } else {
        let mut end = ERROR_SNIPPET_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

/// LLM client: the single point of entry for all chat-completion calls.
///
/// ARCHITECTURAL RULE: No other module may call the provider API directly.
/// Handlers and services depend on the `ChatProvider` trait so tests can swap in fakes.
///
/// Speaks the OpenAI-compatible `/chat/completions` protocol (SiliconFlow by default).
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::streaming::idle_timeout;

pub mod prompts;
pub mod sse;

use sse::SseDecoder;

const STREAM_DONE: &str = "[DONE]";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM stream stalled: nothing received for {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    /// Transport failures, rate limits and provider-side errors are worth retrying.
    /// Other 4xx responses (bad key, bad request) will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::Parse(_) | LlmError::EmptyContent | LlmError::Timeout(_) => {
                true
            }
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Incremental text fragments from a streamed completion, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Provider-agnostic completion request. The model id comes from the client config.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// Ask the provider for a JSON object response.
    pub json_output: bool,
}

impl ChatRequest {
    pub fn json(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: vec![ChatMessage::user(prompt)],
            json_output: true,
        }
    }
}

/// A chat-completion backend. `LlmClient` is the production implementation.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Sends one buffered request and returns the assistant's text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;

    /// Opens a streamed request. Errors before the first byte are returned
    /// directly; later failures arrive as an `Err` item in the stream.
    async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, LlmError>;
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

/// The production chat-completion client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        // No client-wide total timeout: it would also cap streamed bodies.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Resolves the chat completions endpoint from the configured base URL.
    fn endpoint(&self) -> String {
        completions_endpoint(&self.config.base_url)
    }

    /// Sends the request and checks the status. The body is left unread.
    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: &request.system,
        });
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: &m.role,
            content: &m.content,
        }));

        let body = CompletionBody {
            model: &self.config.model,
            messages,
            response_format: request.json_output.then_some(ResponseFormat {
                format_type: "json_object",
            }),
            stream,
        };

        let builder = self
            .client
            .post(self.endpoint())
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&body);

        // Buffered: the timeout covers the whole exchange.
        // Streamed: it covers the wait for response headers; body gaps are bounded separately.
        let response = if stream {
            tokio::time::timeout(self.config.timeout, builder.send())
                .await
                .map_err(|_| LlmError::Timeout(self.config.timeout))??
        } else {
            builder.timeout(self.config.timeout).send().await?
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for LlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let response: CompletionResponse = self.send(request, false).await?.json().await?;

        if let Some(usage) = &response.usage {
            debug!(
                "LLM call succeeded: prompt_tokens={:?}, completion_tokens={:?}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyContent)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, LlmError> {
        let response = self.send(request, true).await?;
        info!("LLM stream opened (model: {})", self.config.model);
        let body = idle_timeout(
            response.bytes_stream().map(|chunk| chunk.map_err(LlmError::from)),
            self.config.timeout,
            LlmError::Timeout,
        );
        Ok(completion_fragments(body).boxed())
    }
}

/// `{base}/chat/completions`, unless the base already names the endpoint.
pub fn completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

enum StreamEvent {
    Fragment(String),
    Skip,
    Done,
}

fn parse_stream_event(data: &str) -> StreamEvent {
    if data.trim() == STREAM_DONE {
        return StreamEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|text| !text.is_empty())
            .map(StreamEvent::Fragment)
            .unwrap_or(StreamEvent::Skip),
        Err(e) => {
            debug!("Skipping unparseable stream event: {e}");
            StreamEvent::Skip
        }
    }
}

struct FragmentState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    body_finished: bool,
}

/// Turns a completion event-stream body into text fragments.
///
/// Ends at `[DONE]` or end of body. A body error is yielded once, then the stream ends.
pub fn completion_fragments<S, E>(body: S) -> impl Stream<Item = Result<String, LlmError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    let state = FragmentState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        body_finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.pending.pop_front() {
                match parse_stream_event(&data) {
                    StreamEvent::Fragment(text) => return Some((Ok(text), state)),
                    StreamEvent::Skip => continue,
                    StreamEvent::Done => return None,
                }
            }
            if state.body_finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.body_finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.body_finished = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
}

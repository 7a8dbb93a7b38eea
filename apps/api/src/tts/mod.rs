// Text-to-speech proxy.
// Forwards text to an OpenAI-compatible /audio/speech endpoint and relays the
// mp3 bytes to the caller as they arrive.

use std::time::Duration;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::TtsConfig;
use crate::errors::AppError;
use crate::llm_client::completions_endpoint;
use crate::state::AppState;
use crate::streaming::idle_timeout;

pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TTS API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("TTS provider silent for {0:?}")]
    Timeout(Duration),
}

pub type AudioStream = BoxStream<'static, Result<Bytes, TtsError>>;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    stream: bool,
}

#[derive(Clone)]
pub struct TtsClient {
    client: Client,
    config: TtsConfig,
}

impl TtsClient {
    pub fn new(config: TtsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build TTS HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> String {
        speech_endpoint(&self.config.base_url)
    }

    /// Starts synthesis and returns the audio body as a byte stream.
    /// Fails before any bytes are relayed if the provider rejects the request or
    /// does not answer within the timeout; afterwards the timeout bounds each gap
    /// between audio chunks.
    pub async fn synthesize(&self, text: &str) -> Result<AudioStream, TtsError> {
        let body = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: &self.config.voice,
            response_format: "mp3",
            stream: true,
        };

        let timeout = self.config.timeout;
        let send = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| TtsError::Timeout(timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!("TTS stream opened ({} chars)", text.chars().count());
        let audio = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TtsError::from));
        Ok(idle_timeout(audio, timeout, TtsError::Timeout).boxed())
    }
}

/// `{base}/audio/speech`, sharing the base-URL normalisation of the chat endpoint.
pub fn speech_endpoint(base_url: &str) -> String {
    let chat = completions_endpoint(base_url);
    match chat.strip_suffix("/chat/completions") {
        Some(root) => format!("{root}/audio/speech"),
        None => format!("{}/audio/speech", base_url.trim_end_matches('/')),
    }
}

impl From<TtsError> for AppError {
    fn from(err: TtsError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    #[serde(default)]
    pub text: String,
}

/// GET /api/v1/audio?text=…
pub async fn handle_audio(
    State(state): State<AppState>,
    Query(params): Query<AudioQuery>,
) -> Result<Response, AppError> {
    let text = params.text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("text cannot be empty".to_string()));
    }

    let audio = state.tts.synthesize(text).await.map_err(|e| {
        warn!("TTS request failed: {e}");
        AppError::from(e)
    })?;

    Ok((
        [(header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)],
        Body::from_stream(audio),
    )
        .into_response())
}

//! Axum route handlers for the Generation API.

use std::borrow::Cow;
use std::convert::Infallible;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::StreamExt;
use serde::Deserialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::chat::{reply, ChatTurnRequest, ChatTurnResponse};
use crate::generation::generator::Generation;
use crate::generation::prompts::build_story_prompt;
use crate::generation::validator::warn_on_unrequested_words;
use crate::generation::GenerationError;
use crate::state::AppState;

pub const DEFAULT_LEVEL: &str = "Junior High";

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    #[serde(default = "default_level")]
    pub level: String,
    pub words: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

fn default_level() -> String {
    DEFAULT_LEVEL.to_string()
}

impl GenerationRequest {
    /// Unknown levels are accepted; they resolve to the default policy.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.topic.trim().is_empty() {
            return Err(GenerationError::InvalidInput(
                "topic cannot be empty".to_string(),
            ));
        }
        if self.words.is_empty() {
            return Err(GenerationError::InvalidInput(
                "words cannot be empty".to_string(),
            ));
        }
        if self.words.iter().any(|w| w.trim().is_empty()) {
            return Err(GenerationError::InvalidInput(
                "words cannot contain blank entries".to_string(),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/stories/generate
///
/// Buffered: returns the validated `GenerationResult`.
/// Streaming: relays raw model text as server-sent events; the client parses
/// the concatenated text once the stream ends.
pub async fn handle_generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Response, AppError> {
    request.validate()?;

    let request_id = Uuid::new_v4();
    let span = info_span!("generation", %request_id, level = %request.level, stream = request.stream);

    generate_story(state, request).instrument(span).await
}

async fn generate_story(state: AppState, request: GenerationRequest) -> Result<Response, AppError> {
    info!(
        "Generating story: topic={}, {} words",
        request.topic,
        request.words.len()
    );
    let prompt = build_story_prompt(&request.words, &request.topic, &request.level);

    match state.generator.generate(&prompt, request.stream).await? {
        Generation::Buffered(result) => {
            warn_on_unrequested_words(&result, &request.words);
            Ok(Json(result).into_response())
        }
        Generation::Streaming(fragments) => {
            let events = fragments.map(|fragment| Ok::<_, Infallible>(fragment_event(&fragment)));
            Ok(Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response())
        }
    }
}

/// One `data:` event per fragment. SSE field values cannot carry `\r`, so CR
/// and CRLF become LF; `Event::data` then splits on LF into multiple `data:`
/// lines, which clients rejoin with LF.
fn fragment_event(fragment: &str) -> Event {
    Event::default().data(normalize_line_endings(fragment))
}

fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// POST /api/v1/chat
///
/// One roleplay turn with a character from the story.
pub async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatTurnRequest>,
) -> Result<Json<ChatTurnResponse>, AppError> {
    let response = reply(&state.generator, &request).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(topic: &str, words: &[&str]) -> GenerationRequest {
        GenerationRequest {
            topic: topic.to_string(),
            level: DEFAULT_LEVEL.to_string(),
            words: words.iter().map(|w| w.to_string()).collect(),
            stream: false,
        }
    }

    #[test]
    fn test_defaults_applied_on_deserialize() {
        let req: GenerationRequest = serde_json::from_value(serde_json::json!({
            "topic": "Art",
            "words": ["canvas"]
        }))
        .unwrap();
        assert_eq!(req.level, "Junior High");
        assert!(!req.stream);
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(request("Art", &["canvas", "brush"]).validate().is_ok());
    }

    #[test]
    fn test_empty_words_rejected() {
        let err = request("Art", &[]).validate().unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
    }

    #[test]
    fn test_blank_word_rejected() {
        assert!(request("Art", &["canvas", "  "]).validate().is_err());
    }

    #[test]
    fn test_blank_topic_rejected() {
        assert!(request(" ", &["canvas"]).validate().is_err());
    }

    #[test]
    fn test_carriage_returns_become_line_feeds() {
        assert_eq!(normalize_line_endings("{\r\n\"a\": 1}"), "{\n\"a\": 1}");
        assert_eq!(normalize_line_endings("a\rb"), "a\nb");
        assert!(matches!(normalize_line_endings("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn test_unknown_level_is_accepted() {
        let mut req = request("Art", &["canvas"]);
        req.level = "Kindergarten".to_string();
        assert!(req.validate().is_ok());
    }
}

// Story/quiz generation pipeline.
// Flow: policy table → prompt builder → generator (buffered with retry, or streamed)
//       → validator (buffered only).
// All provider calls go through llm_client; no direct HTTP calls here.

use thiserror::Error;

use crate::llm_client::LlmError;

pub mod chat;
pub mod generator;
pub mod handlers;
pub mod policy;
pub mod prompts;
pub mod validator;

/// Length of the raw-output excerpt kept for diagnostics.
pub const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The provider could not be reached or kept failing after the retry budget.
    #[error("Provider call failed: {0}")]
    ProviderTransport(#[source] LlmError),

    /// The provider answered, but not with a well-formed result.
    /// `excerpt` is for logs only and must never be sent to the caller.
    #[error("Malformed model response: {reason}")]
    MalformedResponse { reason: String, excerpt: String },
}

/// First `EXCERPT_CHARS` characters of `raw`, cut on a char boundary.
pub fn excerpt(raw: &str) -> String {
    raw.chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let raw = "故".repeat(EXCERPT_CHARS + 20);
        let cut = excerpt(&raw);
        assert_eq!(cut.chars().count(), EXCERPT_CHARS);
        assert_eq!(excerpt("short"), "short");
    }
}

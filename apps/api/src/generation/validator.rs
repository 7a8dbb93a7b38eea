//! Response validation for the buffered generation path.
//!
//! Parses the model's raw text into a `GenerationResult` and enforces the
//! quiz shape the prompt asks for: exactly 3 questions, 4 options each, and
//! an answer that is one of the options.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::generation::{excerpt, GenerationError};

pub const QUIZ_LEN: usize = 3;
pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// The envelope returned to buffered callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Markdown story with target words in bold.
    pub content: String,
    pub translation: String,
    pub translation_map: BTreeMap<String, String>,
    pub quiz: Vec<QuizItem>,
}

/// Parses and checks raw model output.
///
/// On failure the first 500 characters of `raw` are logged and carried in the
/// error; they never reach the HTTP response.
pub fn validate(raw: &str) -> Result<GenerationResult, GenerationError> {
    let text = strip_json_fences(raw);

    let result: GenerationResult = serde_json::from_str(text)
        .map_err(|e| malformed(raw, format!("not a valid result document: {e}")))?;

    check_quiz(&result.quiz).map_err(|reason| malformed(raw, reason))?;

    if result.content.trim().is_empty() {
        return Err(malformed(raw, "story content is empty".to_string()));
    }

    Ok(result)
}

/// Logs translation_map keys that are not among the requested words.
/// Models sometimes add inflected forms; these are kept, not rejected.
pub fn warn_on_unrequested_words(result: &GenerationResult, words: &[String]) {
    let unexpected: Vec<&str> = result
        .translation_map
        .keys()
        .filter(|k| !words.iter().any(|w| w.eq_ignore_ascii_case(k)))
        .map(String::as_str)
        .collect();

    if !unexpected.is_empty() {
        warn!("translation_map contains unrequested words: {:?}", unexpected);
    }
}

fn check_quiz(quiz: &[QuizItem]) -> Result<(), String> {
    if quiz.len() != QUIZ_LEN {
        return Err(format!(
            "quiz must have exactly {QUIZ_LEN} items, got {}",
            quiz.len()
        ));
    }

    for (i, item) in quiz.iter().enumerate() {
        if item.options.len() != OPTIONS_PER_QUESTION {
            return Err(format!(
                "quiz item {} must have exactly {OPTIONS_PER_QUESTION} options, got {}",
                i + 1,
                item.options.len()
            ));
        }
        if !item.options.contains(&item.answer) {
            return Err(format!("quiz item {} answer is not one of its options", i + 1));
        }
    }

    Ok(())
}

fn malformed(raw: &str, reason: String) -> GenerationError {
    let excerpt = excerpt(raw);
    error!("Malformed model response ({reason}). Raw content: {excerpt}...");
    GenerationError::MalformedResponse { reason, excerpt }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn well_formed() -> serde_json::Value {
        json!({
            "content": "The **apple** fell.",
            "translation": "苹果掉了。",
            "translation_map": {"apple": "苹果"},
            "quiz": [
                {"question": "What fell?", "options": ["An apple", "A pear", "A book", "A cat"], "answer": "An apple"},
                {"question": "Q2?", "options": ["a", "b", "c", "d"], "answer": "b"},
                {"question": "Q3?", "options": ["w", "x", "y", "z"], "answer": "z"}
            ]
        })
    }

    fn assert_malformed(result: Result<GenerationResult, GenerationError>) {
        match result {
            Err(GenerationError::MalformedResponse { .. }) => {}
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_well_formed_result_is_accepted() {
        let result = validate(&well_formed().to_string()).unwrap();
        assert_eq!(result.quiz.len(), 3);
        for item in &result.quiz {
            assert_eq!(item.options.len(), 4);
            assert!(item.options.contains(&item.answer));
        }
        assert_eq!(result.translation_map.get("apple").unwrap(), "苹果");
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert_malformed(validate("not json"));
    }

    #[test]
    fn test_fenced_json_is_accepted() {
        let raw = format!("```json\n{}\n```", well_formed());
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn test_missing_key_is_malformed() {
        let mut value = well_formed();
        value.as_object_mut().unwrap().remove("translation");
        assert_malformed(validate(&value.to_string()));
    }

    #[test]
    fn test_wrong_quiz_length_is_malformed() {
        let mut value = well_formed();
        value["quiz"].as_array_mut().unwrap().pop();
        assert_malformed(validate(&value.to_string()));
    }

    #[test]
    fn test_wrong_option_count_is_malformed() {
        let mut value = well_formed();
        value["quiz"][1]["options"] = json!(["a", "b", "c"]);
        value["quiz"][1]["answer"] = json!("a");
        assert_malformed(validate(&value.to_string()));
    }

    #[test]
    fn test_answer_outside_options_is_malformed() {
        let mut value = well_formed();
        value["quiz"][2]["answer"] = json!("Option E");
        assert_malformed(validate(&value.to_string()));
    }

    #[test]
    fn test_excerpt_is_capped() {
        let raw = "x".repeat(2_000);
        match validate(&raw) {
            Err(GenerationError::MalformedResponse { excerpt, .. }) => {
                assert_eq!(excerpt.len(), 500)
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "  {\"key\": \"value\"}\n";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }
}

// Prompt text for story generation and roleplay chat.

use crate::generation::policy::{framing_for, resolve};

/// Output contract the model must follow. Embedded verbatim in every story prompt.
pub const STORY_OUTPUT_SCHEMA: &str = r#"{
    "content": "The story content in markdown...",
    "translation": "The full chinese translation of the story...",
    "translation_map": {
        "word1": "chinese_translation1",
        "word2": "chinese_translation2"
    },
    "quiz": [
        {
            "question": "Question text here?",
            "options": ["Option A", "Option B", "Option C", "Option D"],
            "answer": "Option A"
        }
    ]
}"#;

/// Story prompt template.
/// Replace: {difficulty_desc}, {length_instruction}, {topic_framing},
///          {quiz_instruction}, {schema}, {words} (last, so words stay verbatim)
pub const STORY_PROMPT_TEMPLATE: &str = r#"You are an expert English teacher creating reading materials for students.

TASK: Write a story using these words: {words}.

CONSTRAINTS (MUST FOLLOW):
1. LEVEL: {difficulty_desc}
2. LENGTH: {length_instruction}
3. TOPIC: {topic_framing}

IMPORTANT: The LEVEL and LENGTH constraints are STRICT. Adapt the Topic to fit the Level, not the other way around.
- If Level is KET/Elementary, ignore complex topic details. Focus ONLY on simple actions and objects.
- Do NOT write a long story if the length instruction says "short".
- Do NOT exceed the word count limit.

Highlight the target words in Markdown bold (**word**).

ALSO, generate exactly 3 multiple-choice questions to test the user's understanding of the vocabulary words in the context of the story.
QUIZ DIFFICULTY: {quiz_instruction}
Each question must have exactly 4 options, and the answer must be the full text of one of the options.
The questions and options must be in English.

The output must be a valid JSON object with the following structure:
{schema}
Ensure the JSON is valid. Do not include markdown formatting (```json) around the JSON output, just the raw JSON string."#;

/// Roleplay chat system prompt.
/// Replace: {story_context}, {target_words}
pub const CHAT_SYSTEM_TEMPLATE: &str = r#"You are a character from the generated story.

STORY CONTEXT:
{story_context}

TARGET WORDS:
{target_words}

INSTRUCTIONS:
1. Roleplay as a character from the story.
2. Interact with the user.
3. Encourage the user to use the target words in their replies.
4. If the user uses a target word correctly, praise them briefly.
5. Keep your responses concise (under 50 words) and conversational.
6. If the user speaks Chinese, reply in simple English and explain if needed."#;

/// Builds the story prompt for (words, topic, level).
///
/// The caller guarantees `words` is non-empty. Unknown levels and topics
/// resolve to defaults, so this never fails.
pub fn build_story_prompt(words: &[String], topic: &str, level: &str) -> String {
    let policy = resolve(level);
    let framing = framing_for(level, topic);

    STORY_PROMPT_TEMPLATE
        .replace("{difficulty_desc}", policy.difficulty_desc)
        .replace("{length_instruction}", policy.length_instruction)
        .replace("{quiz_instruction}", policy.quiz_instruction)
        .replace("{schema}", STORY_OUTPUT_SCHEMA)
        .replace("{topic_framing}", &framing)
        .replace("{words}", &words.join(", "))
}

pub fn build_chat_system(story_context: &str, target_words: &[String]) -> String {
    CHAT_SYSTEM_TEMPLATE
        .replace("{target_words}", &target_words.join(", "))
        .replace("{story_context}", story_context)
}

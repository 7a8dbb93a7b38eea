//! Level and topic policy tables.
//!
//! `resolve` is total: unknown levels get `DEFAULT_POLICY`. Topic framing is a
//! two-step lookup, the general table first and the (level, topic) override
//! rules second, so each step can be tested on its own.

use std::borrow::Cow;

/// Closed set of difficulty tiers the client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Ket,
    Pet,
    JuniorHigh,
    SeniorHigh,
    Postgraduate,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Ket,
        Level::Pet,
        Level::JuniorHigh,
        Level::SeniorHigh,
        Level::Postgraduate,
    ];

    /// Matches the exact labels the mini-program sends.
    pub fn parse(label: &str) -> Option<Level> {
        match label {
            "KET" => Some(Level::Ket),
            "PET" => Some(Level::Pet),
            "Junior High" => Some(Level::JuniorHigh),
            "Senior High" => Some(Level::SeniorHigh),
            "Postgraduate" => Some(Level::Postgraduate),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Level::Ket => "KET",
            Level::Pet => "PET",
            Level::JuniorHigh => "Junior High",
            Level::SeniorHigh => "Senior High",
            Level::Postgraduate => "Postgraduate",
        }
    }

    pub fn policy(self) -> &'static LevelPolicy {
        match self {
            Level::Ket => &KET_POLICY,
            Level::Pet => &PET_POLICY,
            Level::JuniorHigh => &JUNIOR_HIGH_POLICY,
            Level::SeniorHigh => &SENIOR_HIGH_POLICY,
            Level::Postgraduate => &POSTGRADUATE_POLICY,
        }
    }
}

/// Prompt parameters for one difficulty tier.
#[derive(Debug, PartialEq, Eq)]
pub struct LevelPolicy {
    pub difficulty_desc: &'static str,
    pub length_instruction: &'static str,
    pub quiz_instruction: &'static str,
}

static KET_POLICY: LevelPolicy = LevelPolicy {
    difficulty_desc: "CEFR A1/A2 (Elementary). \
        Use strict simple sentences (Subject-Verb-Object). \
        Avoid relative clauses or passive voice. \
        Story style: Simple children's book.",
    length_instruction: "Keep the story very short, strictly under 50 words. Max 5 sentences.",
    quiz_instruction: "Create 3 very simple multiple-choice questions. \
        Focus on direct facts from the story. Options should be short and simple.",
};

static PET_POLICY: LevelPolicy = LevelPolicy {
    difficulty_desc: "CEFR B1 (Intermediate). \
        Use standard compound sentences (connected with 'and', 'but', 'because'). \
        Can use simple past and present perfect tenses. \
        Story style: Casual blog post or diary entry.",
    length_instruction: "Keep the story short, around 80 words. Around 8 sentences.",
    quiz_instruction: "Create 3 straightforward multiple-choice questions. \
        Focus on understanding the main idea and specific details. Options should be clear.",
};

static JUNIOR_HIGH_POLICY: LevelPolicy = LevelPolicy {
    difficulty_desc: "CEFR B1+ (Junior High School). \
        Use varied sentence structures including simple relative clauses. \
        Story style: Young adult fiction.",
    length_instruction: "Keep the story moderate length, around 100-120 words. Around 10-12 sentences.",
    quiz_instruction: "Create 3 multiple-choice questions. \
        Focus on vocabulary usage and reading comprehension. Options should be distinct.",
};

static SENIOR_HIGH_POLICY: LevelPolicy = LevelPolicy {
    difficulty_desc: "CEFR B2 (Senior High School). \
        Use complex grammar: passive voice, conditionals (if...), and participial phrases. \
        Story style: News article or formal essay.",
    length_instruction: "Write a longer story, around 150-180 words. Around 15 sentences.",
    quiz_instruction: "Create 3 challenging multiple-choice questions. \
        Focus on inference, synonym matching, and context clues. \
        Options should be slightly ambiguous to test precision.",
};

static POSTGRADUATE_POLICY: LevelPolicy = LevelPolicy {
    difficulty_desc: "CEFR C1/C2 (Advanced/Academic). \
        Use highly sophisticated grammar: inversion, subjunctive mood, and long compound-complex sentences. \
        Story style: Academic paper, classic literature, or The Economist.",
    length_instruction: "Write a comprehensive story, at least 200 words. \
        At least 15-20 sentences with deep context.",
    quiz_instruction: "Create 3 advanced multiple-choice questions. \
        Focus on deep reading comprehension, tone analysis, and nuanced vocabulary usage. \
        Options should be complex and require critical thinking.",
};

/// Used for any level label outside the closed set.
pub static DEFAULT_POLICY: LevelPolicy = LevelPolicy {
    difficulty_desc: "Intermediate level (CEFR B1). Use standard vocabulary and sentence structures.",
    length_instruction: "Keep the story moderate length, around 10-15 sentences.",
    quiz_instruction: "Create 3 standard multiple-choice questions testing comprehension.",
};

/// Resolves a level label to its policy. Never fails.
pub fn resolve(level: &str) -> &'static LevelPolicy {
    Level::parse(level)
        .map(Level::policy)
        .unwrap_or(&DEFAULT_POLICY)
}

/// Preset topics and their story framing.
const TOPIC_FRAMINGS: &[(&str, &str)] = &[
    (
        "Harry Potter",
        "Set the story in the magical world of Hogwarts. You can include characters like Harry, \
        Hermione, or Ron. The tone should be magical and adventurous.",
    ),
    (
        "The Avengers",
        "Set the story in the Marvel Cinematic Universe. Include superheroes like Iron Man, \
        Captain America, or Thor. The tone should be action-packed and heroic.",
    ),
    (
        "Chinese History",
        "Set the story in ancient China. You can include elements like the Great Wall, emperors, \
        or traditional festivals. The tone should be respectful and educational.",
    ),
    (
        "Western History",
        "Set the story in a significant period of Western history (e.g., Ancient Rome, \
        Renaissance, or Victorian Era). The tone should be historical and descriptive.",
    ),
    (
        "Astronomy",
        "Set the story in outer space, observing stars, planets, or galaxies. You can include \
        astronauts or telescopes. The tone should be awe-inspiring and scientific.",
    ),
    (
        "Geography",
        "Set the story in a specific landscape like mountains, rivers, deserts, or forests. \
        Focus on the physical features of the earth. The tone should be adventurous and descriptive.",
    ),
    (
        "Math",
        "The story should involve solving puzzles, numbers, geometry, or logic. The characters \
        might be students or mathematicians. The tone should be logical and clever.",
    ),
    (
        "Physics",
        "The story should involve forces, motion, energy, or experiments. You can include \
        concepts like gravity or electricity. The tone should be curious and analytical.",
    ),
    (
        "Informatics",
        "Set the story in the digital world, involving computers, coding, AI, or robots. \
        The tone should be modern and technological.",
    ),
    (
        "Biology",
        "The story should involve animals, plants, ecosystems, or the human body. \
        The tone should be observational and naturalistic.",
    ),
    (
        "Chemistry",
        "The story should involve mixing potions, chemical reactions, or laboratory experiments. \
        The tone should be experimental and precise.",
    ),
    (
        "Art",
        "The story should involve painting, music, museums, or creativity. \
        The tone should be artistic and expressive.",
    ),
    (
        "Minecraft",
        "Set the story in the blocky world of Minecraft. Include elements like mining, crafting, \
        building, creepers, or zombies. The tone should be adventurous and creative.",
    ),
    (
        "Jokes",
        "Write a funny, child-friendly joke or humorous story. It should have a setup and a \
        punchline, or a funny situation. The tone should be lighthearted and amusing.",
    ),
    (
        "Daily Life",
        "Scenario: A relatable day-to-day situation (e.g., shopping, travel, family dinner).",
    ),
    (
        "Science",
        "Scenario: A popular science explanation or a lab experiment report.",
    ),
    (
        "History",
        "Scenario: A historical event narration or a biography of a famous figure.",
    ),
    (
        "Technology",
        "Scenario: A tech review or a futuristic sci-fi glimpse.",
    ),
];

/// Which topics an override rule applies to.
#[derive(Debug, Clone, Copy)]
enum TopicScope {
    Any,
    Only(&'static str),
}

/// Rewrites the framing for a (level, topic) combination. `{topic}` is substituted.
#[derive(Debug)]
struct FramingOverride {
    levels: &'static [Level],
    scope: TopicScope,
    framing: &'static str,
}

/// Evaluated in order; the first matching rule wins.
const FRAMING_OVERRIDES: &[FramingOverride] = &[
    FramingOverride {
        levels: &[Level::Ket],
        scope: TopicScope::Any,
        framing: "Topic: {topic}. Keep it very simple and child-friendly. \
            Avoid complex background or lore.",
    },
    FramingOverride {
        levels: &[Level::SeniorHigh, Level::Postgraduate],
        scope: TopicScope::Only("Daily Life"),
        framing: "Topic: {topic}. Treat an ordinary situation analytically: examine the social, \
            economic, or psychological forces behind it rather than narrating events.",
    },
    FramingOverride {
        levels: &[Level::Postgraduate],
        scope: TopicScope::Only("Jokes"),
        framing: "Topic: {topic}. Write a witty satirical piece relying on irony, understatement, \
            and wordplay rather than slapstick.",
    },
];

/// General topic lookup. Unknown topics get a literal framing.
pub fn topic_framing(topic: &str) -> Cow<'static, str> {
    TOPIC_FRAMINGS
        .iter()
        .find(|(name, _)| *name == topic)
        .map(|(_, framing)| Cow::Borrowed(*framing))
        .unwrap_or_else(|| Cow::Owned(format!("The topic is {topic}.")))
}

/// Applies the first matching override rule to an already-looked-up framing.
pub fn apply_framing_override<'a>(
    level: Option<Level>,
    topic: &str,
    framing: Cow<'a, str>,
) -> Cow<'a, str> {
    let Some(level) = level else {
        return framing;
    };

    FRAMING_OVERRIDES
        .iter()
        .find(|rule| {
            rule.levels.contains(&level)
                && match rule.scope {
                    TopicScope::Any => true,
                    TopicScope::Only(name) => name == topic,
                }
        })
        .map(|rule| Cow::Owned(rule.framing.replace("{topic}", topic)))
        .unwrap_or(framing)
}

/// Full framing for a request: topic lookup, then level overrides.
pub fn framing_for(level: &str, topic: &str) -> Cow<'static, str> {
    apply_framing_override(Level::parse(level), topic, topic_framing(topic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_level_has_distinct_non_empty_policy() {
        let mut seen = HashSet::new();
        for level in Level::ALL {
            let policy = resolve(level.label());
            assert!(!policy.difficulty_desc.is_empty());
            assert!(!policy.length_instruction.is_empty());
            assert!(!policy.quiz_instruction.is_empty());
            assert_ne!(policy, &DEFAULT_POLICY, "{} must not use the default", level.label());
            assert!(seen.insert(policy.difficulty_desc), "duplicate policy for {}", level.label());
        }
    }

    #[test]
    fn test_unknown_level_falls_back_to_default() {
        for label in ["", "ket", "University", "Junior high", "IELTS"] {
            assert_eq!(resolve(label), &DEFAULT_POLICY);
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        assert!(std::ptr::eq(resolve("PET"), resolve("PET")));
        assert!(std::ptr::eq(resolve("nope"), resolve("nope")));
    }

    #[test]
    fn test_level_labels_round_trip() {
        for level in Level::ALL {
            assert_eq!(Level::parse(level.label()), Some(level));
        }
    }

    #[test]
    fn test_known_topic_framing() {
        assert!(topic_framing("Harry Potter").contains("Hogwarts"));
        assert!(topic_framing("Minecraft").contains("crafting"));
    }

    #[test]
    fn test_unknown_topic_uses_literal_default() {
        assert_eq!(topic_framing("Cooking"), "The topic is Cooking.");
    }

    #[test]
    fn test_ket_override_replaces_any_topic() {
        let framing = framing_for("KET", "Harry Potter");
        assert!(framing.starts_with("Topic: Harry Potter."));
        assert!(framing.contains("child-friendly"));
        assert!(!framing.contains("Hogwarts"));
    }

    #[test]
    fn test_advanced_level_generic_topic_gets_abstract_framing() {
        let framing = framing_for("Postgraduate", "Daily Life");
        assert!(framing.contains("analytically"));
        let framing = framing_for("Senior High", "Daily Life");
        assert!(framing.contains("analytically"));
    }

    #[test]
    fn test_override_runs_after_topic_lookup() {
        // No rule for PET: the general lookup result passes through untouched.
        let looked_up = topic_framing("Daily Life");
        let framing = apply_framing_override(Level::parse("PET"), "Daily Life", looked_up.clone());
        assert_eq!(framing, looked_up);
    }

    #[test]
    fn test_unknown_level_skips_overrides() {
        assert_eq!(framing_for("IELTS", "Jokes"), topic_framing("Jokes"));
    }

    #[test]
    fn test_first_matching_override_wins() {
        let framing = framing_for("Postgraduate", "Jokes");
        assert!(framing.contains("satirical"));
    }
}

// Shared system prompts. Each service that builds user prompts keeps its own
// prompts.rs alongside it; this file holds the cross-cutting fragments.

/// System prompt for every call that must come back as a bare JSON object.
pub const JSON_ONLY_SYSTEM: &str =
    "You are a helpful assistant that outputs raw JSON without markdown formatting.";

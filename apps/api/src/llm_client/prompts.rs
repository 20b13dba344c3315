// Prompt fragments shared by every gateway caller. Workflow-specific
// templates live next to the workflow (see audit/prompts.rs).

/// Appended to user prompts whose reply is parsed as a JSON object.
pub const JSON_ONLY_INSTRUCTION: &str = "\
    Reply with a single valid JSON object and nothing else. \
    No markdown commentary, no prose before or after the object.";

// Common text blocks for all prompts
pub const DONT_TELL_ME: &str = r#"
Important instructions for your responses:

1. Do not narrate or describe your actions.
2. Do not summarize or restate the instructions you have been given.
3. Do not preface the JSON with phrases like "Here is the analysis..." or "I will now...".
4. Do not acknowledge or confirm that you understand these instructions.
5. Return the requested JSON and nothing else.
"#;

pub const JSON_ONLY: &str = r#"
Return a single JSON object inside a ```json fenced block. Use double quotes for every
key and string. Do not add comments or trailing commas.
"#;

/// Renders a closed vocabulary as `"a" | "b" | "c"` for inclusion in a prompt.
pub fn option_list(options: &[&str]) -> String {
    options
        .iter()
        .map(|option| format!("\"{}\"", option))
        .collect::<Vec<_>>()
        .join(" | ")
}

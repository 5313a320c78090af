//! Prompt template loading and placeholder substitution.
//!
//! Template files carry a free-form documentation header for humans,
//! separated from the actual LLM-facing body by a `<commentblockmarker>###</commentblockmarker>`
//! fence. The body contains `!<INPUT n>!` placeholders, filled positionally
//! (1-indexed) from the caller's input list.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

const FENCE: &str = "<commentblockmarker>###</commentblockmarker>";

/// A loaded prompt template, with its documentation header already trimmed.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    body: String,
}

impl PromptTemplate {
    /// Build a template directly from its raw text (trims the fence if present).
    pub fn from_raw(raw: &str) -> Self {
        let body = match raw.find(FENCE) {
            Some(index) => raw[index + FENCE.len()..].trim().to_string(),
            None => raw.trim().to_string(),
        };
        Self { body }
    }

    /// Load a template from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading prompt template {}", path.display()))?;
        Ok(Self::from_raw(&raw))
    }

    /// Substitute every `!<INPUT n>!` placeholder with `inputs[n-1]`.
    ///
    /// Placeholders referencing an out-of-range index are left untouched so
    /// a malformed template fails loudly in the rendered prompt rather than
    /// silently dropping text.
    pub fn generate_prompt(&self, inputs: &[&str]) -> String {
        let mut rendered = self.body.clone();
        for (index, value) in inputs.iter().enumerate() {
            let placeholder = format!("!<INPUT {}>!", index + 1);
            rendered = rendered.replace(&placeholder, value);
        }
        rendered
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Truncate `text` to at most `max_chars` characters, appending `…` when cut.
///
/// Shared by every block-building helper in `sim-thinker`/`sim-agent` that
/// assembles bounded context windows for a prompt.
pub fn truncate_for_prompt(text: &str, max_chars: usize) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let truncated: String = chars.into_iter().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_documentation_header_at_fence() {
        let raw = "This template asks for a wake up hour.\n\
                   <commentblockmarker>###</commentblockmarker>\n\
                   Klaus Mueller wakes up at !<INPUT 1>! o'clock.";
        let template = PromptTemplate::from_raw(raw);
        assert_eq!(template.body(), "Klaus Mueller wakes up at !<INPUT 1>! o'clock.");
    }

    #[test]
    fn substitutes_positional_placeholders() {
        let template = PromptTemplate::from_raw("Hello !<INPUT 1>!, today is !<INPUT 2>!.");
        let rendered = template.generate_prompt(&["Isabella", "Monday"]);
        assert_eq!(rendered, "Hello Isabella, today is Monday.");
    }

    #[test]
    fn leaves_body_untouched_without_fence() {
        let template = PromptTemplate::from_raw("no fence here !<INPUT 1>!");
        assert_eq!(template.generate_prompt(&["ok"]), "no fence here ok");
    }

    #[test]
    fn truncate_for_prompt_appends_ellipsis() {
        assert_eq!(truncate_for_prompt("hello world", 5), "hello…");
        assert_eq!(truncate_for_prompt("hi", 5), "hi");
    }
}

pub mod converse;
pub mod plan;
pub mod retrieve;

/// Trim everything outside the outermost `{...}` or `[...]` — LLMs
/// routinely wrap structured output in prose or code fences.
pub(crate) fn extract_json(raw: &str) -> &str {
    let open = raw.find(['{', '[']);
    let close = raw.rfind(['}', ']']);
    match (open, close) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    }
}

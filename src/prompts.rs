//! Instruction prompts for VLM-based field extraction.
//!
//! Callers can override the default via [`crate::config::ExtractionConfig::prompt`];
//! the constant here is used only when no override (or a blank one) is given.

/// Default instruction sent with every document image.
///
/// Kept short on purpose: the reply is parsed as JSON, so anything other than
/// data (greetings, commentary) ends up as a raw-text row instead of columns.
pub const DEFAULT_EXTRACTION_PROMPT: &str = "Extract all legible data from the document. \
Present the data as JSON. Data only, no comments.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_asks_for_json() {
        assert!(DEFAULT_EXTRACTION_PROMPT.contains("JSON"));
    }
}

//! Prompts for figure and link description.
//!
//! Every prompt lives here so the generator's retry and error handling can
//! change without touching wording, and so tests can inspect the prompts
//! without calling a model.

/// Reply the figure model gives for images that are not content
/// (backgrounds, rules, watermarks, layout scraps).
pub const ARTIFACT_SENTINEL: &str = "ARTIFACT";

/// Reply the figure model gives for purely decorative images that stay in
/// the reading order with empty alternative text.
pub const DECORATIVE_SENTINEL: &str = "DECORATIVE";

/// System prompt for figure descriptions.
pub const IMAGE_SYSTEM_PROMPT: &str = r#"You write alternative text for images extracted from PDF documents so that screen-reader users get the same information as sighted readers.

Rules:
1. Describe what the image conveys in the context of the document, not how it looks pixel by pixel.
2. Keep it under 150 characters unless the image is a chart or diagram whose data matters; then summarise the key values or trend in at most 3 sentences.
3. Do not start with "Image of", "Picture of" or "Alt text:".
4. Transcribe any meaningful text that appears inside the image.
5. If the image is purely decorative (ornament, divider, stock flourish) reply with exactly DECORATIVE.
6. If the image is not real content (page background, scanning artefact, blank box, cropped fragment) reply with exactly ARTIFACT.
7. Output only the alternative text, with no quotes, markdown or commentary."#;

/// System prompt for link descriptions.
pub const LINK_SYSTEM_PROMPT: &str = r#"You write short accessible names for hyperlinks in PDF documents.

Rules:
1. Given a URL, state where the link goes in plain words, e.g. "Annual report on the Example Corp investor site".
2. Keep it under 100 characters.
3. Do not repeat the full URL and do not start with "Link to" unless nothing better is known.
4. Output only the description, with no quotes, markdown or commentary."#;

/// Build the user turn that accompanies a figure payload.
pub fn image_user_prompt(context: &str) -> String {
    let context = context.trim();
    if context.is_empty() {
        "Write alternative text for this image.".to_string()
    } else {
        format!(
            "Write alternative text for this image. Text from the same page, with the image \
             of interest marked <IMAGE INTERESTED>, follows:\n\n\"\"\"{}\"\"\"",
            context
        )
    }
}

/// Build the user turn for a link description.
pub fn link_user_prompt(url: &str) -> String {
    format!("Describe the destination of this link: {url}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_prompt_mentions_both_sentinels() {
        assert!(IMAGE_SYSTEM_PROMPT.contains(ARTIFACT_SENTINEL));
        assert!(IMAGE_SYSTEM_PROMPT.contains(DECORATIVE_SENTINEL));
    }

    #[test]
    fn image_user_prompt_without_context() {
        let p = image_user_prompt("   ");
        assert!(!p.contains("\"\"\""));
    }

    #[test]
    fn image_user_prompt_embeds_context() {
        let p = image_user_prompt("Figure 2 shows quarterly revenue");
        assert!(p.contains("Figure 2 shows quarterly revenue"));
    }

    #[test]
    fn link_prompt_embeds_url() {
        assert!(link_user_prompt("https://example.org").contains("https://example.org"));
    }
}

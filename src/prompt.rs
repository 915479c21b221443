//! Builds the outgoing user turn, prepending knowledge base context when the
//! message matches any stored document.

use crate::models::{ContentPart, ConversationMessage, ImageSource, MessageContent, SearchResult};
use crate::search::{search_with, SearchOptions};
use crate::store::DocumentStore;

const CONTEXT_HEADER: &str = "Relevant knowledge base content:\n\n";
const QUESTION_MARKER: &str = "\n---\nUser question: ";

/// Assemble the user turn for `message`, attaching `images` ahead of the
/// text when present.
pub fn assemble_user_turn(
    store: &DocumentStore,
    message: &str,
    images: &[ImageSource],
    max_results: usize,
    options: &SearchOptions,
) -> ConversationMessage {
    let results = search_with(store, message, max_results, options);
    let text = if results.is_empty() {
        message.to_string()
    } else {
        format!(
            "{}{}{}",
            format_context_block(&results),
            QUESTION_MARKER,
            message
        )
    };

    let content = if images.is_empty() {
        MessageContent::Text(text)
    } else {
        let mut parts: Vec<ContentPart> = images
            .iter()
            .cloned()
            .map(|source| ContentPart::Image { source })
            .collect();
        parts.push(ContentPart::Text { text });
        MessageContent::Parts(parts)
    };

    ConversationMessage::user(content)
}

/// Render search hits as the retrieved-context block.
pub fn format_context_block(results: &[SearchResult]) -> String {
    let mut block = String::from(CONTEXT_HEADER);
    for result in results {
        block.push_str(&format!("Source: {}\n", result.name));
        for snippet in &result.snippets {
            block.push_str(snippet);
            block.push('\n');
        }
        block.push('\n');
    }
    block
}

/// The user's own words from an assembled turn, without the context block.
pub fn user_question(text: &str) -> &str {
    if !text.starts_with(CONTEXT_HEADER) {
        return text;
    }
    match text.rfind(QUESTION_MARKER) {
        Some(idx) => &text[idx + QUESTION_MARKER.len()..],
        None => text,
    }
}

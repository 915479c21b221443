//! Case-insensitive keyword search over the knowledge base.
//!
//! Relevance is the number of non-overlapping occurrences of the query in a
//! document. Snippets are taken from the first few matches with a fixed
//! window of characters on each side.
//!
//! Matching works on characters, not bytes. Each character is folded to the
//! first character of its lowercase form so that folded and original text
//! share indices and snippets can be cut from the original.

use crate::config::RetrievalConfig;
use crate::models::SearchResult;
use crate::store::DocumentStore;

const ELLIPSIS: &str = "...";

/// Snippet shape knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub snippets_per_document: usize,
    pub context_chars: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            snippets_per_document: 2,
            context_chars: 100,
        }
    }
}

impl From<&RetrievalConfig> for SearchOptions {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            snippets_per_document: cfg.snippets_per_document,
            context_chars: cfg.context_chars,
        }
    }
}

/// Search with default snippet options.
pub fn search(store: &DocumentStore, query: &str, max_results: usize) -> Vec<SearchResult> {
    search_with(store, query, max_results, &SearchOptions::default())
}

pub fn search_with(
    store: &DocumentStore,
    query: &str,
    max_results: usize,
    options: &SearchOptions,
) -> Vec<SearchResult> {
    if query.trim().is_empty() || store.is_empty() || max_results == 0 {
        return Vec::new();
    }

    let needle = fold(query);
    let mut results: Vec<SearchResult> = Vec::new();

    for doc in store.documents() {
        let original: Vec<char> = doc.content.chars().collect();
        let haystack = fold(&doc.content);

        let positions = match_positions(&haystack, &needle);
        if positions.is_empty() {
            continue;
        }

        let snippets = positions
            .iter()
            .take(options.snippets_per_document)
            .map(|&pos| snippet_at(&original, pos, needle.len(), options.context_chars))
            .collect();

        results.push(SearchResult {
            name: doc.name.clone(),
            relevance: positions.len(),
            snippets,
            path: doc.path.clone(),
        });
    }

    // Vec::sort_by is stable: equal relevance keeps discovery order.
    results.sort_by(|a, b| b.relevance.cmp(&a.relevance));
    results.truncate(max_results);
    results
}

/// Number of non-overlapping case-insensitive occurrences of `query`.
pub fn count_occurrences(content: &str, query: &str) -> usize {
    if query.is_empty() {
        return 0;
    }
    match_positions(&fold(content), &fold(query)).len()
}

fn fold(s: &str) -> Vec<char> {
    s.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

/// Start indices of non-overlapping matches, scanning left to right.
fn match_positions(haystack: &[char], needle: &[char]) -> Vec<usize> {
    let mut positions = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return positions;
    }

    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i..i + needle.len()] == *needle {
            positions.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    positions
}

fn snippet_at(content: &[char], pos: usize, match_len: usize, context: usize) -> String {
    let start = pos.saturating_sub(context);
    let end = (pos + match_len + context).min(content.len());

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.extend(&content[start..end]);
    if end < content.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

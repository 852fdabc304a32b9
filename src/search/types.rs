//! Query parameters, filters, and result types.

use serde::{Deserialize, Serialize};

/// Result filters; all present clauses must match (AND semantics).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchFilters {
    /// Prefix match on the doc uri.
    pub doc_uri_prefix: Option<String>,
    /// Exact-match inclusion list. Empty means unrestricted.
    pub doc_uris: Vec<String>,
    /// Prefix match on the heading path.
    pub heading_path_prefix: Option<String>,
    /// Case-insensitive substring match on the heading path.
    pub heading_path_contains: Option<String>,
}

impl SearchFilters {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_uri_prefix.is_none()
            && self.doc_uris.is_empty()
            && self.heading_path_prefix.is_none()
            && self.heading_path_contains.is_none()
    }

    #[must_use]
    pub fn matches(&self, doc_uri: &str, heading_path: &str) -> bool {
        if let Some(prefix) = &self.doc_uri_prefix {
            if !doc_uri.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.doc_uris.is_empty() && !self.doc_uris.iter().any(|u| u == doc_uri) {
            return false;
        }
        if let Some(prefix) = &self.heading_path_prefix {
            if !heading_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.heading_path_contains {
            let haystack = heading_path.to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub query: String,
    pub top_k: usize,
    pub max_excerpt_chars: usize,
    pub filters: SearchFilters,
    /// Debug flag: report which shards the query touched.
    pub include_shards_searched: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchResult {
    pub doc_uri: String,
    pub heading_path: String,
    pub start_char: usize,
    pub end_char: usize,
    pub excerpt: String,
    pub excerpt_truncated: bool,
    pub score: f32,
    pub vector_score: f32,
    pub bm25_score: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryMeta {
    pub took_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards_searched: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResponse {
    pub results: Vec<SearchResult>,
    pub meta: QueryMeta,
}

//! Excerpt extraction from source files.
//!
//! Spans carry offsets into the normalized text, so the extractor re-reads
//! and re-normalizes the source file (cached per doc uri for the extractor's
//! lifetime — one instance serves one query) and slices the span. Oversized
//! excerpts are truncated at the latest space in the back half of the
//! budget; callers keep the original offsets even for truncated excerpts.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::markdown::normalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    pub text: String,
    pub truncated: bool,
}

pub struct ExcerptExtractor {
    vault_root: PathBuf,
    cache: Mutex<HashMap<String, Arc<String>>>,
}

impl ExcerptExtractor {
    #[must_use]
    pub fn new(vault_root: impl Into<PathBuf>) -> Self {
        Self {
            vault_root: vault_root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Slice `[start_char, end_char)` out of the document, truncating to
    /// `max_chars`.
    pub fn extract(
        &self,
        doc_uri: &str,
        start_char: usize,
        end_char: usize,
        max_chars: usize,
    ) -> Result<Excerpt> {
        let text = self.normalized(doc_uri)?;
        let len = text.len();
        let start = clamp_to_boundary(&text, start_char.min(len));
        let end = clamp_to_boundary(&text, end_char.min(len));
        if start >= end {
            return Ok(Excerpt {
                text: String::new(),
                truncated: false,
            });
        }

        let slice = &text[start..end];
        if slice.len() <= max_chars {
            return Ok(Excerpt {
                text: slice.to_string(),
                truncated: false,
            });
        }

        let budget = clamp_to_boundary(slice, max_chars.min(slice.len()));
        let floor = max_chars / 2;
        let cut = slice[..budget]
            .rfind(' ')
            .filter(|&pos| pos >= floor)
            .unwrap_or(budget);
        let cut = clamp_to_boundary(slice, cut);
        Ok(Excerpt {
            text: slice[..cut].to_string(),
            truncated: true,
        })
    }

    fn normalized(&self, doc_uri: &str) -> Result<Arc<String>> {
        if let Some(text) = self.cache.lock().get(doc_uri) {
            return Ok(Arc::clone(text));
        }
        let mut path = self.vault_root.clone();
        for segment in doc_uri.split('/') {
            path.push(segment);
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(format!("document {doc_uri}"))
            } else {
                EngineError::io_op(path.display().to_string(), "read", e)
            }
        })?;
        let text = Arc::new(normalize(&raw));
        self.cache
            .lock()
            .insert(doc_uri.to_string(), Arc::clone(&text));
        Ok(text)
    }
}

fn clamp_to_boundary(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_with(content: &str) -> (tempfile::TempDir, ExcerptExtractor) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), content).unwrap();
        let extractor = ExcerptExtractor::new(dir.path());
        (dir, extractor)
    }

    #[test]
    fn test_exact_slice() {
        let (_dir, ex) = vault_with("# H\n\nhello world\n");
        let excerpt = ex.extract("a.md", 5, 16, 4000).unwrap();
        assert_eq!(excerpt.text, "hello world");
        assert!(!excerpt.truncated);
    }

    #[test]
    fn test_offsets_refer_to_normalized_text() {
        // CRLF source: offsets are into the LF-normalized form.
        let (_dir, ex) = vault_with("# H\r\n\r\nhello\r\n");
        let excerpt = ex.extract("a.md", 5, 10, 4000).unwrap();
        assert_eq!(excerpt.text, "hello");
    }

    #[test]
    fn test_truncation_at_space() {
        let body = "word ".repeat(100);
        let (_dir, ex) = vault_with(&body);
        let excerpt = ex.extract("a.md", 0, body.len(), 100).unwrap();
        assert!(excerpt.truncated);
        assert!(excerpt.text.len() <= 100);
        assert!(excerpt.text.ends_with("word"), "cut at a space boundary");
    }

    #[test]
    fn test_hard_cut_when_no_space_in_window() {
        let body = "x".repeat(500);
        let (_dir, ex) = vault_with(&body);
        let excerpt = ex.extract("a.md", 0, 500, 100).unwrap();
        assert!(excerpt.truncated);
        assert_eq!(excerpt.text.len(), 100);
    }

    #[test]
    fn test_missing_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ex = ExcerptExtractor::new(dir.path());
        let err = ex.extract("nope.md", 0, 10, 100).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_out_of_range_clamps() {
        let (_dir, ex) = vault_with("short\n");
        let excerpt = ex.extract("a.md", 0, 9999, 100).unwrap();
        assert_eq!(excerpt.text, "short\n");
        let empty = ex.extract("a.md", 50, 60, 100).unwrap();
        assert_eq!(empty.text, "");
    }
}

//! Merging of overlapping and adjacent candidate spans within a document.
//!
//! Overlapping chunks (the chunker seeds each chunk with the tail of its
//! predecessor) frequently both match a query; merging them yields one
//! contiguous excerpt instead of two near-duplicates. Spans from different
//! documents never merge.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct SpanCandidate {
    pub doc_uri: String,
    pub start_char: usize,
    pub end_char: usize,
    pub score: f32,
    /// Member leaves ordered by start offset; the first is the span's
    /// representative.
    pub leaf_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SpanMerger {
    gap_threshold: usize,
}

impl SpanMerger {
    #[must_use]
    pub fn new(gap_threshold: usize) -> Self {
        Self { gap_threshold }
    }

    /// Merge candidates: group by document, sort by start, fold runs where
    /// `next.start <= current.end + gap`. Merged span = union of ranges,
    /// max score, union of leaves. Output is sorted by score descending,
    /// ties by (doc_uri, start) for a stable total order.
    #[must_use]
    pub fn merge(&self, candidates: Vec<SpanCandidate>) -> Vec<SpanCandidate> {
        let mut by_doc: BTreeMap<String, Vec<SpanCandidate>> = BTreeMap::new();
        for candidate in candidates {
            by_doc
                .entry(candidate.doc_uri.clone())
                .or_default()
                .push(candidate);
        }

        let mut merged: Vec<SpanCandidate> = Vec::new();
        for (_, mut spans) in by_doc {
            spans.sort_by(|a, b| {
                a.start_char
                    .cmp(&b.start_char)
                    .then(a.end_char.cmp(&b.end_char))
            });
            let mut iter = spans.into_iter();
            let Some(mut current) = iter.next() else {
                continue;
            };
            for span in iter {
                if span.start_char <= current.end_char + self.gap_threshold {
                    current.end_char = current.end_char.max(span.end_char);
                    current.score = current.score.max(span.score);
                    for leaf in span.leaf_ids {
                        if !current.leaf_ids.contains(&leaf) {
                            current.leaf_ids.push(leaf);
                        }
                    }
                } else {
                    merged.push(std::mem::replace(&mut current, span));
                }
            }
            merged.push(current);
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_uri.cmp(&b.doc_uri))
                .then(a.start_char.cmp(&b.start_char))
        });
        merged
    }
}

//! Deterministic, fence-safe chunking of a heading node's own content.
//!
//! Content is split into atoms — whole fenced regions and paragraphs — and
//! accumulated greedily up to the token target. Consecutive chunks overlap by
//! roughly `overlap` tokens, with the overlap start aligned to a paragraph or
//! word boundary. A fenced region is never split, even when it exceeds the
//! hard maximum on its own. Identical inputs always produce identical chunks.

use crate::config::ChunkingConfig;
use crate::ids::{leaf_id, sha256_hex};
use crate::markdown::fence::FenceMap;
use crate::markdown::parser::HeadingNode;

/// A leaf chunk: the unit of embedding and BM25 indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub leaf_id: String,
    pub doc_uri: String,
    pub node_id: String,
    pub heading_path: String,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    pub text_hash: String,
    pub shard_id: u32,
    pub token_count: usize,
}

pub type TokenCounter<'a> = &'a (dyn Fn(&str) -> usize + Sync);

/// Rough character span of `tokens` tokens, used to place the overlap start
/// before boundary alignment refines it.
const CHARS_PER_TOKEN_ESTIMATE: usize = 4;

/// How far back from the raw overlap position a paragraph boundary is
/// accepted before falling back to a word boundary.
const PARAGRAPH_ALIGN_WINDOW: usize = 200;

/// How far back a word boundary is accepted before cutting exactly.
const WORD_ALIGN_WINDOW: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Atom {
    start: usize,
    end: usize,
}

/// Chunk one heading node's own content (heading line excluded, children
/// excluded). Returns nothing for empty or whitespace-only content.
pub fn chunk_node(
    doc_uri: &str,
    text: &str,
    node: &HeadingNode,
    fences: &FenceMap,
    shard_id: u32,
    cfg: &ChunkingConfig,
    count_tokens: TokenCounter<'_>,
) -> Vec<Chunk> {
    let content_start = node.content_start;
    let content_end = node.own_content_end();
    if content_start >= content_end || text[content_start..content_end].trim().is_empty() {
        return Vec::new();
    }

    let atoms = collect_atoms(text, content_start, content_end, fences, cfg, count_tokens);
    if atoms.is_empty() {
        return Vec::new();
    }

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut chunk_start = atoms[0].start;
    let mut chunk_end = atoms[0].end;

    for atom in &atoms[1..] {
        let grown = count_tokens(&text[chunk_start..atom.end]);
        if grown > cfg.target_max {
            ranges.push((chunk_start, chunk_end));
            chunk_start = overlap_start(text, fences, chunk_start, chunk_end, atom.start, cfg);
        }
        chunk_end = atom.end;
    }
    ranges.push((chunk_start, chunk_end));

    merge_small_tail(text, &mut ranges, cfg, count_tokens);

    ranges
        .into_iter()
        .map(|(start, end)| {
            let slice = &text[start..end];
            Chunk {
                leaf_id: leaf_id(doc_uri, start, end),
                doc_uri: doc_uri.to_string(),
                node_id: node.node_id.clone(),
                heading_path: node.heading_path.clone(),
                start_char: start,
                end_char: end,
                text: slice.to_string(),
                text_hash: sha256_hex(slice.as_bytes()),
                shard_id,
                token_count: count_tokens(slice),
            }
        })
        .collect()
}

/// Split `[start, end)` into fence atoms and paragraph atoms, in order.
fn collect_atoms(
    text: &str,
    start: usize,
    end: usize,
    fences: &FenceMap,
    cfg: &ChunkingConfig,
    count_tokens: TokenCounter<'_>,
) -> Vec<Atom> {
    let mut atoms = Vec::new();
    let mut pos = start;

    for region in fences.regions() {
        if region.end_char <= start || region.start_char >= end {
            continue;
        }
        let fence_start = region.start_char.max(start);
        let fence_end = region.end_char.min(end);
        collect_paragraphs(text, pos, fence_start, cfg, count_tokens, &mut atoms);
        atoms.push(Atom {
            start: fence_start,
            end: fence_end,
        });
        pos = fence_end;
    }
    collect_paragraphs(text, pos, end, cfg, count_tokens, &mut atoms);
    atoms
}

/// Paragraphs are runs of non-blank lines. An oversized paragraph (above
/// `hard_max` tokens) is split at word boundaries into pieces that fit the
/// target; fenced atoms are exempt from that rule by construction.
fn collect_paragraphs(
    text: &str,
    start: usize,
    end: usize,
    cfg: &ChunkingConfig,
    count_tokens: TokenCounter<'_>,
    atoms: &mut Vec<Atom>,
) {
    if start >= end {
        return;
    }
    let mut para_start: Option<usize> = None;
    let mut para_end = start;
    let mut pos = start;

    let flush = |from: usize, to: usize, atoms: &mut Vec<Atom>| {
        if from >= to {
            return;
        }
        if count_tokens(&text[from..to]) > cfg.hard_max {
            split_paragraph_at_words(text, from, to, cfg, count_tokens, atoms);
        } else {
            atoms.push(Atom {
                start: from,
                end: to,
            });
        }
    };

    for line in text[start..end].split_inclusive('\n') {
        let line_start = pos;
        pos += line.len();
        if line.trim().is_empty() {
            if let Some(ps) = para_start.take() {
                flush(ps, para_end, atoms);
            }
        } else {
            if para_start.is_none() {
                para_start = Some(line_start);
            }
            para_end = pos;
        }
    }
    if let Some(ps) = para_start {
        flush(ps, para_end, atoms);
    }
}

fn split_paragraph_at_words(
    text: &str,
    start: usize,
    end: usize,
    cfg: &ChunkingConfig,
    count_tokens: TokenCounter<'_>,
    atoms: &mut Vec<Atom>,
) {
    let mut piece_start = start;
    let mut last_word_end = start;
    let slice = &text[start..end];

    for (offset, word) in slice.split_whitespace().map(|w| {
        let off = word_offset(slice, w);
        (off, w)
    }) {
        let word_end = start + offset + word.len();
        if word_end > piece_start
            && count_tokens(&text[piece_start..word_end]) > cfg.target_max
            && last_word_end > piece_start
        {
            atoms.push(Atom {
                start: piece_start,
                end: last_word_end,
            });
            piece_start = start + offset;
        }
        last_word_end = word_end;
    }
    if piece_start < end {
        atoms.push(Atom {
            start: piece_start,
            end,
        });
    }
}

/// Byte offset of a `split_whitespace` item within its parent slice.
fn word_offset(parent: &str, word: &str) -> usize {
    (word.as_ptr() as usize) - (parent.as_ptr() as usize)
}

/// Choose where the next chunk begins: roughly `overlap` tokens before the
/// previous chunk's end, aligned to a paragraph boundary, then a word
/// boundary, then an exact cut. Never inside a fenced region — snap forward
/// past it. When the overlap collapses, the next atom's start is used.
fn overlap_start(
    text: &str,
    fences: &FenceMap,
    prev_start: usize,
    prev_end: usize,
    next_atom_start: usize,
    cfg: &ChunkingConfig,
) -> usize {
    if cfg.overlap == 0 {
        return next_atom_start;
    }
    let span = cfg.overlap * CHARS_PER_TOKEN_ESTIMATE;
    let raw = prev_end.saturating_sub(span).max(prev_start);

    let mut candidate = align_to_paragraph(text, raw, prev_start)
        .or_else(|| align_to_word(text, raw, prev_start))
        .unwrap_or(raw);

    if let Some(region) = fences.region_containing(candidate) {
        candidate = region.end_char;
    }
    while candidate > 0 && !text.is_char_boundary(candidate) {
        candidate -= 1;
    }
    if candidate >= prev_end || candidate < prev_start {
        return next_atom_start;
    }
    candidate
}

/// Nearest paragraph start at or before `raw`, searched within the window.
fn align_to_paragraph(text: &str, raw: usize, floor: usize) -> Option<usize> {
    let window_start = raw.saturating_sub(PARAGRAPH_ALIGN_WINDOW).max(floor);
    let hay = &text[window_start..raw.min(text.len())];
    hay.rfind("\n\n").map(|idx| window_start + idx + 2)
}

/// Nearest whitespace boundary at or before `raw`, searched within the window.
fn align_to_word(text: &str, raw: usize, floor: usize) -> Option<usize> {
    let window_start = raw.saturating_sub(WORD_ALIGN_WINDOW).max(floor);
    let hay = &text[window_start..raw.min(text.len())];
    hay.rfind(char::is_whitespace)
        .map(|idx| window_start + idx + 1)
}

/// Fold a final undersized chunk into its predecessor when the union stays
/// under `hard_max`.
fn merge_small_tail(
    text: &str,
    ranges: &mut Vec<(usize, usize)>,
    cfg: &ChunkingConfig,
    count_tokens: TokenCounter<'_>,
) {
    if ranges.len() < 2 {
        return;
    }
    let (last_start, last_end) = ranges[ranges.len() - 1];
    if count_tokens(&text[last_start..last_end]) >= cfg.min_preferred {
        return;
    }
    let (prev_start, _) = ranges[ranges.len() - 2];
    if count_tokens(&text[prev_start..last_end]) <= cfg.hard_max {
        ranges.pop();
        if let Some(last) = ranges.last_mut() {
            last.1 = last_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::ids::shard_for_doc;
    use crate::markdown::fence::detect_fences;
    use crate::markdown::parser::{normalize, parse_heading_tree};

    fn approx(text: &str) -> usize {
        text.len().div_ceil(4)
    }

    fn chunk_doc(raw: &str, cfg: &ChunkingConfig) -> (String, Vec<Chunk>) {
        let text = normalize(raw);
        let fences = detect_fences(&text);
        let tree = parse_heading_tree("t.md", &text, &fences);
        let shard = shard_for_doc("t.md");
        let mut chunks = Vec::new();
        for node in tree.nodes() {
            chunks.extend(chunk_node(
                "t.md", &text, node, &fences, shard, cfg, &approx,
            ));
        }
        (text, chunks)
    }

    fn tight() -> ChunkingConfig {
        ChunkingConfig {
            target_min: 10,
            target_max: 20,
            hard_max: 30,
            min_preferred: 5,
            overlap: 4,
        }
    }

    #[test]
    fn test_slice_equals_text_invariant() {
        let (text, chunks) = chunk_doc(
            "# H\n\nfirst paragraph with words\n\nsecond paragraph with words\n\nthird one here\n",
            &tight(),
        );
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert_eq!(&text[c.start_char..c.end_char], c.text);
            assert_eq!(c.shard_id, shard_for_doc("t.md"));
        }
    }

    #[test]
    fn test_empty_content_emits_nothing() {
        let (_, chunks) = chunk_doc("# H\n\n\n\n# I\n", &tight());
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_fence_never_split() {
        let raw = "# H\n\nPara A.\n\n```\ncode with ## fake heading\n```\n\nPara B.\n";
        let (text, chunks) = chunk_doc(raw, &tight());
        let fence_start = text.find("```").unwrap();
        let fence_end = text.rfind("```").unwrap() + 4; // through the newline
        for c in &chunks {
            let inside = c.start_char <= fence_start && fence_end <= c.end_char;
            let outside = c.end_char <= fence_start || c.start_char >= fence_end;
            assert!(
                inside || outside,
                "chunk [{}, {}) straddles fence [{fence_start}, {fence_end})",
                c.start_char,
                c.end_char
            );
        }
    }

    #[test]
    fn test_generous_limits_single_chunk() {
        let raw = "# H\n\nPara A.\n\n```\ncode\n```\n\nPara B.\n";
        let cfg = ChunkingConfig::default();
        let (text, chunks) = chunk_doc(raw, &cfg);
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert!(c.text.contains("Para A."));
        assert!(c.text.contains("code"));
        assert!(c.text.contains("Para B."));
        assert_eq!(&text[c.start_char..c.end_char], c.text);
    }

    #[test]
    fn test_oversized_fence_kept_whole() {
        let body = "x ".repeat(200);
        let raw = format!("# H\n\nintro\n\n```\n{body}\n```\n\noutro\n");
        let (text, chunks) = chunk_doc(&raw, &tight());
        let fence_start = text.find("```").unwrap();
        let holder = chunks
            .iter()
            .find(|c| c.start_char <= fence_start && c.end_char > fence_start)
            .expect("some chunk holds the fence");
        assert!(text[holder.start_char..holder.end_char].contains(&body));
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let paras: Vec<String> = (0..12)
            .map(|i| format!("paragraph number {i} with several words inside"))
            .collect();
        let raw = format!("# H\n\n{}\n", paras.join("\n\n"));
        let (_, chunks) = chunk_doc(&raw, &tight());
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            assert!(
                pair[1].start_char < pair[0].end_char,
                "expected overlap between [{},{}) and [{},{})",
                pair[0].start_char,
                pair[0].end_char,
                pair[1].start_char,
                pair[1].end_char
            );
        }
    }

    #[test]
    fn test_deterministic() {
        let paras: Vec<String> = (0..20)
            .map(|i| format!("deterministic paragraph {i} some words"))
            .collect();
        let raw = format!("# H\n\n{}\n", paras.join("\n\n"));
        let (_, a) = chunk_doc(&raw, &tight());
        let (_, b) = chunk_doc(&raw, &tight());
        assert_eq!(a, b);
    }

    #[test]
    fn test_small_tail_merged() {
        let raw = "# H\n\nlong paragraph body with enough words to fill one chunk fully\n\ntiny\n";
        let cfg = ChunkingConfig {
            target_min: 10,
            target_max: 16,
            hard_max: 40,
            min_preferred: 4,
            overlap: 0,
        };
        let (_, chunks) = chunk_doc(raw, &cfg);
        assert_eq!(chunks.len(), 1, "tail below min_preferred should merge");
    }

    #[test]
    fn test_oversized_paragraph_split_at_words() {
        let raw = format!("# H\n\n{}\n", "word ".repeat(400));
        let (text, chunks) = chunk_doc(&raw, &tight());
        assert!(chunks.len() > 1);
        for c in &chunks {
            // Every cut lands on a word boundary: no chunk edge splits "word".
            assert_eq!(&text[c.start_char..c.end_char], c.text);
            assert!(!c.text.starts_with("ord"), "cut mid-word: {:?}", &c.text[..8]);
        }
    }
}

//! Fenced-code-region detection over normalized text.
//!
//! A fence opens on a line whose leading non-space (at most 3 leading spaces)
//! is a run of 3+ backticks or 3+ tildes, and closes on the first later line
//! whose trimmed content is a same-character run of equal-or-greater length.
//! Unclosed fences extend to end of input. Regions are half-open byte ranges
//! into the normalized text, in document order.

use serde::{Deserialize, Serialize};

/// A single fenced region, covering the opening line through the end of the
/// closing line (or EOF when unclosed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceRegion {
    pub start_char: usize,
    pub end_char: usize,
    /// First token of the info string, e.g. `rust` in ```` ```rust ````.
    pub language: Option<String>,
}

/// Ordered fence regions with binary-search membership.
#[derive(Debug, Clone, Default)]
pub struct FenceMap {
    regions: Vec<FenceRegion>,
}

impl FenceMap {
    #[must_use]
    pub fn regions(&self) -> &[FenceRegion] {
        &self.regions
    }

    /// Whether `offset` falls inside any fenced region.
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        self.region_containing(offset).is_some()
    }

    /// The region containing `offset`, if any.
    #[must_use]
    pub fn region_containing(&self, offset: usize) -> Option<&FenceRegion> {
        // First region starting after `offset`; the candidate is its predecessor.
        let idx = self.regions.partition_point(|r| r.start_char <= offset);
        if idx == 0 {
            return None;
        }
        let region = &self.regions[idx - 1];
        (offset < region.end_char).then_some(region)
    }
}

struct OpenFence {
    marker: u8,
    len: usize,
    start_char: usize,
    language: Option<String>,
}

/// Scan normalized text and collect all fenced regions.
#[must_use]
pub fn detect_fences(text: &str) -> FenceMap {
    let mut regions = Vec::new();
    let mut open: Option<OpenFence> = None;
    let mut pos = 0usize;

    for line in text.split_inclusive('\n') {
        let line_start = pos;
        pos += line.len();
        let content = line.strip_suffix('\n').unwrap_or(line);

        let close_now = match &open {
            Some(fence) => closes(content, fence.marker, fence.len),
            None => {
                if let Some(fence) = parse_opening(content, line_start) {
                    open = Some(fence);
                }
                false
            }
        };
        if close_now {
            if let Some(fence) = open.take() {
                regions.push(FenceRegion {
                    start_char: fence.start_char,
                    end_char: pos,
                    language: fence.language,
                });
            }
        }
    }

    if let Some(fence) = open {
        regions.push(FenceRegion {
            start_char: fence.start_char,
            end_char: text.len(),
            language: fence.language,
        });
    }

    FenceMap { regions }
}

fn parse_opening(content: &str, line_start: usize) -> Option<OpenFence> {
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if i > 3 || i >= bytes.len() {
        return None;
    }
    let marker = bytes[i];
    if marker != b'`' && marker != b'~' {
        return None;
    }
    let run_start = i;
    while i < bytes.len() && bytes[i] == marker {
        i += 1;
    }
    let len = i - run_start;
    if len < 3 {
        return None;
    }
    let info = content[i..].trim();
    let language = info
        .split_whitespace()
        .next()
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    Some(OpenFence {
        marker,
        len,
        start_char: line_start,
        language,
    })
}

fn closes(content: &str, marker: u8, open_len: usize) -> bool {
    let trimmed = content.trim();
    trimmed.len() >= open_len && trimmed.bytes().all(|b| b == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_backtick_fence() {
        let text = "intro\n```rust\nlet x = 1;\n```\ntail\n";
        let map = detect_fences(text);
        assert_eq!(map.regions().len(), 1);
        let r = &map.regions()[0];
        assert_eq!(&text[r.start_char..r.end_char], "```rust\nlet x = 1;\n```\n");
        assert_eq!(r.language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_tilde_fence_and_no_language() {
        let text = "~~~\ncode\n~~~\n";
        let map = detect_fences(text);
        assert_eq!(map.regions().len(), 1);
        assert_eq!(map.regions()[0].language, None);
    }

    #[test]
    fn test_closing_run_must_match_char_and_length() {
        // Inner ``` is shorter than the opening ```` so it does not close.
        let text = "````\n```\nstill code\n````\n";
        let map = detect_fences(text);
        assert_eq!(map.regions().len(), 1);
        assert_eq!(map.regions()[0].end_char, text.len());
    }

    #[test]
    fn test_unclosed_fence_extends_to_eof() {
        let text = "a\n```\nnever closed";
        let map = detect_fences(text);
        assert_eq!(map.regions().len(), 1);
        assert_eq!(map.regions()[0].end_char, text.len());
    }

    #[test]
    fn test_four_leading_spaces_is_not_a_fence() {
        let text = "    ```\nnot a fence\n";
        let map = detect_fences(text);
        assert!(map.regions().is_empty());
    }

    #[test]
    fn test_contains_binary_search() {
        let text = "a\n```\nx\n```\nb\n```\ny\n```\nc\n";
        let map = detect_fences(text);
        assert_eq!(map.regions().len(), 2);
        assert!(!map.contains(0));
        let first = map.regions()[0].clone();
        assert!(map.contains(first.start_char));
        assert!(map.contains(first.end_char - 1));
        assert!(!map.contains(first.end_char));
    }

    #[test]
    fn test_fake_heading_inside_fence_is_covered() {
        let text = "# H\n\nPara A.\n\n```\ncode with ## fake heading\n```\n\nPara B.\n";
        let map = detect_fences(text);
        assert_eq!(map.regions().len(), 1);
        let fake = text.find("## fake").unwrap();
        assert!(map.contains(fake));
    }
}

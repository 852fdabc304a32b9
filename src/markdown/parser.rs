//! Text normalization and ATX heading tree construction.
//!
//! Every byte offset in the engine refers to the normalized text produced
//! here: BOM stripped, CRLF/CR folded to LF, trailing newline ensured. The
//! heading tree is a pure tree (children only, no back-pointers); node
//! identity is the content hash, never the path string.

use crate::ids::node_id;
use crate::markdown::fence::FenceMap;

/// Normalize raw file content. All offsets downstream index into this string.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let stripped = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut out = String::with_capacity(stripped.len());
    let mut chars = stripped.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            _ => out.push(c),
        }
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// One heading node. The virtual root has level 0 and an empty path; real
/// headings have level 1..=6. `start_char..end_char` covers the heading line
/// through the byte before the next heading of equal-or-lower level;
/// `content_start` is the byte after the heading line.
#[derive(Debug, Clone)]
pub struct HeadingNode {
    pub node_id: String,
    pub level: u8,
    pub title: String,
    pub heading_path: String,
    pub start_char: usize,
    pub end_char: usize,
    pub content_start: usize,
    pub children: Vec<HeadingNode>,
}

impl HeadingNode {
    /// End of this node's own content: the start of its first child, or the
    /// node's end when it has none.
    #[must_use]
    pub fn own_content_end(&self) -> usize {
        self.children
            .first()
            .map_or(self.end_char, |c| c.start_char)
    }
}

#[derive(Debug, Clone)]
pub struct HeadingTree {
    pub root: HeadingNode,
}

impl HeadingTree {
    /// All nodes in document (preorder) order, root included.
    #[must_use]
    pub fn nodes(&self) -> Vec<&HeadingNode> {
        let mut out = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

}

/// Parse the heading tree of a normalized document. Only ATX headings are
/// recognized, and only outside fenced regions.
#[must_use]
pub fn parse_heading_tree(doc_uri: &str, text: &str, fences: &FenceMap) -> HeadingTree {
    let mut stack: Vec<HeadingNode> = vec![HeadingNode {
        node_id: node_id(doc_uri, "", 0),
        level: 0,
        title: String::new(),
        heading_path: String::new(),
        start_char: 0,
        end_char: text.len(),
        content_start: 0,
        children: Vec::new(),
    }];

    let mut pos = 0usize;
    for line in text.split_inclusive('\n') {
        let line_start = pos;
        pos += line.len();

        if fences.contains(line_start) {
            continue;
        }
        let Some((level, title)) = parse_atx_heading(line) else {
            continue;
        };

        // Close every node at the same or deeper level; the new heading ends them.
        while stack.len() > 1 && stack[stack.len() - 1].level >= level {
            if let Some(mut done) = stack.pop() {
                done.end_char = line_start;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(done);
                }
            }
        }

        let parent = &stack[stack.len() - 1];
        let heading_path = if parent.heading_path.is_empty() {
            title.clone()
        } else {
            format!("{} \u{2192} {}", parent.heading_path, title)
        };
        let occurrence = parent
            .children
            .iter()
            .filter(|c| c.title == title)
            .count();

        stack.push(HeadingNode {
            node_id: node_id(doc_uri, &heading_path, occurrence),
            level,
            title,
            heading_path,
            start_char: line_start,
            end_char: text.len(),
            content_start: pos,
            children: Vec::new(),
        });
    }

    // Remaining open nodes run to end of text.
    while stack.len() > 1 {
        if let Some(mut done) = stack.pop() {
            done.end_char = text.len();
            if let Some(parent) = stack.last_mut() {
                parent.children.push(done);
            }
        }
    }

    let mut root = stack.remove(0);
    root.end_char = text.len();
    HeadingTree { root }
}

/// `^(#{1,6})\s+(.+)$` without the regex: returns (level, trimmed title).
fn parse_atx_heading(line: &str) -> Option<(u8, String)> {
    let content = line.strip_suffix('\n').unwrap_or(line);
    let hashes = content.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &content[hashes..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes as u8, title.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::fence::detect_fences;

    fn parse(text: &str) -> HeadingTree {
        let fences = detect_fences(text);
        parse_heading_tree("t.md", text, &fences)
    }

    #[test]
    fn test_normalize_line_endings_and_bom() {
        assert_eq!(normalize("\u{feff}a\r\nb\rc"), "a\nb\nc\n");
        assert_eq!(normalize("a\n"), "a\n");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_two_top_level_headings_offsets() {
        let text = normalize("# First\n\nContent 1\n\n# Second\n\nContent 2\n");
        let tree = parse(&text);
        assert_eq!(tree.root.children.len(), 2);
        let first = &tree.root.children[0];
        let second = &tree.root.children[1];
        assert_eq!(first.start_char, 0);
        assert_eq!(first.end_char, text.find("# Second").unwrap());
        assert_eq!(second.end_char, text.len());
        assert_eq!(second.heading_path, "Second");
    }

    #[test]
    fn test_nested_heading_paths() {
        let text = normalize("# A\n\n## B\n\n### C\n\nbody\n\n## D\n");
        let tree = parse(&text);
        let a = &tree.root.children[0];
        assert_eq!(a.children.len(), 2);
        let b = &a.children[0];
        let c = &b.children[0];
        assert_eq!(b.heading_path, "A \u{2192} B");
        assert_eq!(c.heading_path, "A \u{2192} B \u{2192} C");
        // B ends where its sibling D starts.
        assert_eq!(b.end_char, text.find("## D").unwrap());
    }

    #[test]
    fn test_fake_heading_inside_fence_ignored() {
        let text = normalize("# H\n\nPara A.\n\n```\ncode with ## fake heading\n```\n\nPara B.\n");
        let tree = parse(&text);
        assert_eq!(tree.root.children.len(), 1);
        let h = &tree.root.children[0];
        assert_eq!(h.title, "H");
        assert!(h.children.is_empty());
    }

    #[test]
    fn test_preamble_belongs_to_root() {
        let text = normalize("preamble line\n\n# H\n\nbody\n");
        let tree = parse(&text);
        assert_eq!(tree.root.own_content_end(), text.find("# H").unwrap());
    }

    #[test]
    fn test_duplicate_sibling_titles_get_distinct_ids() {
        let text = normalize("# Week\n\na\n\n# Week\n\nb\n");
        let tree = parse(&text);
        let kids = &tree.root.children;
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].heading_path, kids[1].heading_path);
        assert_ne!(kids[0].node_id, kids[1].node_id);
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        let text = normalize("#tag\n\n####### seven\n");
        let tree = parse(&text);
        assert!(tree.root.children.is_empty());
    }

    #[test]
    fn test_children_partition_parent_suffix() {
        let text = normalize("# A\n\nown\n\n## B\n\nb\n\n## C\n\nc\n");
        let tree = parse(&text);
        let a = &tree.root.children[0];
        let b = &a.children[0];
        let c = &a.children[1];
        assert_eq!(a.own_content_end(), b.start_char);
        assert_eq!(b.end_char, c.start_char);
        assert_eq!(c.end_char, a.end_char);
    }
}

//! Deterministic identities: truncated SHA-256 ids and FNV-1a shard routing.
//!
//! Node and leaf ids are content-derived so that two builds over the same
//! vault produce the same ids. Shard assignment must be bit-identical across
//! platforms; FNV-1a over the UTF-8 doc uri guarantees that.

use sha2::{Digest, Sha256};

use crate::config::SHARD_COUNT;

/// Bytes of the SHA-256 digest kept in an id (hex-encoded, so 32 chars).
const ID_BYTES: usize = 16;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a 32-bit hash over raw bytes.
#[must_use]
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Shard assignment for a document. Every leaf of the document lands here.
#[must_use]
pub fn shard_for_doc(doc_uri: &str) -> u32 {
    fnv1a32(doc_uri.as_bytes()) % SHARD_COUNT
}

fn truncated_hash(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        // Length-prefix framing so ("ab","c") never collides with ("a","bc").
        hasher.update((part.len() as u64).to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(ID_BYTES * 2);
    for byte in &digest[..ID_BYTES] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Identity of a heading node: doc uri + heading path, plus an occurrence
/// suffix when sibling titles collide (the path string itself keeps the
/// collision; identity must not).
#[must_use]
pub fn node_id(doc_uri: &str, heading_path: &str, occurrence: usize) -> String {
    if occurrence == 0 {
        truncated_hash(&[doc_uri.as_bytes(), heading_path.as_bytes()])
    } else {
        let disambiguated = format!("{heading_path}#{occurrence}");
        truncated_hash(&[doc_uri.as_bytes(), disambiguated.as_bytes()])
    }
}

/// Identity of a leaf chunk: doc uri + byte range in the normalized text.
/// Doubles as the embedding-cache key, so it is stable exactly as long as
/// chunk boundaries are.
#[must_use]
pub fn leaf_id(doc_uri: &str, start_char: usize, end_char: usize) -> String {
    truncated_hash(&[
        doc_uri.as_bytes(),
        &(start_char as u64).to_le_bytes(),
        &(end_char as u64).to_le_bytes(),
    ])
}

/// SHA-256 hex digest of a text slice (leaf `text_hash`, manifest file hashes).
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_vectors() {
        // Published FNV-1a 32 test vectors.
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_shard_in_range_and_stable() {
        let s = shard_for_doc("notes/a.md");
        assert!(s < SHARD_COUNT);
        assert_eq!(s, shard_for_doc("notes/a.md"));
        assert_eq!(s, fnv1a32(b"notes/a.md") % SHARD_COUNT);
    }

    #[test]
    fn test_node_id_occurrence_disambiguates() {
        let a = node_id("d.md", "A → B", 0);
        let b = node_id("d.md", "A → B", 1);
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_leaf_id_depends_on_range() {
        let a = leaf_id("d.md", 0, 100);
        let b = leaf_id("d.md", 0, 101);
        let c = leaf_id("e.md", 0, 100);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, leaf_id("d.md", 0, 100));
    }

    #[test]
    fn test_framing_prevents_concat_collisions() {
        let a = truncated_hash(&[b"ab", b"c"]);
        let b = truncated_hash(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }
}

//! Vault scanning and document-uri conversion.
//!
//! Doc uris are the engine's canonical document names: POSIX-style
//! vault-relative paths with forward slashes, case preserved, no leading
//! slash, ending in `.md`. The scanner walks the vault skipping hidden names
//! and excluded directories, and reports size + mtime for change detection.

use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::EXCLUDED_DIRS;
use crate::error::{EngineError, Result};
use crate::store::Changes;

/// One scanned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub doc_uri: String,
    pub size: i64,
    pub mtime_ms: i64,
}

#[derive(Debug)]
pub struct FileScanner {
    vault_root: PathBuf,
    excluded: GlobSet,
}

impl FileScanner {
    pub fn new(vault_root: impl Into<PathBuf>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for dir in EXCLUDED_DIRS {
            builder.add(
                Glob::new(dir)
                    .map_err(|e| EngineError::Internal(format!("exclusion glob {dir}: {e}")))?,
            );
        }
        let excluded = builder
            .build()
            .map_err(|e| EngineError::Internal(format!("exclusion glob set: {e}")))?;
        Ok(Self {
            vault_root: vault_root.into(),
            excluded,
        })
    }

    #[must_use]
    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    /// Whether a path component is skipped: hidden names and excluded dirs.
    #[must_use]
    pub fn is_excluded_name(&self, name: &str) -> bool {
        name.starts_with('.') || self.excluded.is_match(name)
    }

    /// Walk the vault collecting every `.md` file, sorted by doc uri.
    pub fn scan(&self) -> Result<Vec<FileMeta>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.vault_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| !self.is_excluded_name(name))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable vault entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let doc_uri = self.to_doc_uri(path)?;
            let meta = entry
                .metadata()
                .map_err(|e| EngineError::Internal(format!("stat {}: {e}", path.display())))?;
            out.push(FileMeta {
                doc_uri,
                size: meta.len() as i64,
                mtime_ms: mtime_millis(&meta),
            });
        }

        out.sort_by(|a, b| a.doc_uri.cmp(&b.doc_uri));
        Ok(out)
    }

    /// Convert an absolute path into a doc uri. Paths outside the vault are
    /// rejected.
    pub fn to_doc_uri(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.vault_root).map_err(|_| {
            EngineError::invalid_argument(
                "path",
                path.display(),
                format!("not contained in vault root {}", self.vault_root.display()),
            )
        })?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(EngineError::invalid_argument(
                        "path",
                        path.display(),
                        "path traversal segments are not allowed",
                    ));
                }
            }
        }
        if segments.is_empty() {
            return Err(EngineError::invalid_argument(
                "path",
                path.display(),
                "path names the vault root, not a document",
            ));
        }
        Ok(segments.join("/"))
    }

    /// Resolve a doc uri back to the absolute path under the vault root.
    #[must_use]
    pub fn resolve(&self, doc_uri: &str) -> PathBuf {
        let mut path = self.vault_root.clone();
        for segment in doc_uri.split('/') {
            path.push(segment);
        }
        path
    }
}

fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as i64)
}

/// Diff two scans. Modification is an mtime or size difference.
#[must_use]
pub fn detect_changes(prev: &[FileMeta], curr: &[FileMeta]) -> Changes {
    use std::collections::HashMap;
    let prev_by_uri: HashMap<&str, &FileMeta> =
        prev.iter().map(|f| (f.doc_uri.as_str(), f)).collect();
    let curr_uris: std::collections::HashSet<&str> =
        curr.iter().map(|f| f.doc_uri.as_str()).collect();

    let mut changes = Changes::default();
    for file in curr {
        match prev_by_uri.get(file.doc_uri.as_str()) {
            None => changes.added.push(file.doc_uri.clone()),
            Some(old) => {
                if old.mtime_ms != file.mtime_ms || old.size != file.size {
                    changes.modified.push(file.doc_uri.clone());
                }
            }
        }
    }
    for file in prev {
        if !curr_uris.contains(file.doc_uri.as_str()) {
            changes.deleted.push(file.doc_uri.clone());
        }
    }
    changes.added.sort();
    changes.modified.sort();
    changes.deleted.sort();
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_finds_md_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.md", "b");
        write(dir.path(), "notes/a.md", "a");
        write(dir.path(), "notes/readme.txt", "not markdown");
        let scanner = FileScanner::new(dir.path()).unwrap();
        let files = scanner.scan().unwrap();
        let uris: Vec<&str> = files.iter().map(|f| f.doc_uri.as_str()).collect();
        assert_eq!(uris, vec!["b.md", "notes/a.md"]);
        assert_eq!(files[0].size, 1);
    }

    #[test]
    fn test_hidden_and_excluded_dirs_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.md", "x");
        write(dir.path(), ".git/internal.md", "x");
        write(dir.path(), "node_modules/pkg/readme.md", "x");
        write(dir.path(), ".hidden/secret.md", "x");
        write(dir.path(), "sub/.dotfile.md", "x");
        let scanner = FileScanner::new(dir.path()).unwrap();
        let files = scanner.scan().unwrap();
        let uris: Vec<&str> = files.iter().map(|f| f.doc_uri.as_str()).collect();
        assert_eq!(uris, vec!["keep.md"]);
    }

    #[test]
    fn test_doc_uri_conversion() {
        let scanner = FileScanner::new("/vault").unwrap();
        assert_eq!(
            scanner.to_doc_uri(Path::new("/vault/notes/a.md")).unwrap(),
            "notes/a.md"
        );
        let err = scanner.to_doc_uri(Path::new("/other/a.md")).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_resolve_roundtrip() {
        let scanner = FileScanner::new("/vault").unwrap();
        let path = scanner.resolve("notes/with space/a.md");
        assert_eq!(scanner.to_doc_uri(&path).unwrap(), "notes/with space/a.md");
    }

    #[test]
    fn test_detect_changes() {
        let prev = vec![
            FileMeta { doc_uri: "same.md".into(), size: 5, mtime_ms: 10 },
            FileMeta { doc_uri: "touched.md".into(), size: 5, mtime_ms: 10 },
            FileMeta { doc_uri: "resized.md".into(), size: 5, mtime_ms: 10 },
            FileMeta { doc_uri: "gone.md".into(), size: 5, mtime_ms: 10 },
        ];
        let curr = vec![
            FileMeta { doc_uri: "same.md".into(), size: 5, mtime_ms: 10 },
            FileMeta { doc_uri: "touched.md".into(), size: 5, mtime_ms: 99 },
            FileMeta { doc_uri: "resized.md".into(), size: 7, mtime_ms: 10 },
            FileMeta { doc_uri: "fresh.md".into(), size: 1, mtime_ms: 1 },
        ];
        let changes = detect_changes(&prev, &curr);
        assert_eq!(changes.added, vec!["fresh.md"]);
        assert_eq!(changes.modified, vec!["resized.md", "touched.md"]);
        assert_eq!(changes.deleted, vec!["gone.md"]);
    }
}

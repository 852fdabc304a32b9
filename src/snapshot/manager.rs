//! Snapshot lifecycle: validation, atomic activation, retention, recovery.
//!
//! A staged build lives in `snapshots/<id>.building` and is never read by
//! queries. Activation renames it into place and rewrites the `CURRENT`
//! pointer via temp-file + rename, so the pointer always names either the
//! old or the new snapshot. Startup recovery sweeps stray staging
//! directories and falls back to the newest valid snapshot when the pointer
//! is broken.

use std::path::{Path, PathBuf};

use crate::ann::persist;
use crate::error::{EngineError, Result};
use crate::ids::sha256_hex;
use crate::snapshot::manifest::Manifest;
use crate::snapshot::SnapshotLayout;
use crate::store::MetaStore;

pub struct SnapshotManager {
    layout: SnapshotLayout,
}

impl SnapshotManager {
    /// Create a manager, ensuring the snapshot root exists.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let layout = SnapshotLayout::new(root);
        std::fs::create_dir_all(layout.snapshots_dir()).map_err(|e| {
            EngineError::io_op(layout.snapshots_dir().display().to_string(), "create_dir", e)
        })?;
        Ok(Self { layout })
    }

    #[must_use]
    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// Directory of a snapshot id: the staged dir when still building,
    /// otherwise the final dir.
    #[must_use]
    pub fn dir_for(&self, id: &str) -> PathBuf {
        let building = self.layout.building_dir(id);
        if building.is_dir() {
            building
        } else {
            self.layout.snapshot_dir(id)
        }
    }

    /// Integrity check: manifest present, every hashed file present with a
    /// matching SHA-256, index footers valid, store passes quick_check.
    pub fn validate(&self, id: &str) -> Result<()> {
        let dir = self.dir_for(id);
        let corrupt = |reason: String, missing: Vec<String>| EngineError::IndexCorrupt {
            snapshot_id: id.to_string(),
            reason,
            missing_files: missing,
        };

        let manifest = Manifest::load(&SnapshotLayout::manifest_path(&dir))
            .map_err(|e| corrupt(format!("manifest unreadable: {e}"), Vec::new()))?;

        let mut missing = Vec::new();
        for (rel, expected) in &manifest.file_hashes {
            let path = join_rel(&dir, rel);
            if !path.is_file() {
                missing.push(rel.clone());
                continue;
            }
            let bytes = std::fs::read(&path)
                .map_err(|e| corrupt(format!("read {rel}: {e}"), Vec::new()))?;
            if sha256_hex(&bytes) != *expected {
                return Err(corrupt(format!("hash mismatch for {rel}"), vec![rel.clone()]));
            }
            if rel.ends_with(".ann")
                && !persist::verify_footer(&path)
                    .map_err(|e| corrupt(format!("footer check {rel}: {e}"), Vec::new()))?
            {
                return Err(corrupt(format!("CRC footer invalid for {rel}"), vec![rel.clone()]));
            }
        }
        if !missing.is_empty() {
            return Err(corrupt("files missing".to_string(), missing));
        }

        let store = MetaStore::open(&SnapshotLayout::store_path(&dir))
            .map_err(|e| corrupt(format!("store unopenable: {e}"), Vec::new()))?;
        store
            .integrity_check()
            .map_err(|e| corrupt(format!("store integrity: {e}"), Vec::new()))?;
        Ok(())
    }

    /// Promote a staged build and publish it: rename
    /// `snapshots/<id>.building` → `snapshots/<id>`, then swap `CURRENT`.
    /// Both steps are renames; readers observe the old or the new state,
    /// never a partial one.
    pub fn activate(&self, id: &str) -> Result<()> {
        let building = self.layout.building_dir(id);
        let final_dir = self.layout.snapshot_dir(id);
        if building.is_dir() {
            std::fs::rename(&building, &final_dir)
                .map_err(|e| EngineError::io_op(building.display().to_string(), "rename", e))?;
        } else if !final_dir.is_dir() {
            return Err(EngineError::NotFound(format!("snapshot {id}")));
        }
        self.set_current(id)?;
        tracing::info!(snapshot = %id, "snapshot activated");
        Ok(())
    }

    fn set_current(&self, id: &str) -> Result<()> {
        let current = self.layout.current_file();
        let tmp = current.with_extension("tmp");
        std::fs::write(&tmp, id)
            .map_err(|e| EngineError::io_op(tmp.display().to_string(), "write", e))?;
        std::fs::rename(&tmp, &current)
            .map_err(|e| EngineError::io_op(current.display().to_string(), "rename", e))?;
        Ok(())
    }

    /// The snapshot id named by `CURRENT`, if the pointer exists.
    pub fn current(&self) -> Result<Option<String>> {
        let path = self.layout.current_file();
        match std::fs::read_to_string(&path) {
            Ok(id) => {
                let id = id.trim().to_string();
                Ok((!id.is_empty()).then_some(id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::io_op(path.display().to_string(), "read", e)),
        }
    }

    /// All activated snapshots, newest first by manifest timestamp.
    pub fn list_snapshots(&self) -> Result<Vec<Manifest>> {
        let mut manifests = Vec::new();
        let snapshots_dir = self.layout.snapshots_dir();
        let entries = std::fs::read_dir(&snapshots_dir)
            .map_err(|e| EngineError::io_op(snapshots_dir.display().to_string(), "read_dir", e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| EngineError::io_op(snapshots_dir.display().to_string(), "read_dir", e))?;
            let path = entry.path();
            if !path.is_dir() || path.extension().is_some_and(|e| e == "building") {
                continue;
            }
            match Manifest::load(&SnapshotLayout::manifest_path(&path)) {
                Ok(manifest) => manifests.push(manifest),
                Err(err) => {
                    tracing::warn!(dir = %path.display(), error = %err, "snapshot without readable manifest");
                }
            }
        }
        manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.snapshot_id.cmp(&a.snapshot_id)));
        Ok(manifests)
    }

    /// Activate the next-most-recent valid snapshot after the current one.
    pub fn rollback(&self) -> Result<String> {
        let current = self.current()?;
        for manifest in self.list_snapshots()? {
            if Some(&manifest.snapshot_id) == current.as_ref() {
                continue;
            }
            if self.validate(&manifest.snapshot_id).is_ok() {
                self.activate(&manifest.snapshot_id)?;
                return Ok(manifest.snapshot_id);
            }
        }
        Err(EngineError::NotFound(
            "no earlier valid snapshot to roll back to".to_string(),
        ))
    }

    /// Delete all but the `keep_count` newest snapshots, never the current
    /// one. Returns the removed ids.
    pub fn cleanup_old_snapshots(&self, keep_count: usize) -> Result<Vec<String>> {
        let current = self.current()?;
        let manifests = self.list_snapshots()?;
        let mut removed = Vec::new();
        for manifest in manifests.iter().skip(keep_count.max(1)) {
            if Some(&manifest.snapshot_id) == current.as_ref() {
                continue;
            }
            let dir = self.layout.snapshot_dir(&manifest.snapshot_id);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    tracing::info!(snapshot = %manifest.snapshot_id, "removed old snapshot");
                    removed.push(manifest.snapshot_id.clone());
                }
                Err(err) => {
                    tracing::warn!(snapshot = %manifest.snapshot_id, error = %err, "cleanup failed");
                }
            }
        }
        Ok(removed)
    }

    /// Startup recovery: sweep stray staging directories, then resolve the
    /// snapshot to serve. A broken pointer falls back to the newest valid
    /// snapshot; an empty store of snapshots yields `None` (not indexed).
    pub fn recover(&self) -> Result<Option<String>> {
        let snapshots_dir = self.layout.snapshots_dir();
        if let Ok(entries) = std::fs::read_dir(&snapshots_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && path.extension().is_some_and(|e| e == "building") {
                    tracing::warn!(dir = %path.display(), "removing stray staged build");
                    let _ = std::fs::remove_dir_all(&path);
                }
            }
        }

        if let Some(id) = self.current()? {
            match self.validate(&id) {
                Ok(()) => return Ok(Some(id)),
                Err(err) => {
                    tracing::error!(snapshot = %id, error = %err, "current snapshot invalid; falling back");
                }
            }
        }

        for manifest in self.list_snapshots()? {
            if self.validate(&manifest.snapshot_id).is_ok() {
                self.set_current(&manifest.snapshot_id)?;
                tracing::info!(snapshot = %manifest.snapshot_id, "recovered to newest valid snapshot");
                return Ok(Some(manifest.snapshot_id));
            }
        }
        Ok(None)
    }
}

fn join_rel(dir: &Path, rel: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for segment in rel.split('/') {
        path.push(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embedding::HashingEmbedder;
    use crate::scanner::FileScanner;
    use crate::snapshot::builder::SnapshotBuilder;
    use std::sync::Arc;

    fn staged_snapshot(files: &[(&str, &str)]) -> (tempfile::TempDir, SnapshotManager, String) {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault");
        std::fs::create_dir_all(&vault).unwrap();
        for (rel, content) in files {
            std::fs::write(vault.join(rel), content).unwrap();
        }
        let manager = SnapshotManager::new(vault.join(".msrl")).unwrap();
        let config = EngineConfig {
            vault_root: vault.clone(),
            ..EngineConfig::default()
        };
        let builder = SnapshotBuilder::new(
            manager.layout().clone(),
            &vault,
            Arc::new(HashingEmbedder::default()),
            config,
        );
        let scan = FileScanner::new(&vault).unwrap().scan().unwrap();
        let outcome = builder.build_full(&scan).unwrap();
        (dir, manager, outcome.snapshot_id)
    }

    #[test]
    fn test_validate_then_activate_updates_pointer() {
        let (_dir, manager, id) = staged_snapshot(&[("a.md", "# A\n\nsome text\n")]);
        manager.validate(&id).unwrap();
        manager.activate(&id).unwrap();
        assert_eq!(manager.current().unwrap().as_deref(), Some(id.as_str()));
        assert!(manager.layout().snapshot_dir(&id).is_dir());
        assert!(!manager.layout().building_dir(&id).exists());
        // Re-validating after promotion still passes.
        manager.validate(&id).unwrap();
    }

    #[test]
    fn test_validate_catches_tampering() {
        let (_dir, manager, id) = staged_snapshot(&[("a.md", "# A\n\nsome text\n")]);
        manager.activate(&id).unwrap();
        let outline = SnapshotLayout::outline_path(&manager.layout().snapshot_dir(&id));
        let mut bytes = std::fs::read(&outline).unwrap();
        bytes[0] ^= 0x55;
        std::fs::write(&outline, bytes).unwrap();
        let err = manager.validate(&id).unwrap_err();
        assert_eq!(err.code(), "INDEX_CORRUPT");
    }

    #[test]
    fn test_validate_reports_missing_files() {
        let (_dir, manager, id) = staged_snapshot(&[("a.md", "# A\n\nsome text\n")]);
        manager.activate(&id).unwrap();
        std::fs::remove_file(SnapshotLayout::outline_path(
            &manager.layout().snapshot_dir(&id),
        ))
        .unwrap();
        match manager.validate(&id).unwrap_err() {
            EngineError::IndexCorrupt { missing_files, .. } => {
                assert_eq!(missing_files, vec!["outline.ann".to_string()]);
            }
            other => panic!("expected IndexCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_recover_sweeps_staging_and_falls_back() {
        let (_dir, manager, id) = staged_snapshot(&[("a.md", "# A\n\nsome text\n")]);
        manager.activate(&id).unwrap();
        // A stray half-built directory from a crashed build.
        let stray = manager.layout().building_dir("deadbeef");
        std::fs::create_dir_all(&stray).unwrap();
        // Pointer names a snapshot that does not exist.
        std::fs::write(manager.layout().current_file(), "ghost").unwrap();

        let recovered = manager.recover().unwrap();
        assert_eq!(recovered.as_deref(), Some(id.as_str()));
        assert!(!stray.exists());
        assert_eq!(manager.current().unwrap().as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_recover_empty_root_is_not_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().join(".msrl")).unwrap();
        assert!(manager.recover().unwrap().is_none());
    }

    #[test]
    fn test_cleanup_keeps_recent_and_current() {
        let (_dir, manager, first) = staged_snapshot(&[("a.md", "# A\n\ntext one\n")]);
        manager.activate(&first).unwrap();
        // A second snapshot in the same root.
        let vault = manager.layout().root().parent().unwrap().to_path_buf();
        let config = EngineConfig {
            vault_root: vault.clone(),
            ..EngineConfig::default()
        };
        let builder = SnapshotBuilder::new(
            manager.layout().clone(),
            &vault,
            Arc::new(HashingEmbedder::default()),
            config,
        );
        let scan = FileScanner::new(&vault).unwrap().scan().unwrap();
        let second = builder.build_full(&scan).unwrap().snapshot_id;
        manager.activate(&second).unwrap();

        let removed = manager.cleanup_old_snapshots(1).unwrap();
        assert_eq!(removed, vec![first.clone()]);
        assert!(!manager.layout().snapshot_dir(&first).exists());
        assert!(manager.layout().snapshot_dir(&second).is_dir());
    }
}

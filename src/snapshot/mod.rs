//! Immutable snapshots: directory layout, loaded handles, shard cache.
//!
//! A snapshot directory owns everything a query needs — metadata store,
//! outline index, per-shard leaf indexes, manifest. Queries hold an
//! `Arc<Snapshot>` for their whole lifetime, so activating a newer snapshot
//! never invalidates an in-flight reader; the old snapshot's resources drop
//! when the last reader releases its handle.

/// Full and incremental snapshot construction.
pub mod builder;
/// Staging, validation, atomic activation, retention, recovery.
pub mod manager;
/// Manifest schema.
pub mod manifest;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ann::LeafShardIndex;
use crate::error::Result;
use crate::outline::OutlineIndex;
use crate::snapshot::manifest::Manifest;
use crate::store::MetaStore;

pub use builder::{BuildOutcome, SnapshotBuilder};
pub use manager::SnapshotManager;

/// Path helpers for one snapshot root.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn current_file(&self) -> PathBuf {
        self.root.join("CURRENT")
    }

    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    #[must_use]
    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(id)
    }

    #[must_use]
    pub fn building_dir(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(format!("{id}.building"))
    }

    #[must_use]
    pub fn manifest_path(dir: &Path) -> PathBuf {
        dir.join("manifest.json")
    }

    #[must_use]
    pub fn store_path(dir: &Path) -> PathBuf {
        dir.join("meta.sqlite")
    }

    #[must_use]
    pub fn outline_path(dir: &Path) -> PathBuf {
        dir.join("outline.ann")
    }

    #[must_use]
    pub fn outline_ids_path(dir: &Path) -> PathBuf {
        dir.join("id_maps").join("outline_ids.json")
    }

    #[must_use]
    pub fn shard_file_name(shard_id: u32) -> String {
        format!("shard_{shard_id:03}.ann")
    }

    #[must_use]
    pub fn shard_path(dir: &Path, shard_id: u32) -> PathBuf {
        dir.join("shards").join(Self::shard_file_name(shard_id))
    }

    #[must_use]
    pub fn shard_ids_path(dir: &Path, shard_id: u32) -> PathBuf {
        dir.join("id_maps")
            .join(format!("shard_{shard_id:03}_ids.json"))
    }
}

/// Small LRU over resident shard indexes. The ANN files are not memory
/// mapped, so only the hottest shards stay loaded.
struct ShardCache {
    capacity: usize,
    entries: HashMap<u32, Arc<LeafShardIndex>>,
    order: VecDeque<u32>,
}

impl ShardCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, shard_id: u32) -> Option<Arc<LeafShardIndex>> {
        let hit = self.entries.get(&shard_id).cloned();
        if hit.is_some() {
            self.touch(shard_id);
        }
        hit
    }

    fn insert(&mut self, shard_id: u32, index: Arc<LeafShardIndex>) {
        if self.entries.insert(shard_id, index).is_none() {
            self.order.push_back(shard_id);
        } else {
            self.touch(shard_id);
        }
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            } else {
                break;
            }
        }
    }

    fn touch(&mut self, shard_id: u32) {
        if let Some(pos) = self.order.iter().position(|&s| s == shard_id) {
            self.order.remove(pos);
            self.order.push_back(shard_id);
        }
    }
}

/// A loaded, queryable snapshot.
pub struct Snapshot {
    pub id: String,
    pub manifest: Manifest,
    pub store: MetaStore,
    pub outline: OutlineIndex,
    dir: PathBuf,
    shard_cache: Mutex<ShardCache>,
    nprobe: usize,
}

impl Snapshot {
    /// Open a snapshot directory: manifest, store, outline. Shard indexes
    /// load lazily on first search.
    pub fn open(dir: &Path, max_cached_shards: usize, nprobe: usize) -> Result<Arc<Self>> {
        let manifest = Manifest::load(&SnapshotLayout::manifest_path(dir))?;
        let store = MetaStore::open(&SnapshotLayout::store_path(dir))?;
        let outline = OutlineIndex::load(
            &SnapshotLayout::outline_path(dir),
            &SnapshotLayout::outline_ids_path(dir),
        )?;
        tracing::info!(
            snapshot = %manifest.snapshot_id,
            docs = manifest.stats.docs,
            leaves = manifest.stats.leaves,
            "opened snapshot"
        );
        Ok(Arc::new(Self {
            id: manifest.snapshot_id.clone(),
            manifest,
            store,
            outline,
            dir: dir.to_path_buf(),
            shard_cache: Mutex::new(ShardCache::new(max_cached_shards)),
            nprobe,
        }))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The shard's leaf index, loading from disk on a cache miss. `None`
    /// when the shard is empty (no file was written for it).
    pub fn shard_index(&self, shard_id: u32) -> Result<Option<Arc<LeafShardIndex>>> {
        if let Some(hit) = self.shard_cache.lock().get(shard_id) {
            return Ok(Some(hit));
        }
        let path = SnapshotLayout::shard_path(&self.dir, shard_id);
        if !path.is_file() {
            return Ok(None);
        }
        let index = Arc::new(LeafShardIndex::load(
            &path,
            &SnapshotLayout::shard_ids_path(&self.dir, shard_id),
            self.nprobe,
        )?);
        tracing::debug!(shard_id, leaves = index.len(), "loaded cold shard");
        self.shard_cache.lock().insert(shard_id, Arc::clone(&index));
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = SnapshotLayout::new("/v/.msrl");
        assert_eq!(layout.current_file(), PathBuf::from("/v/.msrl/CURRENT"));
        let dir = layout.snapshot_dir("abc");
        assert_eq!(dir, PathBuf::from("/v/.msrl/snapshots/abc"));
        assert_eq!(
            layout.building_dir("abc"),
            PathBuf::from("/v/.msrl/snapshots/abc.building")
        );
        assert_eq!(
            SnapshotLayout::shard_path(&dir, 7),
            PathBuf::from("/v/.msrl/snapshots/abc/shards/shard_007.ann")
        );
        assert_eq!(
            SnapshotLayout::shard_ids_path(&dir, 127),
            PathBuf::from("/v/.msrl/snapshots/abc/id_maps/shard_127_ids.json")
        );
    }

    #[test]
    fn test_shard_cache_lru_eviction() {
        let mut cache = ShardCache::new(2);
        let dummy = |n: u32| {
            Arc::new(
                LeafShardIndex::build(
                    &[(format!("leaf-{n}"), vec![1.0, 0.0])],
                    2,
                    1000,
                    16,
                )
                .unwrap(),
            )
        };
        cache.insert(1, dummy(1));
        cache.insert(2, dummy(2));
        assert!(cache.get(1).is_some()); // 1 is now most recent
        cache.insert(3, dummy(3)); // evicts 2
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
    }
}

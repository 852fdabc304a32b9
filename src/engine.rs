//! Top-level engine: lifecycle, queries, reindexing, watcher wiring.
//!
//! The engine holds exactly one active snapshot behind a `RwLock`; queries
//! clone the `Arc` at entry and keep it for their whole lifetime, so an
//! activation mid-query never invalidates the reader — the superseded
//! snapshot's resources drop with its last handle, and directory deletion is
//! deferred by a grace window. Builds are exclusive: a second non-waiting
//! reindex fails fast with `INDEX_BUSY`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::config::{EngineConfig, CHUNKER_VERSION, SNAPSHOT_KEEP_COUNT, SNAPSHOT_RELEASE_GRACE_SECS};
use crate::embedding::{Embedder, HashingEmbedder};
use crate::error::{EngineError, Result};
use crate::pipeline::RetrievalPipeline;
use crate::scanner::FileScanner;
use crate::search::{QueryParams, QueryResponse};
use crate::snapshot::manifest::SnapshotStats;
use crate::snapshot::{Snapshot, SnapshotBuilder, SnapshotManager};
use crate::store::Changes;
use crate::watcher::{VaultWatcher, WatchCallback, WatchEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    Building,
    Error,
}

#[derive(Debug, Clone)]
pub struct WatcherStatus {
    pub enabled: bool,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub state: EngineState,
    pub snapshot_id: Option<String>,
    pub snapshot_timestamp: Option<DateTime<Utc>>,
    pub stats: SnapshotStats,
    pub watcher: WatcherStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub enum ReindexScope {
    /// Rebuild only what changed since the active snapshot.
    #[default]
    Changed,
    /// Rebuild everything from scratch.
    Full,
    /// Like `Changed`, restricted to docs under a uri prefix.
    Prefix(String),
}

#[derive(Debug, Clone, Default)]
pub struct ReindexOptions {
    pub wait: bool,
    pub force: bool,
    pub scope: ReindexScope,
}

#[derive(Debug, Clone)]
pub struct ReindexOutcome {
    pub completed: bool,
    pub snapshot_id: Option<String>,
    pub stats: Option<SnapshotStats>,
}

pub struct Engine {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    manager: SnapshotManager,
    scanner: FileScanner,
    active: RwLock<Option<Arc<Snapshot>>>,
    build_lock: Mutex<()>,
    build_started_at: Mutex<Option<DateTime<Utc>>>,
    watcher: Mutex<Option<VaultWatcher>>,
    last_error: Mutex<Option<String>>,
}

impl Engine {
    /// Validate config, load the embedding backend, recover the newest valid
    /// snapshot (building an initial one when none exists), and start the
    /// watcher when enabled.
    pub fn create(config: EngineConfig) -> Result<Arc<Self>> {
        let embedder = load_embedder(&config)?;
        Self::with_embedder(config, embedder)
    }

    /// Like [`Engine::create`] with an injected embedding backend.
    pub fn with_embedder(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Arc<Self>> {
        config.validate()?;
        let manager = SnapshotManager::new(config.snapshot_root())?;
        let scanner = FileScanner::new(&config.vault_root)?;

        let engine = Arc::new(Self {
            manager,
            scanner,
            active: RwLock::new(None),
            build_lock: Mutex::new(()),
            build_started_at: Mutex::new(None),
            watcher: Mutex::new(None),
            last_error: Mutex::new(None),
            embedder,
            config,
        });

        match engine.manager.recover()? {
            Some(id) => {
                let snapshot = engine.open_snapshot(&id)?;
                *engine.active.write() = Some(snapshot);
            }
            None => {
                tracing::info!("no snapshot found; running initial full build");
                engine.reindex(ReindexOptions {
                    wait: true,
                    force: true,
                    scope: ReindexScope::Full,
                })?;
            }
        }

        if engine.config.watcher.enabled {
            engine.set_watch(true, None)?;
        }
        Ok(engine)
    }

    /// Run a search. `top_k` / `max_excerpt_chars` of zero select the
    /// configured defaults.
    pub fn query(&self, mut params: QueryParams) -> Result<QueryResponse> {
        let retrieval = &self.config.retrieval;
        if params.top_k == 0 {
            params.top_k = retrieval.default_top_k;
        }
        if params.max_excerpt_chars == 0 {
            params.max_excerpt_chars = retrieval.default_max_excerpt_chars;
        }
        if params.top_k > retrieval.max_top_k {
            return Err(EngineError::invalid_argument(
                "top_k",
                params.top_k,
                format!("must be in [1, {}]", retrieval.max_top_k),
            ));
        }
        if params.max_excerpt_chars < 200
            || params.max_excerpt_chars > retrieval.max_max_excerpt_chars
        {
            return Err(EngineError::invalid_argument(
                "max_excerpt_chars",
                params.max_excerpt_chars,
                format!("must be in [200, {}]", retrieval.max_max_excerpt_chars),
            ));
        }

        let snapshot = self
            .active
            .read()
            .as_ref()
            .cloned()
            .ok_or(EngineError::NotIndexed)?;
        RetrievalPipeline::new(&snapshot, self.embedder.as_ref(), &self.config).query(&params)
    }

    /// Rebuild the index. Exclusive: with `wait` the call queues behind a
    /// running build; without it, it fails fast with `INDEX_BUSY`.
    pub fn reindex(&self, opts: ReindexOptions) -> Result<ReindexOutcome> {
        let guard = if opts.wait {
            self.build_lock.lock()
        } else {
            match self.build_lock.try_lock() {
                Some(guard) => guard,
                None => {
                    let build_started_at =
                        (*self.build_started_at.lock()).unwrap_or_else(Utc::now);
                    return Err(EngineError::IndexBusy { build_started_at });
                }
            }
        };
        *self.build_started_at.lock() = Some(Utc::now());
        let result = self.run_build(&opts);
        *self.build_started_at.lock() = None;
        drop(guard);

        match &result {
            Ok(_) => {
                *self.last_error.lock() = None;
            }
            Err(err) => {
                *self.last_error.lock() = Some(err.to_string());
            }
        }
        result
    }

    fn run_build(&self, opts: &ReindexOptions) -> Result<ReindexOutcome> {
        let files = self.scanner.scan()?;
        let builder = SnapshotBuilder::new(
            self.manager.layout().clone(),
            &self.config.vault_root,
            Arc::clone(&self.embedder),
            self.config.clone(),
        );

        let active = self.active.read().as_ref().cloned();
        let outcome = match (&opts.scope, &active) {
            (ReindexScope::Full, _) | (_, None) => builder.build_full(&files)?,
            (scope, Some(snapshot)) => {
                let mut changes = snapshot.store.get_changed_docs(&files)?;
                if let ReindexScope::Prefix(prefix) = scope {
                    changes.added.retain(|u| u.starts_with(prefix.as_str()));
                    changes.modified.retain(|u| u.starts_with(prefix.as_str()));
                    changes.deleted.retain(|u| u.starts_with(prefix.as_str()));
                }
                if changes.is_empty() && !opts.force {
                    tracing::info!("reindex requested but nothing changed");
                    return Ok(ReindexOutcome {
                        completed: true,
                        snapshot_id: Some(snapshot.id.clone()),
                        stats: Some(snapshot.manifest.stats),
                    });
                }
                if snapshot.manifest.chunker_version != CHUNKER_VERSION {
                    tracing::warn!(
                        "chunker version changed; embedding cache invalid, running full build"
                    );
                    builder.build_full(&files)?
                } else {
                    builder.build_incremental(&snapshot.id, &changes, &files)?
                }
            }
        };

        self.manager.validate(&outcome.snapshot_id)?;
        self.manager.activate(&outcome.snapshot_id)?;
        let snapshot = self.open_snapshot(&outcome.snapshot_id)?;
        *self.active.write() = Some(snapshot);
        self.schedule_cleanup();

        Ok(ReindexOutcome {
            completed: true,
            snapshot_id: Some(outcome.snapshot_id),
            stats: Some(outcome.stats),
        })
    }

    fn open_snapshot(&self, id: &str) -> Result<Arc<Snapshot>> {
        Snapshot::open(
            &self.manager.dir_for(id),
            self.config.ann.max_cached_shards,
            self.config.ann.nprobe,
        )
    }

    /// Old snapshot directories are removed after a grace window so readers
    /// that acquired a handle before the swap can drain.
    fn schedule_cleanup(&self) {
        let manager = match SnapshotManager::new(self.config.snapshot_root()) {
            Ok(manager) => manager,
            Err(err) => {
                tracing::warn!(error = %err, "cleanup skipped");
                return;
            }
        };
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(SNAPSHOT_RELEASE_GRACE_SECS));
            if let Err(err) = manager.cleanup_old_snapshots(SNAPSHOT_KEEP_COUNT) {
                tracing::warn!(error = %err, "snapshot cleanup failed");
            }
        });
    }

    pub fn get_status(&self) -> EngineStatus {
        let building = self.build_started_at.lock().is_some();
        let active = self.active.read().as_ref().cloned();
        let error = self.last_error.lock().clone();
        let state = if building {
            EngineState::Building
        } else if active.is_none() && error.is_some() {
            EngineState::Error
        } else {
            EngineState::Ready
        };
        let watcher = self.watcher.lock();
        EngineStatus {
            state,
            snapshot_id: active.as_ref().map(|s| s.id.clone()),
            snapshot_timestamp: active.as_ref().map(|s| s.manifest.created_at),
            stats: active.as_ref().map(|s| s.manifest.stats).unwrap_or_default(),
            watcher: WatcherStatus {
                enabled: watcher.is_some(),
                debounce_ms: watcher
                    .as_ref()
                    .map_or(self.config.watcher.debounce_ms, VaultWatcher::debounce_ms),
            },
            error,
        }
    }

    /// Start or stop the watcher; a debounce change restarts it. The watcher
    /// state is not persisted — the next `create` re-reads the config.
    pub fn set_watch(self: &Arc<Self>, enabled: bool, debounce_ms: Option<u64>) -> Result<()> {
        let mut slot = self.watcher.lock();
        if let Some(mut current) = slot.take() {
            current.stop();
        }
        if !enabled {
            return Ok(());
        }
        let debounce = debounce_ms.unwrap_or(self.config.watcher.debounce_ms);
        if debounce < 100 {
            return Err(EngineError::invalid_argument(
                "debounce_ms",
                debounce,
                "must be >= 100",
            ));
        }
        let weak = Arc::downgrade(self);
        let callback: WatchCallback = Arc::new(move |batch: Vec<WatchEvent>| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_watch_batch(&batch);
            }
        });
        *slot = Some(VaultWatcher::start(
            &self.config.vault_root,
            debounce,
            callback,
        )?);
        Ok(())
    }

    /// Watcher-triggered background reindex. Failures are logged, never
    /// propagated into the watcher thread.
    fn handle_watch_batch(&self, batch: &[WatchEvent]) {
        tracing::info!(events = batch.len(), "vault changed; reindexing");
        let result = self.reindex(ReindexOptions {
            wait: true,
            force: false,
            scope: ReindexScope::Changed,
        });
        if let Err(err) = result {
            tracing::error!(error = %err, "watcher-triggered reindex failed");
        }
    }

    /// Stop the watcher and release the active snapshot. Queries already in
    /// flight finish against their own handles.
    pub fn shutdown(&self) {
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        *self.active.write() = None;
        tracing::info!("engine shut down");
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Changes the active snapshot knows nothing about yet; handy for hosts
    /// that surface a "pending changes" indicator.
    pub fn pending_changes(&self) -> Result<Changes> {
        let files = self.scanner.scan()?;
        let snapshot = self
            .active
            .read()
            .as_ref()
            .cloned()
            .ok_or(EngineError::NotIndexed)?;
        snapshot.store.get_changed_docs(&files)
    }
}

fn load_embedder(config: &EngineConfig) -> Result<Arc<dyn Embedder>> {
    if config.embedding.model_path.is_some() {
        #[cfg(feature = "local-onnx")]
        {
            let embedder = crate::embedding::OnnxEmbedder::load(
                &config.embedding,
                crate::config::EMBEDDING_DIM,
            )?;
            return Ok(Arc::new(embedder));
        }
        #[cfg(not(feature = "local-onnx"))]
        {
            return Err(EngineError::invalid_argument(
                "embedding.model_path",
                config.embedding.model_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
                "built without the local-onnx feature; unset model_path to use the hashing fallback",
            ));
        }
    }
    tracing::info!("no embedding model configured; using deterministic hashing fallback");
    Ok(Arc::new(HashingEmbedder::default()))
}

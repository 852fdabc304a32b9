//! Debounced filesystem watcher over the vault.
//!
//! Raw notify events for `.md` files are buffered on a worker thread; each
//! arrival resets the debounce timer, and once the vault goes quiet for the
//! debounce window the coalesced batch is delivered to the engine callback
//! and the buffer cleared. `stop()` cancels any pending batch and releases
//! the subscription; it is idempotent and also runs on drop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{EngineError, Result};
use crate::scanner::FileScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Add,
    Change,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub doc_uri: String,
}

pub type WatchCallback = Arc<dyn Fn(Vec<WatchEvent>) + Send + Sync>;

/// Poll interval of the worker loop; bounds how late past the debounce
/// window a batch can fire.
const TICK_MS: u64 = 50;

pub struct VaultWatcher {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    debounce_ms: u64,
}

impl VaultWatcher {
    /// Subscribe to the vault and start the debounce worker.
    pub fn start(vault_root: &Path, debounce_ms: u64, callback: WatchCallback) -> Result<Self> {
        let scanner = FileScanner::new(vault_root)?;
        let root: PathBuf = vault_root.to_path_buf();

        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(tx, NotifyConfig::default())
            .map_err(|e| EngineError::Internal(format!("create watcher: {e}")))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| EngineError::Internal(format!("watch {}: {e}", root.display())))?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_flag);
        let debounce = Duration::from_millis(debounce_ms);

        let handle = std::thread::Builder::new()
            .name("msrl-watcher".to_string())
            .spawn(move || {
                // Keep the subscription alive for the thread's lifetime.
                let _watcher = watcher;
                let mut buffer: BTreeMap<String, WatchKind> = BTreeMap::new();
                let mut last_event: Option<Instant> = None;

                loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match rx.recv_timeout(Duration::from_millis(TICK_MS)) {
                        Ok(Ok(event)) => {
                            if buffer_event(&scanner, &event, &mut buffer) {
                                last_event = Some(Instant::now());
                            }
                        }
                        Ok(Err(err)) => {
                            tracing::warn!(error = %err, "watcher backend error");
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let quiet_long_enough =
                        last_event.is_some_and(|t| t.elapsed() >= debounce);
                    if quiet_long_enough && !buffer.is_empty() {
                        let batch: Vec<WatchEvent> = std::mem::take(&mut buffer)
                            .into_iter()
                            .map(|(doc_uri, kind)| WatchEvent { kind, doc_uri })
                            .collect();
                        last_event = None;
                        tracing::debug!(events = batch.len(), "delivering watch batch");
                        callback(batch);
                    }
                }
            })
            .map_err(|e| EngineError::Internal(format!("spawn watcher thread: {e}")))?;

        tracing::info!(root = %root.display(), debounce_ms, "vault watcher started");
        Ok(Self {
            stop_flag,
            handle: Some(handle),
            debounce_ms,
        })
    }

    #[must_use]
    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    /// Cancel the pending timer and release the subscription. Safe to call
    /// more than once.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("vault watcher stopped");
        }
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fold one notify event into the buffer. Returns whether anything relevant
/// was recorded.
fn buffer_event(
    scanner: &FileScanner,
    event: &Event,
    buffer: &mut BTreeMap<String, WatchKind>,
) -> bool {
    let kind = match event.kind {
        EventKind::Create(_) => WatchKind::Add,
        EventKind::Modify(_) => WatchKind::Change,
        EventKind::Remove(_) => WatchKind::Unlink,
        _ => return false,
    };

    let mut recorded = false;
    for path in &event.paths {
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Ok(doc_uri) = scanner.to_doc_uri(path) else {
            continue;
        };
        if doc_uri
            .split('/')
            .any(|segment| scanner.is_excluded_name(segment))
        {
            continue;
        }
        merge_kind(buffer, doc_uri, kind);
        recorded = true;
    }
    recorded
}

/// Coalescing rules: unlink wins over everything; a create followed by
/// modifies stays a create.
fn merge_kind(buffer: &mut BTreeMap<String, WatchKind>, doc_uri: String, incoming: WatchKind) {
    match buffer.get(&doc_uri) {
        Some(WatchKind::Unlink) if incoming != WatchKind::Add => {}
        Some(WatchKind::Add) if incoming == WatchKind::Change => {}
        _ => {
            buffer.insert(doc_uri, incoming);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_merge_kind_rules() {
        let mut buffer = BTreeMap::new();
        merge_kind(&mut buffer, "a.md".into(), WatchKind::Add);
        merge_kind(&mut buffer, "a.md".into(), WatchKind::Change);
        assert_eq!(buffer["a.md"], WatchKind::Add);

        merge_kind(&mut buffer, "b.md".into(), WatchKind::Change);
        merge_kind(&mut buffer, "b.md".into(), WatchKind::Unlink);
        assert_eq!(buffer["b.md"], WatchKind::Unlink);
        merge_kind(&mut buffer, "b.md".into(), WatchKind::Change);
        assert_eq!(buffer["b.md"], WatchKind::Unlink);
        // A fresh create after an unlink is a new file again.
        merge_kind(&mut buffer, "b.md".into(), WatchKind::Add);
        assert_eq!(buffer["b.md"], WatchKind::Add);
    }

    #[test]
    fn test_debounced_batch_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let batches: Arc<Mutex<Vec<Vec<WatchEvent>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let callback: WatchCallback = Arc::new(move |batch| sink.lock().push(batch));

        let mut watcher = VaultWatcher::start(dir.path(), 150, callback).unwrap();

        std::fs::write(dir.path().join("x.md"), "hello").unwrap();
        std::fs::write(dir.path().join("y.md"), "world").unwrap();
        std::fs::write(dir.path().join("skip.txt"), "ignored").unwrap();

        // Wait out the debounce window plus scheduling slack.
        let deadline = Instant::now() + Duration::from_secs(5);
        while batches.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        watcher.stop();
        watcher.stop(); // idempotent

        let delivered = batches.lock();
        assert!(!delivered.is_empty(), "no batch delivered");
        let uris: Vec<&str> = delivered[0].iter().map(|e| e.doc_uri.as_str()).collect();
        assert!(uris.contains(&"x.md"));
        assert!(uris.contains(&"y.md"));
        assert!(!uris.iter().any(|u| u.ends_with(".txt")));
    }

    #[test]
    fn test_stop_without_events() {
        let dir = tempfile::tempdir().unwrap();
        let callback: WatchCallback = Arc::new(|_batch| {});
        let mut watcher = VaultWatcher::start(dir.path(), 200, callback).unwrap();
        watcher.stop();
    }
}

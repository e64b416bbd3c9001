//! High-level semantic retrieval service for one TM store.
//!
//! Owns the embedding model, the vector index and its persistence, plus the
//! background worker that keeps the index in step with store mutations.
//! Heavy pieces are lazy: the model is loaded on first use, not at
//! construction.
//!
//! Maintenance is a bounded FIFO queue, one worker per store. Enqueueing
//! blocks when the queue is full, so a burst of writes applies backpressure
//! instead of growing without bound. Queries served while tasks are pending
//! are stale; callers can check [`SemanticService::is_stale`] or block on
//! [`SemanticService::wait_drained`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::SemanticConfig;
use crate::segment::SegText;
use crate::semantic::embeddings::{Embedder, EmbeddingError, FastembedEmbedder};
use crate::semantic::index::{IndexError, SearchHit, VectorIndex};
use crate::semantic::preprocess::{content_hash, embedding_input};
use crate::semantic::storage::{VectorStorage, VectorStorageError};

/// Sources embedded per reconcile batch; the index is persisted after each
/// batch so an interrupted run resumes where it stopped.
const RECONCILE_BATCH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SemanticError {
    #[error("Semantic retrieval is disabled")]
    Disabled,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Maintenance queue is closed")]
    QueueClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One unit of background index maintenance. `Upsert` carries the embedding
/// input captured at enqueue time, so a later store mutation cannot change
/// what an earlier task applies and FIFO order is all that matters.
enum IndexTask {
    Upsert {
        entry_id: u64,
        input: Option<String>,
    },
    Remove {
        entry_id: u64,
    },
}

struct SemanticState {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    storage: VectorStorage,
}

struct Inner {
    config: SemanticConfig,
    base_dir: PathBuf,
    override_embedder: Option<Arc<dyn Embedder>>,
    state: Mutex<Option<SemanticState>>,
    pending: Mutex<usize>,
    drained: Condvar,
}

/// Outcome of reconciling the index against a store snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub embedded: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// Semantic retrieval over one TM store's entries.
pub struct SemanticService {
    inner: Arc<Inner>,
    tx: Mutex<Option<SyncSender<IndexTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SemanticService {
    /// Create a service that lazily loads the configured fastembed model.
    pub fn new(config: SemanticConfig, base_dir: PathBuf) -> Self {
        Self::start(config, base_dir, None)
    }

    /// Create a service around an externally supplied embedder. Used by
    /// tests and by callers that bring their own embedding backend.
    pub fn with_embedder(
        config: SemanticConfig,
        base_dir: PathBuf,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self::start(config, base_dir, Some(embedder))
    }

    fn start(
        config: SemanticConfig,
        base_dir: PathBuf,
        override_embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let enabled = config.enabled;
        let queue_capacity = config.queue_capacity.max(1);

        let inner = Arc::new(Inner {
            config,
            base_dir,
            override_embedder,
            state: Mutex::new(None),
            pending: Mutex::new(0),
            drained: Condvar::new(),
        });

        let (tx, worker) = if enabled {
            let (tx, rx) = mpsc::sync_channel(queue_capacity);
            let worker_inner = inner.clone();
            let handle = std::thread::spawn(move || worker_loop(worker_inner, rx));
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        Self {
            inner,
            tx: Mutex::new(tx),
            worker: Mutex::new(worker),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Schedule (re)indexing of an entry's source text. No-op when disabled.
    pub fn enqueue_upsert(&self, entry_id: u64, source: &SegText) -> Result<(), SemanticError> {
        if !self.inner.config.enabled {
            return Ok(());
        }
        self.submit(IndexTask::Upsert {
            entry_id,
            input: embedding_input(source),
        })
    }

    /// Schedule eviction of an entry's vector. No-op when disabled.
    pub fn enqueue_remove(&self, entry_id: u64) -> Result<(), SemanticError> {
        if !self.inner.config.enabled {
            return Ok(());
        }
        self.submit(IndexTask::Remove { entry_id })
    }

    fn submit(&self, task: IndexTask) -> Result<(), SemanticError> {
        let tx = self
            .tx
            .lock()
            .map_err(|e| SemanticError::Internal(format!("lock poisoned: {e}")))?
            .clone();
        let Some(tx) = tx else {
            return Err(SemanticError::QueueClosed);
        };

        self.inner.task_added();
        if tx.send(task).is_err() {
            self.inner.task_done();
            return Err(SemanticError::QueueClosed);
        }
        Ok(())
    }

    /// Maintenance tasks accepted but not yet applied.
    pub fn pending(&self) -> usize {
        *self.inner.pending.lock().unwrap()
    }

    /// True while queries may not reflect the newest store writes. This is
    /// informational: stale results are valid results, just older.
    pub fn is_stale(&self) -> bool {
        self.pending() > 0
    }

    /// Block until the maintenance queue drains or `timeout` passes.
    /// Returns true if drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.inner.pending.lock().unwrap();
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, wait) = self
                .inner
                .drained
                .wait_timeout(pending, deadline - now)
                .unwrap();
            pending = guard;
            if wait.timed_out() && *pending > 0 {
                return false;
            }
        }
        true
    }

    /// Nearest entries to `query` in mapped [0,1] score space, at most `k`,
    /// at or above the configured floor, best first. Returns entry ids; the
    /// caller resolves them against a store snapshot.
    pub fn search_scored(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SemanticError> {
        if !self.inner.config.enabled {
            return Err(SemanticError::Disabled);
        }
        let min_score = self.inner.config.min_score;
        self.inner.with_state(|state| {
            let vector = state.embedder.embed(query)?;
            Ok(state.index.search(&vector, min_score, k)?)
        })
    }

    /// Number of indexed entries, 0 before first use.
    pub fn indexed_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.index.len()))
            .unwrap_or(0)
    }

    /// Eagerly load the model and index instead of waiting for first use.
    pub fn initialize(&self) -> Result<(), SemanticError> {
        if !self.inner.config.enabled {
            return Err(SemanticError::Disabled);
        }
        self.inner.ensure_initialized()
    }

    /// Bring the index exactly in line with a store snapshot: embed new and
    /// changed sources, skip unchanged ones, evict ids the snapshot no
    /// longer contains. With `force`, everything is re-embedded.
    ///
    /// The index is persisted after every batch, so an interrupted run can
    /// simply be repeated and will skip what already landed. `on_progress`
    /// receives (processed, total) after each batch.
    pub fn reconcile(
        &self,
        entries: &[(u64, SegText)],
        force: bool,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<ReconcileReport, SemanticError> {
        if !self.inner.config.enabled {
            return Err(SemanticError::Disabled);
        }

        let total = entries.len();
        self.inner.with_state(|state| {
            if force {
                state.index.clear();
            }

            let mut report = ReconcileReport::default();
            let mut keep: HashSet<u64> = HashSet::with_capacity(entries.len());
            let mut done = 0usize;

            for batch in entries.chunks(RECONCILE_BATCH) {
                let mut ids: Vec<u64> = Vec::new();
                let mut hashes: Vec<u64> = Vec::new();
                let mut inputs: Vec<String> = Vec::new();

                for (id, source) in batch {
                    match embedding_input(source) {
                        None => {
                            report.skipped += 1;
                        }
                        Some(input) => {
                            keep.insert(*id);
                            let hash = content_hash(&input);
                            if state.index.get(*id).map(|e| e.content_hash) == Some(hash) {
                                report.skipped += 1;
                            } else {
                                ids.push(*id);
                                hashes.push(hash);
                                inputs.push(input);
                            }
                        }
                    }
                }

                if !inputs.is_empty() {
                    let vectors = state.embedder.embed_batch(&inputs)?;
                    for (pos, vector) in vectors.into_iter().enumerate() {
                        state.index.insert(ids[pos], hashes[pos], vector)?;
                        report.embedded += 1;
                    }

                    let model_id = state.embedder.model_id_hash();
                    state.storage.save(&state.index, &model_id)?;
                }

                done += batch.len();
                on_progress(done, total);
            }

            let orphans: Vec<u64> = state.index.ids().filter(|id| !keep.contains(id)).collect();
            for id in orphans {
                state.index.remove(id);
                report.removed += 1;
            }

            let model_id = state.embedder.model_id_hash();
            state.storage.save(&state.index, &model_id)?;
            Ok(report)
        })
    }
}

impl Drop for SemanticService {
    fn drop(&mut self) {
        // closing the channel lets the worker drain what was accepted,
        // persist, and exit
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Some(handle) = self.worker.lock().ok().and_then(|mut g| g.take()) {
            let _ = handle.join();
        }
    }
}

impl Inner {
    fn task_added(&self) {
        *self.pending.lock().unwrap() += 1;
    }

    fn task_done(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut SemanticState) -> Result<R, SemanticError>,
    ) -> Result<R, SemanticError> {
        self.ensure_initialized()?;

        let mut guard = self
            .state
            .lock()
            .map_err(|e| SemanticError::Internal(format!("lock poisoned: {e}")))?;
        let state = guard
            .as_mut()
            .ok_or_else(|| SemanticError::Internal("state missing after init".into()))?;
        f(state)
    }

    fn ensure_initialized(&self) -> Result<(), SemanticError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| SemanticError::Internal(format!("lock poisoned: {e}")))?;

        if guard.is_none() {
            *guard = Some(self.init_state()?);
        }
        Ok(())
    }

    fn init_state(&self) -> Result<SemanticState, SemanticError> {
        let embedder: Arc<dyn Embedder> = match &self.override_embedder {
            Some(embedder) => embedder.clone(),
            None => {
                log::info!(
                    "initializing semantic retrieval with model '{}'",
                    self.config.model
                );
                Arc::new(FastembedEmbedder::new(
                    &self.config.model,
                    self.base_dir.clone(),
                )?)
            }
        };

        let model_id = embedder.model_id_hash();
        let dimensions = embedder.dimensions();
        let storage = VectorStorage::new(self.base_dir.join("vectors.bin"));

        let index = if storage.exists() {
            match storage.load(&model_id, dimensions) {
                Ok(index) => {
                    log::info!(
                        "loaded {} vectors from {}",
                        index.len(),
                        storage.path().display()
                    );
                    index
                }
                // the index is a cache over the store, so anything
                // unreadable is replaced, not repaired
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("embedding model changed, starting a fresh index");
                    VectorIndex::new(dimensions)
                }
                Err(VectorStorageError::VersionMismatch(version, _)) => {
                    log::warn!("vectors.bin version {version} unsupported, starting a fresh index");
                    VectorIndex::new(dimensions)
                }
                Err(VectorStorageError::ChecksumMismatch) => {
                    log::warn!("vectors.bin failed its checksum, starting a fresh index");
                    VectorIndex::new(dimensions)
                }
                Err(e) => {
                    log::error!("failed to load vectors: {e}");
                    return Err(e.into());
                }
            }
        } else {
            log::info!("no existing vector index, starting fresh");
            VectorIndex::new(dimensions)
        };

        Ok(SemanticState {
            embedder,
            index,
            storage,
        })
    }

    fn run_task(&self, task: IndexTask) -> bool {
        match task {
            IndexTask::Upsert { entry_id, input } => match input {
                Some(input) => self.upsert_now(entry_id, &input),
                // a source with no embeddable text drops out of the index
                None => self.remove_now(entry_id),
            },
            IndexTask::Remove { entry_id } => self.remove_now(entry_id),
        }
    }

    fn upsert_now(&self, entry_id: u64, input: &str) -> bool {
        let result = self.with_state(|state| {
            let hash = content_hash(input);
            if state.index.get(entry_id).map(|e| e.content_hash) == Some(hash) {
                return Ok(false);
            }
            let vector = state.embedder.embed(input)?;
            state.index.insert(entry_id, hash, vector)?;
            Ok(true)
        });

        match result {
            Ok(changed) => changed,
            Err(e) => {
                log::warn!("failed to index entry {entry_id}: {e}");
                false
            }
        }
    }

    fn remove_now(&self, entry_id: u64) -> bool {
        match self.with_state(|state| Ok(state.index.remove(entry_id).is_some())) {
            Ok(removed) => removed,
            Err(e) => {
                log::warn!("failed to evict entry {entry_id} from index: {e}");
                false
            }
        }
    }

    fn persist(&self) -> Result<(), SemanticError> {
        self.with_state(|state| {
            let model_id = state.embedder.model_id_hash();
            state.storage.save(&state.index, &model_id)?;
            Ok(())
        })
    }
}

fn worker_loop(inner: Arc<Inner>, rx: Receiver<IndexTask>) {
    while let Ok(first) = rx.recv() {
        let mut dirty = inner.run_task(first);
        inner.task_done();

        // drain the burst, then persist once
        while let Ok(task) = rx.try_recv() {
            dirty |= inner.run_task(task);
            inner.task_done();
        }

        if dirty {
            if let Err(e) = inner.persist() {
                log::warn!("failed to persist vector index: {e}");
            }
        }
    }
}

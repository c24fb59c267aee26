//! Bandit state ownership and persistence.
//!
//! [`BanditStore`] owns the single in-process [`BanditState`]:
//! - **Load** is lazy and coalesced: concurrent first callers share one read.
//!   Unreadable or missing state is replaced by the prior and written back.
//! - **Mutation** goes through [`BanditStore::update`], a single-writer
//!   critical section, so concurrent feedback never loses an increment.
//! - **Writes** are whole-state overwrites taken in turn from a fair queue;
//!   they land in submission order and never interleave.
//!
//! One store per persistence channel per process. Several processes sharing
//! a file will overwrite each other's updates.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::error::StoreError;
use crate::thompson::BanditState;

/// Where serialized state lives: a file, a key-value record, a table row.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Stored contents, or `None` when nothing has been written yet.
    async fn read(&self) -> Result<Option<String>, StoreError>;

    /// Replace the stored contents.
    async fn write(&self, contents: String) -> Result<(), StoreError>;
}

/// JSON file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn read(&self) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn write(&self, contents: String) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // Readers never observe a partially written file.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory backend with read/write counters, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: StdMutex<Option<String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        let backend = Self::default();
        *backend.lock() = Some(contents.into());
        backend
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.contents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contents(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn read(&self) -> Result<Option<String>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("read refused".to_string()));
        }
        Ok(self.contents())
    }

    async fn write(&self, contents: String) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write refused".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.lock() = Some(contents);
        Ok(())
    }
}

/// Owner of the process's [`BanditState`].
pub struct BanditStore {
    backend: Arc<dyn StateBackend>,
    state: OnceCell<RwLock<BanditState>>,
    write_turn: Mutex<()>,
}

impl BanditStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            state: OnceCell::new(),
            write_turn: Mutex::new(()),
        }
    }

    /// Store backed by a JSON file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(path)))
    }

    /// Whether the state has been loaded (or initialized) yet.
    pub fn is_loaded(&self) -> bool {
        self.state.initialized()
    }

    async fn cell(&self) -> &RwLock<BanditState> {
        self.state
            .get_or_init(|| async { RwLock::new(self.read_or_init().await) })
            .await
    }

    async fn read_or_init(&self) -> BanditState {
        match self.backend.read().await {
            Ok(Some(raw)) => match serde_json::from_str::<BanditState>(&raw) {
                Ok(state) => {
                    tracing::debug!(total_pulls = state.total_pulls(), "loaded bandit state");
                    return state;
                }
                Err(error) => {
                    tracing::warn!(%error, "stored bandit state is corrupt, reinitializing")
                }
            },
            Ok(None) => tracing::info!("no stored bandit state, initializing prior"),
            Err(error) => {
                tracing::warn!(%error, "failed to read bandit state, reinitializing")
            }
        }

        let state = BanditState::new();
        if let Err(error) = self.write_encoded(&state).await {
            tracing::warn!(%error, "failed to write initial bandit state");
        }
        state
    }

    async fn write_encoded(&self, state: &BanditState) -> Result<(), StoreError> {
        let _turn = self.write_turn.lock().await;
        self.backend.write(serde_json::to_string(state)?).await
    }

    /// Snapshot of the current state, loading it first if needed.
    pub async fn load(&self) -> BanditState {
        self.cell().await.read().await.clone()
    }

    /// Mutate the state inside the single-writer critical section.
    pub async fn update<T>(&self, f: impl FnOnce(&mut BanditState) -> T) -> T {
        let mut guard = self.cell().await.write().await;
        f(&mut guard)
    }

    /// Replace the in-memory state with `state` and write it.
    pub async fn persist(&self, state: &BanditState) -> Result<(), StoreError> {
        let cell = self.cell().await;
        let _turn = self.write_turn.lock().await;
        *cell.write().await = state.clone();
        self.backend.write(serde_json::to_string(state)?).await
    }

    /// Write the current in-memory state.
    ///
    /// The snapshot is taken once this call holds the write turn, so a later
    /// flush never writes an older state than an earlier one.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let cell = self.cell().await;
        let _turn = self.write_turn.lock().await;
        let snapshot = cell.read().await.clone();
        self.backend.write(serde_json::to_string(&snapshot)?).await
    }
}

impl std::fmt::Debug for BanditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanditStore")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::UnknownSessionError;
use crate::{BookId, LocationMarker};

/// Live bookkeeping for one book the reader has opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSession {
    pub identifier: BookId,
    pub title: String,
    pub source_path: PathBuf,
    pub current_location: Option<LocationMarker>,
}

/// On-disk shape of a single book entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedBook {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub href: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<LocationMarker>,
}

/// Everything the reader remembers across runs, keyed by book identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedLibrary {
    pub books: BTreeMap<BookId, PersistedBook>,
}

impl PersistedLibrary {
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn get(&self, id: &BookId) -> Option<&PersistedBook> {
        self.books.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentBook {
    pub identifier: BookId,
    pub title: String,
    pub href: PathBuf,
}

/// Receives the whole cache whenever it is flushed. Implementations must not
/// block the caller and own their own failure handling.
pub trait DurableStorage: Send + Sync {
    fn persist(&self, library: PersistedLibrary);
}

pub struct PersistenceCache {
    books: HashMap<BookId, BookSession>,
    storage: Arc<dyn DurableStorage>,
}

impl PersistenceCache {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            books: HashMap::new(),
            storage,
        }
    }

    pub fn from_library(library: PersistedLibrary, storage: Arc<dyn DurableStorage>) -> Self {
        let books = library
            .books
            .into_iter()
            .map(|(identifier, book)| {
                let session = BookSession {
                    identifier: identifier.clone(),
                    title: book.title,
                    source_path: book.href,
                    current_location: book.current_location,
                };
                (identifier, session)
            })
            .collect();
        Self { books, storage }
    }

    /// Replaces the in-memory state with a freshly loaded library.
    pub fn replace(&mut self, library: PersistedLibrary) {
        let storage = Arc::clone(&self.storage);
        *self = Self::from_library(library, storage);
    }

    /// Creates or refreshes the entry for `identifier`. Empty incoming values
    /// never overwrite stored ones and the current location is kept.
    pub fn open_session(&mut self, identifier: BookId, title: &str, source_path: &Path) -> BookSession {
        let session = self
            .books
            .entry(identifier.clone())
            .and_modify(|existing| {
                if !title.is_empty() && existing.title != title {
                    existing.title = title.to_string();
                }
                if !source_path.as_os_str().is_empty() && existing.source_path != source_path {
                    existing.source_path = source_path.to_path_buf();
                }
            })
            .or_insert_with(|| BookSession {
                identifier: identifier.clone(),
                title: title.to_string(),
                source_path: source_path.to_path_buf(),
                current_location: None,
            });
        debug!(id = %identifier, "opened book session");
        session.clone()
    }

    pub fn record_location(
        &mut self,
        identifier: &BookId,
        location: LocationMarker,
    ) -> Result<(), UnknownSessionError> {
        let session = self
            .books
            .get_mut(identifier)
            .ok_or_else(|| UnknownSessionError(identifier.clone()))?;
        session.current_location = Some(location);
        Ok(())
    }

    pub fn restore_location(&self, identifier: &BookId) -> Option<LocationMarker> {
        self.books
            .get(identifier)
            .and_then(|session| session.current_location.clone())
    }

    pub fn get(&self, identifier: &BookId) -> Option<&BookSession> {
        self.books.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn snapshot(&self) -> PersistedLibrary {
        let books = self
            .books
            .values()
            .map(|session| {
                (
                    session.identifier.clone(),
                    PersistedBook {
                        title: session.title.clone(),
                        href: session.source_path.clone(),
                        current_location: session.current_location.clone(),
                    },
                )
            })
            .collect();
        PersistedLibrary { books }
    }

    /// Hands a snapshot to durable storage without waiting on it.
    pub fn flush(&self) {
        self.storage.persist(self.snapshot());
    }

    /// Books known to the cache, ordered by title for the idle screen.
    pub fn recently_opened(&self) -> Vec<RecentBook> {
        let mut recent: Vec<_> = self
            .books
            .values()
            .map(|session| RecentBook {
                identifier: session.identifier.clone(),
                title: if session.title.is_empty() {
                    session
                        .source_path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| session.identifier.to_string())
                } else {
                    session.title.clone()
                },
                href: session.source_path.clone(),
            })
            .collect();
        recent.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        recent
    }
}

/// Synchronous JSON file holding the persisted library.
#[derive(Debug, Clone)]
pub struct FileLibraryStore {
    path: PathBuf,
}

impl FileLibraryStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self {
            path: root.join("library.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<PersistedLibrary>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open library file {:?}", self.path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let library = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode library file {:?}", self.path))?;
        Ok(Some(library))
    }

    /// Moves an unreadable library file aside so the next save does not
    /// overwrite it. Returns where it went.
    pub fn quarantine(&self) -> Result<PathBuf> {
        let target = self.path.with_extension("json.bad");
        fs::rename(&self.path, &target)
            .with_context(|| format!("failed to move library file {:?} aside", self.path))?;
        warn!(from = ?self.path, to = ?target, "moved unreadable library file aside");
        Ok(target)
    }

    pub fn save(&self, library: &PersistedLibrary) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(library)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp library file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace library file {:?}", self.path))?;
        Ok(())
    }
}

/// Queues snapshots to a writer task so `persist` never touches the disk on
/// the caller's thread. Bursts collapse to the most recent snapshot.
pub struct BackgroundStorage {
    sender: mpsc::UnboundedSender<PersistedLibrary>,
    worker: JoinHandle<()>,
}

impl BackgroundStorage {
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: FileLibraryStore) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(write_loop(store, receiver));
        Self { sender, worker }
    }

    /// Stops accepting snapshots and waits for pending writes to land.
    pub async fn shutdown(self) {
        let Self { sender, worker } = self;
        drop(sender);
        if let Err(err) = worker.await {
            warn!(?err, "library writer task ended abnormally");
        }
    }
}

impl DurableStorage for BackgroundStorage {
    fn persist(&self, library: PersistedLibrary) {
        if self.sender.send(library).is_err() {
            warn!("library writer is gone; dropping snapshot");
        }
    }
}

#[instrument(skip_all, fields(path = %store.path().display()))]
async fn write_loop(store: FileLibraryStore, mut receiver: mpsc::UnboundedReceiver<PersistedLibrary>) {
    while let Some(mut library) = receiver.recv().await {
        while let Ok(newer) = receiver.try_recv() {
            library = newer;
        }
        let store = store.clone();
        let outcome = tokio::task::spawn_blocking(move || store.save(&library)).await;
        match outcome {
            Ok(Ok(())) => debug!("library persisted"),
            Ok(Err(err)) => warn!(?err, "failed to persist library"),
            Err(err) => warn!(?err, "library write task panicked"),
        }
    }
}

/// Keeps every snapshot in memory.
#[derive(Default)]
pub struct MemoryStorage {
    snapshots: Mutex<Vec<PersistedLibrary>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn last(&self) -> Option<PersistedLibrary> {
        self.snapshots.lock().last().cloned()
    }
}

impl DurableStorage for MemoryStorage {
    fn persist(&self, library: PersistedLibrary) {
        self.snapshots.lock().push(library);
    }
}

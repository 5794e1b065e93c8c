use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod message;
pub mod reader;
pub mod search;
pub mod timer;

pub use cache::{
    BackgroundStorage, BookSession, DurableStorage, FileLibraryStore, MemoryStorage,
    PersistedBook, PersistedLibrary, PersistenceCache, RecentBook,
};
pub use config::ReaderConfig;
pub use engine::{EngineError, EngineEvent, EngineFactory, RenderingEngine};
pub use error::{LoadFailure, LoadStage, ReaderError, UnknownSessionError};
pub use history::NavigationHistory;
pub use message::{HostMessage, ShellEvent};
pub use reader::{Reader, Session};
pub use search::{FindPanel, SearchRequest, SearchService};
pub use timer::{TimerId, TimerKind, Timers};

/// Opaque position inside a book, produced and consumed only by the rendering engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationMarker(String);

impl LocationMarker {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationMarker {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Stable book identifier taken from the book metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

static BOOK_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c2a9e-5d71-5b8e-9c44-1e6a2f7d0b13").expect("valid namespace UUID")
});

/// Derives an identifier from the book's location on disk, for books whose
/// metadata carries none.
pub fn book_id_for_path(path: &Path) -> BookId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    BookId::new(format!(
        "urn:uuid:{}",
        Uuid::new_v5(&*BOOK_NAMESPACE, rendered.as_bytes())
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub creator: Option<String>,
}

impl BookMetadata {
    /// Title line shown in the header: "title - creator" when both are known.
    pub fn display_title(&self) -> Option<String> {
        let title = self.title.as_deref().filter(|t| !t.is_empty())?;
        match self.creator.as_deref().filter(|c| !c.is_empty()) {
            Some(creator) => Some(format!("{title} - {creator}")),
            None => Some(title.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub label: String,
    pub href: String,
    #[serde(default)]
    pub subitems: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: href.into(),
            subitems: Vec::new(),
        }
    }
}

/// Walks a table of contents depth-first, yielding each entry with its nesting depth.
pub fn flatten_toc(entries: &[TocEntry]) -> Vec<(usize, &TocEntry)> {
    fn visit<'a>(entries: &'a [TocEntry], depth: usize, out: &mut Vec<(usize, &'a TocEntry)>) {
        for entry in entries {
            out.push((depth, entry));
            visit(&entry.subitems, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    visit(entries, 0, &mut out);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub excerpt: String,
    pub location: LocationMarker,
}

use std::path::PathBuf;

use crate::cache::PersistedLibrary;
use crate::search::SearchRequest;
use crate::SearchResult;

/// Every intent the host can hand to the reader.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    LoadPersistedData(PersistedLibrary),
    InitWithoutData,
    LoadBook(PathBuf),
    PrevPage,
    NextPage,
    IncreaseFont,
    DecreaseFont,
    RestoreFont,
    ToggleToc,
    Back,
    Forward,
    ToggleFind,
    SearchResults(Vec<SearchResult>),
    /// The find box contents changed.
    FindInput(String),
    /// A table-of-contents entry was chosen.
    OpenTocEntry(String),
    /// A search hit was chosen, by index into the current results.
    OpenSearchResult(usize),
    /// An entry of the recently-opened list was chosen, by index.
    OpenRecent(usize),
}

/// Notifications for the host, drained after each dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    SearchRequest(SearchRequest),
    /// User-visible alert.
    Notice(String),
    TitleChanged(String),
    /// No book title applies any more, e.g. after a failed load.
    TitleCleared,
    Redraw,
}

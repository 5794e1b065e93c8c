use std::fmt;

use thiserror::Error;

use crate::engine::EngineError;
use crate::BookId;

/// A persistence mutation named a book that was never opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no open session for book {0}")]
pub struct UnknownSessionError(pub BookId);

/// Step of the open-book sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Open,
    Metadata,
    Render,
    TableOfContents,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoadStage::Open => "open",
            LoadStage::Metadata => "metadata",
            LoadStage::Render => "render",
            LoadStage::TableOfContents => "table of contents",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
#[error("failed during {stage}: {source}")]
pub struct LoadFailure {
    pub stage: LoadStage,
    #[source]
    pub source: EngineError,
}

impl LoadFailure {
    pub fn at(stage: LoadStage) -> impl FnOnce(EngineError) -> LoadFailure {
        move |source| LoadFailure { stage, source }
    }
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    UnknownSession(#[from] UnknownSessionError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::{BookMetadata, LocationMarker, TocEntry};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no book is loaded")]
    NotLoaded,
    #[error("unknown location {0}")]
    UnknownLocation(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Content-level notifications the engine emits while it is displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    LocationChanged(LocationMarker),
    LinkClicked(String),
}

/// The black-box renderer: parses, lays out and addresses the book.
///
/// Events are queued by the engine and drained by the shell with
/// [`RenderingEngine::take_events`] in emission order.
#[async_trait]
pub trait RenderingEngine: Send {
    async fn open(&mut self, path: &Path) -> Result<(), EngineError>;
    async fn metadata(&mut self) -> Result<BookMetadata, EngineError>;
    /// Lays out the book on the display surface, starting at `resume_from` when given.
    async fn render(&mut self, resume_from: Option<&LocationMarker>) -> Result<(), EngineError>;
    async fn toc(&mut self) -> Result<Vec<TocEntry>, EngineError>;

    fn goto(&mut self, target: &str) -> Result<(), EngineError>;
    fn next_page(&mut self) -> Result<(), EngineError>;
    fn prev_page(&mut self) -> Result<(), EngineError>;
    fn set_style(&mut self, property: &str, value: &str) -> Result<(), EngineError>;
    fn current_location(&self) -> Option<LocationMarker>;
    /// Text currently visible on the display surface.
    fn page_text(&self) -> Option<String>;
    fn take_events(&mut self) -> Vec<EngineEvent>;
    fn destroy(&mut self);
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, font_size: u32) -> Box<dyn RenderingEngine>;
}

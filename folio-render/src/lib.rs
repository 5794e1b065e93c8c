use std::path::{Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use folio_core::{
    BookMetadata, EngineError, EngineEvent, EngineFactory, LocationMarker, RenderingEngine,
    TocEntry,
};
use tracing::{debug, instrument, warn};

pub mod book;
pub mod search;

pub use book::{load_epub, Chapter, LoadedBook};
pub use search::EpubSearchService;

/// Resolution of the position part of a location token.
pub const POSITION_SCALE: usize = 10_000;

const BASE_FONT_SIZE: u32 = 18;
const BASE_COLUMNS: usize = 72;
const BASE_ROWS: usize = 30;

/// Character grid of the display surface for a given font size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub columns: usize,
    pub rows: usize,
}

impl Layout {
    pub fn for_font_size(font_size: u32) -> Self {
        let size = font_size.max(1) as usize;
        let base = BASE_FONT_SIZE as usize;
        Self {
            columns: (BASE_COLUMNS * base / size).clamp(20, 400),
            rows: (BASE_ROWS * base / size).clamp(5, 200),
        }
    }
}

/// A location token is `chapter/position`, where position is the page's
/// offset into the chapter scaled to `POSITION_SCALE`. It survives relayout.
pub fn format_location(chapter: usize, position: usize) -> LocationMarker {
    LocationMarker::new(format!("{chapter}/{position}"))
}

pub fn parse_location(token: &str) -> Option<(usize, usize)> {
    let (chapter, position) = token.split_once('/')?;
    let chapter = chapter.parse().ok()?;
    let position: usize = position.parse().ok()?;
    Some((chapter, position.min(POSITION_SCALE)))
}

fn position_of_page(page: usize, page_count: usize) -> usize {
    if page_count == 0 {
        return 0;
    }
    (page * POSITION_SCALE).div_ceil(page_count)
}

fn page_of_position(position: usize, page_count: usize) -> usize {
    if page_count == 0 {
        return 0;
    }
    (position * page_count / POSITION_SCALE).min(page_count - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    chapter: usize,
    page: usize,
}

/// Pages of one book laid out in the terminal's character grid.
pub struct EpubEngine {
    path: Option<PathBuf>,
    book: Option<LoadedBook>,
    font_size: u32,
    layout: Layout,
    pages: Vec<Vec<Vec<String>>>,
    cursor: Option<Cursor>,
    events: Vec<EngineEvent>,
}

impl EpubEngine {
    pub fn new(font_size: u32) -> Self {
        Self {
            path: None,
            book: None,
            font_size,
            layout: Layout::for_font_size(font_size),
            pages: Vec::new(),
            cursor: None,
            events: Vec::new(),
        }
    }

    /// Uses an already parsed book instead of reading one from disk.
    pub fn with_book(font_size: u32, book: LoadedBook) -> Self {
        let mut engine = Self::new(font_size);
        engine.book = Some(book);
        engine
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn book(&self) -> Result<&LoadedBook, EngineError> {
        self.book.as_ref().ok_or(EngineError::NotLoaded)
    }

    fn paginate(&mut self) -> Result<(), EngineError> {
        let layout = self.layout;
        let book = self.book()?;
        let pages = book
            .chapters
            .iter()
            .map(|chapter| {
                let lines = chapter.lines(layout.columns);
                let mut pages: Vec<Vec<String>> = lines
                    .chunks(layout.rows)
                    .map(|chunk| chunk.to_vec())
                    .collect();
                if pages.is_empty() {
                    pages.push(Vec::new());
                }
                pages
            })
            .collect();
        self.pages = pages;
        Ok(())
    }

    fn location_of(&self, cursor: Cursor) -> LocationMarker {
        let page_count = self.pages.get(cursor.chapter).map_or(0, Vec::len);
        format_location(cursor.chapter, position_of_page(cursor.page, page_count))
    }

    fn cursor_for_location(&self, chapter: usize, position: usize) -> Option<Cursor> {
        let page_count = self.pages.get(chapter)?.len();
        Some(Cursor {
            chapter,
            page: page_of_position(position, page_count),
        })
    }

    /// Resolves either a location token or a content href.
    fn resolve(&self, target: &str) -> Option<Cursor> {
        if let Some((chapter, position)) = parse_location(target) {
            return self.cursor_for_location(chapter, position);
        }
        let chapter = self.book.as_ref()?.chapter_for_href(target)?;
        Some(Cursor { chapter, page: 0 })
    }

    fn move_to(&mut self, cursor: Cursor) {
        if self.cursor == Some(cursor) {
            return;
        }
        self.cursor = Some(cursor);
        let location = self.location_of(cursor);
        debug!(%location, "location changed");
        self.events.push(EngineEvent::LocationChanged(location));
    }

    fn require_cursor(&self) -> Result<Cursor, EngineError> {
        self.cursor.ok_or(EngineError::NotLoaded)
    }
}

#[async_trait]
impl RenderingEngine for EpubEngine {
    #[instrument(skip(self))]
    async fn open(&mut self, path: &Path) -> Result<(), EngineError> {
        let owned = path.to_path_buf();
        let book = tokio::task::spawn_blocking(move || load_epub(&owned))
            .await
            .map_err(|err| anyhow!("EPUB loader task failed: {err}"))??;
        self.path = Some(path.to_path_buf());
        self.book = Some(book);
        Ok(())
    }

    async fn metadata(&mut self) -> Result<BookMetadata, EngineError> {
        Ok(self.book()?.metadata.clone())
    }

    async fn render(&mut self, resume_from: Option<&LocationMarker>) -> Result<(), EngineError> {
        self.paginate()?;
        if self.pages.is_empty() {
            return Err(anyhow!("book has no readable chapters").into());
        }
        let start = match resume_from {
            Some(marker) => match self.resolve(marker.as_str()) {
                Some(cursor) => cursor,
                None => {
                    warn!(%marker, "stored location does not resolve; starting at the beginning");
                    Cursor { chapter: 0, page: 0 }
                }
            },
            None => Cursor { chapter: 0, page: 0 },
        };
        self.move_to(start);
        Ok(())
    }

    async fn toc(&mut self) -> Result<Vec<TocEntry>, EngineError> {
        Ok(self.book()?.toc.clone())
    }

    fn goto(&mut self, target: &str) -> Result<(), EngineError> {
        let cursor = self
            .resolve(target)
            .ok_or_else(|| EngineError::UnknownLocation(target.to_string()))?;
        self.move_to(cursor);
        Ok(())
    }

    fn next_page(&mut self) -> Result<(), EngineError> {
        let cursor = self.require_cursor()?;
        let page_count = self.pages[cursor.chapter].len();
        let next = if cursor.page + 1 < page_count {
            Cursor {
                page: cursor.page + 1,
                ..cursor
            }
        } else if cursor.chapter + 1 < self.pages.len() {
            Cursor {
                chapter: cursor.chapter + 1,
                page: 0,
            }
        } else {
            cursor
        };
        self.move_to(next);
        Ok(())
    }

    fn prev_page(&mut self) -> Result<(), EngineError> {
        let cursor = self.require_cursor()?;
        let prev = if cursor.page > 0 {
            Cursor {
                page: cursor.page - 1,
                ..cursor
            }
        } else if cursor.chapter > 0 {
            let chapter = cursor.chapter - 1;
            Cursor {
                chapter,
                page: self.pages[chapter].len().saturating_sub(1),
            }
        } else {
            cursor
        };
        self.move_to(prev);
        Ok(())
    }

    fn set_style(&mut self, property: &str, value: &str) -> Result<(), EngineError> {
        if property != "font-size" {
            debug!(property, value, "ignoring unsupported style");
            return Ok(());
        }
        let size: u32 = value
            .trim_end_matches("px")
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid font size {value:?}"))?;
        self.font_size = size;
        self.layout = Layout::for_font_size(size);
        if self.book.is_none() || self.pages.is_empty() {
            return Ok(());
        }

        let anchor = self.cursor.map(|cursor| {
            let page_count = self.pages[cursor.chapter].len();
            (cursor.chapter, position_of_page(cursor.page, page_count))
        });
        self.paginate()?;
        if let Some((chapter, position)) = anchor {
            if let Some(cursor) = self.cursor_for_location(chapter, position) {
                self.move_to(cursor);
            }
        }
        Ok(())
    }

    fn current_location(&self) -> Option<LocationMarker> {
        self.cursor.map(|cursor| self.location_of(cursor))
    }

    fn page_text(&self) -> Option<String> {
        let cursor = self.cursor?;
        let lines = self.pages.get(cursor.chapter)?.get(cursor.page)?;
        Some(lines.join("\n"))
    }

    fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn destroy(&mut self) {
        debug!(path = ?self.path, "destroying engine");
        self.book = None;
        self.pages.clear();
        self.cursor = None;
        self.events.clear();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EpubEngineFactory;

impl EngineFactory for EpubEngineFactory {
    fn create(&self, font_size: u32) -> Box<dyn RenderingEngine> {
        Box::new(EpubEngine::new(font_size))
    }
}

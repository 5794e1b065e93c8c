//! Orchestration: owns the persistence cache, the live book session and the
//! timers, and reacts to host messages and engine events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cache::{DurableStorage, PersistedLibrary, PersistenceCache, RecentBook};
use crate::config::ReaderConfig;
use crate::engine::{EngineEvent, EngineFactory, RenderingEngine};
use crate::error::{LoadFailure, LoadStage, ReaderError};
use crate::history::NavigationHistory;
use crate::message::{HostMessage, ShellEvent};
use crate::search::{FindPanel, SearchRequest};
use crate::timer::{TimerKind, Timers};
use crate::{book_id_for_path, BookId, LocationMarker, TocEntry};

const MIN_FONT_SIZE: u32 = 2;

/// One open book: its engine, identity and navigation history.
pub struct Session {
    id: BookId,
    title: Option<String>,
    source_path: PathBuf,
    engine: Box<dyn RenderingEngine>,
    history: NavigationHistory,
    location: Option<LocationMarker>,
    toc: Vec<TocEntry>,
}

impl Session {
    pub fn id(&self) -> &BookId {
        &self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    pub fn history(&self) -> &NavigationHistory {
        &self.history
    }

    /// Last location reported by the engine.
    pub fn current_location(&self) -> Option<LocationMarker> {
        self.location
            .clone()
            .or_else(|| self.engine.current_location())
    }

    pub fn page_text(&self) -> Option<String> {
        self.engine.page_text()
    }

    fn destroy(mut self) {
        debug!(id = %self.id, "destroying session");
        self.engine.destroy();
    }
}

pub struct Reader {
    config: ReaderConfig,
    factory: Arc<dyn EngineFactory>,
    cache: PersistenceCache,
    session: Option<Session>,
    timers: Timers,
    find: FindPanel,
    toc_visible: bool,
    font_size: u32,
    initialized: bool,
    events: Mutex<Vec<ShellEvent>>,
}

impl Reader {
    pub fn new(
        config: ReaderConfig,
        factory: Arc<dyn EngineFactory>,
        storage: Arc<dyn DurableStorage>,
    ) -> Self {
        let font_size = config.default_font_size;
        Self {
            config,
            factory,
            cache: PersistenceCache::new(storage),
            session: None,
            timers: Timers::new(),
            find: FindPanel::default(),
            toc_visible: false,
            font_size,
            initialized: false,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn drain_events(&self) -> Vec<ShellEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn cache(&self) -> &PersistenceCache {
        &self.cache
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn find(&self) -> &FindPanel {
        &self.find
    }

    pub fn toc_visible(&self) -> bool {
        self.toc_visible
    }

    pub fn font_size(&self) -> u32 {
        self.font_size
    }

    pub fn recently_opened(&self) -> Vec<RecentBook> {
        self.cache.recently_opened()
    }

    /// Single entry point for host intents.
    pub async fn handle(&mut self, message: HostMessage) -> Result<(), ReaderError> {
        match message {
            HostMessage::LoadPersistedData(library) => {
                self.load_persisted(library);
                self.init();
            }
            HostMessage::InitWithoutData => self.init(),
            HostMessage::LoadBook(path) => self.load_book(path).await,
            HostMessage::OpenRecent(index) => {
                match self.cache.recently_opened().into_iter().nth(index) {
                    Some(book) => self.load_book(book.href).await,
                    None => debug!(index, "no recently opened book at index"),
                }
            }
            HostMessage::PrevPage => self.turn_page(false)?,
            HostMessage::NextPage => self.turn_page(true)?,
            HostMessage::IncreaseFont => {
                self.apply_font_size(self.font_size.saturating_add(self.config.font_step))?
            }
            HostMessage::DecreaseFont => self.apply_font_size(
                self.font_size
                    .saturating_sub(self.config.font_step)
                    .max(MIN_FONT_SIZE),
            )?,
            HostMessage::RestoreFont => self.apply_font_size(self.config.default_font_size)?,
            HostMessage::ToggleToc => {
                self.toc_visible = !self.toc_visible;
                self.emit(ShellEvent::Redraw);
            }
            HostMessage::Back => self.traverse(false)?,
            HostMessage::Forward => self.traverse(true)?,
            HostMessage::ToggleFind => {
                if self.find.is_visible() {
                    self.timers.cancel_kind(TimerKind::SearchDebounce);
                }
                self.find.toggle();
                self.emit(ShellEvent::Redraw);
            }
            HostMessage::FindInput(query) => self.find_input(query),
            HostMessage::SearchResults(results) => {
                debug!(count = results.len(), "search results received");
                self.find.finish(results);
                self.emit(ShellEvent::Redraw);
            }
            HostMessage::OpenTocEntry(href) => self.jump_to(&href)?,
            HostMessage::OpenSearchResult(index) => {
                let target = self
                    .find
                    .results()
                    .get(index)
                    .map(|result| result.location.clone());
                match target {
                    Some(location) => self.jump_to(location.as_str())?,
                    None => debug!(index, "no search result at index"),
                }
            }
        }
        self.process_engine_events()
    }

    /// Advances the virtual clock and runs whatever timers came due.
    pub fn tick(&mut self, now: Duration) -> Result<(), ReaderError> {
        for kind in self.timers.advance_to(now) {
            match kind {
                TimerKind::PersistFlush => {
                    debug!("periodic flush");
                    self.cache.flush();
                }
                TimerKind::SearchDebounce => self.dispatch_search(),
            }
        }
        self.process_engine_events()
    }

    /// Applies queued engine notifications in emission order.
    pub fn process_engine_events(&mut self) -> Result<(), ReaderError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let events = session.engine.take_events();
        if events.is_empty() {
            return Ok(());
        }
        for event in events {
            match event {
                EngineEvent::LocationChanged(location) => {
                    self.cache.record_location(&session.id, location.clone())?;
                    session.location = Some(location);
                    self.cache.flush();
                }
                EngineEvent::LinkClicked(href) => {
                    debug!(%href, "link clicked");
                    if let Some(current) = session.current_location() {
                        session.history.record_navigation(current);
                    }
                }
            }
        }
        self.emit(ShellEvent::Redraw);
        Ok(())
    }

    fn emit(&self, event: ShellEvent) {
        self.events.lock().push(event);
    }

    fn load_persisted(&mut self, library: PersistedLibrary) {
        info!(books = library.books.len(), "loaded persisted library");
        self.cache.replace(library);
    }

    fn init(&mut self) {
        self.initialized = true;
        self.emit(ShellEvent::Redraw);
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn load_book(&mut self, path: PathBuf) {
        self.teardown_session();

        let mut engine = self.factory.create(self.font_size);
        match self.open_book(engine.as_mut(), &path).await {
            Ok((id, title, toc)) => {
                info!(%id, "book loaded");
                self.session = Some(Session {
                    id,
                    title,
                    source_path: path,
                    engine,
                    history: NavigationHistory::with_limit(self.config.history_limit),
                    location: None,
                    toc,
                });
                self.find.set_enabled(true);
                self.emit(ShellEvent::Redraw);
            }
            Err(failure) => {
                warn!(error = %failure, "failed to load book");
                self.emit(ShellEvent::Notice(format!("Something went wrong!\n{failure}")));
                engine.destroy();
                self.emit(ShellEvent::TitleCleared);
                self.timers.cancel_kind(TimerKind::PersistFlush);
                self.init();
            }
        }
    }

    /// open → metadata → render → toc, each step awaiting the previous one.
    async fn open_book(
        &mut self,
        engine: &mut dyn RenderingEngine,
        path: &Path,
    ) -> Result<(BookId, Option<String>, Vec<TocEntry>), LoadFailure> {
        engine
            .open(path)
            .await
            .map_err(LoadFailure::at(LoadStage::Open))?;
        let metadata = engine
            .metadata()
            .await
            .map_err(LoadFailure::at(LoadStage::Metadata))?;

        let title = metadata.display_title();
        match &title {
            Some(title) => self.emit(ShellEvent::TitleChanged(title.clone())),
            None => self.emit(ShellEvent::TitleCleared),
        }

        let id = metadata
            .identifier
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(BookId::new)
            .unwrap_or_else(|| book_id_for_path(path));
        let book_title = metadata.title.clone().unwrap_or_default();
        self.cache.open_session(id.clone(), &book_title, path);
        let resume = self.cache.restore_location(&id);
        if let Some(resume) = &resume {
            debug!(%resume, "resuming at persisted location");
        }

        engine
            .render(resume.as_ref())
            .await
            .map_err(LoadFailure::at(LoadStage::Render))?;

        self.cache.flush();
        self.timers.cancel_kind(TimerKind::PersistFlush);
        self.timers
            .schedule_repeating(TimerKind::PersistFlush, self.config.flush_interval);

        let toc = engine
            .toc()
            .await
            .map_err(LoadFailure::at(LoadStage::TableOfContents))?;
        Ok((id, title, toc))
    }

    fn teardown_session(&mut self) {
        self.timers.cancel_kind(TimerKind::SearchDebounce);
        self.find.reset();
        if let Some(session) = self.session.take() {
            session.destroy();
        }
    }

    fn turn_page(&mut self, forward: bool) -> Result<(), ReaderError> {
        let Some(session) = self.session.as_mut() else {
            debug!("page turn ignored: no book loaded");
            return Ok(());
        };
        if let Some(current) = session.current_location() {
            session.history.record_navigation(current);
        }
        if forward {
            session.engine.next_page()?;
        } else {
            session.engine.prev_page()?;
        }
        Ok(())
    }

    fn traverse(&mut self, forward: bool) -> Result<(), ReaderError> {
        let Some(session) = self.session.as_mut() else {
            debug!("history traversal ignored: no book loaded");
            return Ok(());
        };
        let Some(current) = session.current_location() else {
            return Ok(());
        };
        let target = if forward {
            session.history.go_forward(current)
        } else {
            session.history.go_back(current)
        };
        if let Some(target) = target {
            session.engine.goto(target.as_str())?;
        }
        Ok(())
    }

    /// Manual jump to a toc entry or search hit.
    fn jump_to(&mut self, target: &str) -> Result<(), ReaderError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if let Some(current) = session.current_location() {
            session.history.record_navigation(current);
        }
        session.engine.goto(target)?;
        Ok(())
    }

    fn apply_font_size(&mut self, size: u32) -> Result<(), ReaderError> {
        let Some(session) = self.session.as_mut() else {
            debug!("font change ignored: no book loaded");
            return Ok(());
        };
        self.font_size = size;
        session
            .engine
            .set_style("font-size", &format!("{size}px"))?;
        self.emit(ShellEvent::Redraw);
        Ok(())
    }

    fn find_input(&mut self, query: String) {
        if !self.find.is_enabled() {
            debug!("find input ignored: no book loaded");
            return;
        }
        self.find.edit(query);
        self.timers.cancel_kind(TimerKind::SearchDebounce);
        self.timers
            .schedule_once(TimerKind::SearchDebounce, self.config.search_debounce);
        self.emit(ShellEvent::Redraw);
    }

    fn dispatch_search(&mut self) {
        let query = self.find.query().to_string();
        if query.is_empty() {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let request = SearchRequest {
            path: session.source_path.clone(),
            query,
        };
        self.find.begin_request();
        self.emit(ShellEvent::SearchRequest(request));
        self.emit(ShellEvent::Redraw);
    }
}

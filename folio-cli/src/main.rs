use std::fs;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType, SetTitle};
use directories::ProjectDirs;
use folio_core::{
    flatten_toc, BackgroundStorage, DurableStorage, FileLibraryStore, HostMessage, Reader,
    ReaderConfig, SearchRequest, SearchResult, SearchService, ShellEvent,
};
use folio_render::{EpubEngineFactory, EpubSearchService};
use folio_tty::{
    write_status_line, DrawParams, EventMapper, InputMode, SelectionList, TextSurface, UiEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "terminal EPUB reader that remembers where you left off"
)]
struct Args {
    /// Configuration file (defaults to config.toml in the platform config dir)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// EPUB file to open right away
    book: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

type SearchOutcome = (SearchRequest, Result<Vec<SearchResult>>);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ReaderConfig::load(&config_path)?;

    let store = FileLibraryStore::new(project_dirs.data_local_dir().join("state"))?;
    let library = match store.load() {
        Ok(library) => library,
        Err(err) => {
            warn!(?err, "ignoring unreadable library file");
            store.quarantine()?;
            None
        }
    };
    let storage = Arc::new(BackgroundStorage::spawn(store));
    let durable: Arc<dyn DurableStorage> = storage.clone();
    let mut reader = Reader::new(config, Arc::new(EpubEngineFactory), durable);

    let startup = match library {
        Some(library) => HostMessage::LoadPersistedData(library),
        None => HostMessage::InitWithoutData,
    };
    reader.handle(startup).await?;

    let mut app = App::default();
    if let Some(book) = args.book {
        dispatch(&mut reader, &mut app, HostMessage::LoadBook(book)).await;
    }

    let search_service = Arc::new(EpubSearchService::new());
    let (results_tx, mut results_rx) = mpsc::unbounded_channel::<SearchOutcome>();

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut surface = TextSurface::new(stdout);
    let mut mapper = EventMapper::new();
    let clock = Instant::now();
    let mut dirty = true;

    loop {
        sync_overlay(&reader, &mut app, &mut mapper);

        if dirty {
            redraw(&mut surface, &reader, &mut app, mapper.pending_input().as_deref())?;
            dirty = false;
        }

        while let Ok((request, outcome)) = results_rx.try_recv() {
            let find = reader.find();
            if !find.is_visible() || find.query() != request.query {
                debug!(query = %request.query, "dropping stale search results");
                continue;
            }
            match outcome {
                Ok(results) => {
                    dispatch(&mut reader, &mut app, HostMessage::SearchResults(results)).await
                }
                Err(err) => {
                    warn!(?err, query = %request.query, "search failed");
                    app.status = Some(format!("search failed: {err}"));
                    dirty = true;
                }
            }
        }

        if event::poll(Duration::from_millis(100))? {
            let ui_event = mapper.map_event(event::read()?);
            if ui_event != UiEvent::None {
                app.status = None;
            }
            match handle_event(ui_event, &mut reader, &mut app, &mut mapper).await {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
            if mapper.pending_input().is_some() {
                dirty = true;
            }
        }

        if let Err(err) = reader.tick(clock.elapsed()) {
            warn!(?err, "timer callback failed");
        }

        for shell_event in reader.drain_events() {
            match shell_event {
                ShellEvent::SearchRequest(request) => {
                    spawn_search(Arc::clone(&search_service), request, results_tx.clone());
                }
                ShellEvent::Notice(message) => {
                    app.status = Some(message.replace('\n', " "));
                    dirty = true;
                }
                ShellEvent::TitleChanged(title) => {
                    crossterm::execute!(surface.writer(), SetTitle(&title))?;
                    app.title = Some(title);
                    dirty = true;
                }
                ShellEvent::TitleCleared => {
                    crossterm::execute!(surface.writer(), SetTitle("folio"))?;
                    app.title = None;
                    dirty = true;
                }
                ShellEvent::Redraw => dirty = true,
            }
        }
    }

    crossterm::execute!(
        surface.writer(),
        Clear(ClearType::All),
        cursor::MoveTo(0, 0)
    )?;

    reader.cache().flush();
    drop(reader);
    match Arc::try_unwrap(storage) {
        Ok(storage) => storage.shutdown().await,
        Err(_) => warn!("library writer still shared at exit; skipping drain"),
    }
    info!("exiting");
    Ok(())
}

fn spawn_search(
    service: Arc<EpubSearchService>,
    request: SearchRequest,
    results: mpsc::UnboundedSender<SearchOutcome>,
) {
    tokio::spawn(async move {
        let outcome = service.search(&request.path, &request.query).await;
        if results.send((request, outcome)).is_err() {
            debug!("search finished after shutdown");
        }
    });
}

/// Hands a message to the reader, surfacing failures on the status line
/// instead of tearing down the terminal.
async fn dispatch(reader: &mut Reader, app: &mut App, message: HostMessage) {
    if let Err(err) = reader.handle(message).await {
        warn!(?err, "reader rejected message");
        app.status = Some(err.to_string());
    }
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Overlay {
    #[default]
    None,
    Toc,
    Results,
    Library,
}

#[derive(Default)]
struct App {
    overlay: Overlay,
    list: SelectionList,
    status: Option<String>,
    title: Option<String>,
}

impl App {
    fn open(&mut self, overlay: Overlay) {
        self.overlay = overlay;
        self.list = SelectionList::default();
    }

    fn close(&mut self) {
        self.open(Overlay::None);
    }
}

/// Keeps the overlay in step with panels the reader may have closed.
fn sync_overlay(reader: &Reader, app: &mut App, mapper: &mut EventMapper) {
    let stale = match app.overlay {
        Overlay::Toc => !reader.toc_visible() || reader.session().is_none(),
        Overlay::Results => !reader.find().is_visible(),
        Overlay::Library | Overlay::None => false,
    };
    if stale {
        app.close();
    }
    if reader.toc_visible() && app.overlay == Overlay::None && reader.session().is_some() {
        app.open(Overlay::Toc);
    }
    match (app.overlay, mapper.mode()) {
        (Overlay::None, InputMode::List) => mapper.set_mode(InputMode::Normal),
        (Overlay::None, InputMode::Find) if !reader.find().is_visible() => {
            mapper.clear_find();
            mapper.set_mode(InputMode::Normal);
        }
        (Overlay::None, _) => {}
        (_, InputMode::List) => {}
        (_, _) => mapper.set_mode(InputMode::List),
    }
}

async fn handle_event(
    event: UiEvent,
    reader: &mut Reader,
    app: &mut App,
    mapper: &mut EventMapper,
) -> LoopAction {
    match event {
        UiEvent::Host { message, repeat } => {
            for _ in 0..repeat.max(1) {
                dispatch(reader, app, message.clone()).await;
            }
            LoopAction::ContinueRedraw
        }
        UiEvent::BrowseResults => {
            app.open(Overlay::Results);
            LoopAction::ContinueRedraw
        }
        UiEvent::OpenLibrary => {
            app.open(Overlay::Library);
            mapper.set_mode(InputMode::List);
            LoopAction::ContinueRedraw
        }
        UiEvent::MoveSelection { delta } => {
            if app.list.move_selection(delta) {
                LoopAction::ContinueRedraw
            } else {
                LoopAction::Continue
            }
        }
        UiEvent::ActivateSelection => {
            let index = app.list.selected();
            let overlay = app.overlay;
            app.close();
            mapper.set_mode(InputMode::Normal);
            match overlay {
                Overlay::Toc => {
                    let href = reader.session().and_then(|session| {
                        flatten_toc(session.toc())
                            .get(index)
                            .map(|(_, entry)| entry.href.clone())
                    });
                    dispatch(reader, app, HostMessage::ToggleToc).await;
                    if let Some(href) = href {
                        dispatch(reader, app, HostMessage::OpenTocEntry(href)).await;
                    }
                }
                Overlay::Results => {
                    dispatch(reader, app, HostMessage::OpenSearchResult(index)).await;
                    mapper.clear_find();
                    dispatch(reader, app, HostMessage::ToggleFind).await;
                }
                Overlay::Library => {
                    dispatch(reader, app, HostMessage::OpenRecent(index)).await;
                }
                Overlay::None => {}
            }
            LoopAction::ContinueRedraw
        }
        UiEvent::CloseOverlay => {
            match app.overlay {
                Overlay::Toc => dispatch(reader, app, HostMessage::ToggleToc).await,
                Overlay::Results => {
                    mapper.clear_find();
                    dispatch(reader, app, HostMessage::ToggleFind).await;
                }
                Overlay::Library | Overlay::None => {}
            }
            app.close();
            mapper.set_mode(InputMode::Normal);
            LoopAction::ContinueRedraw
        }
        UiEvent::Quit => LoopAction::Quit,
        UiEvent::None => LoopAction::Continue,
    }
}

fn overlay_items(reader: &Reader, overlay: Overlay) -> (String, Vec<String>) {
    match overlay {
        Overlay::Toc => {
            let items = reader
                .session()
                .map(|session| {
                    flatten_toc(session.toc())
                        .into_iter()
                        .map(|(depth, entry)| format!("{}{}", "  ".repeat(depth.min(8)), entry.label))
                        .collect()
                })
                .unwrap_or_default();
            ("Table of Contents".to_string(), items)
        }
        Overlay::Results => {
            let find = reader.find();
            let title = if find.is_loading() {
                format!("Searching for \"{}\"...", find.query())
            } else {
                format!("{} results for \"{}\"", find.results().len(), find.query())
            };
            let items = find.results().iter().map(|r| r.excerpt.clone()).collect();
            (title, items)
        }
        Overlay::Library => {
            let items = reader
                .recently_opened()
                .into_iter()
                .map(|book| book.title)
                .collect();
            ("Recently opened".to_string(), items)
        }
        Overlay::None => (String::new(), Vec::new()),
    }
}

fn redraw(
    surface: &mut TextSurface<Stdout>,
    reader: &Reader,
    app: &mut App,
    pending_input: Option<&str>,
) -> Result<()> {
    let (columns, rows) = terminal::size()?;
    let params = DrawParams::clamped(columns, rows.saturating_sub(1));

    surface.begin_sync_update()?;
    surface.clear_all()?;
    match (app.overlay, reader.session()) {
        (Overlay::None, Some(session)) => {
            let text = session.page_text().unwrap_or_default();
            surface.draw_page(&text, params)?;
        }
        (Overlay::None, None) => {
            let recent = reader.recently_opened();
            let mut lines = vec!["No book open. Press o to pick a recent book, q to quit.".to_string()];
            lines.extend(recent.iter().take(params.rows as usize).map(|b| format!("  {}", b.title)));
            surface.draw_page(&lines.join("\n"), params)?;
        }
        (overlay, _) => {
            let (title, items) = overlay_items(reader, overlay);
            app.list.set_len(items.len());
            surface.draw_list(&title, &items, &mut app.list, params)?;
        }
    }
    if let Some(status) = combine_status(document_status(reader, app), pending_input) {
        draw_status_line(surface, rows, &status)?;
    }
    surface.end_sync_update()?;
    Ok(())
}

fn document_status(reader: &Reader, app: &App) -> Option<String> {
    if let Some(status) = &app.status {
        return Some(status.clone());
    }
    let session = reader.session()?;
    let title = app
        .title
        .clone()
        .or_else(|| session.title().map(str::to_string))
        .unwrap_or_else(|| session.source_path().display().to_string());
    let location = session
        .current_location()
        .map(|location| location.to_string())
        .unwrap_or_else(|| "-".to_string());
    Some(format!("{title} | {location} | {}px", reader.font_size()))
}

fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

fn draw_status_line(surface: &mut TextSurface<Stdout>, rows: u16, status: &str) -> Result<()> {
    let status_row = rows.max(1) - 1;
    let writer = surface.writer();
    crossterm::execute!(
        writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(writer, status)?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    // stdout belongs to the reader view once raw mode is on
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_joins_pending_input() {
        assert_eq!(
            combine_status(Some("Moby Dick".into()), Some("12")).as_deref(),
            Some("Moby Dick | 12")
        );
        assert_eq!(
            combine_status(None, Some("/whale")).as_deref(),
            Some("/whale")
        );
        assert_eq!(combine_status(Some("book".into()), Some("")).as_deref(), Some("book"));
        assert!(combine_status(None, None).is_none());
    }

    #[test]
    fn args_accept_optional_book_and_config() {
        let args = Args::parse_from(["folio", "-c", "/tmp/folio.toml", "moby.epub"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/folio.toml")));
        assert_eq!(args.book, Some(PathBuf::from("moby.epub")));

        let args = Args::parse_from(["folio"]);
        assert!(args.book.is_none());
    }
}

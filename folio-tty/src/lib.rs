use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
};
use folio_core::HostMessage;
use tracing::debug;

/// Writes reader output into a terminal-like sink.
pub struct TextSurface<W: Write> {
    writer: W,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawParams {
    pub columns: u16,
    pub rows: u16,
}

impl DrawParams {
    pub fn clamped(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> TextSurface<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Draws page text starting at the top-left corner, clipped to `params`.
    pub fn draw_page(&mut self, text: &str, params: DrawParams) -> Result<()> {
        for (row, line) in text.lines().take(params.rows as usize).enumerate() {
            crossterm::queue!(
                self.writer,
                cursor::MoveTo(0, row as u16),
                Print(clip(line, params.columns as usize))
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Draws a titled list with the selected row inverted.
    pub fn draw_list(
        &mut self,
        title: &str,
        items: &[String],
        list: &mut SelectionList,
        params: DrawParams,
    ) -> Result<()> {
        let viewport = params.rows.saturating_sub(1) as usize;
        list.ensure_visible(viewport);
        let width = params.columns as usize;

        crossterm::queue!(
            self.writer,
            cursor::MoveTo(0, 0),
            SetAttribute(Attribute::Bold),
            Print(clip(title, width)),
            SetAttribute(Attribute::Reset)
        )?;
        for (row, (index, item)) in items
            .iter()
            .enumerate()
            .skip(list.scroll_offset())
            .take(viewport)
            .enumerate()
        {
            let line = clip(item, width);
            let y = row as u16 + 1;
            if index == list.selected() {
                crossterm::queue!(
                    self.writer,
                    cursor::MoveTo(0, y),
                    SetAttribute(Attribute::Reverse),
                    Print(line),
                    SetAttribute(Attribute::Reset)
                )?;
            } else {
                crossterm::queue!(self.writer, cursor::MoveTo(0, y), Print(line))?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

fn clip(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Cursor and scroll position over a list of rows.
#[derive(Debug, Clone, Default)]
pub struct SelectionList {
    len: usize,
    selected: usize,
    scroll_offset: usize,
}

impl SelectionList {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            selected: 0,
            scroll_offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Resizes the list, keeping the selection in range.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    pub fn move_selection(&mut self, delta: isize) -> bool {
        if self.len == 0 {
            return false;
        }
        let last = self.len as isize - 1;
        let next = (self.selected as isize + delta).clamp(0, last) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    pub fn ensure_visible(&mut self, viewport_height: usize) {
        if viewport_height == 0 || self.len == 0 {
            self.scroll_offset = 0;
            return;
        }
        let max_offset = self.len.saturating_sub(viewport_height);
        if self.scroll_offset > max_offset {
            self.scroll_offset = max_offset;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
            return;
        }
        let bottom = self.scroll_offset + viewport_height;
        if self.selected >= bottom {
            self.scroll_offset = self.selected + 1 - viewport_height;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A reader message, sent `repeat` times.
    Host { message: HostMessage, repeat: usize },
    MoveSelection { delta: isize },
    ActivateSelection,
    /// Leave find input and browse the results.
    BrowseResults,
    OpenLibrary,
    CloseOverlay,
    Quit,
    None,
}

impl UiEvent {
    fn host(message: HostMessage) -> Self {
        UiEvent::Host { message, repeat: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    /// Selecting from the table of contents, search results or library.
    List,
    Find,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    find_buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            debug!(from = ?self.mode, to = ?mode, "input mode changed");
            self.reset_count();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Forgets the find text, as when the find box is closed.
    pub fn clear_find(&mut self) {
        self.find_buffer.clear();
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::List => self.map_event_list(event),
            InputMode::Find => self.map_event_find(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() && c != '0' => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('0'), KeyModifiers::NONE) if self.pending_count.is_some() => {
                self.push_digit(0);
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Char(' '), KeyModifiers::NONE)
            | (KeyCode::Right, KeyModifiers::NONE)
            | (KeyCode::PageDown, _) => {
                let repeat = self.take_count();
                UiEvent::Host {
                    message: HostMessage::NextPage,
                    repeat,
                }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Left, KeyModifiers::NONE)
            | (KeyCode::PageUp, _) => {
                let repeat = self.take_count();
                UiEvent::Host {
                    message: HostMessage::PrevPage,
                    repeat,
                }
            }
            (KeyCode::Char('o'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                UiEvent::host(HostMessage::Back)
            }
            (KeyCode::Char('i'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                UiEvent::host(HostMessage::Forward)
            }
            (KeyCode::Tab, modifiers)
                if modifiers.is_empty() || modifiers.contains(KeyModifiers::CONTROL) =>
            {
                self.reset_count();
                UiEvent::host(HostMessage::Forward)
            }
            (KeyCode::Char('H'), _) => {
                self.reset_count();
                UiEvent::host(HostMessage::Back)
            }
            (KeyCode::Char('L'), _) => {
                self.reset_count();
                UiEvent::host(HostMessage::Forward)
            }
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                UiEvent::host(HostMessage::IncreaseFont)
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::host(HostMessage::DecreaseFont)
            }
            (KeyCode::Char('='), _) | (KeyCode::Char('0'), _) => {
                self.reset_count();
                UiEvent::host(HostMessage::RestoreFont)
            }
            (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => {
                self.reset_count();
                UiEvent::host(HostMessage::ToggleToc)
            }
            (KeyCode::Char('/'), KeyModifiers::NONE) | (KeyCode::Char('f'), KeyModifiers::CONTROL) => {
                self.reset_count();
                self.find_buffer.clear();
                self.set_mode(InputMode::Find);
                UiEvent::host(HostMessage::ToggleFind)
            }
            (KeyCode::Char('o'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::OpenLibrary
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_event_list(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };
        match (code, modifiers) {
            (KeyCode::Esc, _) => UiEvent::CloseOverlay,
            (KeyCode::Enter, _) => UiEvent::ActivateSelection,
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                UiEvent::MoveSelection { delta: 1 }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                UiEvent::MoveSelection { delta: -1 }
            }
            (KeyCode::Char('q'), _) => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn map_event_find(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };
        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.find_buffer.clear();
                self.set_mode(InputMode::Normal);
                UiEvent::host(HostMessage::ToggleFind)
            }
            (KeyCode::Enter, _) | (KeyCode::Down, _) => {
                self.set_mode(InputMode::List);
                UiEvent::BrowseResults
            }
            (KeyCode::Backspace, _) => {
                self.find_buffer.pop();
                UiEvent::host(HostMessage::FindInput(self.find_buffer.clone()))
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.find_buffer.push(c);
                UiEvent::host(HostMessage::FindInput(self.find_buffer.clone()))
            }
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if matches!(self.mode, InputMode::Find) {
            return Some(format!("/{}", self.find_buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn host(message: HostMessage, repeat: usize) -> UiEvent {
        UiEvent::Host { message, repeat }
    }

    #[test]
    fn numeric_prefix_repeats_page_turns() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('0'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("10"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            host(HostMessage::NextPage, 10)
        );
        assert!(mapper.pending_input().is_none());
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('k'))),
            host(HostMessage::PrevPage, 1)
        );
    }

    #[test]
    fn bare_zero_restores_font() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('0'))),
            host(HostMessage::RestoreFont, 1)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('+'))),
            host(HostMessage::IncreaseFont, 1)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('-'))),
            host(HostMessage::DecreaseFont, 1)
        );
    }

    #[test]
    fn history_keys_map_to_back_and_forward() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('o'),
                KeyModifiers::CONTROL
            )),
            host(HostMessage::Back, 1)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Tab)),
            host(HostMessage::Forward, 1)
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('H'),
                KeyModifiers::SHIFT
            )),
            host(HostMessage::Back, 1)
        );
    }

    #[test]
    fn slash_opens_find_and_collects_input() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('/'))),
            host(HostMessage::ToggleFind, 1)
        );
        assert_eq!(mapper.mode(), InputMode::Find);
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('w'))),
            host(HostMessage::FindInput("w".into()), 1)
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(
                KeyCode::Char('H'),
                KeyModifiers::SHIFT
            )),
            host(HostMessage::FindInput("wH".into()), 1)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Backspace)),
            host(HostMessage::FindInput("w".into()), 1)
        );
        assert_eq!(mapper.pending_input().as_deref(), Some("/w"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::BrowseResults
        );
        assert_eq!(mapper.mode(), InputMode::List);
    }

    #[test]
    fn escape_in_find_closes_panel() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('/')));
        mapper.map_event(key_event(KeyCode::Char('x')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Esc)),
            host(HostMessage::ToggleFind, 1)
        );
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn list_mode_maps_navigation_keys() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::List);

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::MoveSelection { delta: 1 }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Up)),
            UiEvent::MoveSelection { delta: -1 }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::ActivateSelection
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Esc)),
            UiEvent::CloseOverlay
        );
    }

    #[test]
    fn switching_modes_clears_pending_count() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        mapper.set_mode(InputMode::List);
        mapper.set_mode(InputMode::Normal);
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            host(HostMessage::NextPage, 1)
        );
    }

    #[test]
    fn selection_list_scrolls_with_cursor() {
        let mut list = SelectionList::new(10);
        assert!(!list.move_selection(-1));
        for _ in 0..6 {
            list.move_selection(1);
        }
        list.ensure_visible(4);
        assert_eq!(list.selected(), 6);
        assert_eq!(list.scroll_offset(), 3);

        assert!(list.move_selection(100));
        assert_eq!(list.selected(), 9);
        list.set_len(3);
        assert_eq!(list.selected(), 2);
        list.ensure_visible(4);
        assert_eq!(list.scroll_offset(), 0);
    }

    #[test]
    fn draw_page_clips_to_grid() {
        let mut surface = TextSurface::new(Vec::new());
        surface
            .draw_page("first line is long\nsecond\nthird", DrawParams::clamped(5, 2))
            .unwrap();
        let output = String::from_utf8(surface.into_inner()).unwrap();
        assert!(output.contains("first"));
        assert!(!output.contains("first "));
        assert!(output.contains("secon"));
        assert!(!output.contains("third"));
    }

    #[test]
    fn draw_list_renders_visible_rows() {
        let mut surface = TextSurface::new(Vec::new());
        let items: Vec<String> = (0..5).map(|i| format!("item {i}")).collect();
        let mut list = SelectionList::new(items.len());
        list.move_selection(4);
        surface
            .draw_list("Contents", &items, &mut list, DrawParams::clamped(40, 3))
            .unwrap();
        let output = String::from_utf8(surface.into_inner()).unwrap();
        assert!(output.contains("Contents"));
        assert!(output.contains("item 4"));
        assert!(output.contains("item 3"));
        assert!(!output.contains("item 0"));
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use folio_core::{SearchResult, SearchService};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::book::load_epub;
use crate::{format_location, POSITION_SCALE};

const EXCERPT_RADIUS: usize = 40;
const MAX_RESULTS: usize = 200;

type ChapterTexts = Arc<Vec<String>>;

/// Chapter text of the most recently searched book.
type TextCache = Mutex<Option<(PathBuf, ChapterTexts)>>;

/// Case-insensitive full-text search over a book's chapters.
#[derive(Default)]
pub struct EpubSearchService {
    texts: Arc<TextCache>,
}

impl EpubSearchService {
    pub fn new() -> Self {
        Self::default()
    }
}

fn chapter_texts<F>(cache: &TextCache, path: &Path, load: F) -> Result<ChapterTexts>
where
    F: FnOnce(&Path) -> Result<Vec<String>>,
{
    if let Some((cached, texts)) = cache.lock().as_ref() {
        if cached.as_path() == path {
            return Ok(Arc::clone(texts));
        }
    }
    let texts = Arc::new(load(path)?);
    *cache.lock() = Some((path.to_path_buf(), Arc::clone(&texts)));
    Ok(texts)
}

fn load_chapter_texts(path: &Path) -> Result<Vec<String>> {
    let book = load_epub(path)?;
    Ok(book
        .chapters
        .par_iter()
        .map(|chapter| chapter.plain_text())
        .collect())
}

#[async_trait]
impl SearchService for EpubSearchService {
    #[instrument(skip(self))]
    async fn search(&self, path: &Path, query: &str) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let cache = Arc::clone(&self.texts);
        let path = path.to_path_buf();
        let query = query.to_string();
        let results = tokio::task::spawn_blocking(move || {
            let texts = chapter_texts(&cache, &path, load_chapter_texts)?;
            Ok::<_, anyhow::Error>(search_chapters(&texts, &query))
        })
        .await
        .map_err(|err| anyhow!("search task failed: {err}"))??;
        debug!(count = results.len(), "search finished");
        Ok(results)
    }
}

/// Finds every occurrence of `query` in document order.
pub fn search_chapters(chapters: &[String], query: &str) -> Vec<SearchResult> {
    let needle: Vec<char> = query.to_lowercase().chars().collect();
    if needle.is_empty() {
        return Vec::new();
    }
    let mut results: Vec<SearchResult> = chapters
        .par_iter()
        .enumerate()
        .flat_map_iter(|(index, text)| search_chapter(index, text, &needle))
        .collect();
    results.truncate(MAX_RESULTS);
    results
}

fn search_chapter(index: usize, text: &str, needle: &[char]) -> Vec<SearchResult> {
    // lowercased chars paired with the byte range of the source char they came from
    let folded: Vec<(char, usize, usize)> = text
        .char_indices()
        .flat_map(|(offset, ch)| {
            let end = offset + ch.len_utf8();
            ch.to_lowercase().map(move |lower| (lower, offset, end))
        })
        .collect();
    let total = text.len().max(1);

    let mut results = Vec::new();
    let mut i = 0;
    while i + needle.len() <= folded.len() {
        let window = &folded[i..i + needle.len()];
        if window.iter().map(|(lower, _, _)| lower).eq(needle.iter()) {
            let start = window[0].1;
            let end = window[needle.len() - 1].2;
            results.push(SearchResult {
                excerpt: excerpt(text, start, end - start),
                location: format_location(index, start * POSITION_SCALE / total),
            });
            i += needle.len();
        } else {
            i += 1;
        }
    }
    results
}

fn excerpt(text: &str, offset: usize, len: usize) -> String {
    let mut start = offset.saturating_sub(EXCERPT_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + len + EXCERPT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    let snippet = text[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < text.len() { "..." } else { "" };
    format!("{prefix}{snippet}{suffix}")
}

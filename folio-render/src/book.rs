//! Reading an EPUB container into chapters of markup plus its navigation tree.

use std::path::Path;

use anyhow::{Context, Result};
use epub::doc::{EpubDoc, NavPoint};
use folio_core::{BookMetadata, TocEntry};
use tracing::{debug, info, warn};

/// Width used when text is extracted for searching; wide enough that no
/// hard line breaks are introduced.
pub const UNWRAPPED_WIDTH: usize = 10_000;

#[derive(Debug, Clone)]
pub struct Chapter {
    /// Resource path inside the container, as referenced by the toc.
    pub href: String,
    pub markup: String,
}

impl Chapter {
    /// Plain text of the chapter wrapped at `width` columns.
    pub fn lines(&self, width: usize) -> Vec<String> {
        let text = html_to_text(&self.markup, width);
        text.lines().map(|line| line.trim_end().to_string()).collect()
    }

    pub fn plain_text(&self) -> String {
        html_to_text(&self.markup, UNWRAPPED_WIDTH)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedBook {
    pub metadata: BookMetadata,
    pub chapters: Vec<Chapter>,
    pub toc: Vec<TocEntry>,
}

impl LoadedBook {
    /// Finds the chapter an href points at, ignoring any `#fragment`.
    /// Partial paths match on whole path components only.
    pub fn chapter_for_href(&self, href: &str) -> Option<usize> {
        let resource = href.split('#').next().unwrap_or(href);
        if resource.is_empty() {
            return None;
        }
        let candidates = || {
            self.chapters
                .iter()
                .enumerate()
                .filter(|(_, chapter)| !chapter.href.is_empty())
        };
        candidates()
            .find(|(_, chapter)| chapter.href == resource)
            .or_else(|| {
                let wanted = Path::new(resource);
                candidates().find(|(_, chapter)| {
                    let have = Path::new(&chapter.href);
                    have.ends_with(wanted) || wanted.ends_with(have)
                })
            })
            .map(|(index, _)| index)
    }
}

pub fn load_epub(path: &Path) -> Result<LoadedBook> {
    info!(path = %path.display(), "loading EPUB");
    let mut doc =
        EpubDoc::new(path).with_context(|| format!("failed to open EPUB at {}", path.display()))?;

    let metadata = BookMetadata {
        identifier: doc.unique_identifier.clone(),
        title: doc.mdata("title"),
        creator: doc.mdata("creator"),
    };
    let toc = doc.toc.iter().map(toc_entry_from_nav).collect();

    let mut chapters = Vec::new();
    loop {
        let href = doc
            .get_current_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        match doc.get_current_str() {
            Some((markup, _mime)) => {
                debug!(chapter = chapters.len(), %href, bytes = markup.len(), "read chapter");
                chapters.push(Chapter { href, markup });
            }
            None => warn!(%href, "spine item has no readable content"),
        }
        if !doc.go_next() {
            break;
        }
    }

    info!(chapters = chapters.len(), "finished loading EPUB");
    Ok(LoadedBook {
        metadata,
        chapters,
        toc,
    })
}

fn toc_entry_from_nav(point: &NavPoint) -> TocEntry {
    TocEntry {
        label: point.label.trim().to_string(),
        href: point.content.to_string_lossy().into_owned(),
        subitems: point.children.iter().map(toc_entry_from_nav).collect(),
    }
}

pub fn html_to_text(markup: &str, width: usize) -> String {
    match html2text::from_read(markup.as_bytes(), width.max(1)) {
        Ok(text) => text,
        Err(err) => {
            warn!("html2text failed: {err}");
            markup.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(href: &str) -> Chapter {
        Chapter {
            href: href.to_string(),
            markup: String::new(),
        }
    }

    #[test]
    fn href_lookup_ignores_fragments_and_prefixes() {
        let book = LoadedBook {
            chapters: vec![chapter("OEBPS/Text/ch1.xhtml"), chapter("OEBPS/Text/ch2.xhtml")],
            ..LoadedBook::default()
        };
        assert_eq!(book.chapter_for_href("OEBPS/Text/ch2.xhtml"), Some(1));
        assert_eq!(book.chapter_for_href("Text/ch1.xhtml#sec3"), Some(0));
        assert_eq!(book.chapter_for_href("ch9.xhtml"), None);
        assert_eq!(book.chapter_for_href("#only-fragment"), None);
    }

    #[test]
    fn href_lookup_matches_whole_path_components() {
        let book = LoadedBook {
            chapters: vec![chapter(""), chapter("OEBPS/ch11.xhtml"), chapter("OEBPS/1.xhtml")],
            ..LoadedBook::default()
        };
        assert_eq!(book.chapter_for_href("1.xhtml"), Some(2));
        assert_eq!(book.chapter_for_href("ch11.xhtml"), Some(1));
        assert_eq!(book.chapter_for_href("h11.xhtml"), None);
        assert_eq!(book.chapter_for_href("other/1.xhtml"), None);

        let book = LoadedBook {
            chapters: vec![chapter(""), chapter("Text/intro.xhtml")],
            ..LoadedBook::default()
        };
        assert_eq!(book.chapter_for_href("Text/missing.xhtml"), None);
    }

    #[test]
    fn markup_is_flattened_to_text() {
        let chapter = Chapter {
            href: "c.xhtml".into(),
            markup: "<html><body><h1>Loomings</h1><p>Call me Ishmael.</p></body></html>".into(),
        };
        let text = chapter.plain_text();
        assert!(text.contains("Loomings"));
        assert!(text.contains("Call me Ishmael."));
        assert!(!text.contains("<p>"));
    }
}

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::SearchResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub path: PathBuf,
    pub query: String,
}

/// Full-text lookup over a book, answered asynchronously.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, path: &Path, query: &str) -> Result<Vec<SearchResult>>;
}

/// State behind the in-book find box.
#[derive(Debug, Clone, Default)]
pub struct FindPanel {
    visible: bool,
    enabled: bool,
    query: String,
    results: Vec<SearchResult>,
    loading: bool,
}

impl FindPanel {
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Input is only accepted once a book has finished loading.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Shows the panel, or hides it and wipes the query and results.
    pub fn toggle(&mut self) {
        if self.visible {
            self.visible = false;
            self.query.clear();
            self.results.clear();
            self.loading = false;
        } else {
            self.visible = true;
        }
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn edit(&mut self, query: String) {
        self.query = query;
        self.results.clear();
        self.loading = false;
    }

    pub(crate) fn begin_request(&mut self) {
        self.loading = true;
    }

    pub(crate) fn finish(&mut self, results: Vec<SearchResult>) {
        self.results = results;
        self.loading = false;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

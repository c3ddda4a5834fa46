use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use crate::backend::DocumentBackend;
use crate::geometry::Rect;

/// One occurrence of the query; `rect` is in document space of `page`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchMatch {
    pub page: usize,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    Idle,
    Searching { query: String },
    NotFound { query: String },
    Found { current: usize, total: usize },
}

impl SearchStatus {
    pub fn describe(&self) -> String {
        match self {
            SearchStatus::Idle => String::new(),
            SearchStatus::Searching { .. } => "Searching...".to_string(),
            SearchStatus::NotFound { .. } => "Not found".to_string(),
            SearchStatus::Found { current, total } => format!("({}/{})", current + 1, total),
        }
    }
}

/// Result of a background search, tagged with the version of the query
/// that produced it.
#[derive(Debug, Clone)]
pub struct SearchCompleted {
    pub version: u64,
    pub query: String,
    pub matches: Vec<SearchMatch>,
}

/// Messages posted to the UI thread by background work.
#[derive(Debug, Clone)]
pub enum ViewerMessage {
    SearchCompleted(SearchCompleted),
    /// Glyph count of every page, in page order.
    GlyphCounts(Vec<usize>),
}

/// Queries every page in order. Pages whose search fails contribute no
/// matches.
#[instrument(skip(backend))]
pub fn run_search(backend: &dyn DocumentBackend, query: &str) -> Vec<SearchMatch> {
    let mut matches = Vec::new();
    for page in 0..backend.page_count() {
        match backend.search_page(page, query) {
            Ok(rects) => matches.extend(rects.into_iter().map(|rect| SearchMatch { page, rect })),
            Err(err) => warn!(?err, page, "search failed on page"),
        }
    }
    debug!(count = matches.len(), "search finished");
    matches
}

/// Search session state. Only the UI thread mutates it; background results
/// arrive as [`SearchCompleted`] messages and are dropped if a newer query
/// has started since.
#[derive(Debug, Default)]
pub struct SearchEngine {
    query: Option<String>,
    version: u64,
    pending: bool,
    matches: Vec<SearchMatch>,
    current: Option<usize>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&SearchMatch> {
        self.current.and_then(|index| self.matches.get(index))
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn has_next(&self) -> bool {
        self.current
            .map_or(false, |index| index + 1 < self.matches.len())
    }

    pub fn has_previous(&self) -> bool {
        self.current.map_or(false, |index| index > 0)
    }

    pub fn status(&self) -> SearchStatus {
        match (&self.query, self.pending, self.current) {
            (None, _, _) => SearchStatus::Idle,
            (Some(query), true, _) => SearchStatus::Searching {
                query: query.clone(),
            },
            (Some(_), false, Some(current)) => SearchStatus::Found {
                current,
                total: self.matches.len(),
            },
            (Some(query), false, None) => SearchStatus::NotFound {
                query: query.clone(),
            },
        }
    }

    /// Starts a search on a worker thread, superseding any search still in
    /// flight. An empty query clears the session instead.
    pub fn start(
        &mut self,
        backend: Arc<dyn DocumentBackend>,
        query: &str,
        sender: UnboundedSender<ViewerMessage>,
    ) -> Option<u64> {
        let query = query.trim();
        self.version += 1;
        self.matches.clear();
        self.current = None;
        if query.is_empty() {
            self.query = None;
            self.pending = false;
            return None;
        }
        self.query = Some(query.to_string());
        self.pending = true;

        let version = self.version;
        let owned = query.to_string();
        info!(query, version, "starting search");
        let worker = move || {
            let matches = run_search(backend.as_ref(), &owned);
            let completed = SearchCompleted {
                version,
                query: owned,
                matches,
            };
            if sender.send(ViewerMessage::SearchCompleted(completed)).is_err() {
                debug!(version, "viewer gone before search finished");
            }
        };
        if let Err(err) = thread::Builder::new()
            .name("pdfscroll-search".into())
            .spawn(worker)
        {
            warn!(%err, "failed to spawn search thread");
            self.pending = false;
        }
        Some(version)
    }

    /// Takes a finished search. Returns `false` for results of a query that
    /// has since been replaced.
    pub fn apply(&mut self, completed: SearchCompleted) -> bool {
        if completed.version != self.version {
            debug!(
                stale = completed.version,
                current = self.version,
                "discarding stale search results"
            );
            return false;
        }
        self.pending = false;
        self.matches = completed.matches;
        self.current = if self.matches.is_empty() { None } else { Some(0) };
        info!(
            query = %completed.query,
            matches = self.matches.len(),
            "search results applied"
        );
        true
    }

    /// Moves to the next match; a no-op at the last one.
    pub fn next(&mut self) -> Option<&SearchMatch> {
        if !self.has_next() {
            return None;
        }
        self.current = self.current.map(|index| index + 1);
        self.current()
    }

    pub fn previous(&mut self) -> Option<&SearchMatch> {
        if !self.has_previous() {
            return None;
        }
        self.current = self.current.map(|index| index - 1);
        self.current()
    }

    /// Every match on the page holding the current match.
    pub fn page_highlights(&self) -> Vec<SearchMatch> {
        match self.current() {
            Some(current) => self
                .matches
                .iter()
                .filter(|candidate| candidate.page == current.page)
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.version += 1;
        self.query = None;
        self.pending = false;
        self.matches.clear();
        self.current = None;
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, instrument, warn};

use crate::backend::{DocumentBackend, DocumentProvider, RenderImage};
use crate::cache::RenderCache;
use crate::config::ViewerConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::geometry::{PageTransform, Rect};
use crate::labels::PageLabels;
use crate::layout::{LayoutManager, ScrollAnchor};
use crate::links::{link_at, resolve, LinkAction};
use crate::scheduler::{Debouncer, OneShot};
use crate::search::{SearchEngine, SearchMatch, SearchStatus, ViewerMessage};
use crate::selection::{GlyphPos, SelectionModel, SelectionParams, SelectionState};
use crate::text_index::{count_glyphs, spawn_glyph_count, HitTestParams, PageText};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStyle {
    Default,
    Text,
    Link,
}

/// Where the viewer starts once the initial layout is in place.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Page label or 1-based physical page number.
    pub initial_page: Option<String>,
    pub search: Option<String>,
}

/// Input from the host, with pointer coordinates relative to the viewport.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerInput {
    Resize { width: f32, height: f32 },
    PointerDown { x: f32, y: f32 },
    PointerDrag { x: f32, y: f32 },
    PointerMove { x: f32, y: f32 },
    PointerUp { x: f32, y: f32 },
    DoubleClick { x: f32, y: f32 },
    /// Positive deltas are wheel notches away from the user.
    Wheel { delta: i32, zoom_modifier: bool },
    ScrollBy(f32),
    /// Scroll by a multiple of the viewport height.
    ScrollViewports(f32),
    ZoomIn,
    ZoomOut,
    ZoomReset,
    Copy,
    Search(String),
    NextMatch,
    PreviousMatch,
    GoToPage(String),
}

/// Notifications for the host, drained after each batch of input.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    RedrawNeeded,
    CursorChanged(CursorStyle),
    OpenUri(String),
    Notice(String),
    Copied { text: String, chars: usize },
    NothingSelected,
    SearchUpdated(SearchStatus),
    Closed,
}

#[derive(Debug, Clone)]
pub struct PagePlacement {
    pub page: usize,
    /// Top-left corner of the bitmap in viewport coordinates.
    pub x: f32,
    pub y: f32,
    pub image: Arc<RenderImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightKind {
    Selection,
    SearchMatch,
    CurrentMatch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Highlight {
    pub rect: Rect,
    pub kind: HighlightKind,
}

/// Everything the host needs to paint the viewport.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: f32,
    pub height: f32,
    pub pages: Vec<PagePlacement>,
    pub highlights: Vec<Highlight>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerStatus {
    pub page_label: String,
    pub page_number: usize,
    pub page_count: usize,
    pub zoom_percent: u32,
    pub search: SearchStatus,
}

impl ViewerStatus {
    pub fn describe(&self) -> String {
        let mut line = format!(
            "{} ({} / {})  {}%",
            self.page_label, self.page_number, self.page_count, self.zoom_percent
        );
        let search = self.search.describe();
        if !search.is_empty() {
            line.push_str("  ");
            line.push_str(&search);
        }
        line
    }
}

#[derive(Debug, Clone)]
struct InitialView {
    page: usize,
    search: Option<String>,
}

/// Continuous-scroll viewer over one open document.
pub struct Viewer {
    backend: Arc<dyn DocumentBackend>,
    config: ViewerConfig,
    layout: LayoutManager,
    cache: RenderCache,
    labels: PageLabels,
    selection: SelectionModel,
    search: SearchEngine,
    viewport: (f32, f32),
    scroll_top: f32,
    cursor: CursorStyle,
    laid_out: bool,
    closed: bool,
    resize: Debouncer<(f32, f32)>,
    initial_load: OneShot<InitialView>,
    initial_search: OneShot<String>,
    messages_tx: UnboundedSender<ViewerMessage>,
    messages_rx: UnboundedReceiver<ViewerMessage>,
    events: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl Viewer {
    /// Opens `path` through `provider`. Failure to open is reported with
    /// the offending path; an unknown initial page falls back to the first.
    #[instrument(skip(provider, config, options))]
    pub async fn open<P: DocumentProvider>(
        provider: &P,
        path: &Path,
        options: OpenOptions,
        config: ViewerConfig,
        viewport: (f32, f32),
        now: Instant,
    ) -> ViewerResult<Self> {
        let backend = provider
            .open(path)
            .await
            .map_err(|source| ViewerError::DocumentOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(backend, options, config, viewport, now)
    }

    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        options: OpenOptions,
        config: ViewerConfig,
        viewport: (f32, f32),
        now: Instant,
    ) -> ViewerResult<Self> {
        let page_count = backend.page_count();
        let mut page_sizes = Vec::with_capacity(page_count);
        for page in 0..page_count {
            let size = backend
                .page_size(page)
                .map_err(|source| ViewerError::DocumentOpen {
                    path: backend.info().path.clone(),
                    source,
                })?;
            page_sizes.push(size);
        }

        let labels = PageLabels::load(backend.as_ref());
        let initial = InitialView {
            page: labels.resolve_or_first(options.initial_page.as_deref()),
            search: options.search.filter(|query| !query.trim().is_empty()),
        };
        info!(
            path = %backend.info().path.display(),
            pages = page_count,
            initial_page = initial.page,
            "document opened"
        );

        let layout = LayoutManager::new(
            page_sizes,
            config.page_gap,
            config.fit_margin,
            config.min_zoom,
        );
        let selection = SelectionModel::new(SelectionParams {
            line_tolerance: config.line_tolerance,
            run_gap: config.selection_run_gap,
            word_gap: config.word_gap,
        });
        let (messages_tx, messages_rx) = unbounded_channel();
        let mut cache = RenderCache::new(page_count);
        if !spawn_glyph_count(Arc::clone(&backend), messages_tx.clone()) {
            cache.set_glyph_counts(count_glyphs(backend.as_ref()));
        }
        Ok(Self {
            cache,
            resize: Debouncer::new(config.resize_debounce),
            initial_load: OneShot::after(initial, now, config.initial_load_delay),
            initial_search: OneShot::default(),
            backend,
            layout,
            labels,
            selection,
            search: SearchEngine::new(),
            viewport: (viewport.0.max(0.0), viewport.1.max(0.0)),
            scroll_top: 0.0,
            cursor: CursorStyle::Default,
            laid_out: false,
            closed: false,
            config,
            messages_tx,
            messages_rx,
            events: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ViewerEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn backend(&self) -> &Arc<dyn DocumentBackend> {
        &self.backend
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn layout(&self) -> &LayoutManager {
        &self.layout
    }

    pub fn is_laid_out(&self) -> bool {
        self.laid_out
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    pub fn scroll_fraction(&self) -> f32 {
        let total = self.layout.total_height();
        if total > 0.0 {
            (self.scroll_top / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn cursor(&self) -> CursorStyle {
        self.cursor
    }

    pub fn selection_state(&self) -> SelectionState {
        self.selection.state()
    }

    pub fn search_status(&self) -> SearchStatus {
        self.search.status()
    }

    pub fn current_match_index(&self) -> Option<usize> {
        self.search.current_index()
    }

    pub fn current_match(&self) -> Option<SearchMatch> {
        self.search.current().copied()
    }

    /// Whether glyph numbering is known, so rendered pages can be
    /// hit-tested and selected.
    pub fn is_text_indexed(&self) -> bool {
        self.cache.is_indexed()
    }

    pub fn page_transform(&self, page: usize) -> Option<PageTransform> {
        self.layout.transform_for(page)
    }

    pub fn current_page(&self) -> usize {
        self.layout
            .most_visible_page(self.scroll_top, self.viewport.1)
    }

    pub fn status(&self) -> ViewerStatus {
        let page = self.current_page();
        ViewerStatus {
            page_label: self
                .labels
                .label(page)
                .map(str::to_string)
                .unwrap_or_else(|| (page + 1).to_string()),
            page_number: page + 1,
            page_count: self.layout.page_count(),
            zoom_percent: (self.layout.zoom_level() * 100.0 + 1e-3).floor() as u32,
            search: self.search.status(),
        }
    }

    pub fn apply(&mut self, input: ViewerInput, now: Instant) {
        if self.closed {
            return;
        }
        match input {
            ViewerInput::Resize { width, height } => self.on_resize(width, height, now),
            ViewerInput::PointerDown { x, y } => self.pointer_down(x, y),
            ViewerInput::PointerDrag { x, y } => self.pointer_drag(x, y),
            ViewerInput::PointerMove { x, y } => self.pointer_move(x, y),
            ViewerInput::PointerUp { x, y } => self.pointer_up(x, y),
            ViewerInput::DoubleClick { x, y } => self.double_click(x, y),
            ViewerInput::Wheel {
                delta,
                zoom_modifier,
            } => self.wheel(delta, zoom_modifier),
            ViewerInput::ScrollBy(dy) => self.scroll_by(dy),
            ViewerInput::ScrollViewports(count) => self.scroll_by(count * self.viewport.1),
            ViewerInput::ZoomIn => self.zoom_in(),
            ViewerInput::ZoomOut => self.zoom_out(),
            ViewerInput::ZoomReset => self.reset_zoom(),
            ViewerInput::Copy => {
                self.copy_selection();
            }
            ViewerInput::Search(query) => self.search(&query),
            ViewerInput::NextMatch => self.next_match(),
            ViewerInput::PreviousMatch => self.previous_match(),
            ViewerInput::GoToPage(target) => {
                self.go_to_page(&target);
            }
        }
    }

    /// Runs due timers, takes finished background work and renders the
    /// visible pages. Only a rasterization failure is reported.
    pub fn tick(&mut self, now: Instant) -> ViewerResult<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(initial) = self.initial_load.take_if_due(now) {
            self.initial_layout(initial, now);
        }
        if let Some(query) = self.initial_search.take_if_due(now) {
            self.search(&query);
        }
        if let Some((width, height)) = self.resize.fire_if_due(now) {
            self.apply_resize(width, height);
        }
        while let Ok(message) = self.messages_rx.try_recv() {
            self.handle_message(message);
        }
        self.ensure_visible_rendered()
    }

    /// Waits for the search in flight, if any, and applies its result.
    pub async fn settle_search(&mut self) {
        while self.search.is_pending() {
            match self.messages_rx.recv().await {
                Some(message) => self.handle_message(message),
                None => break,
            }
        }
    }

    pub fn frame(&mut self) -> ViewerResult<Frame> {
        self.ensure_visible_rendered()?;
        let (width, height) = self.viewport;
        let generation = self.layout.generation();
        let mut pages = Vec::new();
        for page in self.layout.visible_pages(self.scroll_top, height) {
            let Some(cached) = self.cache.get(generation, page) else {
                continue;
            };
            pages.push(PagePlacement {
                page,
                x: cached.transform.offset_x,
                y: cached.transform.offset_y - self.scroll_top,
                image: Arc::clone(&cached.image),
            });
        }

        let mut highlights: Vec<Highlight> = self
            .selection
            .highlight_rects(self.cache.texts(generation))
            .into_iter()
            .map(|rect| Highlight {
                rect: rect.translate(0.0, -self.scroll_top),
                kind: HighlightKind::Selection,
            })
            .collect();
        let current = self.search.current().copied();
        for found in self.search.page_highlights() {
            let Some(transform) = self.layout.transform_for(found.page) else {
                continue;
            };
            let kind = if Some(found) == current {
                HighlightKind::CurrentMatch
            } else {
                HighlightKind::SearchMatch
            };
            highlights.push(Highlight {
                rect: transform.apply(&found.rect).translate(0.0, -self.scroll_top),
                kind,
            });
        }

        Ok(Frame {
            width,
            height,
            pages,
            highlights,
        })
    }

    /// Jumps to a page by label or 1-based number. Returns `false`, leaving
    /// the view unchanged, when the input names no page.
    pub fn go_to_page(&mut self, target: &str) -> bool {
        match self.labels.resolve(target) {
            Some(page) => {
                self.scroll_to_page(page);
                true
            }
            None => {
                warn!(target, "invalid page label or number");
                false
            }
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        info!(path = %self.backend.info().path.display(), "closing document");
        self.closed = true;
        self.search.clear();
        self.selection.clear();
        self.cache.clear();
        self.resize.cancel();
        self.initial_load.cancel();
        self.initial_search.cancel();
        self.backend.close();
        self.push_event(ViewerEvent::Closed);
    }

    pub fn on_resize(&mut self, width: f32, height: f32, now: Instant) {
        let size = (width.max(0.0), height.max(0.0));
        if !self.laid_out {
            self.viewport = size;
            return;
        }
        self.resize.schedule(size, now);
    }

    pub fn zoom_in(&mut self) {
        let zoom = self.layout.zoom_level() + self.config.zoom_increment;
        self.relayout(false, zoom);
    }

    pub fn zoom_out(&mut self) {
        let zoom = (self.layout.zoom_level() - self.config.zoom_increment).max(self.config.min_zoom);
        self.relayout(false, zoom);
    }

    pub fn reset_zoom(&mut self) {
        self.relayout(true, 1.0);
    }

    pub fn scroll_by(&mut self, dy: f32) {
        self.set_scroll_top(self.scroll_top + dy);
    }

    pub fn wheel(&mut self, delta: i32, zoom_modifier: bool) {
        if delta == 0 {
            return;
        }
        if zoom_modifier {
            if delta > 0 {
                self.zoom_in();
            } else {
                self.zoom_out();
            }
        } else {
            self.scroll_by(-(delta as f32) * self.config.scroll_step);
        }
    }

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        self.selection.clear();
        self.redraw();
        let canvas_y = y + self.scroll_top;
        let generation = self.layout.generation();
        let hit_link = self.layout.page_at(canvas_y).and_then(|page| {
            self.cache
                .get(generation, page)
                .and_then(|cached| link_at(&cached.links, x, canvas_y).cloned())
        });
        if let Some(link) = hit_link {
            debug!(page = link.page, target = ?link.target, "link clicked");
            let action = resolve(
                &link,
                self.layout.page_count(),
                &self.config.allowed_link_schemes,
            );
            self.follow(action);
            return;
        }
        if let Some(at) = self.glyph_at(x, y) {
            self.selection.begin(at);
        }
    }

    pub fn pointer_drag(&mut self, x: f32, y: f32) {
        if self.selection.state() != SelectionState::Dragging {
            self.pointer_move(x, y);
            return;
        }
        if let Some(at) = self.glyph_at(x, y) {
            if self.selection.update(at) {
                self.redraw();
            }
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if self.selection.state() == SelectionState::Dragging {
            self.pointer_drag(x, y);
            return;
        }
        let style = if self.link_under(x, y) {
            CursorStyle::Link
        } else if self.glyph_at(x, y).is_some() {
            CursorStyle::Text
        } else {
            CursorStyle::Default
        };
        if style != self.cursor {
            self.cursor = style;
            self.push_event(ViewerEvent::CursorChanged(style));
        }
    }

    pub fn pointer_up(&mut self, x: f32, y: f32) {
        if self.selection.state() != SelectionState::Dragging {
            return;
        }
        let at = self.glyph_at(x, y);
        self.selection.commit(at);
        self.redraw();
    }

    pub fn double_click(&mut self, x: f32, y: f32) {
        self.selection.clear();
        let Some(at) = self.glyph_at(x, y) else {
            return;
        };
        let generation = self.layout.generation();
        if let Some(text) = self
            .cache
            .get(generation, at.page)
            .and_then(|cached| cached.text.as_ref())
        {
            self.selection.select_word(text, at.index);
        }
        self.redraw();
    }

    /// Selected text, also announced to the host through a copy event.
    pub fn copy_selection(&mut self) -> Option<String> {
        let text = self
            .selection
            .selected_text(self.cache.texts(self.layout.generation()));
        if text.is_empty() {
            self.push_event(ViewerEvent::NothingSelected);
            return None;
        }
        let chars = text.chars().count();
        debug!(chars, "copying selection");
        self.push_event(ViewerEvent::Copied {
            text: text.clone(),
            chars,
        });
        Some(text)
    }

    pub fn search(&mut self, query: &str) {
        self.search.start(
            Arc::clone(&self.backend),
            query,
            self.messages_tx.clone(),
        );
        self.push_event(ViewerEvent::SearchUpdated(self.search.status()));
        self.redraw();
    }

    pub fn next_match(&mut self) {
        if self.search.next().is_some() {
            self.center_current_match();
            self.push_event(ViewerEvent::SearchUpdated(self.search.status()));
        }
    }

    pub fn previous_match(&mut self) {
        if self.search.previous().is_some() {
            self.center_current_match();
            self.push_event(ViewerEvent::SearchUpdated(self.search.status()));
        }
    }

    fn initial_layout(&mut self, initial: InitialView, now: Instant) {
        let width = self.viewport.0;
        self.layout.fit_to_width(width);
        self.layout.compute_layout(1.0, width);
        self.cache.set_generation(self.layout.generation());
        self.laid_out = true;
        self.scroll_to_page(initial.page);
        self.redraw();
        if let Some(query) = initial.search {
            self.initial_search
                .arm(query, now, self.config.initial_search_delay);
        }
        debug!(page = initial.page, "initial layout done");
    }

    fn apply_resize(&mut self, width: f32, height: f32) {
        if (width, height) == self.viewport {
            return;
        }
        debug!(width, height, "applying resize");
        let anchor = self.layout.capture_anchor(self.scroll_top, self.viewport.1);
        self.viewport = (width, height);
        self.layout.compute_layout(self.layout.zoom_level(), width);
        self.after_relayout(anchor);
    }

    fn relayout(&mut self, fit: bool, zoom: f32) {
        if !self.laid_out {
            return;
        }
        let anchor = self.layout.capture_anchor(self.scroll_top, self.viewport.1);
        if fit {
            self.layout.fit_to_width(self.viewport.0);
        }
        self.layout.compute_layout(zoom, self.viewport.0);
        debug!(zoom = self.layout.zoom_level(), "zoom changed");
        self.after_relayout(anchor);
    }

    fn after_relayout(&mut self, anchor: Option<ScrollAnchor>) {
        self.selection.clear();
        self.cache.set_generation(self.layout.generation());
        let top = anchor
            .and_then(|anchor| self.layout.anchor_scroll_top(&anchor, self.viewport.1))
            .unwrap_or(self.scroll_top);
        self.set_scroll_top(top);
        self.redraw();
    }

    fn handle_message(&mut self, message: ViewerMessage) {
        match message {
            ViewerMessage::SearchCompleted(completed) => {
                if !self.search.apply(completed) {
                    return;
                }
                self.center_current_match();
                self.push_event(ViewerEvent::SearchUpdated(self.search.status()));
                self.redraw();
            }
            ViewerMessage::GlyphCounts(counts) => {
                debug!(pages = counts.len(), "glyph counts applied");
                self.cache.set_glyph_counts(counts);
            }
        }
    }

    fn center_current_match(&mut self) {
        let Some(found) = self.search.current().copied() else {
            return;
        };
        let Some(transform) = self.layout.transform_for(found.page) else {
            return;
        };
        let center = transform.apply(&found.rect).center_y();
        self.center_on(center);
    }

    fn center_on(&mut self, canvas_y: f32) {
        self.set_scroll_top(canvas_y - self.viewport.1 / 2.0);
    }

    fn scroll_to_page(&mut self, page: usize) {
        if let Some(layout) = self.layout.page(page) {
            let top = layout.top;
            self.set_scroll_top(top);
        }
    }

    fn follow(&mut self, action: LinkAction) {
        match action {
            LinkAction::GoToPage { page, y } => {
                self.scroll_to_page(page);
                if let Some(y) = y {
                    if let Some(transform) = self.layout.transform_for(page) {
                        self.center_on(transform.apply_y(y));
                    }
                }
            }
            LinkAction::OpenUri(uri) => {
                info!(%uri, "opening link");
                self.push_event(ViewerEvent::OpenUri(uri));
            }
            LinkAction::Notify(notice) => self.push_event(ViewerEvent::Notice(notice.message())),
            LinkAction::None => {}
        }
    }

    /// Moves the viewport top edge, clamped so the view stays inside the
    /// document.
    fn set_scroll_top(&mut self, top: f32) {
        let max_top = (self.layout.total_height() - self.viewport.1).max(0.0);
        let top = if top.is_finite() {
            top.clamp(0.0, max_top)
        } else {
            0.0
        };
        if (top - self.scroll_top).abs() > f32::EPSILON {
            self.scroll_top = top;
            self.redraw();
        }
    }

    fn ensure_visible_rendered(&mut self) -> ViewerResult<()> {
        if !self.laid_out || self.closed {
            return Ok(());
        }
        let visible = self.layout.visible_pages(self.scroll_top, self.viewport.1);
        let added = self.cache.ensure_rendered(
            self.backend.as_ref(),
            &self.layout,
            &visible,
            self.hit_params(),
        )?;
        if !added.is_empty() {
            self.redraw();
        }
        Ok(())
    }

    fn hit_params(&self) -> HitTestParams {
        HitTestParams {
            halo: self.config.hit_halo,
            cell_size: self.config.hit_cell_size,
            max_distance: self.config.hit_max_distance,
            vertical_weight: self.config.hit_vertical_weight,
        }
    }

    fn page_text_at(&self, canvas_y: f32) -> Option<&PageText> {
        let page = self.layout.page_at(canvas_y)?;
        self.cache
            .get(self.layout.generation(), page)
            .and_then(|cached| cached.text.as_ref())
    }

    fn glyph_at(&self, x: f32, y: f32) -> Option<GlyphPos> {
        let canvas_y = y + self.scroll_top;
        let text = self.page_text_at(canvas_y)?;
        text.hit_test(x, canvas_y).map(|index| GlyphPos {
            page: text.page(),
            index,
        })
    }

    fn link_under(&self, x: f32, y: f32) -> bool {
        let canvas_y = y + self.scroll_top;
        let generation = self.layout.generation();
        self.layout
            .page_at(canvas_y)
            .and_then(|page| self.cache.get(generation, page))
            .map_or(false, |cached| link_at(&cached.links, x, canvas_y).is_some())
    }

    fn redraw(&self) {
        let mut events = self.events.lock();
        if events.last() != Some(&ViewerEvent::RedrawNeeded) {
            events.push(ViewerEvent::RedrawNeeded);
        }
    }

    fn push_event(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::backend::LinkDefinition;
    use crate::geometry::Point;
    use crate::links::LinkTarget;
    use crate::test_support::{FakeBackend, FakePage, FakeProvider};

    const VIEWPORT: (f32, f32) = (400.0, 300.0);

    fn manual_pages() -> Vec<FakePage> {
        let mut pages: Vec<FakePage> = (0..6)
            .map(|page| {
                FakePage::lines(&[
                    "Chapter heading",
                    "see the troubleshooting section for details",
                    "plain body text",
                ])
                .labelled(&format!("p{}", page + 1))
            })
            .collect();
        pages[4].lines.push("Overcurrent relay".into());
        pages[4].lines.push("reset Overcurrent".into());
        pages[0].links.push(LinkDefinition {
            rect: FakePage::glyph_rect(2, 0).union(&FakePage::glyph_rect(2, 4)),
            target: LinkTarget::Goto {
                page: 3,
                point: Some(Point::new(0.0, 200.0)),
            },
        });
        pages[0].links.push(LinkDefinition {
            rect: FakePage::glyph_rect(2, 6).union(&FakePage::glyph_rect(2, 9)),
            target: LinkTarget::Uri {
                uri: "javascript:alert(1)".into(),
            },
        });
        pages[0].links.push(LinkDefinition {
            rect: FakePage::glyph_rect(2, 11).union(&FakePage::glyph_rect(2, 14)),
            target: LinkTarget::Goto {
                page: 500,
                point: None,
            },
        });
        pages
    }

    fn loaded(options: OpenOptions) -> (Viewer, Instant) {
        let backend: Arc<dyn DocumentBackend> = Arc::new(FakeBackend::new(manual_pages()));
        let start = Instant::now();
        let mut viewer =
            Viewer::new(backend, options, ViewerConfig::default(), VIEWPORT, start).unwrap();
        let now = start + Duration::from_millis(100);
        wait_for_text(&mut viewer, now);
        assert!(viewer.is_laid_out());
        (viewer, now)
    }

    /// Ticks until the background glyph count has been applied.
    fn wait_for_text(viewer: &mut Viewer, now: Instant) {
        for _ in 0..500 {
            viewer.tick(now).unwrap();
            if viewer.is_text_indexed() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("glyph counts never arrived");
    }

    /// Viewport coordinates of the centre of a glyph on `page`.
    fn glyph_point(viewer: &Viewer, page: usize, line: usize, column: usize) -> (f32, f32) {
        let transform = viewer.page_transform(page).unwrap();
        let rect = transform.apply(&FakePage::glyph_rect(line, column));
        (rect.center_x(), rect.center_y() - viewer.scroll_top())
    }

    fn drain(viewer: &Viewer) -> Vec<ViewerEvent> {
        std::mem::take(&mut *viewer.events().lock())
    }

    #[test]
    fn initial_layout_waits_for_delay_and_fits_width() {
        let backend: Arc<dyn DocumentBackend> = Arc::new(FakeBackend::new(manual_pages()));
        let start = Instant::now();
        let options = OpenOptions {
            initial_page: Some("P3".into()),
            search: None,
        };
        let mut viewer =
            Viewer::new(backend, options, ViewerConfig::default(), VIEWPORT, start).unwrap();
        viewer.tick(start + Duration::from_millis(50)).unwrap();
        assert!(!viewer.is_laid_out());

        viewer.tick(start + Duration::from_millis(100)).unwrap();
        assert!((viewer.layout().final_zoom() - 1.2).abs() < 1e-4);
        assert_eq!(viewer.current_page(), 2);
        let status = viewer.status();
        assert_eq!(status.page_label, "p3");
        assert_eq!(status.describe(), "p3 (3 / 6)  100%");
    }

    #[test]
    fn zoom_keeps_anchor_and_clears_selection() {
        let (mut viewer, _) = loaded(OpenOptions {
            initial_page: Some("2".into()),
            search: None,
        });
        viewer.scroll_by(120.0);
        let (x, y) = glyph_point(&viewer, 1, 1, 10);
        viewer.double_click(x, y);
        assert_eq!(viewer.selection_state(), SelectionState::Committed);

        let before = viewer
            .layout()
            .capture_anchor(viewer.scroll_top(), VIEWPORT.1)
            .unwrap();
        viewer.zoom_in();
        viewer.zoom_in();
        assert_eq!(viewer.status().zoom_percent, 120);
        assert_eq!(viewer.selection_state(), SelectionState::Idle);
        let after = viewer
            .layout()
            .capture_anchor(viewer.scroll_top(), VIEWPORT.1)
            .unwrap();
        assert_eq!(before.page_index, after.page_index);
        assert!((before.relative_pos - after.relative_pos).abs() < 1e-3);

        for _ in 0..20 {
            viewer.zoom_out();
        }
        assert_eq!(viewer.status().zoom_percent, 10);
    }

    #[test]
    fn double_click_and_copy() {
        let (mut viewer, now) = loaded(OpenOptions::default());
        viewer.tick(now).unwrap();
        drain(&viewer);

        viewer.apply(ViewerInput::Copy, now);
        assert_eq!(drain(&viewer), vec![ViewerEvent::NothingSelected]);

        let (x, y) = glyph_point(&viewer, 0, 1, 12);
        viewer.apply(ViewerInput::DoubleClick { x, y }, now);
        assert_eq!(viewer.copy_selection().as_deref(), Some("troubleshooting"));
        assert!(drain(&viewer).contains(&ViewerEvent::Copied {
            text: "troubleshooting".into(),
            chars: 15,
        }));
        let frame = viewer.frame().unwrap();
        let selected: Vec<_> = frame
            .highlights
            .iter()
            .filter(|h| h.kind == HighlightKind::Selection)
            .collect();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn drag_selects_across_lines() {
        let (mut viewer, now) = loaded(OpenOptions::default());
        let (x0, y0) = glyph_point(&viewer, 0, 0, 8);
        let (x1, y1) = glyph_point(&viewer, 0, 1, 2);
        viewer.apply(ViewerInput::PointerDown { x: x0, y: y0 }, now);
        assert_eq!(viewer.selection_state(), SelectionState::Dragging);
        viewer.apply(ViewerInput::PointerDrag { x: x1, y: y1 }, now);
        viewer.apply(ViewerInput::PointerUp { x: x1, y: y1 }, now);
        assert_eq!(viewer.selection_state(), SelectionState::Committed);
        assert_eq!(viewer.copy_selection().as_deref(), Some("headingsee"));

        // Clicking empty space clears the selection.
        viewer.apply(ViewerInput::PointerDown { x: 2.0, y: 2.0 }, now);
        assert_eq!(viewer.selection_state(), SelectionState::Idle);
    }

    #[test]
    fn links_navigate_or_report() {
        let (mut viewer, now) = loaded(OpenOptions::default());
        drain(&viewer);

        let (x, y) = glyph_point(&viewer, 0, 2, 7);
        viewer.apply(ViewerInput::PointerDown { x, y }, now);
        assert_eq!(viewer.selection_state(), SelectionState::Idle);
        assert!(drain(&viewer)
            .iter()
            .any(|event| matches!(event, ViewerEvent::Notice(message) if message.contains("javascript"))));

        let top = viewer.scroll_top();
        let (x, y) = glyph_point(&viewer, 0, 2, 12);
        viewer.apply(ViewerInput::PointerDown { x, y }, now);
        assert_eq!(viewer.scroll_top(), top);

        let (x, y) = glyph_point(&viewer, 0, 2, 1);
        viewer.apply(ViewerInput::PointerDown { x, y }, now);
        let transform = viewer.page_transform(3).unwrap();
        let expected = transform.apply_y(200.0) - VIEWPORT.1 / 2.0;
        assert!((viewer.scroll_top() - expected).abs() < 1e-3);
        assert_eq!(viewer.current_page(), 3);
    }

    #[test]
    fn cursor_changes_only_when_style_differs() {
        let (mut viewer, now) = loaded(OpenOptions::default());
        drain(&viewer);
        let (lx, ly) = glyph_point(&viewer, 0, 2, 2);
        let (tx, ty) = glyph_point(&viewer, 0, 0, 2);
        viewer.apply(ViewerInput::PointerMove { x: lx, y: ly }, now);
        viewer.apply(ViewerInput::PointerMove { x: lx + 1.0, y: ly }, now);
        viewer.apply(ViewerInput::PointerMove { x: tx, y: ty }, now);
        viewer.apply(ViewerInput::PointerMove { x: 1.0, y: 1.0 }, now);
        assert_eq!(
            drain(&viewer),
            vec![
                ViewerEvent::CursorChanged(CursorStyle::Link),
                ViewerEvent::CursorChanged(CursorStyle::Text),
                ViewerEvent::CursorChanged(CursorStyle::Default),
            ]
        );
    }

    #[test]
    fn resize_is_debounced() {
        let (mut viewer, now) = loaded(OpenOptions::default());
        let generation = viewer.layout().generation();
        viewer.apply(
            ViewerInput::Resize {
                width: 500.0,
                height: 300.0,
            },
            now,
        );
        viewer.apply(
            ViewerInput::Resize {
                width: 600.0,
                height: 320.0,
            },
            now + Duration::from_millis(200),
        );
        viewer.tick(now + Duration::from_millis(400)).unwrap();
        assert_eq!(viewer.layout().generation(), generation);
        viewer.tick(now + Duration::from_millis(500)).unwrap();
        assert_eq!(viewer.layout().viewport_width(), 600.0);
        assert_ne!(viewer.layout().generation(), generation);
        let frame = viewer.frame().unwrap();
        assert_eq!(frame.width, 600.0);
        assert!(!frame.pages.is_empty());
    }

    #[test]
    fn wheel_scrolls_and_zooms() {
        let (mut viewer, now) = loaded(OpenOptions::default());
        viewer.apply(
            ViewerInput::Wheel {
                delta: -2,
                zoom_modifier: false,
            },
            now,
        );
        assert_eq!(viewer.scroll_top(), 90.0);
        viewer.apply(
            ViewerInput::Wheel {
                delta: 5,
                zoom_modifier: false,
            },
            now,
        );
        assert_eq!(viewer.scroll_top(), 0.0);
        viewer.apply(
            ViewerInput::Wheel {
                delta: 1,
                zoom_modifier: true,
            },
            now,
        );
        assert_eq!(viewer.status().zoom_percent, 110);
        viewer.apply(ViewerInput::ZoomReset, now);
        assert_eq!(viewer.status().zoom_percent, 100);
    }

    #[test]
    fn go_to_page_rejects_unknown_targets() {
        let (mut viewer, _) = loaded(OpenOptions::default());
        assert!(viewer.go_to_page("p5"));
        assert_eq!(viewer.current_page(), 4);
        let top = viewer.scroll_top();
        assert!(!viewer.go_to_page("appendix"));
        assert!(!viewer.go_to_page("42"));
        assert_eq!(viewer.scroll_top(), top);
        assert!(viewer.go_to_page("1"));
        assert_eq!(viewer.current_page(), 0);
        assert!((viewer.scroll_fraction() - 10.0 / viewer.layout().total_height()).abs() < 1e-6);
    }

    #[test]
    fn jumping_far_extracts_only_the_visible_pages() {
        let backend = Arc::new(FakeBackend::new(vec![
            FakePage::lines(&["a page of text"]);
            1000
        ]));
        let start = Instant::now();
        let mut viewer = Viewer::new(
            backend.clone(),
            OpenOptions::default(),
            ViewerConfig::default(),
            VIEWPORT,
            start,
        )
        .unwrap();
        let now = start + Duration::from_millis(100);
        wait_for_text(&mut viewer, now);

        let before = backend.glyph_extractions();
        assert!(viewer.go_to_page("1000"));
        viewer.tick(now).unwrap();
        assert!(backend.glyph_extractions() - before <= 2);

        let (x, y) = glyph_point(&viewer, 999, 0, 0);
        viewer.apply(ViewerInput::DoubleClick { x, y }, now);
        assert_eq!(viewer.copy_selection().as_deref(), Some("a"));
    }

    #[test]
    fn render_failure_surfaces_from_tick() {
        let mut backend = FakeBackend::new(manual_pages());
        backend.fail_render_on(0);
        let start = Instant::now();
        let mut viewer = Viewer::new(
            Arc::new(backend),
            OpenOptions::default(),
            ViewerConfig::default(),
            VIEWPORT,
            start,
        )
        .unwrap();
        match viewer.tick(start + Duration::from_millis(100)) {
            Err(ViewerError::Render { page: 0, .. }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_runs_initial_search_and_centres_match() {
        let provider = FakeProvider {
            pages: manual_pages(),
        };
        let start = Instant::now();
        let mut viewer = Viewer::open(
            &provider,
            &PathBuf::from("/tmp/manual.pdf"),
            OpenOptions {
                initial_page: Some("no such page".into()),
                search: Some("Overcurrent".into()),
            },
            ViewerConfig::default(),
            VIEWPORT,
            start,
        )
        .await
        .unwrap();

        viewer.tick(start + Duration::from_millis(100)).unwrap();
        assert_eq!(viewer.current_page(), 0);
        assert_eq!(viewer.search_status(), SearchStatus::Idle);
        viewer.tick(start + Duration::from_millis(250)).unwrap();
        viewer.settle_search().await;
        assert_eq!(
            viewer.search_status(),
            SearchStatus::Found {
                current: 0,
                total: 2
            }
        );
        assert_eq!(viewer.current_page(), 4);

        let frame = viewer.frame().unwrap();
        let current: Vec<_> = frame
            .highlights
            .iter()
            .filter(|h| h.kind == HighlightKind::CurrentMatch)
            .collect();
        assert_eq!(current.len(), 1);
        assert!((current[0].rect.center_y() - VIEWPORT.1 / 2.0).abs() < 1e-3);
        assert_eq!(frame.highlights.len(), 2);

        viewer.next_match();
        assert_eq!(viewer.current_match_index(), Some(1));
        viewer.next_match();
        assert_eq!(viewer.current_match_index(), Some(1));
        viewer.previous_match();
        assert_eq!(viewer.current_match_index(), Some(0));

        viewer.close();
        assert!(viewer.is_closed());
        assert!(viewer.events().lock().contains(&ViewerEvent::Closed));
    }

    #[tokio::test]
    async fn search_results_follow_relayout() {
        let (mut viewer, now) = loaded(OpenOptions::default());
        viewer.search("Overcurrent");
        viewer.settle_search().await;
        let found = SearchStatus::Found {
            current: 0,
            total: 2,
        };
        assert_eq!(viewer.search_status(), found);
        let generation = viewer.layout().generation();

        viewer.zoom_in();
        viewer.apply(
            ViewerInput::Resize {
                width: 520.0,
                height: 360.0,
            },
            now,
        );
        viewer.tick(now + Duration::from_millis(400)).unwrap();
        assert_eq!(viewer.layout().viewport_width(), 520.0);
        assert_ne!(viewer.layout().generation(), generation);
        assert_eq!(viewer.search_status(), found);

        let current = viewer.current_match().unwrap();
        assert_eq!(current.page, 4);
        let expected = viewer
            .page_transform(current.page)
            .unwrap()
            .apply(&current.rect)
            .translate(0.0, -viewer.scroll_top());
        let frame = viewer.frame().unwrap();
        let highlighted: Vec<Rect> = frame
            .highlights
            .iter()
            .filter(|h| h.kind == HighlightKind::CurrentMatch)
            .map(|h| h.rect)
            .collect();
        assert_eq!(highlighted, vec![expected]);
    }

    #[tokio::test]
    async fn opened_document_describes_path_and_pages() {
        let provider = FakeProvider {
            pages: manual_pages(),
        };
        let path = PathBuf::from("/tmp/manual.pdf");
        let viewer = Viewer::open(
            &provider,
            &path,
            OpenOptions::default(),
            ViewerConfig::default(),
            VIEWPORT,
            Instant::now(),
        )
        .await
        .unwrap();
        let info = viewer.backend().info();
        assert_eq!(info.path, path);
        assert_eq!(info.page_count, 6);
    }

    #[tokio::test]
    async fn open_failure_reports_path() {
        let provider = FakeProvider { pages: Vec::new() };
        let path = PathBuf::from("/tmp/notes.txt");
        let result = Viewer::open(
            &provider,
            &path,
            OpenOptions::default(),
            ViewerConfig::default(),
            VIEWPORT,
            Instant::now(),
        )
        .await;
        match result {
            Err(ViewerError::DocumentOpen { path: reported, .. }) => assert_eq!(reported, path),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("text file should not open"),
        }
    }
}

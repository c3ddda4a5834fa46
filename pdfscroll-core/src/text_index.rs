use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, instrument, warn};

use crate::backend::{DocumentBackend, RawGlyph, TextRun};
use crate::geometry::{PageTransform, Rect};
use crate::search::ViewerMessage;

/// A rendered character with its canvas-space box and document-wide index.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub page: usize,
    pub global_index: usize,
    pub bbox: Rect,
    pub font_size: f32,
}

/// How the glyph boxes of a page were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Per-glyph boxes straight from the backend.
    Precise,
    /// Boxes interpolated by splitting text runs evenly.
    Interpolated,
    /// Both extraction paths failed; the page has no text.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitTestParams {
    pub halo: f32,
    pub cell_size: f32,
    pub max_distance: f32,
    pub vertical_weight: f32,
}

impl Default for HitTestParams {
    fn default() -> Self {
        Self {
            halo: 2.0,
            cell_size: 8.0,
            max_distance: 50.0,
            vertical_weight: 2.0,
        }
    }
}

/// Uniform grid over the page: each cell lists the glyphs whose
/// halo-expanded box overlaps it, so a point lookup only inspects a handful
/// of candidates.
#[derive(Debug, Clone, Default)]
pub struct SpatialMap {
    cell_size: f32,
    cells: HashMap<(i32, i32), Vec<u32>>,
}

impl SpatialMap {
    fn build(glyphs: &[Glyph], halo: f32, cell_size: f32) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        let mut cells: HashMap<(i32, i32), Vec<u32>> = HashMap::new();
        for (local, glyph) in glyphs.iter().enumerate() {
            if !glyph.bbox.is_valid() {
                continue;
            }
            let area = glyph.bbox.expand(halo);
            let (cx0, cy0) = cell_of(area.x0, area.y0, cell_size);
            let (cx1, cy1) = cell_of(area.x1, area.y1, cell_size);
            for cy in cy0..=cy1 {
                for cx in cx0..=cx1 {
                    cells.entry((cx, cy)).or_default().push(local as u32);
                }
            }
        }
        Self { cell_size, cells }
    }

    fn candidates(&self, x: f32, y: f32) -> &[u32] {
        let key = cell_of(x, y, self.cell_size);
        self.cells.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

fn cell_of(x: f32, y: f32, cell_size: f32) -> (i32, i32) {
    (
        (x / cell_size).floor() as i32,
        (y / cell_size).floor() as i32,
    )
}

/// All glyphs of one page plus the lookup structure for hit-testing.
#[derive(Debug, Clone)]
pub struct PageText {
    page: usize,
    first_index: usize,
    glyphs: Vec<Glyph>,
    map: SpatialMap,
    params: HitTestParams,
    mode: ExtractionMode,
}

impl PageText {
    pub fn new(
        page: usize,
        first_index: usize,
        raw: Vec<RawGlyph>,
        transform: &PageTransform,
        params: HitTestParams,
        mode: ExtractionMode,
    ) -> Self {
        let glyphs: Vec<Glyph> = raw
            .into_iter()
            .enumerate()
            .map(|(offset, glyph)| Glyph {
                ch: glyph.ch,
                page,
                global_index: first_index + offset,
                bbox: transform.apply(&glyph.bbox),
                font_size: glyph.font_size,
            })
            .collect();
        let map = SpatialMap::build(&glyphs, params.halo, params.cell_size);
        Self {
            page,
            first_index,
            glyphs,
            map,
            params,
            mode,
        }
    }

    pub fn empty(page: usize, first_index: usize) -> Self {
        Self {
            page,
            first_index,
            glyphs: Vec::new(),
            map: SpatialMap::default(),
            params: HitTestParams::default(),
            mode: ExtractionMode::Unavailable,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn first_index(&self) -> usize {
        self.first_index
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    pub fn map(&self) -> &SpatialMap {
        &self.map
    }

    pub fn glyph(&self, global_index: usize) -> Option<&Glyph> {
        global_index
            .checked_sub(self.first_index)
            .and_then(|local| self.glyphs.get(local))
    }

    /// Global index of the glyph at canvas point `(x, y)`.
    ///
    /// Grid candidates are tried first: a glyph whose own box contains the
    /// point wins, then the closest glyph whose halo does. Points in the
    /// gaps between glyphs fall back to the nearest glyph centre, bounded by
    /// the configured cutoff.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<usize> {
        let mut halo_hit: Option<(f32, usize)> = None;
        for &local in self.map.candidates(x, y) {
            let glyph = &self.glyphs[local as usize];
            if glyph.bbox.contains(x, y) {
                return Some(glyph.global_index);
            }
            if !glyph.bbox.expand(self.params.halo).contains(x, y) {
                continue;
            }
            let distance = self.distance(glyph, x, y);
            if halo_hit.map_or(true, |(best, _)| distance < best) {
                halo_hit = Some((distance, glyph.global_index));
            }
        }
        match halo_hit {
            Some((_, index)) => Some(index),
            None => self.nearest(x, y),
        }
    }

    /// Squared distance to the glyph centre, with vertical offsets weighted
    /// so the current line is preferred.
    fn distance(&self, glyph: &Glyph, x: f32, y: f32) -> f32 {
        let dx = x - glyph.bbox.center_x();
        let dy = y - glyph.bbox.center_y();
        dx * dx + dy * dy * self.params.vertical_weight
    }

    fn nearest(&self, x: f32, y: f32) -> Option<usize> {
        let cutoff = self.params.max_distance * self.params.max_distance;
        let mut best: Option<(f32, usize)> = None;
        for glyph in &self.glyphs {
            let distance = self.distance(glyph, x, y);
            if distance >= cutoff {
                continue;
            }
            if best.map_or(true, |(current, _)| distance < current) {
                best = Some((distance, glyph.global_index));
            }
        }
        best.map(|(_, index)| index)
    }
}

/// Splits every run's box evenly between its characters.
pub fn interpolate_runs(runs: &[TextRun]) -> Vec<RawGlyph> {
    let mut glyphs = Vec::new();
    for run in runs {
        let count = run.text.chars().count();
        if count == 0 {
            continue;
        }
        let step = run.bbox.width() / count as f32;
        for (i, ch) in run.text.chars().enumerate() {
            let x0 = run.bbox.x0 + step * i as f32;
            glyphs.push(RawGlyph {
                ch,
                bbox: Rect::new(x0, run.bbox.y0, x0 + step, run.bbox.y1),
                font_size: run.font_size,
            });
        }
    }
    glyphs
}

/// Pulls the glyphs of a page in document space, falling back to
/// interpolated run boxes when per-glyph extraction fails.
pub fn collect_raw_glyphs(
    backend: &dyn DocumentBackend,
    page: usize,
) -> (Vec<RawGlyph>, ExtractionMode) {
    match backend.page_glyphs(page) {
        Ok(glyphs) => (glyphs, ExtractionMode::Precise),
        Err(err) => {
            warn!(?err, page, "glyph extraction failed, interpolating text runs");
            match backend.page_text_runs(page) {
                Ok(runs) => (interpolate_runs(&runs), ExtractionMode::Interpolated),
                Err(err) => {
                    error!(?err, page, "fallback text extraction failed");
                    (Vec::new(), ExtractionMode::Unavailable)
                }
            }
        }
    }
}

/// Glyph count of a page without building any boxes: the backend's own
/// count, or the characters of its text runs when that fails.
pub fn count_page_glyphs(backend: &dyn DocumentBackend, page: usize) -> usize {
    match backend.page_glyph_count(page) {
        Ok(count) => count,
        Err(err) => {
            debug!(?err, page, "glyph count unavailable, counting text runs");
            backend
                .page_text_runs(page)
                .map(|runs| runs.iter().map(|run| run.text.chars().count()).sum())
                .unwrap_or(0)
        }
    }
}

#[instrument(skip(backend), fields(pages = backend.page_count()))]
pub fn count_glyphs(backend: &dyn DocumentBackend) -> Vec<usize> {
    (0..backend.page_count())
        .map(|page| count_page_glyphs(backend, page))
        .collect()
}

/// Counts every page on a worker thread and posts the totals as
/// [`ViewerMessage::GlyphCounts`]. Returns `false` when the thread could not
/// be started.
pub fn spawn_glyph_count(
    backend: Arc<dyn DocumentBackend>,
    sender: UnboundedSender<ViewerMessage>,
) -> bool {
    let worker = move || {
        let counts = count_glyphs(backend.as_ref());
        debug!(
            pages = counts.len(),
            glyphs = counts.iter().sum::<usize>(),
            "glyph counts ready"
        );
        if sender.send(ViewerMessage::GlyphCounts(counts)).is_err() {
            debug!("viewer gone before glyph counts finished");
        }
    };
    match thread::Builder::new()
        .name("pdfscroll-glyph-count".into())
        .spawn(worker)
    {
        Ok(_) => true,
        Err(err) => {
            warn!(%err, "failed to spawn glyph count thread");
            false
        }
    }
}

/// Hands out document-wide glyph numbering. The first glyph of page `P` is
/// numbered with the total glyph count of pages `0..P`. Counts for the whole
/// document are supplied at once; until then no page can be numbered.
#[derive(Debug, Clone)]
pub struct GlyphIndexer {
    page_count: usize,
    counts: Option<Vec<usize>>,
}

impl GlyphIndexer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            counts: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.counts.is_some()
    }

    pub fn known_count(&self, page: usize) -> Option<usize> {
        self.counts.as_ref().and_then(|counts| counts.get(page).copied())
    }

    pub fn set_counts(&mut self, mut counts: Vec<usize>) {
        if counts.len() != self.page_count {
            warn!(
                expected = self.page_count,
                received = counts.len(),
                "glyph counts do not match the page count"
            );
            counts.resize(self.page_count, 0);
        }
        self.counts = Some(counts);
    }

    /// Prefix sum of the counts before `page`; `None` until counts arrive.
    pub fn first_index(&self, page: usize) -> Option<usize> {
        let counts = self.counts.as_ref()?;
        Some(counts[..page.min(counts.len())].iter().sum())
    }

    /// Extracts the page's glyphs into canvas space under `transform`.
    /// Returns `None` while the glyph counts are unknown.
    ///
    /// Glyphs beyond the counted number are dropped so numbering never
    /// overlaps the next page.
    pub fn extract_page(
        &self,
        backend: &dyn DocumentBackend,
        page: usize,
        transform: &PageTransform,
        params: HitTestParams,
    ) -> Option<PageText> {
        let first_index = self.first_index(page)?;
        let (mut raw, mode) = collect_raw_glyphs(backend, page);
        if let Some(counted) = self.known_count(page) {
            if counted != raw.len() {
                warn!(
                    page,
                    counted,
                    extracted = raw.len(),
                    "glyph count differs from extraction"
                );
                raw.truncate(counted);
            }
        }
        let text = PageText::new(page, first_index, raw, transform, params, mode);
        debug!(
            page,
            glyphs = text.glyphs().len(),
            first_index,
            cells = text.map().cell_count(),
            ?mode,
            "extracted page text"
        );
        Some(text)
    }
}

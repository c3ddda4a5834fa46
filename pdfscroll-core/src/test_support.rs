//! In-memory document used by the unit tests. Each page is a list of text
//! lines laid out on a fixed monospace grid.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::backend::{
    DocumentBackend, DocumentInfo, DocumentProvider, LinkDefinition, RawGlyph, RenderImage,
    RenderRequest, TextRun,
};
use crate::geometry::Rect;

pub const GLYPH_WIDTH: f32 = 6.0;
pub const LINE_HEIGHT: f32 = 10.0;
pub const LINE_PITCH: f32 = 20.0;
pub const MARGIN: f32 = 20.0;
pub const FONT_SIZE: f32 = 10.0;

#[derive(Debug, Clone)]
pub struct FakePage {
    pub size: (f32, f32),
    pub label: Option<String>,
    pub lines: Vec<String>,
    pub links: Vec<LinkDefinition>,
}

impl FakePage {
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            size: (300.0, 400.0),
            label: None,
            lines: lines.iter().map(|line| line.to_string()).collect(),
            links: Vec::new(),
        }
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Document-space box of character `column` on line `line`.
    pub fn glyph_rect(line: usize, column: usize) -> Rect {
        let x0 = MARGIN + column as f32 * GLYPH_WIDTH;
        let y0 = MARGIN + line as f32 * LINE_PITCH;
        Rect::new(x0, y0, x0 + GLYPH_WIDTH, y0 + LINE_HEIGHT)
    }

    fn glyphs(&self) -> Vec<RawGlyph> {
        self.lines
            .iter()
            .enumerate()
            .flat_map(|(line, text)| {
                text.chars().enumerate().map(move |(column, ch)| RawGlyph {
                    ch,
                    bbox: Self::glyph_rect(line, column),
                    font_size: FONT_SIZE,
                })
            })
            .collect()
    }

    fn runs(&self) -> Vec<TextRun> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.is_empty())
            .map(|(line, text)| {
                let last = text.chars().count() - 1;
                TextRun {
                    text: text.clone(),
                    bbox: Self::glyph_rect(line, 0).union(&Self::glyph_rect(line, last)),
                    font_size: FONT_SIZE,
                }
            })
            .collect()
    }
}

pub struct FakeBackend {
    info: DocumentInfo,
    pages: Vec<FakePage>,
    failing_glyphs: HashSet<usize>,
    failing_runs: HashSet<usize>,
    failing_links: HashSet<usize>,
    failing_renders: HashSet<usize>,
    failing_searches: HashSet<usize>,
    renders: AtomicUsize,
    glyph_extractions: AtomicUsize,
}

impl FakeBackend {
    pub fn new(pages: Vec<FakePage>) -> Self {
        Self {
            info: DocumentInfo {
                path: PathBuf::from("/tmp/fake.pdf"),
                page_count: pages.len(),
            },
            pages,
            failing_glyphs: HashSet::new(),
            failing_runs: HashSet::new(),
            failing_links: HashSet::new(),
            failing_renders: HashSet::new(),
            failing_searches: HashSet::new(),
            renders: AtomicUsize::new(0),
            glyph_extractions: AtomicUsize::new(0),
        }
    }

    pub fn with_path(mut self, path: &Path) -> Self {
        self.info.path = path.to_path_buf();
        self
    }

    pub fn fail_glyphs_on(&mut self, page: usize) {
        self.failing_glyphs.insert(page);
    }

    pub fn fail_runs_on(&mut self, page: usize) {
        self.failing_runs.insert(page);
    }

    pub fn fail_links_on(&mut self, page: usize) {
        self.failing_links.insert(page);
    }

    pub fn fail_render_on(&mut self, page: usize) {
        self.failing_renders.insert(page);
    }

    pub fn fail_search_on(&mut self, page: usize) {
        self.failing_searches.insert(page);
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Calls to `page_glyphs`, the only path that builds glyph boxes.
    pub fn glyph_extractions(&self) -> usize {
        self.glyph_extractions.load(Ordering::SeqCst)
    }

    fn page(&self, page_index: usize) -> Result<&FakePage> {
        self.pages
            .get(page_index)
            .ok_or_else(|| anyhow!("page {page_index} out of range"))
    }
}

impl DocumentBackend for FakeBackend {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page_index: usize) -> Result<(f32, f32)> {
        Ok(self.page(page_index)?.size)
    }

    fn page_label(&self, page_index: usize) -> Option<String> {
        self.pages.get(page_index).and_then(|page| page.label.clone())
    }

    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        if self.failing_renders.contains(&request.page_index) {
            return Err(anyhow!("render failed"));
        }
        let (width, height) = self.page(request.page_index)?.size;
        self.renders.fetch_add(1, Ordering::SeqCst);
        let width = (width * request.scale).round().max(1.0) as u32;
        let height = (height * request.scale).round().max(1.0) as u32;
        Ok(RenderImage {
            width,
            height,
            pixels: vec![255; (width * height * 4) as usize],
        })
    }

    fn page_glyphs(&self, page_index: usize) -> Result<Vec<RawGlyph>> {
        if self.failing_glyphs.contains(&page_index) {
            return Err(anyhow!("no glyph boxes"));
        }
        self.glyph_extractions.fetch_add(1, Ordering::SeqCst);
        Ok(self.page(page_index)?.glyphs())
    }

    fn page_glyph_count(&self, page_index: usize) -> Result<usize> {
        if self.failing_glyphs.contains(&page_index) {
            return Err(anyhow!("no glyph boxes"));
        }
        let page = self.page(page_index)?;
        Ok(page.lines.iter().map(|line| line.chars().count()).sum())
    }

    fn page_text_runs(&self, page_index: usize) -> Result<Vec<TextRun>> {
        if self.failing_runs.contains(&page_index) {
            return Err(anyhow!("no text runs"));
        }
        Ok(self.page(page_index)?.runs())
    }

    fn page_links(&self, page_index: usize) -> Result<Vec<LinkDefinition>> {
        if self.failing_links.contains(&page_index) {
            return Err(anyhow!("broken annotations"));
        }
        Ok(self.page(page_index)?.links.clone())
    }

    fn search_page(&self, page_index: usize, query: &str) -> Result<Vec<Rect>> {
        if self.failing_searches.contains(&page_index) {
            return Err(anyhow!("search failed"));
        }
        let needle: Vec<char> = query.chars().map(|c| c.to_ascii_lowercase()).collect();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let mut rects = Vec::new();
        for (line, text) in self.page(page_index)?.lines.iter().enumerate() {
            let haystack: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
            if haystack.len() < needle.len() {
                continue;
            }
            for start in 0..=haystack.len() - needle.len() {
                if haystack[start..start + needle.len()] == needle[..] {
                    let first = FakePage::glyph_rect(line, start);
                    let last = FakePage::glyph_rect(line, start + needle.len() - 1);
                    rects.push(first.union(&last));
                }
            }
        }
        Ok(rects)
    }
}

/// Opens every path as the same set of pages.
pub struct FakeProvider {
    pub pages: Vec<FakePage>,
}

#[async_trait::async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        if path.extension().map_or(true, |ext| ext != "pdf") {
            return Err(anyhow!("not a pdf: {}", path.display()));
        }
        Ok(Arc::new(FakeBackend::new(self.pages.clone()).with_path(path)))
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::geometry::Rect;
use crate::links::LinkTarget;

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
        }
    }
}

/// RGBA8 pixels, row-major, `width * height * 4` bytes.
#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A single character with its own box, in document space.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGlyph {
    pub ch: char,
    pub bbox: Rect,
    pub font_size: f32,
}

/// A run of text that only carries a box for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub bbox: Rect,
    pub font_size: f32,
}

/// A link annotation in document space.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDefinition {
    pub rect: Rect,
    pub target: LinkTarget,
}

/// Decodes one document. All geometry is in document space with a top-left
/// origin; the core applies the page transform itself.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_count(&self) -> usize {
        self.info().page_count
    }

    /// `(width, height)` in document units.
    fn page_size(&self, page_index: usize) -> Result<(f32, f32)>;

    /// Logical page name, `None` when the document does not define one.
    fn page_label(&self, page_index: usize) -> Option<String>;

    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;

    /// Glyph-level boxes in reading order. Errors when the backend cannot
    /// produce per-glyph geometry for the page.
    fn page_glyphs(&self, page_index: usize) -> Result<Vec<RawGlyph>>;

    /// Number of glyphs [`DocumentBackend::page_glyphs`] yields for the page.
    /// Backends should override this with a lookup that skips building boxes.
    fn page_glyph_count(&self, page_index: usize) -> Result<usize> {
        self.page_glyphs(page_index).map(|glyphs| glyphs.len())
    }

    /// Coarser text runs used when [`DocumentBackend::page_glyphs`] fails.
    fn page_text_runs(&self, page_index: usize) -> Result<Vec<TextRun>>;

    fn page_links(&self, page_index: usize) -> Result<Vec<LinkDefinition>>;

    /// One rectangle per occurrence of `query` on the page.
    fn search_page(&self, page_index: usize, query: &str) -> Result<Vec<Rect>>;

    fn close(&self) {}
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}

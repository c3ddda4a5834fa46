use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::backend::{DocumentBackend, RenderImage, RenderRequest};
use crate::error::{ViewerError, ViewerResult};
use crate::geometry::PageTransform;
use crate::layout::{Generation, LayoutManager};
use crate::links::{extract_links, Link};
use crate::text_index::{GlyphIndexer, HitTestParams, PageText};

/// Everything derived from one page under one layout generation. `text` is
/// `None` until the document's glyph counts are known.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub image: Arc<RenderImage>,
    pub transform: PageTransform,
    pub text: Option<PageText>,
    pub links: Vec<Link>,
}

/// Rendered pages with their text and links, all valid for a single
/// [`Generation`]. Pages are never evicted within a generation; moving to a
/// new generation drops everything at once.
#[derive(Debug)]
pub struct RenderCache {
    generation: Option<Generation>,
    pages: BTreeMap<usize, CachedPage>,
    indexer: GlyphIndexer,
}

impl RenderCache {
    pub fn new(page_count: usize) -> Self {
        Self {
            generation: None,
            pages: BTreeMap::new(),
            indexer: GlyphIndexer::new(page_count),
        }
    }

    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// Whether glyph numbering is available, so cached pages can carry text.
    pub fn is_indexed(&self) -> bool {
        self.indexer.is_ready()
    }

    pub fn set_glyph_counts(&mut self, counts: Vec<usize>) {
        self.indexer.set_counts(counts);
    }

    /// Switches to `generation`, clearing all cached data when it differs.
    /// Returns whether anything was invalidated.
    pub fn set_generation(&mut self, generation: Generation) -> bool {
        if self.generation == Some(generation) {
            return false;
        }
        debug!(
            ?generation,
            dropped = self.pages.len(),
            "render cache generation changed"
        );
        self.generation = Some(generation);
        self.pages.clear();
        true
    }

    pub fn clear(&mut self) {
        self.generation = None;
        self.pages.clear();
    }

    /// Cached data for `page`, only if it was produced under `generation`.
    pub fn get(&self, generation: Generation, page: usize) -> Option<&CachedPage> {
        if self.generation != Some(generation) {
            return None;
        }
        self.pages.get(&page)
    }

    /// Text of every page cached under `generation`, in page order.
    pub fn texts(&self, generation: Generation) -> impl Iterator<Item = &PageText> + '_ {
        let current = self.generation == Some(generation);
        self.pages
            .values()
            .filter(move |_| current)
            .filter_map(|cached| cached.text.as_ref())
    }

    pub fn cached_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Renders and indexes every page in `visible` that is missing for the
    /// layout's current generation. Returns the pages that were added or
    /// gained text.
    ///
    /// A rasterization failure is fatal and reported with the document path;
    /// text and link extraction failures only leave that page without data.
    /// Before glyph counts arrive pages are rendered without text, and their
    /// text is filled in on the first call after.
    #[instrument(skip(self, backend, layout, params), fields(visible = visible.len()))]
    pub fn ensure_rendered(
        &mut self,
        backend: &dyn DocumentBackend,
        layout: &LayoutManager,
        visible: &[usize],
        params: HitTestParams,
    ) -> ViewerResult<Vec<usize>> {
        self.set_generation(layout.generation());
        let mut added = Vec::new();
        for &page in visible {
            if let Some(cached) = self.pages.get_mut(&page) {
                if cached.text.is_none() {
                    cached.text =
                        self.indexer.extract_page(backend, page, &cached.transform, params);
                    if cached.text.is_some() {
                        added.push(page);
                    }
                }
                continue;
            }
            let Some(transform) = layout.transform_for(page) else {
                continue;
            };
            let image = backend
                .render_page(RenderRequest {
                    page_index: page,
                    scale: transform.scale,
                })
                .map_err(|source| ViewerError::Render {
                    path: backend.info().path.clone(),
                    page,
                    source,
                })?;
            let text = self.indexer.extract_page(backend, page, &transform, params);
            let links = extract_links(backend, page, &transform);
            debug!(
                page,
                width = image.width,
                height = image.height,
                "rendered page"
            );
            self.pages.insert(
                page,
                CachedPage {
                    image: Arc::new(image),
                    transform,
                    text,
                    links,
                },
            );
            added.push(page);
        }
        Ok(added)
    }
}

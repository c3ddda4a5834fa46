use tracing::{debug, warn};

use crate::geometry::PageTransform;

/// Geometry of one page on the canvas at the current zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl PageLayout {
    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// The page under the viewport centre and how far down that page the
/// centre sits, as a fraction of the page height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub page_index: usize,
    pub relative_pos: f32,
}

/// Cache key for everything derived from the layout. Two layouts with the
/// same generation place every page and glyph at the same canvas position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation {
    zoom_milli: u32,
    viewport_width: u32,
}

impl Generation {
    pub fn new(zoom: f32, viewport_width: f32) -> Self {
        Self {
            zoom_milli: quantize_scale(zoom),
            viewport_width: viewport_width.max(0.0).round() as u32,
        }
    }
}

fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Stacks every page vertically, centred horizontally in the viewport.
#[derive(Debug, Clone)]
pub struct LayoutManager {
    page_sizes: Vec<(f32, f32)>,
    page_gap: f32,
    fit_margin: f32,
    min_zoom: f32,
    base_zoom: f32,
    zoom_level: f32,
    viewport_width: f32,
    pages: Vec<PageLayout>,
    total_height: f32,
}

impl LayoutManager {
    pub fn new(page_sizes: Vec<(f32, f32)>, page_gap: f32, fit_margin: f32, min_zoom: f32) -> Self {
        Self {
            page_sizes,
            page_gap,
            fit_margin,
            min_zoom: min_zoom.max(f32::EPSILON),
            base_zoom: 1.0,
            zoom_level: 1.0,
            viewport_width: 0.0,
            pages: Vec::new(),
            total_height: page_gap,
        }
    }

    pub fn pages(&self) -> &[PageLayout] {
        &self.pages
    }

    pub fn page(&self, page_index: usize) -> Option<&PageLayout> {
        self.pages.get(page_index)
    }

    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    pub fn zoom_level(&self) -> f32 {
        self.zoom_level
    }

    pub fn base_zoom(&self) -> f32 {
        self.base_zoom
    }

    /// The factor applied to document units: fit-to-width base times the
    /// user zoom.
    pub fn final_zoom(&self) -> f32 {
        self.base_zoom * self.zoom_level
    }

    pub fn viewport_width(&self) -> f32 {
        self.viewport_width
    }

    pub fn total_height(&self) -> f32 {
        self.total_height
    }

    pub fn generation(&self) -> Generation {
        Generation::new(self.final_zoom(), self.viewport_width)
    }

    /// Derives the base zoom from the first page so it fills the viewport
    /// width minus the margin, and resets the user zoom to 1.0.
    pub fn fit_to_width(&mut self, viewport_width: f32) {
        let first_width = self.page_sizes.first().map(|(w, _)| *w).unwrap_or(0.0);
        let available = viewport_width - self.fit_margin;
        self.base_zoom = if first_width > 0.0 && available > 0.0 {
            available / first_width
        } else {
            warn!(
                first_width,
                viewport_width, "cannot fit page to width, falling back to zoom 1.0"
            );
            1.0
        };
        self.zoom_level = 1.0;
    }

    pub fn compute_layout(&mut self, zoom_level: f32, viewport_width: f32) -> &[PageLayout] {
        self.zoom_level = if zoom_level.is_finite() {
            zoom_level.max(self.min_zoom)
        } else {
            1.0
        };
        self.viewport_width = viewport_width.max(0.0);
        let zoom = self.final_zoom();

        self.pages.clear();
        let mut top = self.page_gap;
        for (width, height) in &self.page_sizes {
            let layout = PageLayout {
                top,
                width: width * zoom,
                height: height * zoom,
            };
            top += layout.height + self.page_gap;
            self.pages.push(layout);
        }
        self.total_height = top;
        debug!(
            pages = self.pages.len(),
            zoom,
            total_height = self.total_height,
            "computed layout"
        );
        &self.pages
    }

    pub fn transform_for(&self, page_index: usize) -> Option<PageTransform> {
        let layout = self.pages.get(page_index)?;
        let offset_x = (self.viewport_width - layout.width) / 2.0;
        Some(PageTransform::new(self.final_zoom(), offset_x, layout.top))
    }

    pub fn page_at(&self, canvas_y: f32) -> Option<usize> {
        self.pages
            .iter()
            .position(|layout| layout.top <= canvas_y && canvas_y <= layout.bottom())
    }

    /// Pages that intersect the vertical range `[top, top + height)`.
    pub fn visible_pages(&self, scroll_top: f32, viewport_height: f32) -> Vec<usize> {
        let bottom = scroll_top + viewport_height;
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, layout)| layout.bottom() > scroll_top && layout.top < bottom)
            .map(|(index, _)| index)
            .collect()
    }

    /// The page occupying the largest share of the viewport.
    pub fn most_visible_page(&self, scroll_top: f32, viewport_height: f32) -> usize {
        let bottom = scroll_top + viewport_height;
        let mut best = 0;
        let mut best_visible = -1.0;
        for (index, layout) in self.pages.iter().enumerate() {
            let visible = (layout.bottom().min(bottom) - layout.top.max(scroll_top)).max(0.0);
            if visible > best_visible {
                best_visible = visible;
                best = index;
            }
        }
        best
    }

    pub fn capture_anchor(&self, scroll_top: f32, viewport_height: f32) -> Option<ScrollAnchor> {
        if self.pages.is_empty() || self.total_height <= 0.0 {
            return None;
        }
        let center = scroll_top + viewport_height / 2.0;
        self.pages
            .iter()
            .enumerate()
            .find(|(_, layout)| layout.top <= center && center < layout.bottom())
            .filter(|(_, layout)| layout.height > 0.0)
            .map(|(page_index, layout)| ScrollAnchor {
                page_index,
                relative_pos: (center - layout.top) / layout.height,
            })
    }

    /// Viewport top edge that puts the anchor back under the viewport centre.
    pub fn anchor_scroll_top(&self, anchor: &ScrollAnchor, viewport_height: f32) -> Option<f32> {
        let layout = self.pages.get(anchor.page_index)?;
        let center = layout.top + layout.height * anchor.relative_pos;
        Some(center - viewport_height / 2.0)
    }
}

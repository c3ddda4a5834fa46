use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfscroll_core::{
    DestinationPoint, DocumentBackend, DocumentInfo, DocumentProvider, LinkDefinition,
    LinkTarget, Point, RawGlyph, Rect, RenderImage, RenderRequest, TextRun,
};
use tracing::{debug, instrument, warn};

/// Environment variable naming an explicit pdfium shared library.
pub const PDFIUM_LIBRARY_ENV: &str = "PDFSCROLL_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let document = PdfiumDocument::new(Arc::clone(&self.pdfium), absolute);
        let info = document.with_document(|pdf| Ok(build_document_info(pdf, &document.path)))?;
        Ok(Arc::new(document.with_info(info)))
    }
}

struct PdfiumDocument {
    path: PathBuf,
    info: DocumentInfo,
    last_render: Mutex<Option<RenderCacheEntry>>,
    // Declared before `pdfium` so it drops first.
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    page_index: usize,
    scale: f32,
    image: RenderImage,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf) -> Self {
        Self {
            info: DocumentInfo {
                path: path.clone(),
                page_count: 0,
            },
            path,
            last_render: Mutex::new(None),
            document: Mutex::new(None),
            pdfium,
        }
    }

    fn with_info(mut self, info: DocumentInfo) -> Self {
        self.info = info;
        self
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It is only ever
        // stored in `self.document`, which is declared before `pdfium` and therefore dropped
        // first, so the borrow never outlives the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        match guard.as_ref() {
            Some(document) => f(document),
            None => Err(anyhow!("document {:?} is not loaded", self.path)),
        }
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        self.with_document(|document| f(&page_at(document, page_index)?))
    }

    fn render_internal(&self, page: &PdfPage<'_>, request: &RenderRequest) -> Result<RenderImage> {
        let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.01));
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let pixels = bitmap.as_image().to_rgba8().into_raw();
        Ok(RenderImage {
            width: u32::try_from(bitmap.width()).unwrap_or_default(),
            height: u32::try_from(bitmap.height()).unwrap_or_default(),
            pixels,
        })
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page_index: usize) -> Result<(f32, f32)> {
        self.with_page(page_index, |page| Ok((page.width().value, page.height().value)))
    }

    fn page_label(&self, page_index: usize) -> Option<String> {
        self.with_page(page_index, |page| Ok(page.label().map(str::to_owned)))
            .unwrap_or_else(|err| {
                warn!(?err, page = page_index, "failed to read page label");
                None
            })
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        {
            let cache = self.last_render.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page_index == request.page_index
                    && (entry.scale - request.scale).abs() < f32::EPSILON
                {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image =
            self.with_page(request.page_index, |page| self.render_internal(page, &request))?;

        *self.last_render.lock() = Some(RenderCacheEntry {
            page_index: request.page_index,
            scale: request.scale,
            image: image.clone(),
        });
        Ok(image)
    }

    fn page_glyphs(&self, page_index: usize) -> Result<Vec<RawGlyph>> {
        self.with_page(page_index, |page| {
            let height = page.height().value;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            let mut glyphs = Vec::new();
            for char in text.chars().iter() {
                // Kept even without a mapping so the count matches `page_glyph_count`.
                let ch = char.unicode_char().unwrap_or(char::REPLACEMENT_CHARACTER);
                let bounds = char
                    .loose_bounds()
                    .with_context(|| format!("no glyph bounds on page {}", page_index))?;
                glyphs.push(RawGlyph {
                    ch,
                    bbox: to_top_left(&bounds, height),
                    font_size: char.scaled_font_size().value,
                });
            }
            debug!(page = page_index, glyphs = glyphs.len(), "extracted glyphs");
            Ok(glyphs)
        })
    }

    fn page_glyph_count(&self, page_index: usize) -> Result<usize> {
        self.with_page(page_index, |page| {
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            Ok(usize::try_from(text.chars().len()).unwrap_or_default())
        })
    }

    fn page_text_runs(&self, page_index: usize) -> Result<Vec<TextRun>> {
        self.with_page(page_index, |page| {
            let height = page.height().value;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            let runs = text
                .segments()
                .iter()
                .map(|segment| {
                    let bbox = to_top_left(&segment.bounds(), height);
                    TextRun {
                        text: segment.text(),
                        font_size: bbox.height(),
                        bbox,
                    }
                })
                .filter(|run| !run.text.is_empty())
                .collect();
            Ok(runs)
        })
    }

    fn page_links(&self, page_index: usize) -> Result<Vec<LinkDefinition>> {
        self.with_document(|document| {
            let page = page_at(document, page_index)?;
            let height = page.height().value;

            let mut definitions = Vec::new();
            for link in page.links().iter() {
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(
                            ?err,
                            page = page_index,
                            path = %self.path.display(),
                            "failed to resolve link rectangle"
                        );
                        continue;
                    }
                };
                let Some(target) = link_target(document, &link) else {
                    continue;
                };
                definitions.push(LinkDefinition {
                    rect: to_top_left(&rect, height),
                    target,
                });
            }
            Ok(definitions)
        })
    }

    fn search_page(&self, page_index: usize, query: &str) -> Result<Vec<Rect>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.with_page(page_index, |page| {
            let height = page.height().value;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            let search = text
                .search(query, &PdfSearchOptions::new())
                .with_context(|| format!("failed to perform search on page {}", page_index))?;

            let mut results = Vec::new();
            while let Some(segments) = search.find_next() {
                let rects: Vec<Rect> = segments
                    .iter()
                    .map(|segment| to_top_left(&segment.bounds(), height))
                    .collect();
                if let Some(bounds) = Rect::bounding(rects.iter()) {
                    results.push(bounds);
                }
            }
            Ok(results)
        })
    }

    fn close(&self) {
        self.last_render.lock().take();
        if self.document.lock().take().is_some() {
            debug!(path = %self.path.display(), "released pdf document");
        }
    }
}

/// PDF space has its origin at the bottom-left corner.
fn to_top_left(rect: &PdfRect, page_height: f32) -> Rect {
    Rect::new(
        rect.left().value,
        page_height - rect.top().value,
        rect.right().value,
        page_height - rect.bottom().value,
    )
}

fn link_target(document: &PdfDocument<'_>, link: &PdfLink<'_>) -> Option<LinkTarget> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                let destination = action.as_local_destination_action()?.destination().ok()?;
                let page = destination.page_index().ok()? as usize;
                let point = destination_y(document, &destination, page)
                    .map(|y| Point::new(0.0, y));
                return Some(LinkTarget::Goto { page, point });
            }
            PdfActionType::Uri => {
                let uri = action.as_uri_action()?.uri().ok()?;
                return (!uri.is_empty()).then_some(LinkTarget::Uri { uri });
            }
            PdfActionType::GoToDestinationInRemoteDocument => {
                return Some(LinkTarget::GotoRemote);
            }
            _ => {}
        }
    }

    // Links carrying a bare destination and no action.
    let destination = link.destination()?;
    let page = destination.page_index().ok().map(|page| page as usize);
    let point = page
        .and_then(|page| destination_y(document, &destination, page))
        .map(|y| DestinationPoint { page, y });
    Some(LinkTarget::NamedDestination {
        page,
        point,
    })
}

fn destination_y(
    document: &PdfDocument<'_>,
    destination: &PdfDestination<'_>,
    page_index: usize,
) -> Option<f32> {
    let y = match destination.view_settings().ok()? {
        PdfDestinationViewSettings::SpecificCoordinatesAndZoom(_, y, _) => y?,
        PdfDestinationViewSettings::FitPageHorizontallyToWindow(y) => y?,
        PdfDestinationViewSettings::FitBoundsHorizontallyToWindow(y) => y?,
        _ => return None,
    };
    let height = page_at(document, page_index).ok()?.height().value;
    Some(height - y.value)
}

fn page_at<'a>(document: &PdfDocument<'a>, page_index: usize) -> Result<PdfPage<'a>> {
    let index: PdfPageIndex = page_index
        .try_into()
        .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
    document
        .pages()
        .get(index)
        .with_context(|| format!("page {} out of range", page_index))
}

fn build_document_info(document: &PdfDocument<'_>, path: &Path) -> DocumentInfo {
    DocumentInfo {
        path: path.to_path_buf(),
        page_count: usize::try_from(document.pages().len()).unwrap_or_default(),
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var(PDFIUM_LIBRARY_ENV).ok()?;
    if path.is_empty() {
        return None;
    }
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(path = %path, %err, "failed to load pdfium from {}", PDFIUM_LIBRARY_ENV);
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}

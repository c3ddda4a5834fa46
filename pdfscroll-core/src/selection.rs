use tracing::debug;

use crate::geometry::Rect;
use crate::text_index::{Glyph, PageText};

/// Address of a glyph; orders by page first, then by global index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlyphPos {
    pub page: usize,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    Dragging,
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub anchor: GlyphPos,
    pub cursor: GlyphPos,
}

impl Selection {
    /// `(start, end)` with the lower position first.
    pub fn normalized(&self) -> (GlyphPos, GlyphPos) {
        if self.anchor <= self.cursor {
            (self.anchor, self.cursor)
        } else {
            (self.cursor, self.anchor)
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        let (start, end) = self.normalized();
        start.index <= index && index <= end.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionParams {
    pub line_tolerance: f32,
    pub run_gap: f32,
    pub word_gap: f32,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            line_tolerance: 5.0,
            run_gap: 10.0,
            word_gap: 3.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectionModel {
    state: SelectionState,
    selection: Option<Selection>,
    params: SelectionParams,
}

impl SelectionModel {
    pub fn new(params: SelectionParams) -> Self {
        Self {
            state: SelectionState::Idle,
            selection: None,
            params,
        }
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn begin(&mut self, at: GlyphPos) {
        self.selection = Some(Selection {
            anchor: at,
            cursor: at,
        });
        self.state = SelectionState::Dragging;
    }

    /// Moves the cursor while dragging. Returns whether it changed.
    pub fn update(&mut self, at: GlyphPos) -> bool {
        if self.state != SelectionState::Dragging {
            return false;
        }
        match self.selection.as_mut() {
            Some(selection) if selection.cursor != at => {
                selection.cursor = at;
                true
            }
            _ => false,
        }
    }

    pub fn commit(&mut self, at: Option<GlyphPos>) {
        if self.state != SelectionState::Dragging {
            return;
        }
        if let Some(at) = at {
            self.update(at);
        }
        self.state = SelectionState::Committed;
        debug!(selection = ?self.selection, "selection committed");
    }

    pub fn clear(&mut self) {
        if self.state != SelectionState::Idle {
            debug!("selection cleared");
        }
        self.state = SelectionState::Idle;
        self.selection = None;
    }

    /// Selects the word around `index` on `text`, bounded to the glyph's
    /// visual line. Returns `false` when the glyph is not on that page.
    pub fn select_word(&mut self, text: &PageText, index: usize) -> bool {
        let Some((first, last)) = word_bounds(text, index, &self.params) else {
            return false;
        };
        let page = text.page();
        self.selection = Some(Selection {
            anchor: GlyphPos { page, index: first },
            cursor: GlyphPos { page, index: last },
        });
        self.state = SelectionState::Committed;
        debug!(first, last, "word selected");
        true
    }

    /// Highlight rectangles for the current selection, drawn from the glyphs
    /// of `pages` that fall inside it.
    pub fn highlight_rects<'a>(&self, pages: impl IntoIterator<Item = &'a PageText>) -> Vec<Rect> {
        match self.selection {
            Some(selection) => {
                let glyphs = selected_glyphs(&selection, pages);
                line_runs(&glyphs, &self.params)
            }
            None => Vec::new(),
        }
    }

    /// Selected characters in index order, trimmed at both ends.
    pub fn selected_text<'a>(&self, pages: impl IntoIterator<Item = &'a PageText>) -> String {
        match self.selection {
            Some(selection) => {
                let text: String = selected_glyphs(&selection, pages)
                    .iter()
                    .map(|glyph| glyph.ch)
                    .collect();
                text.trim().to_string()
            }
            None => String::new(),
        }
    }
}

fn selected_glyphs<'a>(
    selection: &Selection,
    pages: impl IntoIterator<Item = &'a PageText>,
) -> Vec<&'a Glyph> {
    let (start, end) = selection.normalized();
    let mut glyphs: Vec<&Glyph> = pages
        .into_iter()
        .filter(|text| start.page <= text.page() && text.page() <= end.page)
        .flat_map(|text| text.glyphs())
        .filter(|glyph| start.index <= glyph.global_index && glyph.global_index <= end.index)
        .collect();
    glyphs.sort_by_key(|glyph| glyph.global_index);
    glyphs
}

/// Groups glyphs (in index order) into visual lines and splits each line
/// into horizontally contiguous runs, one rectangle per run.
pub fn line_runs(glyphs: &[&Glyph], params: &SelectionParams) -> Vec<Rect> {
    let mut lines: Vec<Vec<&Glyph>> = Vec::new();
    for &glyph in glyphs {
        let same_line = lines.last().and_then(|line| line.first()).map_or(false, |head| {
            head.page == glyph.page
                && (head.bbox.center_y() - glyph.bbox.center_y()).abs() <= params.line_tolerance
        });
        if same_line {
            if let Some(line) = lines.last_mut() {
                line.push(glyph);
            }
        } else {
            lines.push(vec![glyph]);
        }
    }

    let mut rects = Vec::new();
    for mut line in lines {
        line.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
        let mut run: Option<Rect> = None;
        for glyph in line {
            run = match run {
                Some(current) if glyph.bbox.x0 - current.x1 <= params.run_gap => {
                    Some(current.union(&glyph.bbox))
                }
                Some(current) => {
                    rects.push(current);
                    Some(glyph.bbox)
                }
                None => Some(glyph.bbox),
            };
        }
        rects.extend(run);
    }
    rects
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '-'
}

fn word_bounds(text: &PageText, index: usize, params: &SelectionParams) -> Option<(usize, usize)> {
    let clicked = text.glyph(index)?;
    if !is_word_char(clicked.ch) {
        return Some((index, index));
    }
    let mut line: Vec<&Glyph> = text
        .glyphs()
        .iter()
        .filter(|glyph| {
            (glyph.bbox.center_y() - clicked.bbox.center_y()).abs() <= params.line_tolerance
        })
        .collect();
    line.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
    let position = line
        .iter()
        .position(|glyph| glyph.global_index == index)?;

    let mut left = position;
    while left > 0 {
        let (prev, current) = (line[left - 1], line[left]);
        if !is_word_char(prev.ch) || current.bbox.x0 - prev.bbox.x1 > params.word_gap {
            break;
        }
        left -= 1;
    }
    let mut right = position;
    while right + 1 < line.len() {
        let (current, next) = (line[right], line[right + 1]);
        if !is_word_char(next.ch) || next.bbox.x0 - current.bbox.x1 > params.word_gap {
            break;
        }
        right += 1;
    }

    let span = &line[left..=right];
    let first = span.iter().map(|glyph| glyph.global_index).min()?;
    let last = span.iter().map(|glyph| glyph.global_index).max()?;
    Some((first, last))
}

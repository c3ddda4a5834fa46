use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEventKind},
    terminal::{Clear, ClearType, WindowSize},
};
use image::RgbaImage;
use pdfscroll_core::{CursorStyle, ViewerInput};
use png::{BitDepth, ColorType, Encoder};

pub mod compose;

pub use compose::compose;

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it at the cursor, replacing the
    /// previous frame in place.
    pub fn draw(&mut self, image: &RgbaImage, params: DrawParams) -> Result<()> {
        let (width, height) = image.dimensions();
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, width, height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    width,
                    height,
                    u8::from(more)
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", u8::from(more))?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every image this renderer placed.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Asks the terminal for a mouse pointer shape (OSC 22). Terminals that
    /// do not know the sequence ignore it.
    pub fn set_pointer_shape(&mut self, style: CursorStyle) -> Result<()> {
        write!(self.writer, "\u{1b}]22;{}\u{1b}\\", pointer_shape(style))?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

pub fn pointer_shape(style: CursorStyle) -> &'static str {
    match style {
        CursorStyle::Default => "default",
        CursorStyle::Text => "text",
        CursorStyle::Link => "pointer",
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

/// Terminal grid and pixel size. The last row is kept for the status line;
/// everything above it is the viewer's viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    pub columns: u16,
    pub rows: u16,
    pub cell_width: f32,
    pub cell_height: f32,
}

impl CellGeometry {
    /// Used when the terminal does not report its pixel size.
    pub const FALLBACK_CELL: (f32, f32) = (8.0, 16.0);

    pub fn from_window(size: WindowSize) -> Self {
        let columns = size.columns.max(1);
        let rows = size.rows.max(1);
        let (cell_width, cell_height) = if size.width == 0 || size.height == 0 {
            Self::FALLBACK_CELL
        } else {
            (
                f32::from(size.width) / f32::from(columns),
                f32::from(size.height) / f32::from(rows),
            )
        };
        Self {
            columns,
            rows,
            cell_width,
            cell_height,
        }
    }

    pub fn viewport_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }

    pub fn status_row(&self) -> u16 {
        self.rows.saturating_sub(1)
    }

    /// Viewport size in pixels.
    pub fn viewport(&self) -> (f32, f32) {
        (
            f32::from(self.columns) * self.cell_width,
            f32::from(self.viewport_rows()) * self.cell_height,
        )
    }

    /// Centre of a cell in viewport pixels.
    pub fn to_pixels(&self, column: u16, row: u16) -> (f32, f32) {
        (
            (f32::from(column) + 0.5) * self.cell_width,
            (f32::from(row) + 0.5) * self.cell_height,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Viewer(ViewerInput),
    /// The prompt text changed; redraw the status line.
    PromptChanged,
    PromptCancelled,
    Resized,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
    GoToPage,
}

/// Turns crossterm key and mouse events into viewer input. Keeps the
/// numeric prefix, the prompt being typed and the last press used for
/// double-click detection.
#[derive(Debug)]
pub struct EventMapper {
    geometry: CellGeometry,
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    prompt: String,
    last_press: Option<(u16, u16, Instant)>,
    scroll_step: f32,
}

impl EventMapper {
    pub const DOUBLE_CLICK: Duration = Duration::from_millis(400);

    /// `scroll_step` is the distance in pixels of one `j`/`k` press.
    pub fn new(geometry: CellGeometry, scroll_step: f32) -> Self {
        Self {
            geometry,
            scroll_step,
            pending_count: None,
            pending_digits: String::new(),
            mode: InputMode::Normal,
            prompt: String::new(),
            last_press: None,
        }
    }

    pub fn geometry(&self) -> CellGeometry {
        self.geometry
    }

    pub fn set_geometry(&mut self, geometry: CellGeometry) {
        self.geometry = geometry;
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.prompt.clear();
            self.mode = mode;
        }
    }

    pub fn map_event(&mut self, event: Event, now: Instant) -> UiEvent {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Search | InputMode::GoToPage => self.map_key_prompt(key),
            },
            Event::Mouse(mouse) => {
                let (x, y) = self.geometry.to_pixels(mouse.column, mouse.row);
                let input = match mouse.kind {
                    MouseEventKind::Down(MouseButton::Left) => {
                        if self.is_double_click(mouse.column, mouse.row, now) {
                            self.last_press = None;
                            ViewerInput::DoubleClick { x, y }
                        } else {
                            self.last_press = Some((mouse.column, mouse.row, now));
                            ViewerInput::PointerDown { x, y }
                        }
                    }
                    MouseEventKind::Drag(MouseButton::Left) => ViewerInput::PointerDrag { x, y },
                    MouseEventKind::Up(MouseButton::Left) => ViewerInput::PointerUp { x, y },
                    MouseEventKind::Down(MouseButton::Right) => ViewerInput::Copy,
                    MouseEventKind::Moved => ViewerInput::PointerMove { x, y },
                    MouseEventKind::ScrollUp => ViewerInput::Wheel {
                        delta: 1,
                        zoom_modifier: mouse.modifiers.contains(KeyModifiers::CONTROL),
                    },
                    MouseEventKind::ScrollDown => ViewerInput::Wheel {
                        delta: -1,
                        zoom_modifier: mouse.modifiers.contains(KeyModifiers::CONTROL),
                    },
                    _ => return UiEvent::None,
                };
                UiEvent::Viewer(input)
            }
            Event::Resize(..) => UiEvent::Resized,
            _ => UiEvent::None,
        }
    }

    fn is_double_click(&self, column: u16, row: u16, now: Instant) -> bool {
        matches!(
            self.last_press,
            Some((last_column, last_row, at))
                if last_column == column
                    && last_row == row
                    && now.saturating_duration_since(at) <= Self::DOUBLE_CLICK
        )
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match (code, modifiers) {
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.viewer(ViewerInput::Copy)
            }
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('y'), _) => self.viewer(ViewerInput::Copy),
            (KeyCode::Char('/'), _) => {
                self.set_mode(InputMode::Search);
                UiEvent::PromptChanged
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::GoToPage);
                UiEvent::PromptChanged
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => self.viewer(ViewerInput::NextMatch),
            (KeyCode::Char('N'), modifiers)
                if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
            {
                self.viewer(ViewerInput::PreviousMatch)
            }
            (KeyCode::Char('+'), _) => self.viewer(ViewerInput::ZoomIn),
            (KeyCode::Char('-'), _) => self.viewer(ViewerInput::ZoomOut),
            (KeyCode::Char('='), _) => self.viewer(ViewerInput::ZoomReset),
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, _) => {
                let count = self.take_count() as f32;
                UiEvent::Viewer(ViewerInput::ScrollBy(self.scroll_step * count))
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) => {
                let count = self.take_count() as f32;
                UiEvent::Viewer(ViewerInput::ScrollBy(-self.scroll_step * count))
            }
            (KeyCode::PageDown, _) | (KeyCode::Char(' '), _) => {
                let count = self.take_count() as f32;
                UiEvent::Viewer(ViewerInput::ScrollViewports(count))
            }
            (KeyCode::PageUp, _) => {
                let count = self.take_count() as f32;
                UiEvent::Viewer(ViewerInput::ScrollViewports(-count))
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_key_prompt(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptCancelled
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptCancelled
            }
            (KeyCode::Enter, _) => {
                let text = std::mem::take(&mut self.prompt);
                let input = match self.mode {
                    InputMode::GoToPage => ViewerInput::GoToPage(text),
                    _ => ViewerInput::Search(text),
                };
                self.set_mode(InputMode::Normal);
                UiEvent::Viewer(input)
            }
            (KeyCode::Backspace, _) => {
                self.prompt.pop();
                UiEvent::PromptChanged
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.prompt.push(c);
                UiEvent::PromptChanged
            }
            _ => UiEvent::None,
        }
    }

    fn viewer(&mut self, input: ViewerInput) -> UiEvent {
        self.reset_count();
        UiEvent::Viewer(input)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// What the user is typing, for display next to the status.
    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Search => Some(format!("/{}", self.prompt)),
            InputMode::GoToPage => Some(format!("page: {}", self.prompt)),
            InputMode::Normal if !self.pending_digits.is_empty() => {
                Some(self.pending_digits.clone())
            }
            InputMode::Normal => None,
        }
    }
}

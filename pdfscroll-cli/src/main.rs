use std::fs;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use arboard::Clipboard;
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use pdfscroll_core::{OpenOptions, Viewer, ViewerConfig, ViewerEvent, ViewerInput};
use pdfscroll_render::PdfiumProvider;
use pdfscroll_tty::{
    compose, write_status_line, CellGeometry, DrawParams, EventMapper, KittyRenderer, UiEvent,
};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(30);

#[derive(Debug, Parser)]
#[command(
    name = "pdfscroll",
    version,
    about = "Continuous-scroll PDF viewer for kitty-compatible terminals"
)]
struct Args {
    /// Page label or 1-based page number to open at
    #[arg(short = 'p', long = "page")]
    page: Option<String>,

    /// Text to search for once the document is shown
    #[arg(short = 's', long = "search")]
    search: Option<String>,

    /// Config file; defaults to config.toml in the platform config directory
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// PDF file to open
    file: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdfscroll", "pdfscroll")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load(&config_path)?;
    let scroll_step = config.scroll_step;

    let geometry = CellGeometry::from_window(terminal::window_size()?);
    let provider = PdfiumProvider::new()?;
    let options = OpenOptions {
        initial_page: args.page,
        search: args.search,
    };
    let mut viewer = Viewer::open(
        &provider,
        &args.file,
        options,
        config,
        geometry.viewport(),
        Instant::now(),
    )
    .await
    .with_context(|| format!("failed to open {:?}", args.file))?;

    let clipboard = match Clipboard::new() {
        Ok(clipboard) => Some(clipboard),
        Err(err) => {
            warn!(%err, "clipboard unavailable, copying is disabled");
            None
        }
    };

    let result = {
        let _raw = RawModeGuard::new()?;
        let mut session = Session {
            viewer: &mut viewer,
            renderer: KittyRenderer::new(io::stdout()),
            mapper: EventMapper::new(geometry, scroll_step),
            clipboard,
            notice: None,
        };
        session.run()
    };
    viewer.close();
    result
}

/// Terminal side of one viewing session.
struct Session<'a> {
    viewer: &'a mut Viewer,
    renderer: KittyRenderer<Stdout>,
    mapper: EventMapper,
    clipboard: Option<Clipboard>,
    notice: Option<String>,
}

impl Session<'_> {
    fn run(&mut self) -> Result<()> {
        let events = self.viewer.events();
        self.renderer.clear_all()?;
        let mut needs_redraw = true;
        let mut status_dirty = true;

        loop {
            self.viewer.tick(Instant::now())?;

            let pending: Vec<ViewerEvent> = std::mem::take(&mut *events.lock());
            for event in pending {
                match event {
                    ViewerEvent::RedrawNeeded => needs_redraw = true,
                    ViewerEvent::Closed => return Ok(()),
                    other => {
                        self.handle_viewer_event(other)?;
                        status_dirty = true;
                    }
                }
            }

            if needs_redraw {
                self.draw_frame()?;
                needs_redraw = false;
                status_dirty = true;
            }
            if status_dirty {
                self.draw_status_line()?;
                status_dirty = false;
            }

            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            let now = Instant::now();
            match self.mapper.map_event(event::read()?, now) {
                UiEvent::Viewer(ViewerInput::GoToPage(target)) => {
                    if !self.viewer.go_to_page(&target) {
                        self.notice = Some(format!("No page \"{target}\""));
                    }
                    status_dirty = true;
                }
                UiEvent::Viewer(input) => {
                    if matches!(
                        input,
                        ViewerInput::PointerDown { .. } | ViewerInput::Search(_)
                    ) {
                        self.notice = None;
                        status_dirty = true;
                    }
                    self.viewer.apply(input, now);
                }
                UiEvent::PromptChanged | UiEvent::PromptCancelled => status_dirty = true,
                UiEvent::Resized => {
                    let geometry = CellGeometry::from_window(terminal::window_size()?);
                    self.mapper.set_geometry(geometry);
                    let (width, height) = geometry.viewport();
                    debug!(width, height, "terminal resized");
                    self.viewer.apply(ViewerInput::Resize { width, height }, now);
                    self.renderer.delete_images()?;
                    self.renderer.clear_all()?;
                    needs_redraw = true;
                }
                UiEvent::Quit => break,
                UiEvent::None => {}
            }
        }

        self.renderer.delete_images()?;
        self.renderer.clear_all()?;
        Ok(())
    }

    fn handle_viewer_event(&mut self, event: ViewerEvent) -> Result<()> {
        match event {
            ViewerEvent::CursorChanged(style) => self.renderer.set_pointer_shape(style)?,
            ViewerEvent::OpenUri(uri) => {
                info!(%uri, "opening link");
                match open::that_detached(&uri) {
                    Ok(()) => self.notice = Some(format!("Opening {uri}")),
                    Err(err) => {
                        warn!(%uri, %err, "failed to launch browser");
                        self.notice = Some(format!("Could not open {uri}"));
                    }
                }
            }
            ViewerEvent::Notice(message) => self.notice = Some(message),
            ViewerEvent::Copied { text, chars } => {
                self.notice = Some(match self.clipboard.as_mut() {
                    Some(clipboard) => match clipboard.set_text(text) {
                        Ok(()) => format!("Copied {chars} characters"),
                        Err(err) => {
                            warn!(%err, "failed to write clipboard");
                            "Copy failed".to_string()
                        }
                    },
                    None => "Clipboard unavailable".to_string(),
                });
            }
            ViewerEvent::NothingSelected => self.notice = Some("Nothing selected".to_string()),
            ViewerEvent::SearchUpdated(status) => debug!(?status, "search updated"),
            ViewerEvent::RedrawNeeded | ViewerEvent::Closed => {}
        }
        Ok(())
    }

    fn draw_frame(&mut self) -> Result<()> {
        let frame = self.viewer.frame()?;
        let image = compose(&frame);
        let geometry = self.mapper.geometry();
        self.renderer.begin_sync_update()?;
        {
            let mut writer = self.renderer.writer();
            crossterm::execute!(&mut writer, cursor::MoveTo(0, 0))?;
        }
        self.renderer.draw(
            &image,
            DrawParams::clamped(
                u32::from(geometry.columns),
                u32::from(geometry.viewport_rows()),
            ),
        )?;
        self.renderer.end_sync_update()?;
        Ok(())
    }

    fn draw_status_line(&mut self) -> Result<()> {
        let mut status = self.viewer.status().describe();
        if let Some(notice) = &self.notice {
            status.push_str(" | ");
            status.push_str(notice);
        }
        if let Some(pending) = self.mapper.pending_input() {
            status.push_str(" | ");
            status.push_str(&pending);
        }
        let geometry = self.mapper.geometry();
        let status: String = status.chars().take(usize::from(geometry.columns)).collect();

        let mut writer = self.renderer.writer();
        crossterm::execute!(
            &mut writer,
            cursor::MoveTo(0, geometry.status_row()),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(&mut writer, &status)?;
        Ok(())
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfscroll.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal is in raw mode while viewing, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

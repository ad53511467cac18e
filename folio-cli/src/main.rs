use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use folio_core::{
    ActionDispatcher, ActionIntent, Command, Document, DocumentProvider, PageRenderRegistry,
    SelectionChange, SelectionDetector, ViewerConfig, ViewerController, ViewerEvent,
};
use folio_tty::{
    terminal_selection_settings, write_status_line, EventMapper, InputMode, SelectionMenu,
    TextLayout, UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod outbox;

use outbox::Outbox;

const IDLE_POLL: Duration = Duration::from_millis(50);
const HEADLESS_COLUMNS: u16 = 100;
const HEADLESS_ROWS: u16 = 40;

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Terminal reader that keeps extracted page text in step with where you are"
)]
struct Args {
    /// Page to open the document on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Config file to use instead of the platform default
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Print the readable context as JSON once extraction finishes, then exit
    #[arg(long = "context")]
    context: bool,

    /// Open a document from the configured catalog by name
    #[arg(short = 'd', long = "doc", conflicts_with = "file")]
    doc: Option<String>,

    /// Document to open
    file: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(
            stdout,
            DisableMouseCapture,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0),
            cursor::Show
        );
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config = match &args.config {
        Some(path) => ViewerConfig::load_from(path)?,
        None => ViewerConfig::load()?,
    };
    let document = resolve_document(&args, &config)?;
    let provider = folio_render::default_provider()?;
    info!(name = %document.name, locator = %document.source_locator, "starting");

    if args.context {
        return print_context(config, provider, document, args.page).await;
    }

    let outbox = Outbox::open(project_dirs.data_local_dir().join("outbox.jsonl"))?;
    let (columns, rows) = terminal::size()?;
    let mut app = App::new(config, provider, Arc::new(outbox), columns, rows);
    app.pending_page = args.page;
    app.controller.open(document);

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    loop {
        app.controller.drain();
        app.process_viewer_events(Instant::now());
        app.poll_timers(Instant::now());

        if app.dirty {
            app.redraw(&mut stdout)?;
            app.dirty = false;
        }

        if event::poll(app.poll_timeout(Instant::now()))? {
            let ui_event = app.mapper.map_event(event::read()?);
            if matches!(ui_event, UiEvent::Quit) {
                break;
            }
            app.handle_event(ui_event, Instant::now());
        }
    }

    Ok(())
}

fn resolve_document(args: &Args, config: &ViewerConfig) -> Result<Document> {
    if let Some(path) = &args.file {
        if !path.exists() {
            bail!("no such file: {:?}", path);
        }
        return Ok(Document::from_path(path));
    }
    let catalog = config.catalog();
    match &args.doc {
        Some(name) => catalog
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| anyhow!("no document named {name:?} in the catalog")),
        None => catalog
            .documents()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("no document given and the catalog is empty")),
    }
}

async fn print_context(
    config: ViewerConfig,
    provider: Arc<dyn DocumentProvider>,
    document: Document,
    page: Option<usize>,
) -> Result<()> {
    let layout = TextLayout::new(HEADLESS_COLUMNS, HEADLESS_ROWS);
    let mut controller =
        ViewerController::new(config, provider, PageRenderRegistry::new(), layout.clone());
    controller.open(document);
    controller.wait_for_extraction().await;
    if let Some(message) = controller.load_error() {
        bail!("{message}");
    }

    layout.rebuild(controller.buffer(), controller.state().total_pages);
    layout.mount(controller.registry());
    if let Some(page) = page {
        let outcome = controller.go_to_page(page);
        if !outcome.success {
            bail!("{}", outcome.message);
        }
    }

    let context = controller
        .readable_context()
        .context("no document is open")?;
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &context)?;
    writeln!(stdout)?;
    Ok(())
}

struct App {
    controller: ViewerController,
    detector: SelectionDetector,
    dispatcher: ActionDispatcher,
    layout: Arc<TextLayout>,
    mapper: EventMapper,
    pending_page: Option<usize>,
    message: Option<String>,
    screen_rows: u16,
    dirty: bool,
}

impl App {
    fn new(
        config: ViewerConfig,
        provider: Arc<dyn DocumentProvider>,
        outbox: Arc<Outbox>,
        columns: u16,
        rows: u16,
    ) -> Self {
        let layout = TextLayout::new(columns, rows.saturating_sub(1));
        let settings = terminal_selection_settings(config.selection_settings());
        let detector = SelectionDetector::new(layout.clone(), settings, layout.size());
        let controller =
            ViewerController::new(config, provider, PageRenderRegistry::new(), layout.clone());
        Self {
            controller,
            detector,
            dispatcher: ActionDispatcher::new(outbox),
            layout,
            mapper: EventMapper::new(),
            pending_page: None,
            message: None,
            screen_rows: rows,
            dirty: true,
        }
    }

    fn process_viewer_events(&mut self, now: Instant) {
        for event in self.controller.take_events() {
            match event {
                ViewerEvent::DocumentChanged(_) => {
                    self.detector.dismiss();
                    self.clear_selection();
                    self.layout.rebuild(self.controller.buffer(), 0);
                }
                ViewerEvent::PagesAvailable { total_pages } => {
                    self.layout.rebuild(self.controller.buffer(), total_pages);
                    self.layout.mount(self.controller.registry());
                    if let Some(page) = self.pending_page.take() {
                        let outcome = self.controller.go_to_page(page);
                        self.message = Some(outcome.message);
                    }
                    self.controller.on_scroll(now);
                }
                ViewerEvent::TextUpdated { .. } | ViewerEvent::ExtractionFinished { .. } => {
                    // Page heights change with every relayout.
                    let total = self.controller.state().total_pages;
                    self.layout.rebuild(self.controller.buffer(), total);
                    self.controller.on_scroll(now);
                }
                ViewerEvent::ZoomChanged { zoom } => {
                    self.clear_selection();
                    self.layout.set_zoom(zoom);
                }
                ViewerEvent::LoadFailed { message } => {
                    self.message = Some(message);
                }
                ViewerEvent::PageChanged { .. } => {}
            }
            self.dirty = true;
        }
    }

    fn poll_timers(&mut self, now: Instant) {
        if self.layout.take_scrolled() {
            self.controller.on_scroll(now);
            self.dirty = true;
        }
        if self.controller.poll(now).is_some() {
            self.dirty = true;
        }
        match self.detector.poll(now) {
            Some(SelectionChange::Activated(selection)) => {
                self.layout
                    .set_menu(Some(SelectionMenu::rect_at(selection.anchor())));
                self.mapper.set_mode(InputMode::Selection);
                self.dirty = true;
            }
            // A drag may already be under way, so only the menu goes.
            Some(SelectionChange::Cleared) => self.close_menu(),
            None => {}
        }
    }

    /// Time to wait for input before the next timer or extraction update.
    fn poll_timeout(&self, now: Instant) -> Duration {
        [self.controller.next_deadline(), self.detector.next_deadline()]
            .into_iter()
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(IDLE_POLL, Duration::min)
    }

    fn handle_event(&mut self, event: UiEvent, now: Instant) {
        match event {
            UiEvent::Command { command, count } => self.apply_command(command, count),
            UiEvent::ScrollBy { rows } => {
                self.layout.scroll_by(rows);
            }
            UiEvent::PointerDown { column, row } => {
                let path = self.layout.hit_path(column, row);
                if path.within_menu() {
                    let intent = self
                        .layout
                        .menu()
                        .and_then(|rect| SelectionMenu::intent_at(rect, column, row));
                    if let Some(intent) = intent {
                        self.dispatch(intent);
                    }
                    return;
                }
                if let Some(SelectionChange::Cleared) = self.detector.pointer_down(&path, now) {
                    self.clear_selection();
                }
                if path.within_document() {
                    self.layout.begin_drag(column, row);
                } else {
                    self.layout.clear_drag();
                }
            }
            UiEvent::PointerDrag { column, row } => self.layout.extend_drag(column, row),
            UiEvent::PointerUp { column, row } => {
                let path = self.layout.hit_path(column, row);
                if path.within_menu() {
                    return;
                }
                self.layout.extend_drag(column, row);
                self.detector.pointer_up(&path, now);
                if path.within_document() {
                    // A click without a drag collapses the selection.
                    self.detector.selection_changed(now);
                }
            }
            UiEvent::Intent(intent) => self.dispatch(intent),
            UiEvent::Dismiss => {
                self.detector.dismiss();
                self.clear_selection();
            }
            UiEvent::Resize { columns, rows } => {
                self.screen_rows = rows;
                self.layout.resize(columns, rows.saturating_sub(1));
                self.detector.set_viewport(self.layout.size());
                self.detector.dismiss();
                self.clear_selection();
                self.controller.on_scroll(now);
            }
            UiEvent::Quit | UiEvent::None => {}
        }
        self.dirty = true;
    }

    fn apply_command(&mut self, command: Command, count: usize) {
        let command = match command {
            Command::GotoPage { page: usize::MAX } => Command::GotoPage {
                page: self.controller.state().total_pages,
            },
            other => other,
        };
        for _ in 0..count.max(1) {
            let outcome = self.controller.apply(command);
            let failed = !outcome.success;
            self.message = Some(outcome.message);
            if failed {
                break;
            }
        }
    }

    fn dispatch(&mut self, intent: ActionIntent) {
        match self.dispatcher.dispatch(&mut self.detector, intent) {
            Ok(request) => {
                self.message = Some(format!(
                    "{}: sent {} characters",
                    intent.label(),
                    request.payload_text.chars().count()
                ));
            }
            Err(err) => {
                warn!(%err, "dispatch failed");
                self.message = Some(err.to_string());
            }
        }
        self.clear_selection();
    }

    fn clear_selection(&mut self) {
        self.layout.clear_drag();
        self.close_menu();
    }

    fn close_menu(&mut self) {
        self.layout.set_menu(None);
        self.mapper.set_mode(InputMode::Normal);
        self.dirty = true;
    }

    fn status_line(&self) -> String {
        let state = self.controller.state();
        let mut status = match self.controller.document() {
            Some(document) => format!(
                "{}  page {}/{}  zoom {}%",
                document.name,
                state.current_page,
                state.total_pages,
                (state.zoom * 100.0).round() as u32
            ),
            None => "no document".to_owned(),
        };
        if !self.controller.is_extraction_complete() {
            let done = self.controller.buffer().len();
            status.push_str(&format!("  extracting {done}/{}", state.total_pages));
        }
        if let Some(message) = &self.message {
            status.push_str("  | ");
            status.push_str(message);
        }
        if let Some(pending) = self.mapper.pending_input() {
            status.push_str("  ");
            status.push_str(&pending);
        }
        status
    }

    fn redraw(&self, stdout: &mut io::Stdout) -> Result<()> {
        self.layout.render(stdout)?;
        if let Some(rect) = self.layout.menu() {
            SelectionMenu::render(stdout, rect)?;
        }
        let columns = self.layout.size().width as u16;
        write_status_line(
            stdout,
            self.screen_rows.saturating_sub(1),
            columns,
            &self.status_line(),
        )?;
        Ok(())
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

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

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::config::CatalogEntry;
    use folio_core::{DocumentBackend, ExtractedTextBuffer, SegmentKind};
    use tempfile::{tempdir, TempDir};

    struct NoDocuments;

    #[async_trait::async_trait]
    impl DocumentProvider for NoDocuments {
        async fn open(&self, locator: &str) -> Result<Arc<dyn DocumentBackend>> {
            bail!("no document at {locator}")
        }
    }

    /// Viewer over three laid-out pages, with an 80x20 text area above the
    /// status row. Page 1's text sits on row 1.
    fn app_with_pages() -> (App, TempDir) {
        let dir = tempdir().unwrap();
        let outbox = Arc::new(Outbox::open(dir.path().join("outbox.jsonl")).unwrap());
        let app = App::new(ViewerConfig::default(), Arc::new(NoDocuments), outbox, 80, 21);

        let mut buffer = ExtractedTextBuffer::new();
        buffer.reset(1, 3);
        let pages = [
            "alpha beta gamma delta epsilon zeta eta theta",
            "short",
            "iota kappa lambda",
        ];
        for (index, text) in pages.iter().enumerate() {
            buffer
                .push_page(1, index + 1, (*text).to_owned(), SegmentKind::Extracted)
                .unwrap();
        }
        app.layout.rebuild(&buffer, 3);
        (app, dir)
    }

    fn drag(app: &mut App, from: (u16, u16), to: (u16, u16), start: Instant, hold: Duration) {
        app.handle_event(
            UiEvent::PointerDown {
                column: from.0,
                row: from.1,
            },
            start,
        );
        app.poll_timers(start + hold);
        app.handle_event(
            UiEvent::PointerDrag {
                column: to.0,
                row: to.1,
            },
            start + hold,
        );
        app.handle_event(
            UiEvent::PointerUp {
                column: to.0,
                row: to.1,
            },
            start + hold,
        );
        app.poll_timers(start + hold + Duration::from_millis(20));
    }

    fn selected_text(app: &App) -> Option<String> {
        app.detector.selection().map(|selection| selection.text.clone())
    }

    #[test]
    fn slow_second_drag_replaces_open_selection() {
        let (mut app, _dir) = app_with_pages();
        let start = Instant::now();

        drag(&mut app, (0, 1), (4, 1), start, Duration::from_millis(5));
        assert_eq!(selected_text(&app).as_deref(), Some("alpha"));
        assert!(app.layout.menu().is_some());

        let later = start + Duration::from_secs(1);
        drag(&mut app, (6, 1), (15, 1), later, Duration::from_millis(150));
        assert_eq!(selected_text(&app).as_deref(), Some("beta gamma"));
        assert!(app.layout.menu().is_some());
    }

    #[test]
    fn drag_started_right_after_a_click_survives_the_clear() {
        let (mut app, _dir) = app_with_pages();
        let start = Instant::now();
        drag(&mut app, (0, 1), (4, 1), start, Duration::from_millis(5));
        assert!(app.detector.is_active());

        // A plain click collapses the selection after the grace delay.
        let click = start + Duration::from_secs(1);
        app.handle_event(UiEvent::PointerDown { column: 3, row: 2 }, click);
        app.handle_event(UiEvent::PointerUp { column: 3, row: 2 }, click);

        let next = click + Duration::from_millis(10);
        drag(&mut app, (6, 1), (15, 1), next, Duration::from_millis(150));
        assert_eq!(selected_text(&app).as_deref(), Some("beta gamma"));
    }

    #[test]
    fn click_inside_document_closes_the_menu() {
        let (mut app, _dir) = app_with_pages();
        let start = Instant::now();
        drag(&mut app, (0, 1), (4, 1), start, Duration::from_millis(5));
        assert!(app.layout.menu().is_some());

        let click = start + Duration::from_secs(1);
        app.handle_event(UiEvent::PointerDown { column: 3, row: 2 }, click);
        app.handle_event(UiEvent::PointerUp { column: 3, row: 2 }, click);
        app.poll_timers(click + Duration::from_millis(150));

        assert_eq!(selected_text(&app), None);
        assert_eq!(app.layout.menu(), None);
    }

    #[test]
    fn relayout_schedules_a_page_recompute() {
        let (mut app, _dir) = app_with_pages();
        let now = Instant::now();
        assert_eq!(app.controller.next_deadline(), None);

        app.controller
            .events()
            .lock()
            .push(ViewerEvent::TextUpdated { segments: 1 });
        app.process_viewer_events(now);

        let debounce = ViewerConfig::default().timing.scroll_debounce;
        assert_eq!(app.controller.next_deadline(), Some(now + debounce));
    }

    fn args(file: Option<PathBuf>, doc: Option<&str>) -> Args {
        Args {
            page: None,
            config: None,
            context: false,
            doc: doc.map(str::to_owned),
            file,
        }
    }

    fn catalog_config() -> ViewerConfig {
        ViewerConfig {
            documents: vec![
                CatalogEntry {
                    id: None,
                    name: "I - Theory".into(),
                    locator: "/documents/I_Theory.pdf".into(),
                },
                CatalogEntry {
                    id: None,
                    name: "II - Theory".into(),
                    locator: "/documents/II_Theory.pdf".into(),
                },
            ],
            ..ViewerConfig::default()
        }
    }

    #[test]
    fn file_argument_wins_and_must_exist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lecture.pdf");
        fs::write(&path, b"%PDF-1.7").unwrap();

        let document =
            resolve_document(&args(Some(path.clone()), None), &catalog_config()).unwrap();
        assert_eq!(document.name, "lecture");

        let missing = dir.path().join("missing.pdf");
        assert!(resolve_document(&args(Some(missing), None), &catalog_config()).is_err());
    }

    #[test]
    fn catalog_lookup_by_name_or_first_entry() {
        let config = catalog_config();
        let named = resolve_document(&args(None, Some("ii - theory")), &config).unwrap();
        assert_eq!(named.source_locator, "/documents/II_Theory.pdf");

        let first = resolve_document(&args(None, None), &config).unwrap();
        assert_eq!(first.name, "I - Theory");

        assert!(resolve_document(&args(None, Some("III")), &config).is_err());
        assert!(resolve_document(&args(None, None), &ViewerConfig::default()).is_err());
    }

    #[test]
    fn cli_rejects_file_with_doc() {
        let parsed = Args::try_parse_from(["folio", "--doc", "I", "notes.pdf"]);
        assert!(parsed.is_err());
        let parsed = Args::try_parse_from(["folio", "-p", "3", "--context", "notes.pdf"]).unwrap();
        assert_eq!(parsed.page, Some(3));
        assert!(parsed.context);
    }
}

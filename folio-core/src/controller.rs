use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::buffer::{slice_chars, ExtractedTextBuffer};
use crate::config::ViewerConfig;
use crate::extraction::{ExtractedSegment, TextExtraction};
use crate::registry::PageRenderRegistry;
use crate::viewport::{ScrollContainer, ViewportTracker};
use crate::{Command, Document, DocumentProvider, ViewerEvent};

const LOADING_PLACEHOLDER: &str = "Loading content...";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewerState {
    pub current_page: usize,
    pub total_pages: usize,
    pub zoom: f32,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            current_page: 1,
            total_pages: 0,
            zoom: 1.0,
        }
    }
}

/// Result of a navigation request, phrased for the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationOutcome {
    pub success: bool,
    pub message: String,
}

impl NavigationOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Snapshot shared with context consumers such as a chat assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadableContext {
    pub document_name: String,
    pub current_page: usize,
    pub total_pages: usize,
    pub current_page_content: String,
    pub context_window: String,
}

/// Messages posted by a background load/extraction task, tagged with the
/// generation of the document load that spawned it.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionMessage {
    Loaded { generation: u64, page_count: usize },
    LoadFailed { generation: u64, message: String },
    Segment { generation: u64, segment: ExtractedSegment },
    Finished { generation: u64 },
}

impl ExtractionMessage {
    pub fn generation(&self) -> u64 {
        match self {
            ExtractionMessage::Loaded { generation, .. }
            | ExtractionMessage::LoadFailed { generation, .. }
            | ExtractionMessage::Segment { generation, .. }
            | ExtractionMessage::Finished { generation } => *generation,
        }
    }
}

/// Owns the viewer state for the active document and keeps it in step with
/// extraction progress and the scroll position.
pub struct ViewerController {
    config: ViewerConfig,
    provider: Arc<dyn DocumentProvider>,
    document: Option<Document>,
    state: ViewerState,
    buffer: ExtractedTextBuffer,
    generation: u64,
    cancel: Option<CancellationToken>,
    tracker: ViewportTracker,
    load_error: Option<String>,
    extraction_done: bool,
    events: Arc<Mutex<Vec<ViewerEvent>>>,
    tx: mpsc::UnboundedSender<ExtractionMessage>,
    rx: mpsc::UnboundedReceiver<ExtractionMessage>,
}

impl ViewerController {
    pub fn new(
        config: ViewerConfig,
        provider: Arc<dyn DocumentProvider>,
        registry: PageRenderRegistry,
        container: Arc<dyn ScrollContainer>,
    ) -> Self {
        let tracker = ViewportTracker::new(registry, container, config.timing.scroll_debounce);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            provider,
            document: None,
            state: ViewerState::default(),
            buffer: ExtractedTextBuffer::new(),
            generation: 0,
            cancel: None,
            tracker,
            load_error: None,
            extraction_done: true,
            events: Arc::new(Mutex::new(Vec::new())),
            tx,
            rx,
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ViewerEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn take_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    pub fn buffer(&self) -> &ExtractedTextBuffer {
        &self.buffer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn registry(&self) -> &PageRenderRegistry {
        self.tracker.registry()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn is_extraction_complete(&self) -> bool {
        self.extraction_done
    }

    /// Makes `document` the active one. Any run for the previous document is
    /// cancelled and its late messages are dropped by generation.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, document), fields(name = %document.name))]
    pub fn open(&mut self, document: Document) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.generation += 1;
        let generation = self.generation;

        self.state.current_page = 1;
        self.state.total_pages = 0;
        self.buffer.reset(generation, 0);
        self.tracker.reset();
        self.tracker.registry().clear();
        self.load_error = None;
        self.extraction_done = false;
        self.push_event(ViewerEvent::DocumentChanged(document.id));

        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        info!(generation, locator = %document.source_locator, "opening document");
        tokio::spawn(run_extraction(
            Arc::clone(&self.provider),
            document.clone(),
            generation,
            token,
            self.tx.clone(),
        ));
        self.document = Some(document);
    }

    /// Stops the active run and forgets the document.
    pub fn close(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.generation += 1;
        self.document = None;
        self.state.current_page = 1;
        self.state.total_pages = 0;
        self.buffer.reset(self.generation, 0);
        self.tracker.reset();
        self.tracker.registry().clear();
        self.load_error = None;
        self.extraction_done = true;
    }

    /// Applies a message from a background run. Messages from any generation
    /// other than the current one are discarded; returns whether it applied.
    pub fn handle(&mut self, message: ExtractionMessage) -> bool {
        let generation = message.generation();
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale extraction message");
            return false;
        }

        match message {
            ExtractionMessage::Loaded { page_count, .. } => {
                self.state.total_pages = page_count;
                self.state.current_page = self.state.current_page.clamp(1, page_count.max(1));
                self.buffer.reset(generation, page_count);
                self.push_event(ViewerEvent::PagesAvailable {
                    total_pages: page_count,
                });
            }
            ExtractionMessage::LoadFailed { message, .. } => {
                self.load_error = Some(message.clone());
                self.extraction_done = true;
                self.push_event(ViewerEvent::LoadFailed { message });
            }
            ExtractionMessage::Segment { segment, .. } => {
                let written = match segment {
                    ExtractedSegment::Page { page, text, kind } => {
                        self.buffer.push_page(generation, page, text, kind)
                    }
                    ExtractedSegment::Fallback { summary } => {
                        self.buffer.set_fallback(generation, summary)
                    }
                };
                match written {
                    Ok(()) => self.push_event(ViewerEvent::TextUpdated {
                        segments: self.buffer.len(),
                    }),
                    Err(err) => {
                        warn!(%err, "extracted segment rejected");
                        return false;
                    }
                }
            }
            ExtractionMessage::Finished { .. } => {
                self.extraction_done = true;
                self.push_event(ViewerEvent::ExtractionFinished {
                    segments: self.buffer.len(),
                });
            }
        }
        true
    }

    pub async fn next_message(&mut self) -> Option<ExtractionMessage> {
        self.rx.recv().await
    }

    /// Applies every message already queued without waiting.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.rx.try_recv() {
            if self.handle(message) {
                applied += 1;
            }
        }
        applied
    }

    /// Waits until the active run has finished or failed to load.
    pub async fn wait_for_extraction(&mut self) {
        while !self.extraction_done {
            match self.rx.recv().await {
                Some(message) => {
                    self.handle(message);
                }
                None => break,
            }
        }
    }

    pub fn on_scroll(&mut self, now: Instant) {
        self.tracker.on_scroll(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tracker.next_deadline()
    }

    /// Fires a due scroll recomputation and adopts its page.
    pub fn poll(&mut self, now: Instant) -> Option<usize> {
        let page = self.tracker.poll(now)?;
        if page > self.state.total_pages.max(1) {
            return None;
        }
        if page != self.state.current_page {
            self.state.current_page = page;
            self.push_event(ViewerEvent::PageChanged { page });
        }
        Some(page)
    }

    pub fn apply(&mut self, command: Command) -> NavigationOutcome {
        match command {
            Command::NextPage => self.next_page(),
            Command::PrevPage => self.previous_page(),
            Command::GotoPage { page } => self.go_to_page(page),
            Command::ZoomIn => {
                let step = self.config.zoom.step;
                self.set_zoom(self.state.zoom + step)
            }
            Command::ZoomOut => {
                let step = self.config.zoom.step;
                self.set_zoom(self.state.zoom - step)
            }
            Command::SetZoom { zoom } => self.set_zoom(zoom),
        }
    }

    pub fn next_page(&mut self) -> NavigationOutcome {
        let ViewerState {
            current_page,
            total_pages,
            ..
        } = self.state;
        if current_page >= total_pages {
            return NavigationOutcome::failed("You are already on the last page");
        }
        let next = current_page + 1;
        self.show_page(next);
        NavigationOutcome::ok(format!("Going to page {next} of {total_pages}"))
    }

    pub fn previous_page(&mut self) -> NavigationOutcome {
        let ViewerState {
            current_page,
            total_pages,
            ..
        } = self.state;
        if current_page <= 1 {
            return NavigationOutcome::failed("You are already on the first page");
        }
        let previous = current_page - 1;
        self.show_page(previous);
        NavigationOutcome::ok(format!("Going back to page {previous} of {total_pages}"))
    }

    pub fn go_to_page(&mut self, page: usize) -> NavigationOutcome {
        let total_pages = self.state.total_pages;
        if page < 1 || page > total_pages {
            return NavigationOutcome::failed(format!(
                "Invalid page. The document has {total_pages} pages."
            ));
        }
        self.show_page(page);
        NavigationOutcome::ok(format!("Navigating to page {page} of {total_pages}"))
    }

    fn show_page(&mut self, page: usize) {
        if page != self.state.current_page {
            self.state.current_page = page;
            self.push_event(ViewerEvent::PageChanged { page });
        }
        // The scroll this triggers settles on the same page, which the
        // tracker then suppresses as unchanged.
        self.tracker.set_tracked(page);
        self.tracker.scroll_to_page(page);
    }

    pub fn set_zoom(&mut self, zoom: f32) -> NavigationOutcome {
        let bounds = &self.config.zoom;
        let zoom = ((zoom * 100.0).round() / 100.0).clamp(bounds.min, bounds.max);
        if (zoom - self.state.zoom).abs() > f32::EPSILON {
            self.state.zoom = zoom;
            self.push_event(ViewerEvent::ZoomChanged { zoom });
        }
        NavigationOutcome::ok(format!("Zoom {}%", (zoom * 100.0).round() as u32))
    }

    /// Characters `[(p - 1) * W, p * W)` of the extracted text, `p` being the
    /// current page and `W` the configured window.
    pub fn current_page_window(&self) -> &str {
        let (start, end) = self.window_bounds();
        self.buffer.char_slice(start, end)
    }

    /// The current page window widened by the configured margin on both sides.
    pub fn context_window(&self) -> &str {
        let (start, end) = self.window_bounds();
        let margin = self.config.context.margin_chars;
        slice_chars(
            self.buffer.text(),
            start.saturating_sub(margin),
            end.saturating_add(margin),
        )
    }

    fn window_bounds(&self) -> (usize, usize) {
        let window = self.config.context.window_chars;
        let page = self.state.current_page.max(1);
        ((page - 1) * window, page * window)
    }

    pub fn readable_context(&self) -> Option<ReadableContext> {
        let document = self.document.as_ref()?;
        let current_page_content = if self.buffer.text().is_empty() {
            LOADING_PLACEHOLDER.to_owned()
        } else {
            self.current_page_window().to_owned()
        };
        Some(ReadableContext {
            document_name: document.name.clone(),
            current_page: self.state.current_page,
            total_pages: self.state.total_pages,
            current_page_content,
            context_window: self.context_window().to_owned(),
        })
    }

    fn push_event(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }
}

impl Drop for ViewerController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }
}

#[instrument(skip(provider, document, cancel, tx), fields(name = %document.name))]
async fn run_extraction(
    provider: Arc<dyn DocumentProvider>,
    document: Document,
    generation: u64,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ExtractionMessage>,
) {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = provider.open(&document.source_locator) => opened,
    };
    let backend = match opened {
        Ok(backend) => backend,
        Err(err) => {
            warn!(?err, "document load failed");
            let _ = tx.send(ExtractionMessage::LoadFailed {
                generation,
                message: format!("Error loading the document: {err}"),
            });
            return;
        }
    };

    let page_count = backend.info().page_count;
    if tx
        .send(ExtractionMessage::Loaded {
            generation,
            page_count,
        })
        .is_err()
    {
        return;
    }

    let mut run = TextExtraction::new(backend, document.name.clone(), page_count);
    loop {
        let segment = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(attempted = run.pages_attempted(), "extraction cancelled");
                return;
            }
            segment = run.next_segment() => segment,
        };
        let Some(segment) = segment else {
            break;
        };
        if tx
            .send(ExtractionMessage::Segment {
                generation,
                segment,
            })
            .is_err()
        {
            return;
        }
    }
    debug!(page_count, "extraction finished");
    let _ = tx.send(ExtractionMessage::Finished { generation });
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use folio_core::{
    ActionDispatcher, ActionIntent, ActionRequest, ConversationSink, Document, DocumentBackend,
    DocumentInfo, DocumentProvider, ElementKind, ElementPath, PageRenderRegistry, Rect,
    ScrollBehavior, ScrollContainer, SelectedRange, SelectionChange, SelectionDetector,
    SelectionSettings, SelectionSource, Size, ViewerConfig, ViewerController, ViewerEvent,
};
use parking_lot::Mutex;

const PAGE_HEIGHT: f64 = 1100.0;
const GAP: f64 = 20.0;

struct Column {
    scroll_top: Mutex<f64>,
}

impl Column {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            scroll_top: Mutex::new(0.0),
        })
    }

    fn page_rect(&self, page: usize) -> Rect {
        let offset = (page - 1) as f64 * (PAGE_HEIGHT + GAP);
        Rect::new(0.0, offset - *self.scroll_top.lock(), 900.0, PAGE_HEIGHT)
    }

    fn mount(self: &Arc<Self>, registry: &PageRenderRegistry, pages: usize) {
        for page in 1..=pages {
            let column = Arc::clone(self);
            registry.register(page, Arc::new(move || Some(column.page_rect(page))));
        }
    }
}

impl ScrollContainer for Column {
    fn viewport(&self) -> Rect {
        Rect::new(0.0, 0.0, 900.0, 700.0)
    }

    fn scroll_top(&self) -> f64 {
        *self.scroll_top.lock()
    }

    fn scroll_to(&self, top: f64, _behavior: ScrollBehavior) {
        *self.scroll_top.lock() = top;
    }
}

struct Pages {
    info: DocumentInfo,
}

impl DocumentBackend for Pages {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_text(&self, page_index: usize) -> Result<String> {
        Ok(format!("Body of page {}.", page_index + 1))
    }
}

struct Library;

#[async_trait]
impl DocumentProvider for Library {
    async fn open(&self, locator: &str) -> Result<Arc<dyn DocumentBackend>> {
        let page_count = locator
            .strip_suffix("-pages.pdf")
            .and_then(|count| count.parse().ok())
            .ok_or_else(|| anyhow!("unknown document {locator}"))?;
        Ok(Arc::new(Pages {
            info: DocumentInfo {
                page_count,
                metadata: Default::default(),
            },
        }))
    }
}

async fn open_document(pages: usize) -> (ViewerController, Arc<Column>) {
    let column = Column::new();
    let mut controller = ViewerController::new(
        ViewerConfig::default(),
        Arc::new(Library),
        PageRenderRegistry::new(),
        column.clone(),
    );
    controller.open(Document::new("Reader", format!("{pages}-pages.pdf")));
    controller.wait_for_extraction().await;
    column.mount(controller.registry(), pages);
    (controller, column)
}

fn settle(controller: &mut ViewerController, now: &mut Instant) {
    controller.on_scroll(*now);
    *now += Duration::from_millis(150);
    controller.poll(*now);
}

#[tokio::test]
async fn every_page_is_reachable_by_navigation() {
    let (mut controller, _column) = open_document(8).await;
    let mut now = Instant::now();

    for page in [5, 1, 8, 3, 4, 2, 7, 6] {
        assert!(controller.go_to_page(page).success);
        settle(&mut controller, &mut now);
        assert_eq!(controller.state().current_page, page);
    }
}

#[tokio::test]
async fn scrolling_page_six_to_centre_makes_it_current() {
    let (mut controller, column) = open_document(10).await;
    let page_six_top = 5.0 * (PAGE_HEIGHT + GAP);
    *column.scroll_top.lock() = page_six_top + PAGE_HEIGHT / 2.0 - 350.0;

    let mut now = Instant::now();
    settle(&mut controller, &mut now);
    assert_eq!(controller.state().current_page, 6);
    let context = controller.readable_context().unwrap();
    assert_eq!(context.current_page, 6);
    assert_eq!(context.total_pages, 10);
}

#[tokio::test]
async fn edge_navigation_leaves_state_alone() {
    let (mut controller, _column) = open_document(2).await;
    let before = controller.state();
    assert!(!controller.previous_page().success);
    assert_eq!(controller.state(), before);

    assert!(controller.next_page().success);
    let at_end = controller.state();
    let outcome = controller.next_page();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "You are already on the last page");
    assert_eq!(controller.state(), at_end);
}

#[derive(Default)]
struct DragSelection {
    range: Mutex<Option<SelectedRange>>,
}

impl SelectionSource for DragSelection {
    fn current(&self) -> Option<SelectedRange> {
        self.range.lock().clone()
    }
}

#[derive(Default)]
struct Outbox {
    requests: Mutex<Vec<ActionRequest>>,
}

impl ConversationSink for Outbox {
    fn submit(&self, request: ActionRequest) {
        self.requests.lock().push(request);
    }
}

fn in_page(page: usize) -> ElementPath {
    ElementPath::new(vec![
        ElementKind::TextLayer,
        ElementKind::Page(page),
        ElementKind::DocumentContainer,
    ])
}

#[tokio::test]
async fn selection_flows_into_an_action_request() {
    let (mut controller, _column) = open_document(3).await;
    let source = Arc::new(DragSelection::default());
    let mut detector = SelectionDetector::new(
        source.clone(),
        SelectionSettings::default(),
        Size::new(900.0, 700.0),
    );
    let outbox = Arc::new(Outbox::default());
    let dispatcher = ActionDispatcher::new(outbox.clone());

    *source.range.lock() = Some(SelectedRange {
        text: "Body of page 2.".into(),
        bounds: Rect::new(40.0, 300.0, 220.0, 18.0),
        ancestor: in_page(2),
    });
    let now = Instant::now();
    detector.pointer_up(&in_page(2), now);
    let change = detector.poll(now + Duration::from_millis(10));
    assert!(matches!(change, Some(SelectionChange::Activated(_))));
    let anchor = detector.selection().unwrap().anchor();
    assert_eq!((anchor.x, anchor.y), (150.0, 328.0));

    dispatcher.dispatch(&mut detector, ActionIntent::Explain).unwrap();
    assert_eq!(
        *outbox.requests.lock(),
        vec![ActionRequest {
            intent: ActionIntent::Explain,
            payload_text: "Body of page 2.".into(),
        }]
    );

    // Switching documents drops any selection the host still holds.
    *source.range.lock() = Some(SelectedRange {
        text: "Body of page 1.".into(),
        bounds: Rect::new(40.0, 100.0, 220.0, 18.0),
        ancestor: in_page(1),
    });
    detector.pointer_up(&in_page(1), now);
    detector.poll(now + Duration::from_millis(10));
    controller.open(Document::new("Other", "4-pages.pdf"));
    for event in controller.take_events() {
        if let ViewerEvent::DocumentChanged(_) = event {
            detector.dismiss();
        }
    }
    assert!(!detector.is_active());
    controller.wait_for_extraction().await;
    assert_eq!(controller.state().total_pages, 4);
}

#[tokio::test]
async fn selection_outside_document_never_activates() {
    let source = Arc::new(DragSelection::default());
    let mut detector = SelectionDetector::new(
        source.clone(),
        SelectionSettings::default(),
        Size::new(900.0, 700.0),
    );
    let sidebar = ElementPath::new(vec![ElementKind::Chrome]);
    *source.range.lock() = Some(SelectedRange {
        text: "Navigation".into(),
        bounds: Rect::new(0.0, 0.0, 80.0, 18.0),
        ancestor: sidebar.clone(),
    });

    let now = Instant::now();
    detector.pointer_up(&sidebar, now);
    assert_eq!(detector.poll(now + Duration::from_millis(200)), None);
    assert!(!detector.is_active());
}

//! Terminal layout of the extracted text.
//!
//! Pages are stacked in one column: a header row, the page's wrapped text and
//! a blank gap row. Rows are the vertical unit for every rectangle handed to
//! the core, and the viewport starts at screen row 0.

use std::io::{self, Write};
use std::sync::{Arc, Weak};

use crossterm::{
    cursor,
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
    QueueableCommand,
};
use folio_core::{
    ActionIntent, ElementKind, ElementPath, ExtractedTextBuffer, PageRenderRegistry, Point, Rect,
    ScrollBehavior, ScrollContainer, SegmentKind, SelectedRange, SelectionSettings,
    SelectionSource, Size,
};
use parking_lot::Mutex;
use tracing::trace;

const MIN_TEXT_WIDTH: usize = 20;
const PENDING_TEXT: &str = "(extracting...)";
const PLACEHOLDER_TEXT: &str = "(no text could be read from this page)";
const UNAVAILABLE_TEXT: &str = "(text unavailable)";

/// Selection settings with the menu geometry expressed in terminal cells.
pub fn terminal_selection_settings(base: SelectionSettings) -> SelectionSettings {
    SelectionSettings {
        anchor_offset: 1.0,
        edge_margin: 1.0,
        menu_size: SelectionMenu::size(),
        ..base
    }
}

#[derive(Debug, Clone)]
struct PageBlock {
    page: usize,
    start: usize,
    lines: Vec<String>,
}

impl PageBlock {
    /// Header plus text, without the trailing gap.
    fn height(&self) -> usize {
        1 + self.lines.len()
    }

    fn line_at(&self, row: usize) -> Option<&str> {
        let offset = row.checked_sub(self.start + 1)?;
        self.lines.get(offset).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TextPosition {
    row: usize,
    column: usize,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    anchor: TextPosition,
    head: TextPosition,
}

#[derive(Debug, Default)]
struct LayoutState {
    columns: u16,
    rows: u16,
    zoom: f32,
    scroll_top: usize,
    blocks: Vec<PageBlock>,
    total_rows: usize,
    drag: Option<Drag>,
    menu: Option<Rect>,
    scrolled: bool,
}

impl LayoutState {
    fn text_width(&self) -> usize {
        let columns = usize::from(self.columns).max(1);
        let zoomed = (columns as f32 / self.zoom.max(0.1)).round() as usize;
        zoomed.clamp(MIN_TEXT_WIDTH.min(columns), columns)
    }

    /// The column scrolls until the last page's header reaches the top row,
    /// so every page can be brought to the top of the viewport.
    fn max_scroll(&self) -> usize {
        self.blocks.last().map_or(0, |block| block.start)
    }

    fn set_scroll(&mut self, top: usize) -> bool {
        let top = top.min(self.max_scroll());
        if top == self.scroll_top {
            return false;
        }
        self.scroll_top = top;
        self.scrolled = true;
        true
    }

    fn block(&self, page: usize) -> Option<&PageBlock> {
        self.blocks.iter().find(|block| block.page == page)
    }

    fn block_at(&self, row: usize) -> Option<&PageBlock> {
        self.blocks
            .iter()
            .find(|block| row >= block.start && row < block.start + block.height())
    }

    fn document_row(&self, screen_row: u16) -> Option<usize> {
        (screen_row < self.rows).then(|| self.scroll_top + usize::from(screen_row))
    }

    fn screen_row(&self, row: usize) -> f64 {
        row as f64 - self.scroll_top as f64
    }

    fn path_at(&self, row: usize) -> ElementPath {
        match self.block_at(row) {
            Some(block) if row == block.start => ElementPath::new(vec![
                ElementKind::Page(block.page),
                ElementKind::DocumentContainer,
            ]),
            Some(block) => ElementPath::new(vec![
                ElementKind::TextLayer,
                ElementKind::Page(block.page),
                ElementKind::DocumentContainer,
            ]),
            None => ElementPath::new(vec![ElementKind::DocumentContainer]),
        }
    }

    fn selected_text(&self, drag: Drag) -> String {
        if drag.anchor == drag.head {
            return String::new();
        }
        let (start, end) = if drag.anchor <= drag.head {
            (drag.anchor, drag.head)
        } else {
            (drag.head, drag.anchor)
        };
        let mut pieces = Vec::new();
        for row in start.row..=end.row {
            let Some(line) = self.block_at(row).and_then(|block| block.line_at(row)) else {
                continue;
            };
            let from = if row == start.row { start.column } else { 0 };
            let to = if row == end.row {
                end.column + 1
            } else {
                usize::MAX
            };
            let piece: String = line
                .chars()
                .skip(from)
                .take(to.saturating_sub(from))
                .collect();
            if !piece.trim().is_empty() {
                pieces.push(piece.trim().to_owned());
            }
        }
        pieces.join(" ")
    }
}

/// Column of wrapped page text, scrolled by whole rows.
pub struct TextLayout {
    state: Mutex<LayoutState>,
    this: Weak<TextLayout>,
}

impl TextLayout {
    pub fn new(columns: u16, rows: u16) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(LayoutState {
                columns,
                rows,
                zoom: 1.0,
                ..LayoutState::default()
            }),
            this: this.clone(),
        })
    }

    pub fn size(&self) -> Size {
        let state = self.state.lock();
        Size::new(f64::from(state.columns), f64::from(state.rows))
    }

    pub fn resize(&self, columns: u16, rows: u16) {
        let mut state = self.state.lock();
        state.columns = columns;
        state.rows = rows;
        let blocks: Vec<(usize, String)> = state
            .blocks
            .iter()
            .map(|block| (block.page, block.lines.join(" ")))
            .collect();
        state.drag = None;
        relayout(&mut state, blocks);
    }

    pub fn set_zoom(&self, zoom: f32) {
        let mut state = self.state.lock();
        if (state.zoom - zoom).abs() <= f32::EPSILON {
            return;
        }
        state.zoom = zoom;
        let blocks: Vec<(usize, String)> = state
            .blocks
            .iter()
            .map(|block| (block.page, block.lines.join(" ")))
            .collect();
        state.drag = None;
        relayout(&mut state, blocks);
    }

    /// Lays out pages `1..=total_pages` from the buffer's current contents.
    pub fn rebuild(&self, buffer: &ExtractedTextBuffer, total_pages: usize) {
        let fallback = buffer.fallback().is_some();
        let blocks = (1..=total_pages)
            .map(|page| {
                let text = match buffer.segment(page) {
                    Some(segment) if segment.kind == SegmentKind::Placeholder => {
                        PLACEHOLDER_TEXT.to_owned()
                    }
                    Some(segment) => segment.text.clone(),
                    None if fallback => UNAVAILABLE_TEXT.to_owned(),
                    None => PENDING_TEXT.to_owned(),
                };
                (page, text)
            })
            .collect();
        let mut state = self.state.lock();
        relayout(&mut state, blocks);
    }

    /// Registers a bounds provider for every laid-out page. A provider
    /// reports nothing once its page is gone or the layout is dropped.
    pub fn mount(&self, registry: &PageRenderRegistry) {
        let pages: Vec<usize> = self.state.lock().blocks.iter().map(|b| b.page).collect();
        for page in pages {
            let layout = self.this.clone();
            registry.register(
                page,
                Arc::new(move || layout.upgrade().and_then(|layout| layout.page_bounds(page))),
            );
        }
    }

    pub fn page_bounds(&self, page: usize) -> Option<Rect> {
        let state = self.state.lock();
        let block = state.block(page)?;
        Some(Rect::new(
            0.0,
            state.screen_row(block.start),
            f64::from(state.columns),
            block.height() as f64,
        ))
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn scroll_by(&self, rows: isize) -> bool {
        let mut state = self.state.lock();
        let top = state.scroll_top.saturating_add_signed(rows);
        state.set_scroll(top)
    }

    /// Whether the view scrolled since the last call.
    pub fn take_scrolled(&self) -> bool {
        std::mem::take(&mut self.state.lock().scrolled)
    }

    pub fn set_menu(&self, menu: Option<Rect>) {
        self.state.lock().menu = menu;
    }

    pub fn menu(&self) -> Option<Rect> {
        self.state.lock().menu
    }

    /// Ancestor chain of the cell at `(column, row)`.
    pub fn hit_path(&self, column: u16, row: u16) -> ElementPath {
        let state = self.state.lock();
        let point = Point::new(f64::from(column), f64::from(row));
        if state.menu.is_some_and(|menu| menu.contains(point)) {
            return ElementPath::new(vec![ElementKind::SelectionMenu]);
        }
        match state.document_row(row) {
            Some(doc_row) => state.path_at(doc_row),
            None => ElementPath::new(vec![ElementKind::Chrome]),
        }
    }

    /// Starts a drag when the press lands inside the document.
    pub fn begin_drag(&self, column: u16, row: u16) {
        let mut state = self.state.lock();
        state.drag = state.document_row(row).map(|row| {
            let position = TextPosition {
                row,
                column: usize::from(column),
            };
            Drag {
                anchor: position,
                head: position,
            }
        });
    }

    pub fn extend_drag(&self, column: u16, row: u16) {
        let mut state = self.state.lock();
        let max_row = usize::from(state.rows.saturating_sub(1));
        let row = state.scroll_top + usize::from(row).min(max_row);
        if let Some(drag) = state.drag.as_mut() {
            drag.head = TextPosition {
                row,
                column: usize::from(column),
            };
        }
    }

    pub fn clear_drag(&self) {
        self.state.lock().drag = None;
    }

    /// Draws the visible rows, reverse-highlighting the dragged range.
    pub fn render<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let state = self.state.lock();
        let span = state.drag.filter(|drag| drag.anchor != drag.head).map(|drag| {
            if drag.anchor <= drag.head {
                (drag.anchor, drag.head)
            } else {
                (drag.head, drag.anchor)
            }
        });
        for screen_row in 0..state.rows {
            let row = state.scroll_top + usize::from(screen_row);
            writer
                .queue(cursor::MoveTo(0, screen_row))?
                .queue(Clear(ClearType::CurrentLine))?;
            let Some(block) = state.block_at(row) else {
                continue;
            };
            if row == block.start {
                writer
                    .queue(SetAttribute(Attribute::Bold))?
                    .queue(Print(format!("--- Page {} ---", block.page)))?
                    .queue(SetAttribute(Attribute::Reset))?;
                continue;
            }
            let Some(line) = block.line_at(row) else {
                continue;
            };
            match span.filter(|(start, end)| row >= start.row && row <= end.row) {
                Some((start, end)) => {
                    let from = if row == start.row { start.column } else { 0 };
                    let to = if row == end.row {
                        end.column + 1
                    } else {
                        usize::MAX
                    };
                    let before: String = line.chars().take(from).collect();
                    let inside: String =
                        line.chars().skip(from).take(to.saturating_sub(from)).collect();
                    let after: String = line.chars().skip(to).collect();
                    writer
                        .queue(Print(before))?
                        .queue(SetAttribute(Attribute::Reverse))?
                        .queue(Print(inside))?
                        .queue(SetAttribute(Attribute::Reset))?
                        .queue(Print(after))?;
                }
                None => {
                    writer.queue(Print(line))?;
                }
            }
        }
        Ok(())
    }
}

fn relayout(state: &mut LayoutState, pages: Vec<(usize, String)>) {
    let width = state.text_width();
    let mut start = 0;
    state.blocks = pages
        .into_iter()
        .map(|(page, text)| {
            let lines: Vec<String> = textwrap::wrap(&text, width)
                .into_iter()
                .map(|line| line.into_owned())
                .collect();
            let block = PageBlock { page, start, lines };
            start += block.height() + 1;
            block
        })
        .collect();
    state.total_rows = start;
    let top = state.scroll_top.min(state.max_scroll());
    state.scroll_top = top;
    trace!(pages = state.blocks.len(), rows = start, width, "layout rebuilt");
}

impl ScrollContainer for TextLayout {
    fn viewport(&self) -> Rect {
        let state = self.state.lock();
        Rect::new(0.0, 0.0, f64::from(state.columns), f64::from(state.rows))
    }

    fn scroll_top(&self) -> f64 {
        self.state.lock().scroll_top as f64
    }

    /// Terminals cannot animate, so both behaviours jump.
    fn scroll_to(&self, top: f64, _behavior: ScrollBehavior) {
        let top = top.max(0.0).round() as usize;
        self.state.lock().set_scroll(top);
    }
}

impl SelectionSource for TextLayout {
    fn current(&self) -> Option<SelectedRange> {
        let state = self.state.lock();
        let drag = state.drag?;
        let (start, end) = if drag.anchor <= drag.head {
            (drag.anchor, drag.head)
        } else {
            (drag.head, drag.anchor)
        };
        let text = state.selected_text(drag);

        let single_row = start.row == end.row;
        let (left, width) = if single_row {
            (start.column as f64, (end.column - start.column + 1) as f64)
        } else {
            (0.0, f64::from(state.columns))
        };
        let bounds = Rect::new(
            left,
            state.screen_row(start.row),
            width,
            (end.row - start.row + 1) as f64,
        );

        let start_path = state.path_at(start.row);
        let same_page = start_path.page().is_some()
            && start_path.page() == state.path_at(end.row).page();
        let ancestor = if same_page {
            start_path
        } else {
            ElementPath::new(vec![ElementKind::DocumentContainer])
        };
        Some(SelectedRange {
            text,
            bounds,
            ancestor,
        })
    }
}

/// The floating list of intents shown next to a live selection.
pub struct SelectionMenu;

impl SelectionMenu {
    fn entries() -> Vec<String> {
        ActionIntent::ALL
            .iter()
            .enumerate()
            .map(|(index, intent)| {
                format!(
                    " {} {:<8} {} ",
                    index + 1,
                    intent.label(),
                    intent.description()
                )
            })
            .collect()
    }

    pub fn size() -> Size {
        let width = Self::entries()
            .iter()
            .map(|entry| entry.chars().count())
            .max()
            .unwrap_or(0);
        Size::new(width as f64, ActionIntent::ALL.len() as f64)
    }

    pub fn rect_at(anchor: Point) -> Rect {
        let size = Self::size();
        Rect::new(anchor.x.floor(), anchor.y.floor(), size.width, size.height)
    }

    /// Intent under the cell at `(column, row)` for a menu drawn at `rect`.
    pub fn intent_at(rect: Rect, column: u16, row: u16) -> Option<ActionIntent> {
        let point = Point::new(f64::from(column), f64::from(row));
        if !rect.contains(point) {
            return None;
        }
        let index = (point.y - rect.top) as usize;
        ActionIntent::ALL.get(index).copied()
    }

    pub fn render<W: Write>(writer: &mut W, rect: Rect) -> io::Result<()> {
        let width = rect.width as usize;
        for (offset, entry) in Self::entries().into_iter().enumerate() {
            let row = rect.top as u16 + offset as u16;
            writer
                .queue(cursor::MoveTo(rect.left as u16, row))?
                .queue(SetAttribute(Attribute::Reverse))?
                .queue(Print(format!("{entry:<width$}")))?
                .queue(SetAttribute(Attribute::Reset))?;
        }
        Ok(())
    }
}

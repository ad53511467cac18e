//! Text selection detection.
//!
//! The detector is a two-state machine (`Idle`, `Active`) fed with pointer and
//! selection-change events. Reading the platform selection after a release and
//! clearing after an outside interaction both go through keyed timers; every
//! new event cancels whichever of the two is pending, so a late timer never
//! acts on state that a newer event already replaced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::geometry::{Point, Rect, Size};
use crate::schedule::Timers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    DocumentContainer,
    Page(usize),
    TextLayer,
    SelectionMenu,
    Chrome,
}

/// Ancestor chain of an event target or selection range, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementPath(Vec<ElementKind>);

impl ElementPath {
    pub fn new(chain: Vec<ElementKind>) -> Self {
        Self(chain)
    }

    pub fn contains(&self, kind: ElementKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn within_document(&self) -> bool {
        self.contains(ElementKind::DocumentContainer)
    }

    pub fn within_menu(&self) -> bool {
        self.contains(ElementKind::SelectionMenu)
    }

    /// Innermost page on the chain, if any.
    pub fn page(&self) -> Option<usize> {
        self.0.iter().find_map(|kind| match kind {
            ElementKind::Page(page) => Some(*page),
            _ => None,
        })
    }
}

/// What the platform selection API reports for the live selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedRange {
    pub text: String,
    pub bounds: Rect,
    /// Ancestors of the range's closest common element.
    pub ancestor: ElementPath,
}

pub trait SelectionSource: Send + Sync {
    fn current(&self) -> Option<SelectedRange>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub text: String,
    pub anchor_x: f64,
    pub anchor_y: f64,
}

impl Selection {
    pub fn anchor(&self) -> Point {
        Point::new(self.anchor_x, self.anchor_y)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SelectionState {
    #[default]
    Idle,
    Active(Selection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionChange {
    Activated(Selection),
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionSettings {
    pub settle_delay: Duration,
    pub clear_grace: Duration,
    /// Gap between the selection's bottom edge and the menu.
    pub anchor_offset: f64,
    pub edge_margin: f64,
    pub menu_size: Size,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(10),
            clear_grace: Duration::from_millis(100),
            anchor_offset: 10.0,
            edge_margin: 10.0,
            menu_size: Size::new(200.0, 140.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SelectionTimer {
    Settle,
    Clear,
}

pub struct SelectionDetector {
    source: Arc<dyn SelectionSource>,
    settings: SelectionSettings,
    viewport: Size,
    state: SelectionState,
    timers: Timers<SelectionTimer>,
}

impl SelectionDetector {
    pub fn new(
        source: Arc<dyn SelectionSource>,
        settings: SelectionSettings,
        viewport: Size,
    ) -> Self {
        Self {
            source,
            settings,
            viewport,
            state: SelectionState::Idle,
            timers: Timers::new(),
        }
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn selection(&self) -> Option<&Selection> {
        match &self.state {
            SelectionState::Active(selection) => Some(selection),
            SelectionState::Idle => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SelectionState::Active(_))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn pointer_up(&mut self, target: &ElementPath, now: Instant) {
        if target.within_menu() {
            return;
        }
        if target.within_document() {
            self.supersede(SelectionTimer::Settle, now, self.settings.settle_delay);
        } else {
            self.supersede(SelectionTimer::Clear, now, self.settings.clear_grace);
        }
    }

    /// Returns the change when the press dismissed an active selection.
    pub fn pointer_down(
        &mut self,
        target: &ElementPath,
        _now: Instant,
    ) -> Option<SelectionChange> {
        if target.within_menu() || target.within_document() {
            return None;
        }
        self.clear()
    }

    pub fn selection_changed(&mut self, now: Instant) {
        let empty = self
            .source
            .current()
            .map_or(true, |range| range.text.trim().is_empty());
        if empty {
            self.supersede(SelectionTimer::Clear, now, self.settings.clear_grace);
        }
    }

    pub fn dismiss(&mut self) -> Option<SelectionChange> {
        self.clear()
    }

    /// Removes the live selection for the caller to act on.
    pub fn take(&mut self) -> Option<Selection> {
        self.timers.cancel_all();
        match std::mem::take(&mut self.state) {
            SelectionState::Active(selection) => Some(selection),
            SelectionState::Idle => None,
        }
    }

    pub fn poll(&mut self, now: Instant) -> Option<SelectionChange> {
        let mut change = None;
        for timer in self.timers.fire_due(now) {
            change = match timer {
                SelectionTimer::Settle => self.settle().or(change),
                SelectionTimer::Clear => self.clear().or(change),
            };
        }
        change
    }

    fn supersede(&mut self, timer: SelectionTimer, now: Instant, delay: Duration) {
        trace!(?timer, "selection timer scheduled");
        self.timers.cancel_all();
        self.timers.schedule(timer, now, delay);
    }

    fn settle(&mut self) -> Option<SelectionChange> {
        let range = self.source.current()?;
        let text = range.text.trim();
        if text.is_empty() || !range.ancestor.within_document() {
            trace!("selection ignored");
            return None;
        }
        let anchor = self.anchor_for(range.bounds);
        let selection = Selection {
            text: text.to_owned(),
            anchor_x: anchor.x,
            anchor_y: anchor.y,
        };
        debug!(chars = selection.text.chars().count(), "selection active");
        self.state = SelectionState::Active(selection.clone());
        Some(SelectionChange::Activated(selection))
    }

    fn clear(&mut self) -> Option<SelectionChange> {
        self.timers.cancel_all();
        match std::mem::take(&mut self.state) {
            SelectionState::Active(_) => {
                debug!("selection cleared");
                Some(SelectionChange::Cleared)
            }
            SelectionState::Idle => None,
        }
    }

    /// Horizontal middle and just below the selection, kept inside the
    /// viewport. A menu that would overflow the bottom edge opens above.
    fn anchor_for(&self, bounds: Rect) -> Point {
        let SelectionSettings {
            anchor_offset,
            edge_margin,
            menu_size,
            ..
        } = self.settings;
        let mut x = bounds.center_x();
        let mut y = bounds.bottom() + anchor_offset;

        if x + menu_size.width > self.viewport.width - edge_margin {
            x = self.viewport.width - menu_size.width - edge_margin;
        }
        if y + menu_size.height > self.viewport.height - edge_margin {
            y = bounds.top - menu_size.height - anchor_offset;
        }
        let max_y = (self.viewport.height - menu_size.height).max(0.0);
        Point::new(x.max(0.0), y.clamp(0.0, max_y))
    }
}

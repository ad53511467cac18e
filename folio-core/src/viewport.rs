use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::geometry::Rect;
use crate::registry::PageRenderRegistry;
use crate::schedule::Timers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

/// The scrollable area hosting the pages.
pub trait ScrollContainer: Send + Sync {
    /// Visible rectangle of the container, in the same coordinates as the
    /// page bounds.
    fn viewport(&self) -> Rect;
    fn scroll_top(&self) -> f64;
    fn scroll_to(&self, top: f64, behavior: ScrollBehavior);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TrackerTimer {
    Recompute,
}

/// Works out which page the reader is on from the scroll position.
pub struct ViewportTracker {
    registry: PageRenderRegistry,
    container: Arc<dyn ScrollContainer>,
    debounce: Duration,
    timers: Timers<TrackerTimer>,
    tracked: Option<usize>,
}

impl ViewportTracker {
    pub fn new(
        registry: PageRenderRegistry,
        container: Arc<dyn ScrollContainer>,
        debounce: Duration,
    ) -> Self {
        Self {
            registry,
            container,
            debounce,
            timers: Timers::new(),
            tracked: None,
        }
    }

    pub fn registry(&self) -> &PageRenderRegistry {
        &self.registry
    }

    pub fn tracked(&self) -> Option<usize> {
        self.tracked
    }

    /// Records the page the owner already considers current, so the
    /// recomputation does not report it again.
    pub fn set_tracked(&mut self, page: usize) {
        self.tracked = Some(page);
    }

    pub fn reset(&mut self) {
        self.timers.cancel_all();
        self.tracked = None;
    }

    /// Collapses bursts of scroll events into one recomputation `debounce`
    /// after the last of them.
    pub fn on_scroll(&mut self, now: Instant) {
        trace!("scroll event");
        self.timers
            .schedule(TrackerTimer::Recompute, now, self.debounce);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Runs the pending recomputation if it is due. Returns the new current
    /// page only when it differs from the tracked one.
    pub fn poll(&mut self, now: Instant) -> Option<usize> {
        if self.timers.fire_due(now).is_empty() {
            return None;
        }
        let candidate = self.recompute()?;
        if self.tracked == Some(candidate) {
            return None;
        }
        debug!(page = candidate, previous = ?self.tracked, "current page changed");
        self.tracked = Some(candidate);
        Some(candidate)
    }

    /// First mounted page, in ascending order, whose top edge sits between
    /// half its own height above the viewport top and the viewport's middle.
    pub fn recompute(&self) -> Option<usize> {
        let viewport = self.container.viewport();
        for page in self.registry.pages() {
            let Some(bounds) = self.registry.bounds_of(page) else {
                continue;
            };
            let relative_top = bounds.top - viewport.top;
            if relative_top >= -bounds.height / 2.0 && relative_top < viewport.height / 2.0 {
                return Some(page);
            }
        }
        None
    }

    /// Smoothly scrolls so the page's top edge meets the viewport top. The
    /// resulting scroll events confirm the same page through `poll`.
    pub fn scroll_to_page(&self, page: usize) -> bool {
        let Some(bounds) = self.registry.bounds_of(page) else {
            debug!(page, "scroll target not mounted");
            return false;
        };
        let viewport = self.container.viewport();
        let top = self.container.scroll_top() + (bounds.top - viewport.top);
        self.container.scroll_to(top, ScrollBehavior::Smooth);
        true
    }
}

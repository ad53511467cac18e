use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::geometry::Rect;

/// Live binding to a mounted page's on-screen rectangle. Returns `None` once
/// the page is no longer laid out.
pub trait BoundsProvider: Send + Sync {
    fn bounds(&self) -> Option<Rect>;
}

impl<F> BoundsProvider for F
where
    F: Fn() -> Option<Rect> + Send + Sync,
{
    fn bounds(&self) -> Option<Rect> {
        self()
    }
}

/// One bounds handle per mounted page (1-based page numbers).
///
/// Clones share the same table, so the host can mount and unmount pages from
/// wherever its layout runs while the tracker reads from another owner.
#[derive(Clone, Default)]
pub struct PageRenderRegistry {
    pages: Arc<Mutex<BTreeMap<usize, Arc<dyn BoundsProvider>>>>,
}

impl PageRenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `page`, replacing any handle a stale mount left behind.
    pub fn register(&self, page: usize, provider: Arc<dyn BoundsProvider>) {
        trace!(page, "page mounted");
        self.pages.lock().insert(page, provider);
    }

    pub fn unregister(&self, page: usize) -> bool {
        trace!(page, "page unmounted");
        self.pages.lock().remove(&page).is_some()
    }

    pub fn bounds_of(&self, page: usize) -> Option<Rect> {
        // Release the table before calling into the provider.
        let provider = self.pages.lock().get(&page).cloned()?;
        provider.bounds()
    }

    /// Mounted page numbers in ascending order.
    pub fn pages(&self) -> Vec<usize> {
        self.pages.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }

    pub fn clear(&self) {
        self.pages.lock().clear();
    }
}

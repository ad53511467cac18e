use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod buffer;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod extraction;
pub mod geometry;
pub mod registry;
pub mod schedule;
pub mod selection;
pub mod viewport;

pub use buffer::{BufferError, ExtractedTextBuffer, PageSegment, SegmentKind};
pub use config::{CatalogEntry, ConfigError, DocumentCatalog, ViewerConfig};
pub use controller::{
    ExtractionMessage, NavigationOutcome, ReadableContext, ViewerController, ViewerState,
};
pub use dispatch::{
    ActionDispatcher, ActionIntent, ActionRequest, ConversationSink, DispatchError,
};
pub use extraction::{ExtractedSegment, TextExtraction};
pub use geometry::{Point, Rect, Size};
pub use registry::{BoundsProvider, PageRenderRegistry};
pub use schedule::Timers;
pub use selection::{
    ElementKind, ElementPath, SelectedRange, Selection, SelectionChange, SelectionDetector,
    SelectionSettings, SelectionSource, SelectionState,
};
pub use viewport::{ScrollBehavior, ScrollContainer, ViewportTracker};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0d6a52-8c1e-5b7a-9e44-2d6c1b8f7a90").expect("valid namespace UUID")
});

/// Stable id for a locator. Local paths are resolved first so the same file
/// reached through different relative paths maps to one id.
pub fn document_id_for_locator(locator: &str) -> DocumentId {
    let path = Path::new(locator);
    let resolved = if path.exists() {
        path.canonicalize()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| locator.to_owned())
    } else {
        locator.to_owned()
    };
    Uuid::new_v5(&DOCUMENT_NAMESPACE, resolved.as_bytes())
}

/// A document offered by the catalog. Immutable once selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub source_locator: String,
}

impl Document {
    pub fn new(name: impl Into<String>, source_locator: impl Into<String>) -> Self {
        let source_locator = source_locator.into();
        Self {
            id: document_id_for_locator(&source_locator),
            name: name.into(),
            source_locator,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::new(name, path.to_string_lossy())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

/// Raised by a backend when the document as a whole cannot yield text.
/// Extraction treats it as a total failure instead of a per-page one.
#[derive(Debug, Error)]
#[error("document is unreadable: {reason}")]
pub struct DocumentUnreadable {
    pub reason: String,
}

/// A loaded document. `page_text` takes a 0-based page index and may block.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn page_text(&self, page_index: usize) -> Result<String>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, locator: &str) -> Result<Arc<dyn DocumentBackend>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    NextPage,
    PrevPage,
    GotoPage { page: usize },
    ZoomIn,
    ZoomOut,
    SetZoom { zoom: f32 },
}

/// Notifications queued by the controller for the host to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentChanged(DocumentId),
    PagesAvailable { total_pages: usize },
    PageChanged { page: usize },
    ZoomChanged { zoom: f32 },
    TextUpdated { segments: usize },
    ExtractionFinished { segments: usize },
    LoadFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn document_id_is_stable_for_same_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sample.pdf");
        std::fs::write(&file_path, b"dummy").unwrap();

        let first = Document::from_path(&file_path);
        let second = Document::from_path(&file_path);

        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "sample");
    }

    #[test]
    fn remote_locators_hash_verbatim() {
        let a = document_id_for_locator("/documents/I_Teorico.pdf");
        let b = document_id_for_locator("/documents/II_Teorico.pdf");
        assert_ne!(a, b);
        assert_eq!(a, document_id_for_locator("/documents/I_Teorico.pdf"));
    }
}

use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::SegmentKind;
use crate::{DocumentBackend, DocumentUnreadable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedSegment {
    Page {
        page: usize,
        text: String,
        kind: SegmentKind,
    },
    /// Whole-document summary emitted when no text can be read at all.
    Fallback { summary: String },
}

/// One extraction run over a loaded backend.
///
/// Pages are read strictly in order and one at a time; each page is awaited
/// before the next is requested. A run is finite and, once exhausted, keeps
/// returning `None`. When no page at all could be read, the run ends with a
/// whole-document fallback after the placeholders.
pub struct TextExtraction {
    backend: Arc<dyn DocumentBackend>,
    document_name: String,
    page_count: usize,
    next_index: usize,
    pages_read: usize,
    finished: bool,
}

impl TextExtraction {
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        document_name: impl Into<String>,
        page_count: usize,
    ) -> Self {
        Self {
            backend,
            document_name: document_name.into(),
            page_count,
            next_index: 0,
            pages_read: 0,
            finished: false,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Number of pages requested from the backend so far.
    pub fn pages_attempted(&self) -> usize {
        self.next_index
    }

    /// Pages the backend returned text for.
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn next_segment(&mut self) -> Option<ExtractedSegment> {
        if self.finished {
            return None;
        }
        if self.next_index >= self.page_count {
            self.finished = true;
            if self.page_count > 0 && self.pages_read == 0 {
                warn!(
                    document = %self.document_name,
                    pages = self.page_count,
                    "no page yielded text"
                );
                return Some(self.fallback());
            }
            return None;
        }

        let page_index = self.next_index;
        self.next_index += 1;
        let page = page_index + 1;

        let backend = Arc::clone(&self.backend);
        let outcome = tokio::task::spawn_blocking(move || backend.page_text(page_index)).await;

        let segment = match outcome {
            Ok(Ok(raw)) => {
                debug!(page, chars = raw.len(), "page text extracted");
                self.pages_read += 1;
                ExtractedSegment::Page {
                    page,
                    text: normalize_whitespace(&raw),
                    kind: SegmentKind::Extracted,
                }
            }
            Ok(Err(err)) if err.chain().any(|cause| cause.is::<DocumentUnreadable>()) => {
                warn!(?err, document = %self.document_name, "document text unreadable");
                self.finished = true;
                self.fallback()
            }
            Ok(Err(err)) => {
                warn!(?err, page, "page text extraction failed, using placeholder");
                placeholder(page)
            }
            Err(err) => {
                warn!(?err, page, "page text task aborted, using placeholder");
                placeholder(page)
            }
        };
        Some(segment)
    }

    fn fallback(&self) -> ExtractedSegment {
        ExtractedSegment::Fallback {
            summary: fallback_summary(&self.document_name, self.page_count),
        }
    }
}

fn placeholder(page: usize) -> ExtractedSegment {
    ExtractedSegment::Page {
        page,
        text: String::new(),
        kind: SegmentKind::Placeholder,
    }
}

pub fn fallback_summary(document_name: &str, page_count: usize) -> String {
    format!("{document_name} with {page_count} pages")
}

/// Collapses whitespace runs into single spaces, mirroring how text items of a
/// page are joined.
pub fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

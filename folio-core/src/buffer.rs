use std::fmt::Write as _;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Extracted,
    /// The page could not be read; the segment holds empty text.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSegment {
    pub page: usize,
    pub text: String,
    pub kind: SegmentKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("write from generation {write} rejected, buffer belongs to generation {current}")]
    StaleGeneration { current: u64, write: u64 },
    #[error("page {page} already written")]
    AlreadyWritten { page: usize },
    #[error("page {page} written out of order, expected page {expected}")]
    OutOfOrder { page: usize, expected: usize },
    #[error("page {page} exceeds page count {page_count}")]
    BeyondPageCount { page: usize, page_count: usize },
    #[error("buffer already holds a fallback summary")]
    Finalized,
}

/// Per-page text segments for one generation plus their concatenation.
///
/// Segment `i` always holds page `i + 1`. Writes are append-only and tagged
/// with the generation that produced them; anything else is rejected.
#[derive(Debug, Clone, Default)]
pub struct ExtractedTextBuffer {
    generation: u64,
    page_count: usize,
    segments: Vec<PageSegment>,
    fallback: Option<String>,
    text: String,
}

impl ExtractedTextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all text and binds the buffer to a new generation.
    pub fn reset(&mut self, generation: u64, page_count: usize) {
        self.generation = generation;
        self.page_count = page_count;
        self.segments.clear();
        self.fallback = None;
        self.text.clear();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn push_page(
        &mut self,
        generation: u64,
        page: usize,
        text: String,
        kind: SegmentKind,
    ) -> Result<(), BufferError> {
        self.check_generation(generation)?;
        if self.fallback.is_some() {
            return Err(BufferError::Finalized);
        }
        if page == 0 || page > self.page_count {
            return Err(BufferError::BeyondPageCount {
                page,
                page_count: self.page_count,
            });
        }
        let expected = self.segments.len() + 1;
        if page < expected {
            return Err(BufferError::AlreadyWritten { page });
        }
        if page > expected {
            return Err(BufferError::OutOfOrder { page, expected });
        }

        let _ = write!(self.text, "\n--- Page {page} ---\n{text}\n");
        self.segments.push(PageSegment { page, text, kind });
        Ok(())
    }

    /// Records a whole-document fallback summary. Segments already written are
    /// kept, but the cumulative text becomes the summary.
    pub fn set_fallback(&mut self, generation: u64, summary: String) -> Result<(), BufferError> {
        self.check_generation(generation)?;
        if self.fallback.is_some() {
            return Err(BufferError::Finalized);
        }
        self.fallback = Some(summary);
        Ok(())
    }

    fn check_generation(&self, generation: u64) -> Result<(), BufferError> {
        if generation != self.generation {
            return Err(BufferError::StaleGeneration {
                current: self.generation,
                write: generation,
            });
        }
        Ok(())
    }

    pub fn segments(&self) -> &[PageSegment] {
        &self.segments
    }

    /// Segment for a 1-based page number.
    pub fn segment(&self, page: usize) -> Option<&PageSegment> {
        page.checked_sub(1).and_then(|idx| self.segments.get(idx))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.fallback.is_none()
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.fallback.is_some() || self.segments.len() == self.page_count
    }

    /// Cumulative text read by context consumers.
    pub fn text(&self) -> &str {
        match &self.fallback {
            Some(summary) => summary,
            None => &self.text,
        }
    }

    /// Characters `[start, end)` of the cumulative text, clamped to its length.
    pub fn char_slice(&self, start: usize, end: usize) -> &str {
        slice_chars(self.text(), start, end)
    }
}

/// Walks the text once, from the start bound straight on to the end bound.
pub(crate) fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }
    let mut boundaries = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()));
    let Some(from) = boundaries.nth(start) else {
        return "";
    };
    let to = boundaries.nth(end - start - 1).unwrap_or(text.len());
    &text[from..to]
}

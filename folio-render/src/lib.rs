use std::sync::Arc;

use anyhow::Result;
use folio_core::DocumentProvider;

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumDocument, PdfiumProvider};

/// Provider for the formats this build supports.
#[cfg(feature = "pdf")]
pub fn default_provider() -> Result<Arc<dyn DocumentProvider>> {
    Ok(Arc::new(PdfiumProvider::new()?))
}

#[cfg(not(feature = "pdf"))]
pub fn default_provider() -> Result<Arc<dyn DocumentProvider>> {
    anyhow::bail!("folio-render was built without the `pdf` feature")
}

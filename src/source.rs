//! Page-level access to source documents.
//!
//! Stages never touch PDF bytes directly. They go through [`PageSource`]
//! (one opened document) obtained from a [`SourceLoader`], and through an
//! optional [`OcrEngine`] for pages without a usable text layer. Tests
//! substitute in-memory implementations of all three.

use std::path::Path;

use pagetrail_core::table::{self, Table};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OCR backend not available: {0}")]
    OcrUnavailable(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One opened document. Pages are 1-based.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> u32;

    /// Text layer of a page; empty when the page has none.
    fn page_text(&self, page: u32) -> Result<String, SourceError>;

    /// Tables on a page. Defaults to column-aligned detection over the text layer.
    fn page_tables(&self, page: u32) -> Result<Vec<Table>, SourceError> {
        Ok(table::detect_tables(&self.page_text(page)?).tables)
    }

    /// The page is an image with no text-showing content.
    fn is_page_scanned(&self, page: u32) -> Result<bool, SourceError>;

    fn check_page(&self, page: u32) -> Result<(), SourceError> {
        let page_count = self.page_count();
        if page == 0 || page > page_count {
            return Err(SourceError::PageOutOfRange { page, page_count });
        }
        Ok(())
    }
}

/// Opens documents by path.
pub trait SourceLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PageSource>, SourceError>;
}

/// Recognized text of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// Engine confidence, 0–100.
    pub confidence: f64,
}

/// Image-based text recognition for a single page.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, path: &Path, page: u32) -> Result<OcrOutput, SourceError>;
}

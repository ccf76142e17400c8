//! PDF page source.
//!
//! Text comes from `pdf-extract`, one string per page. Scanned-page
//! detection decodes each page's content stream with `lopdf` and looks for
//! image painting without any text-showing operators. When `pdf-extract`
//! rejects a file that `lopdf` can still load, per-page text falls back to
//! `lopdf`'s own extractor.

use std::path::Path;

use lopdf::content::Content;
use lopdf::{Document, ObjectId};

use crate::source::{PageSource, SourceError, SourceLoader};

/// Opens PDF files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

impl SourceLoader for PdfLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn PageSource>, SourceError> {
        let bytes = std::fs::read(path).map_err(|e| SourceError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(PdfDocument::from_bytes(&bytes)?))
    }
}

#[derive(Debug, Clone)]
struct PdfPage {
    text: String,
    image_only: bool,
}

/// A fully loaded PDF. Page text and image flags are computed once at open.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pages: Vec<PdfPage>,
}

impl PdfDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SourceError> {
        let doc = Document::load_mem(bytes).map_err(|e| SourceError::Pdf(e.to_string()))?;
        let page_ids: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();

        let texts = match pdf_extract::extract_text_from_mem_by_pages(bytes) {
            Ok(texts) => texts,
            Err(e) => {
                tracing::warn!(error = %e, "pdf-extract failed, falling back to lopdf text extraction");
                page_ids
                    .iter()
                    .map(|(number, _)| doc.extract_text(&[*number]).unwrap_or_default())
                    .collect()
            }
        };

        let count = page_ids.len().max(texts.len());
        let pages = (0..count)
            .map(|i| PdfPage {
                text: texts.get(i).cloned().unwrap_or_default(),
                image_only: page_ids
                    .get(i)
                    .map(|(_, id)| page_operators(&doc, *id).is_image_only())
                    .unwrap_or(false),
            })
            .collect();

        Ok(Self { pages })
    }

    fn page(&self, page: u32) -> Result<&PdfPage, SourceError> {
        self.check_page(page)?;
        Ok(&self.pages[page as usize - 1])
    }
}

impl PageSource for PdfDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, SourceError> {
        Ok(self.page(page)?.text.clone())
    }

    fn is_page_scanned(&self, page: u32) -> Result<bool, SourceError> {
        Ok(self.page(page)?.image_only)
    }
}

/// Operator tallies from one page's content stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct OperatorCounts {
    images: usize,
    text: usize,
}

impl OperatorCounts {
    fn is_image_only(&self) -> bool {
        self.images > 0 && self.text == 0
    }
}

fn page_operators(doc: &Document, page_id: ObjectId) -> OperatorCounts {
    let mut counts = OperatorCounts::default();
    let Ok(data) = doc.get_page_content(page_id) else {
        return counts;
    };
    let Ok(content) = Content::decode(&data) else {
        return counts;
    };
    for op in &content.operations {
        match op.operator.as_str() {
            "Do" | "BI" => counts.images += 1,
            "Tj" | "TJ" | "'" | "\"" => counts.text += 1,
            _ => {}
        }
    }
    counts
}

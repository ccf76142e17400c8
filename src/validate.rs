//! Validate: advisory cross-check of persisted blocks against a fresh read
//! of the source.
//!
//! The file is first compared with the size and SHA-256 recorded at
//! registration; a changed file is reported as a source mismatch rather
//! than as parser variance. Pages are then sampled evenly from the pages
//! that have blocks. For each, the alphanumeric length of the current text
//! layer is compared with that of the persisted text-layer blocks. Pages
//! over the variance tolerance are flagged. Nothing is re-parsed and no
//! status changes.

use std::path::Path;

use pagetrail_core::models::{method, Block};
use pagetrail_core::probe::sample_pages;
use pagetrail_core::verify::{content_measure, exceeds_tolerance, relative_variance};
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::registry;
use crate::source::PageSource;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageCheck {
    Pass,
    /// Variance above tolerance.
    Flagged,
    /// No text-layer content to compare.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageValidation {
    pub page_number: i64,
    pub fresh_length: usize,
    pub persisted_length: usize,
    pub variance: Option<f64>,
    pub check: PageCheck,
    pub note: Option<String>,
}

/// The file on disk no longer matches what was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMismatch {
    pub registered_size_bytes: i64,
    pub current_size_bytes: i64,
    pub registered_sha256: String,
    pub current_sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub document_id: String,
    pub filename: String,
    /// Sample size asked for, if any.
    pub requested_sample_size: Option<u32>,
    /// Pages actually sampled.
    pub sample_size: u32,
    pub tolerance: f64,
    pub source_mismatch: Option<SourceMismatch>,
    pub pages: Vec<PageValidation>,
    pub flagged_pages: Vec<i64>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.source_mismatch.is_none() && self.flagged_pages.is_empty()
    }
}

/// Cross-check `sample_size` pages (the configured default when `None`).
pub async fn validate(
    pipeline: &Pipeline,
    document_id: &str,
    sample_size: Option<u32>,
) -> Result<ValidationReport> {
    let doc = store::fetch_document(pipeline.pool(), document_id).await?;
    let blocks = store::load_blocks(pipeline.pool(), document_id).await?;

    let mut pages_with_blocks: Vec<i64> = blocks.iter().map(|b| b.page_number).collect();
    pages_with_blocks.dedup();
    if pages_with_blocks.is_empty() {
        return Err(PipelineError::NotParsed(document_id.to_string()));
    }
    let available = pages_with_blocks.len() as u32;

    let requested_sample_size = sample_size;
    let sample_size = match sample_size {
        Some(n) => {
            let limit = doc.page_count.map(|c| c as u32).unwrap_or(available);
            if n == 0 || n > limit {
                return Err(PipelineError::InvalidInput(format!(
                    "sample size must be between 1 and the page count ({}), got {}",
                    limit, n
                )));
            }
            n
        }
        None => pipeline.config().audit.validate_sample_size.min(available),
    };
    let tolerance = pipeline.config().audit.variance_tolerance;

    let path = Path::new(&doc.file_path);
    let source_mismatch = check_source(path, doc.file_size_bytes, &doc.sha256)?;
    if let Some(mismatch) = &source_mismatch {
        tracing::warn!(
            document_id,
            registered_bytes = mismatch.registered_size_bytes,
            current_bytes = mismatch.current_size_bytes,
            "source file changed since registration"
        );
    }

    let source = pipeline.loader().open(path)?;
    let mut pages = Vec::new();
    for index in sample_pages(available, sample_size) {
        let page_number = pages_with_blocks[index as usize - 1];
        let page_blocks: Vec<&Block> = blocks.iter().filter(|b| b.page_number == page_number).collect();
        pages.push(check_page(source.as_ref(), page_number, &page_blocks, tolerance));
    }

    let flagged_pages: Vec<i64> = pages
        .iter()
        .filter(|p| p.check == PageCheck::Flagged)
        .map(|p| p.page_number)
        .collect();
    for page in pages.iter().filter(|p| p.check == PageCheck::Flagged) {
        tracing::warn!(
            document_id,
            page = page.page_number,
            fresh = page.fresh_length,
            persisted = page.persisted_length,
            variance = page.variance.unwrap_or_default(),
            tolerance,
            "validation variance above tolerance"
        );
    }
    tracing::info!(
        document_id,
        sampled = pages.len(),
        flagged = flagged_pages.len(),
        source_changed = source_mismatch.is_some(),
        "validated document"
    );

    Ok(ValidationReport {
        document_id: document_id.to_string(),
        filename: doc.filename,
        requested_sample_size,
        sample_size: pages.len() as u32,
        tolerance,
        source_mismatch,
        pages,
        flagged_pages,
    })
}

fn check_source(path: &Path, size_bytes: i64, sha256: &str) -> Result<Option<SourceMismatch>> {
    let current_size_bytes = std::fs::metadata(path)?.len() as i64;
    let current_sha256 = registry::sha256_file(path)?;
    if current_size_bytes == size_bytes && current_sha256 == sha256 {
        return Ok(None);
    }
    Ok(Some(SourceMismatch {
        registered_size_bytes: size_bytes,
        current_size_bytes,
        registered_sha256: sha256.to_string(),
        current_sha256,
    }))
}

fn check_page(
    source: &dyn PageSource,
    page_number: i64,
    blocks: &[&Block],
    tolerance: f64,
) -> PageValidation {
    let skipped = |note: String| PageValidation {
        page_number,
        fresh_length: 0,
        persisted_length: 0,
        variance: None,
        check: PageCheck::Skipped,
        note: Some(note),
    };

    if blocks.iter().any(|b| b.extraction_method == method::OCR_TESSERACT) {
        return skipped("content came from OCR; no text layer to compare".to_string());
    }
    let text_layer: Vec<&&Block> = blocks
        .iter()
        .filter(|b| !b.block_type.is_placeholder())
        .collect();
    if text_layer.is_empty() {
        return skipped("page has no extracted content".to_string());
    }

    let fresh = match source.page_text(page_number as u32) {
        Ok(text) => content_measure(&text),
        Err(e) => return skipped(format!("source page unreadable: {}", e)),
    };
    let persisted: usize = text_layer.iter().map(|b| content_measure(&b.content)).sum();
    let variance = relative_variance(fresh, persisted);
    let check = if exceeds_tolerance(variance, tolerance) {
        PageCheck::Flagged
    } else {
        PageCheck::Pass
    };

    PageValidation {
        page_number,
        fresh_length: fresh,
        persisted_length: persisted,
        variance: Some((variance * 10_000.0).round() / 10_000.0),
        check,
        note: None,
    }
}

//! Parse stage: deterministic per-page block extraction.
//!
//! The strategy comes from the persisted probe result (a `registered`
//! document is probed first). Every block records the method that actually
//! produced it and a confidence computed from that method's own signals.
//! A page that yields nothing becomes a zero-confidence placeholder block
//! plus a warning. If no page yields content the document is marked
//! `failed` and no blocks are written; a replace run that fails this way
//! also drops the previous block and chunk sets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pagetrail_core::confidence;
use pagetrail_core::models::{
    method, BlockDraft, BlockType, Document, IngestionStatus, RecommendedAction,
};
use pagetrail_core::table;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::probe;
use crate::source::{OcrEngine, PageSource};
use crate::store;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Replace an existing block set (and drop its chunks).
    pub replace: bool,
}

/// Non-fatal finding recorded while parsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    /// The page produced no content; a placeholder block stands in for it.
    PartialExtraction { page_number: i64, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub document_id: String,
    pub page_count: u32,
    pub strategy: RecommendedAction,
    pub blocks_inserted: usize,
    /// Blocks removed by a replace.
    pub blocks_replaced: u64,
    pub methods: BTreeMap<String, usize>,
    pub warnings: Vec<ParseWarning>,
    pub status: IngestionStatus,
}

struct PageExtraction {
    drafts: Vec<BlockDraft>,
    warning: Option<ParseWarning>,
}

pub async fn parse(pipeline: &Pipeline, document_id: &str, options: ParseOptions) -> Result<ParseOutcome> {
    let mut doc = store::fetch_document(pipeline.pool(), document_id).await?;
    match doc.ingestion_status {
        IngestionStatus::Registered | IngestionStatus::Probed => {}
        status if options.replace && status.can_rewind_to(IngestionStatus::Parsed) => {
            tracing::info!(document_id, from = %status, "replacing existing block set");
        }
        status => {
            return Err(PipelineError::AlreadyProcessed {
                document_id: document_id.to_string(),
                stage: "parse",
                status,
            })
        }
    }

    let path = PathBuf::from(&doc.file_path);
    let source = match pipeline.loader().open(&path) {
        Ok(source) => source,
        Err(e) => return fail(pipeline, &doc, e.to_string()).await,
    };
    let page_count = source.page_count();
    if page_count == 0 {
        return fail(pipeline, &doc, "document has no pages".to_string()).await;
    }

    if doc.ingestion_status == IngestionStatus::Registered {
        let outcome = probe::probe_opened(pipeline, &doc, source.as_ref(), None).await?;
        doc.ingestion_status = IngestionStatus::Probed;
        doc.probe_summary = Some(outcome.result);
    }

    let strategy = doc
        .probe_summary
        .as_ref()
        .map(|summary| summary.recommended_action)
        .unwrap_or(RecommendedAction::StandardText);
    tracing::info!(document_id, pages = page_count, strategy = %strategy, "parsing document");

    let mut drafts = Vec::new();
    let mut warnings = Vec::new();
    for page in 1..=page_count {
        let extraction = extract_page(source.as_ref(), &path, page, strategy, pipeline.ocr());
        if let Some(warning) = extraction.warning {
            let ParseWarning::PartialExtraction { page_number, reason } = &warning;
            tracing::warn!(document_id, page = page_number, reason = %reason, "partial extraction");
            warnings.push(warning);
        }
        drafts.extend(extraction.drafts);
    }

    if drafts.iter().all(|d| d.block_type.is_placeholder()) {
        return fail(
            pipeline,
            &doc,
            format!("none of {} pages yielded content", page_count),
        )
        .await;
    }

    let from = doc.ingestion_status;
    let to = if from == IngestionStatus::Probed {
        from.transition_to(IngestionStatus::Parsed)?
    } else {
        IngestionStatus::Parsed
    };

    let mut tx = pipeline.pool().begin().await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    let blocks_replaced = sqlx::query("DELETE FROM blocks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let mut ordinals: BTreeMap<i64, i64> = BTreeMap::new();
    let mut methods: BTreeMap<String, usize> = BTreeMap::new();
    for draft in &drafts {
        let ordinal = ordinals.entry(draft.page_number).or_insert(0);
        sqlx::query(
            "INSERT INTO blocks (id, document_id, page_number, ordinal, block_type, content, extraction_method, confidence) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(draft.page_number)
        .bind(*ordinal)
        .bind(draft.block_type.as_str())
        .bind(&draft.content)
        .bind(&draft.extraction_method)
        .bind(draft.confidence)
        .execute(&mut *tx)
        .await?;
        *ordinal += 1;
        *methods.entry(draft.extraction_method.clone()).or_insert(0) += 1;
    }

    sqlx::query(
        "UPDATE documents SET page_count = COALESCE(page_count, ?), updated_at = ? WHERE document_id = ?",
    )
    .bind(page_count as i64)
    .bind(store::now_ts())
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    store::swap_status(&mut *tx, document_id, from, to).await?;
    tx.commit().await?;

    tracing::info!(
        document_id,
        blocks = drafts.len(),
        replaced = blocks_replaced,
        warnings = warnings.len(),
        "parsed document"
    );

    Ok(ParseOutcome {
        document_id: document_id.to_string(),
        page_count,
        strategy,
        blocks_inserted: drafts.len(),
        blocks_replaced,
        methods,
        warnings,
        status: to,
    })
}

async fn fail(
    pipeline: &Pipeline,
    doc: &Document,
    reason: String,
) -> Result<ParseOutcome> {
    store::mark_failed(pipeline.pool(), doc, &reason).await?;
    Err(PipelineError::TotalExtractionFailure {
        document_id: doc.document_id.clone(),
        reason,
    })
}

fn extract_page(
    source: &dyn PageSource,
    path: &Path,
    page: u32,
    strategy: RecommendedAction,
    ocr: Option<&dyn OcrEngine>,
) -> PageExtraction {
    let page_number = page as i64;
    let scanned = source.is_page_scanned(page).unwrap_or_else(|e| {
        tracing::debug!(page, error = %e, "scan detection failed");
        false
    });
    let text = match source.page_text(page) {
        Ok(text) => text,
        Err(e) => {
            return placeholder(page_number, BlockType::Empty, format!("text extraction failed: {}", e))
        }
    };

    if scanned || text.trim().is_empty() {
        return extract_without_text_layer(path, page, scanned, ocr);
    }

    let drafts = match strategy {
        RecommendedAction::StandardText => vec![text_block(page_number, text.trim(), method::PDF_TEXT)],
        RecommendedAction::LayoutAware | RecommendedAction::OcrReview => {
            layout_blocks(source, page, &text)
        }
    };
    tracing::debug!(page, blocks = drafts.len(), "extracted page");
    PageExtraction {
        drafts,
        warning: None,
    }
}

/// Prose block followed by one block per reconstructed table.
fn layout_blocks(source: &dyn PageSource, page: u32, text: &str) -> Vec<BlockDraft> {
    let page_number = page as i64;
    let tables = source.page_tables(page).unwrap_or_else(|e| {
        tracing::debug!(page, error = %e, "table detection failed, using plain text");
        Vec::new()
    });

    let prose = if tables.is_empty() {
        text.trim().to_string()
    } else {
        table::detect_tables(text).prose
    };

    let mut drafts = Vec::with_capacity(tables.len() + 1);
    if !prose.is_empty() {
        drafts.push(text_block(page_number, &prose, method::LAYOUT_TEXT));
    }
    for table in &tables {
        drafts.push(BlockDraft {
            page_number,
            block_type: BlockType::Table,
            content: table.to_csv(),
            extraction_method: method::LAYOUT_TABLE.to_string(),
            confidence: confidence::table_confidence(table),
        });
    }
    drafts
}

fn extract_without_text_layer(
    path: &Path,
    page: u32,
    scanned: bool,
    ocr: Option<&dyn OcrEngine>,
) -> PageExtraction {
    let page_number = page as i64;
    let kind = if scanned {
        BlockType::ScannedImage
    } else {
        BlockType::Empty
    };

    let Some(ocr) = ocr else {
        return placeholder(page_number, kind, "no text layer and OCR is disabled".to_string());
    };

    match ocr.recognize(path, page) {
        Ok(output) if !output.text.trim().is_empty() => {
            tracing::debug!(page, engine = ocr.name(), confidence = output.confidence, "ocr page");
            PageExtraction {
                drafts: vec![BlockDraft {
                    page_number,
                    block_type: BlockType::Text,
                    content: output.text.trim().to_string(),
                    extraction_method: method::OCR_TESSERACT.to_string(),
                    confidence: output.confidence.clamp(0.0, confidence::MAX_CONFIDENCE),
                }],
                warning: None,
            }
        }
        Ok(_) => placeholder(page_number, kind, format!("{} found no text", ocr.name())),
        Err(e) => {
            tracing::warn!(page, engine = ocr.name(), error = %e, "ocr failed");
            placeholder(page_number, kind, format!("ocr failed: {}", e))
        }
    }
}

fn text_block(page_number: i64, text: &str, method: &str) -> BlockDraft {
    BlockDraft {
        page_number,
        block_type: BlockType::Text,
        content: text.to_string(),
        extraction_method: method.to_string(),
        confidence: confidence::text_confidence(text),
    }
}

fn placeholder(page_number: i64, kind: BlockType, reason: String) -> PageExtraction {
    PageExtraction {
        drafts: vec![BlockDraft {
            page_number,
            block_type: kind,
            content: String::new(),
            extraction_method: method::UNEXTRACTED.to_string(),
            confidence: 0.0,
        }],
        warning: Some(ParseWarning::PartialExtraction { page_number, reason }),
    }
}

//! Probe stage: sample pages, classify them, score complexity and
//! recommend a parsing strategy.
//!
//! A probe on a `registered` or `probed` document persists its result as
//! JSON in `documents.probe_summary` and moves the document to `probed`.
//! Probing a document that is already further along is transient: the
//! result is returned and nothing is written.

use std::path::Path;

use pagetrail_core::models::{Document, IngestionStatus, ProbeResult};
use pagetrail_core::probe::{self as scoring, PageObservation, ProbeThresholds};
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::source::PageSource;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    /// `None` for a transient probe of an unregistered file.
    pub document_id: Option<String>,
    pub filename: String,
    pub status: Option<IngestionStatus>,
    /// Whether the result was stored on the document.
    pub persisted: bool,
    #[serde(flatten)]
    pub result: ProbeResult,
}

/// Probe an opened source. `sample_size` must be in `1..=page_count`.
pub fn probe_source(
    source: &dyn PageSource,
    sample_size: u32,
    thresholds: &ProbeThresholds,
) -> Result<ProbeResult> {
    let page_count = source.page_count();
    if sample_size == 0 || sample_size > page_count {
        return Err(PipelineError::InvalidInput(format!(
            "sample size must be between 1 and the page count ({}), got {}",
            page_count, sample_size
        )));
    }

    let mut observations = Vec::with_capacity(sample_size as usize);
    for page in scoring::sample_pages(page_count, sample_size) {
        let text = source.page_text(page)?;
        let image_only = source.is_page_scanned(page)?;
        let obs = PageObservation::from_text(page, &text, image_only);
        tracing::debug!(
            page,
            chars = obs.text_chars,
            tables = obs.table_count,
            image_only,
            "sampled page"
        );
        observations.push(obs);
    }

    Ok(scoring::assess(page_count, sample_size, &observations, thresholds))
}

/// Probe a registered document with an explicit sample size.
pub async fn probe(pipeline: &Pipeline, document_id: &str, sample_size: u32) -> Result<ProbeOutcome> {
    let doc = store::fetch_document(pipeline.pool(), document_id).await?;
    let source = pipeline.loader().open(Path::new(&doc.file_path))?;
    probe_opened(pipeline, &doc, source.as_ref(), Some(sample_size)).await
}

/// Probe with the configured sample size, clamped to the page count.
pub async fn probe_with_default_sample(pipeline: &Pipeline, document_id: &str) -> Result<ProbeOutcome> {
    let doc = store::fetch_document(pipeline.pool(), document_id).await?;
    let source = pipeline.loader().open(Path::new(&doc.file_path))?;
    probe_opened(pipeline, &doc, source.as_ref(), None).await
}

/// Probe a file that is not registered. Nothing is written.
pub fn probe_file(pipeline: &Pipeline, path: &Path, sample_size: Option<u32>) -> Result<ProbeOutcome> {
    let source = pipeline.loader().open(path)?;
    let sample_size = sample_size.unwrap_or_else(|| default_sample(pipeline, source.as_ref()));
    let result = probe_source(source.as_ref(), sample_size, &pipeline.config().probe.thresholds())?;
    Ok(ProbeOutcome {
        document_id: None,
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        status: None,
        persisted: false,
        result,
    })
}

fn default_sample(pipeline: &Pipeline, source: &dyn PageSource) -> u32 {
    pipeline
        .config()
        .probe
        .sample_size
        .min(source.page_count())
}

pub(crate) async fn probe_opened(
    pipeline: &Pipeline,
    doc: &Document,
    source: &dyn PageSource,
    sample_size: Option<u32>,
) -> Result<ProbeOutcome> {
    let sample_size = sample_size.unwrap_or_else(|| default_sample(pipeline, source));
    let result = probe_source(source, sample_size, &pipeline.config().probe.thresholds())?;

    let from = doc.ingestion_status;
    let persisted = matches!(from, IngestionStatus::Registered | IngestionStatus::Probed);
    let status = if persisted {
        let to = if from == IngestionStatus::Registered {
            from.transition_to(IngestionStatus::Probed)?
        } else {
            from
        };
        let mut tx = pipeline.pool().begin().await?;
        sqlx::query(
            "UPDATE documents SET probe_summary = ?, page_count = COALESCE(page_count, ?), updated_at = ? \
             WHERE document_id = ?",
        )
        .bind(serde_json::to_string(&result)?)
        .bind(result.page_count as i64)
        .bind(store::now_ts())
        .bind(&doc.document_id)
        .execute(&mut *tx)
        .await?;
        store::swap_status(&mut *tx, &doc.document_id, from, to).await?;
        tx.commit().await?;
        to
    } else {
        tracing::debug!(document_id = %doc.document_id, status = %from, "probe result not persisted");
        from
    };

    tracing::info!(
        document_id = %doc.document_id,
        pages = result.page_count,
        sampled = result.sampled_pages.len(),
        score = result.complexity_score,
        action = %result.recommended_action,
        "probed document"
    );

    Ok(ProbeOutcome {
        document_id: Some(doc.document_id.clone()),
        filename: doc.filename.clone(),
        status: Some(status),
        persisted,
        result,
    })
}

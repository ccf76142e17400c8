//! Audit stage: deterministic SQL checks over persisted blocks and chunks.
//!
//! The audit reads only what earlier stages committed. Its one write is the
//! `chunked → verified` transition, taken when pages are contiguous and the
//! chunk set references every block exactly as stored. Every read and that
//! write share one transaction, so a chunk set replaced mid-audit is never
//! verified. Low-confidence blocks are reported but do not block
//! verification.

use chrono::{DateTime, Utc};
use pagetrail_core::models::IngestionStatus;
use serde::Serialize;
use sqlx::{Row, SqliteConnection};

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    pub block_type: String,
    pub count: i64,
    pub avg_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodCount {
    pub extraction_method: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowConfidenceBlock {
    pub block_id: String,
    pub page_number: i64,
    pub block_type: String,
    pub extraction_method: String,
    pub confidence: f64,
    pub content_length: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageStats {
    pub page_number: i64,
    pub block_count: i64,
    pub content_bytes: i64,
    pub min_confidence: f64,
}

/// Chunk-to-block lineage checks.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkAudit {
    pub chunk_count: i64,
    pub min_tokens: i64,
    pub max_tokens: i64,
    pub avg_tokens: f64,
    pub empty_chunks: i64,
    /// Blocks that no chunk references.
    pub unchunked_blocks: Vec<String>,
    /// Referenced ids with no matching block.
    pub dangling_references: Vec<String>,
}

impl ChunkAudit {
    pub fn is_consistent(&self) -> bool {
        self.chunk_count > 0
            && self.empty_chunks == 0
            && self.unchunked_blocks.is_empty()
            && self.dangling_references.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub document_id: String,
    pub filename: String,
    pub page_count: Option<i64>,
    pub total_blocks: i64,
    pub by_type: Vec<TypeStats>,
    pub by_method: Vec<MethodCount>,
    pub low_confidence_threshold: f64,
    pub low_confidence: Vec<LowConfidenceBlock>,
    /// Observed `(min, max)` page number across blocks.
    pub page_range: Option<(i64, i64)>,
    /// Pages inside `page_range` with no block.
    pub missing_pages: Vec<i64>,
    pub pages: Vec<PageStats>,
    pub chunks: Option<ChunkAudit>,
    pub issues: Vec<String>,
    pub status: IngestionStatus,
    /// The audit moved the document to `verified`.
    pub verified_now: bool,
}

pub async fn audit(pipeline: &Pipeline, document_id: &str) -> Result<AuditReport> {
    let mut tx = pipeline.pool().begin().await?;
    let doc = store::fetch_document(&mut *tx, document_id).await?;
    let threshold = pipeline.config().audit.low_confidence_threshold;

    let by_type = type_stats(&mut tx, document_id).await?;
    let total_blocks = by_type.iter().map(|t| t.count).sum();
    let by_method = method_counts(&mut tx, document_id).await?;
    let low_confidence = low_confidence_blocks(&mut tx, document_id, threshold).await?;
    let page_range = page_range(&mut tx, document_id).await?;
    let missing_pages = coverage_gaps(&mut tx, document_id).await?;
    let pages = page_stats(&mut tx, document_id).await?;

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;
    let chunks = if chunk_count > 0 {
        Some(chunk_audit(&mut tx, document_id, chunk_count).await?)
    } else {
        None
    };

    let mut issues = Vec::new();
    if total_blocks == 0 {
        issues.push("no blocks extracted".to_string());
    }
    if !missing_pages.is_empty() {
        issues.push(format!("coverage gap: pages {:?} have no blocks", missing_pages));
    }
    if let (Some((lo, hi)), Some(count)) = (page_range, doc.page_count) {
        if lo > 1 || hi < count {
            issues.push(format!(
                "blocks cover pages {}..={} of 1..={}",
                lo, hi, count
            ));
        }
    }
    if let Some(c) = &chunks {
        if !c.unchunked_blocks.is_empty() {
            issues.push(format!("{} blocks are not referenced by any chunk", c.unchunked_blocks.len()));
        }
        if !c.dangling_references.is_empty() {
            issues.push(format!(
                "{} chunk references point at missing blocks",
                c.dangling_references.len()
            ));
        }
        if c.empty_chunks > 0 {
            issues.push(format!("{} chunks have no content", c.empty_chunks));
        }
    }

    for block in &low_confidence {
        tracing::warn!(
            document_id,
            page = block.page_number,
            block_id = %block.block_id,
            confidence = block.confidence,
            "low-confidence block"
        );
    }

    let lineage_ok = total_blocks > 0
        && missing_pages.is_empty()
        && chunks.as_ref().map(ChunkAudit::is_consistent).unwrap_or(false);

    let mut status = doc.ingestion_status;
    let mut verified_now = false;
    if status == IngestionStatus::Chunked && lineage_ok {
        let to = status.transition_to(IngestionStatus::Verified)?;
        store::swap_status(&mut *tx, document_id, status, to).await?;
        status = to;
        verified_now = true;
    }
    tx.commit().await?;

    tracing::info!(
        document_id,
        blocks = total_blocks,
        low_confidence = low_confidence.len(),
        missing_pages = missing_pages.len(),
        status = %status,
        "audited document"
    );

    Ok(AuditReport {
        document_id: document_id.to_string(),
        filename: doc.filename,
        page_count: doc.page_count,
        total_blocks,
        by_type,
        by_method,
        low_confidence_threshold: threshold,
        low_confidence,
        page_range,
        missing_pages,
        pages,
        chunks,
        issues,
        status,
        verified_now,
    })
}

async fn type_stats(conn: &mut SqliteConnection, document_id: &str) -> Result<Vec<TypeStats>> {
    let rows = sqlx::query(
        r#"
        SELECT block_type,
               COUNT(*) AS n,
               AVG(confidence) AS avg_c,
               MIN(confidence) AS min_c,
               MAX(confidence) AS max_c
        FROM blocks
        WHERE document_id = ?
        GROUP BY block_type
        ORDER BY block_type
        "#,
    )
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<TypeStats> {
            Ok(TypeStats {
                block_type: row.try_get("block_type")?,
                count: row.try_get("n")?,
                avg_confidence: round2(row.try_get("avg_c")?),
                min_confidence: row.try_get("min_c")?,
                max_confidence: row.try_get("max_c")?,
            })
        })
        .collect()
}

async fn method_counts(conn: &mut SqliteConnection, document_id: &str) -> Result<Vec<MethodCount>> {
    let rows = sqlx::query(
        r#"
        SELECT extraction_method, COUNT(*) AS n
        FROM blocks
        WHERE document_id = ?
        GROUP BY extraction_method
        ORDER BY n DESC, extraction_method
        "#,
    )
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<MethodCount> {
            Ok(MethodCount {
                extraction_method: row.try_get("extraction_method")?,
                count: row.try_get("n")?,
            })
        })
        .collect()
}

async fn low_confidence_blocks(
    conn: &mut SqliteConnection,
    document_id: &str,
    threshold: f64,
) -> Result<Vec<LowConfidenceBlock>> {
    let rows = sqlx::query(
        r#"
        SELECT id, page_number, block_type, extraction_method, confidence, LENGTH(content) AS len
        FROM blocks
        WHERE document_id = ? AND confidence < ?
        ORDER BY page_number, ordinal
        "#,
    )
    .bind(document_id)
    .bind(threshold)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<LowConfidenceBlock> {
            Ok(LowConfidenceBlock {
                block_id: row.try_get("id")?,
                page_number: row.try_get("page_number")?,
                block_type: row.try_get("block_type")?,
                extraction_method: row.try_get("extraction_method")?,
                confidence: row.try_get("confidence")?,
                content_length: row.try_get("len")?,
            })
        })
        .collect()
}

async fn page_range(conn: &mut SqliteConnection, document_id: &str) -> Result<Option<(i64, i64)>> {
    let row = sqlx::query(
        "SELECT MIN(page_number) AS lo, MAX(page_number) AS hi FROM blocks WHERE document_id = ?",
    )
    .bind(document_id)
    .fetch_one(&mut *conn)
    .await?;
    let lo: Option<i64> = row.try_get("lo")?;
    let hi: Option<i64> = row.try_get("hi")?;
    Ok(lo.zip(hi))
}

/// Pages in the inclusive range `[min(page), max(page)]` with no block.
async fn coverage_gaps(conn: &mut SqliteConnection, document_id: &str) -> Result<Vec<i64>> {
    let gaps: Vec<i64> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE
            bounds AS (
                SELECT MIN(page_number) AS lo, MAX(page_number) AS hi
                FROM blocks
                WHERE document_id = ?
            ),
            expected(page) AS (
                SELECT lo FROM bounds WHERE lo IS NOT NULL
                UNION ALL
                SELECT page + 1 FROM expected, bounds WHERE page < hi
            )
        SELECT page
        FROM expected
        WHERE page NOT IN (SELECT page_number FROM blocks WHERE document_id = ?)
        ORDER BY page
        "#,
    )
    .bind(document_id)
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(gaps)
}

async fn page_stats(conn: &mut SqliteConnection, document_id: &str) -> Result<Vec<PageStats>> {
    let rows = sqlx::query(
        r#"
        SELECT page_number,
               COUNT(*) AS n,
               COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) AS bytes,
               MIN(confidence) AS min_c
        FROM blocks
        WHERE document_id = ?
        GROUP BY page_number
        ORDER BY page_number
        "#,
    )
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<PageStats> {
            Ok(PageStats {
                page_number: row.try_get("page_number")?,
                block_count: row.try_get("n")?,
                content_bytes: row.try_get("bytes")?,
                min_confidence: row.try_get("min_c")?,
            })
        })
        .collect()
}

async fn chunk_audit(conn: &mut SqliteConnection, document_id: &str, chunk_count: i64) -> Result<ChunkAudit> {
    let row = sqlx::query(
        r#"
        SELECT MIN(token_count) AS min_t,
               MAX(token_count) AS max_t,
               AVG(token_count) AS avg_t,
               SUM(CASE WHEN TRIM(content) = '' THEN 1 ELSE 0 END) AS empty
        FROM chunks
        WHERE document_id = ?
        "#,
    )
    .bind(document_id)
    .fetch_one(&mut *conn)
    .await?;

    let unchunked_blocks: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT b.id
        FROM blocks b
        WHERE b.document_id = ?
          AND b.id NOT IN (
              SELECT j.value
              FROM chunks c, json_each(c.source_block_ids) j
              WHERE c.document_id = ?
          )
        ORDER BY b.page_number, b.ordinal
        "#,
    )
    .bind(document_id)
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    let dangling_references: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT j.value
        FROM chunks c, json_each(c.source_block_ids) j
        WHERE c.document_id = ?
          AND j.value NOT IN (SELECT id FROM blocks WHERE document_id = ?)
        ORDER BY j.value
        "#,
    )
    .bind(document_id)
    .bind(document_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ChunkAudit {
        chunk_count,
        min_tokens: row.try_get::<Option<i64>, _>("min_t")?.unwrap_or(0),
        max_tokens: row.try_get::<Option<i64>, _>("max_t")?.unwrap_or(0),
        avg_tokens: round2(row.try_get::<Option<f64>, _>("avg_t")?.unwrap_or(0.0)),
        empty_chunks: row.try_get::<Option<i64>, _>("empty")?.unwrap_or(0),
        unchunked_blocks,
        dangling_references,
    })
}

/// One line of the `status` listing.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub filename: String,
    pub ingestion_status: IngestionStatus,
    pub page_count: Option<i64>,
    pub blocks_extracted: i64,
    pub low_confidence_blocks: i64,
    pub chunks: i64,
    pub updated_at: DateTime<Utc>,
}

/// Read-only per-document summary, oldest registration first.
pub async fn status(pipeline: &Pipeline) -> Result<Vec<DocumentSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT d.document_id,
               d.filename,
               d.ingestion_status,
               d.page_count,
               d.updated_at,
               (SELECT COUNT(*) FROM blocks b WHERE b.document_id = d.document_id) AS blocks,
               (SELECT COUNT(*) FROM blocks b
                 WHERE b.document_id = d.document_id AND b.confidence < ?) AS low_conf,
               (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.document_id) AS chunks
        FROM documents d
        ORDER BY d.created_at, d.rowid
        "#,
    )
    .bind(pipeline.config().audit.low_confidence_threshold)
    .fetch_all(pipeline.pool())
    .await?;

    rows.iter()
        .map(|row| -> Result<DocumentSummary> {
            let status: String = row.try_get("ingestion_status")?;
            let updated_at: i64 = row.try_get("updated_at")?;
            Ok(DocumentSummary {
                document_id: row.try_get("document_id")?,
                filename: row.try_get("filename")?,
                ingestion_status: status.parse()?,
                page_count: row.try_get("page_count")?,
                blocks_extracted: row.try_get("blocks")?,
                low_confidence_blocks: row.try_get("low_conf")?,
                chunks: row.try_get("chunks")?,
                updated_at: DateTime::from_timestamp(updated_at, 0).ok_or_else(|| {
                    PipelineError::Corrupt(format!("timestamp out of range: {}", updated_at))
                })?,
            })
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

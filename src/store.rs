//! Row mapping and status writes shared by the stage modules.

use chrono::{DateTime, Utc};
use pagetrail_core::models::{Block, BlockType, Chunk, Document, IngestionStatus, ProbeResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};

use crate::error::{PipelineError, Result};

const DOCUMENT_COLUMNS: &str = "document_id, filename, file_path, file_size_bytes, sha256, page_count, \
     ingestion_status, probe_summary, created_at, updated_at";

pub(crate) fn now_ts() -> i64 {
    Utc::now().timestamp()
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PipelineError::Corrupt(format!("timestamp out of range: {}", secs)))
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.try_get("ingestion_status")?;
    let probe_summary: Option<String> = row.try_get("probe_summary")?;
    let probe_summary = probe_summary
        .map(|json| serde_json::from_str::<ProbeResult>(&json))
        .transpose()?;

    Ok(Document {
        document_id: row.try_get("document_id")?,
        filename: row.try_get("filename")?,
        file_path: row.try_get("file_path")?,
        file_size_bytes: row.try_get("file_size_bytes")?,
        sha256: row.try_get("sha256")?,
        page_count: row.try_get("page_count")?,
        ingestion_status: status.parse()?,
        probe_summary,
        created_at: timestamp(row.try_get("created_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

pub async fn fetch_document<'e, E>(executor: E, document_id: &str) -> Result<Document>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {} FROM documents WHERE document_id = ?", DOCUMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(document_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| PipelineError::NotFound(document_id.to_string()))?;
    row_to_document(&row)
}

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<Document>> {
    let sql = format!(
        "SELECT {} FROM documents ORDER BY created_at, rowid",
        DOCUMENT_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_document).collect()
}

pub async fn insert_document(pool: &SqlitePool, doc: &Document) -> Result<()> {
    let probe_summary = doc
        .probe_summary
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        "INSERT INTO documents (document_id, filename, file_path, file_size_bytes, sha256, \
         page_count, ingestion_status, probe_summary, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&doc.document_id)
    .bind(&doc.filename)
    .bind(&doc.file_path)
    .bind(doc.file_size_bytes)
    .bind(&doc.sha256)
    .bind(doc.page_count)
    .bind(doc.ingestion_status.as_str())
    .bind(probe_summary)
    .bind(doc.created_at.timestamp())
    .bind(doc.updated_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Blocks of a document in reading order: page, then position on the page.
pub async fn load_blocks<'e, E>(executor: E, document_id: &str) -> Result<Vec<Block>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT id, document_id, page_number, ordinal, block_type, content, extraction_method, confidence \
         FROM blocks WHERE document_id = ? ORDER BY page_number, ordinal",
    )
    .bind(document_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| -> Result<Block> {
            let block_type: String = row.try_get("block_type")?;
            Ok(Block {
                id: row.try_get("id")?,
                document_id: row.try_get("document_id")?,
                page_number: row.try_get("page_number")?,
                ordinal: row.try_get("ordinal")?,
                block_type: block_type
                    .parse::<BlockType>()
                    .map_err(PipelineError::Corrupt)?,
                content: row.try_get("content")?,
                extraction_method: row.try_get("extraction_method")?,
                confidence: row.try_get("confidence")?,
            })
        })
        .collect()
}

pub async fn load_chunks<'e, E>(executor: E, document_id: &str) -> Result<Vec<Chunk>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(
        "SELECT id, document_id, position, token_count, source_block_ids, content, overlap_context, hash \
         FROM chunks WHERE document_id = ? ORDER BY position",
    )
    .bind(document_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| -> Result<Chunk> {
            let ids: String = row.try_get("source_block_ids")?;
            Ok(Chunk {
                id: row.try_get("id")?,
                document_id: row.try_get("document_id")?,
                position: row.try_get("position")?,
                token_count: row.try_get("token_count")?,
                source_block_ids: serde_json::from_str(&ids)?,
                content: row.try_get("content")?,
                overlap_context: row.try_get("overlap_context")?,
                hash: row.try_get("hash")?,
            })
        })
        .collect()
}

/// Compare-and-swap the document status. Fails with
/// [`PipelineError::ConcurrentModification`] when the stored status is no
/// longer `expected`.
pub(crate) async fn swap_status(
    conn: &mut SqliteConnection,
    document_id: &str,
    expected: IngestionStatus,
    to: IngestionStatus,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE documents SET ingestion_status = ?, updated_at = ? \
         WHERE document_id = ? AND ingestion_status = ?",
    )
    .bind(to.as_str())
    .bind(now_ts())
    .bind(document_id)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(PipelineError::ConcurrentModification(
            document_id.to_string(),
        ));
    }
    Ok(())
}

/// Move a document to `failed` and drop the blocks and chunks of any
/// earlier run in the same transaction. Already-failed documents are left
/// alone.
pub(crate) async fn mark_failed(pool: &SqlitePool, doc: &Document, reason: &str) -> Result<()> {
    let from = doc.ingestion_status;
    if !from.can_transition_to(IngestionStatus::Failed) {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(&doc.document_id)
        .execute(&mut *tx)
        .await?;
    let dropped = sqlx::query("DELETE FROM blocks WHERE document_id = ?")
        .bind(&doc.document_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    swap_status(&mut *tx, &doc.document_id, from, IngestionStatus::Failed).await?;
    tx.commit().await?;
    tracing::warn!(
        document_id = %doc.document_id,
        from = %from,
        dropped_blocks = dropped,
        reason,
        "document marked failed"
    );
    Ok(())
}

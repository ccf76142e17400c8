//! Chunk stage: group a document's blocks into token-bounded chunks and
//! swap the chunk set in one transaction.

use pagetrail_core::chunk::{chunk_blocks, estimate_tokens, ChunkParams};
use pagetrail_core::models::IngestionStatus;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::store;

/// Per-run overrides of the `[chunking]` configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkOptions {
    pub target_tokens: Option<usize>,
    pub max_tokens: Option<usize>,
    /// Replace an existing chunk set.
    pub replace: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub document_id: String,
    pub chunks_created: usize,
    pub blocks_chunked: usize,
    pub total_tokens: usize,
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub chunks_replaced: u64,
    pub status: IngestionStatus,
}

pub async fn chunk(pipeline: &Pipeline, document_id: &str, options: ChunkOptions) -> Result<ChunkOutcome> {
    let doc = store::fetch_document(pipeline.pool(), document_id).await?;

    let defaults = pipeline.config().chunking.params();
    let params = ChunkParams {
        target_tokens: options.target_tokens.unwrap_or(defaults.target_tokens),
        max_tokens: options.max_tokens.unwrap_or(defaults.max_tokens),
        overlap_tokens: defaults.overlap_tokens,
    };
    params.validate().map_err(PipelineError::InvalidInput)?;

    let blocks = store::load_blocks(pipeline.pool(), document_id).await?;
    if blocks.is_empty() {
        return Err(PipelineError::NotParsed(document_id.to_string()));
    }

    let from = doc.ingestion_status;
    let to = match from {
        IngestionStatus::Parsed => from.transition_to(IngestionStatus::Chunked)?,
        status if options.replace && status.can_rewind_to(IngestionStatus::Chunked) => {
            tracing::info!(document_id, from = %status, "replacing existing chunk set");
            IngestionStatus::Chunked
        }
        status => {
            return Err(PipelineError::AlreadyProcessed {
                document_id: document_id.to_string(),
                stage: "chunk",
                status,
            })
        }
    };

    let chunks = chunk_blocks(document_id, &blocks, &params);
    let total_tokens: usize = blocks.iter().map(|b| estimate_tokens(&b.content)).sum();

    let mut tx = pipeline.pool().begin().await?;
    let chunks_replaced = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    for chunk in &chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, position, token_count, source_block_ids, content, overlap_context, hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.position)
        .bind(chunk.token_count)
        .bind(serde_json::to_string(&chunk.source_block_ids)?)
        .bind(&chunk.content)
        .bind(&chunk.overlap_context)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }
    store::swap_status(&mut *tx, document_id, from, to).await?;
    tx.commit().await?;

    tracing::info!(
        document_id,
        chunks = chunks.len(),
        blocks = blocks.len(),
        tokens = total_tokens,
        "chunked document"
    );

    Ok(ChunkOutcome {
        document_id: document_id.to_string(),
        chunks_created: chunks.len(),
        blocks_chunked: blocks.len(),
        total_tokens,
        target_tokens: params.target_tokens,
        max_tokens: params.max_tokens,
        chunks_replaced,
        status: to,
    })
}

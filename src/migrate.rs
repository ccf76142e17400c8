use sqlx::SqlitePool;

/// Create the schema. Idempotent: every statement is `IF NOT EXISTS`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            document_id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            page_count INTEGER,
            ingestion_status TEXT NOT NULL DEFAULT 'registered'
                CHECK (ingestion_status IN ('registered', 'probed', 'parsed', 'chunked', 'verified', 'failed')),
            probe_summary TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            page_number INTEGER NOT NULL CHECK (page_number >= 1),
            ordinal INTEGER NOT NULL,
            block_type TEXT NOT NULL,
            content TEXT NOT NULL,
            extraction_method TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0 AND confidence <= 100),
            UNIQUE(document_id, page_number, ordinal),
            FOREIGN KEY (document_id) REFERENCES documents(document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            token_count INTEGER NOT NULL,
            source_block_ids TEXT NOT NULL,
            content TEXT NOT NULL,
            overlap_context TEXT,
            hash TEXT NOT NULL,
            UNIQUE(document_id, position),
            FOREIGN KEY (document_id) REFERENCES documents(document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_blocks_document_page ON blocks(document_id, page_number)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document_position ON chunks(document_id, position)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(ingestion_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_sha256 ON documents(sha256)")
        .execute(pool)
        .await?;

    Ok(())
}

//! Document registry: identity and lifecycle anchor.
//!
//! Registration assigns a fresh UUID v4 and records file size and SHA-256
//! up front. `page_count` stays unknown until a stage opens the file.
//! Registering the same file twice yields two independent documents.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use pagetrail_core::models::{Document, IngestionStatus};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::RegistryConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::store;

/// Register one file.
pub async fn register(pipeline: &Pipeline, path: &Path) -> Result<Document> {
    if path.as_os_str().is_empty() {
        return Err(PipelineError::InvalidInput("empty file path".to_string()));
    }
    let metadata = std::fs::metadata(path).map_err(|e| {
        PipelineError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(PipelineError::InvalidInput(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let file_path = std::fs::canonicalize(path)?;
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let now = Utc::now();

    let doc = Document {
        document_id: uuid::Uuid::new_v4().to_string(),
        filename,
        file_path: file_path.to_string_lossy().to_string(),
        file_size_bytes: metadata.len() as i64,
        sha256: sha256_file(&file_path)?,
        page_count: None,
        ingestion_status: IngestionStatus::Registered,
        probe_summary: None,
        created_at: now,
        updated_at: now,
    };
    store::insert_document(pipeline.pool(), &doc).await?;

    tracing::info!(
        document_id = %doc.document_id,
        filename = %doc.filename,
        bytes = doc.file_size_bytes,
        "registered document"
    );
    Ok(doc)
}

/// Register a file, or every matching file under a directory.
pub async fn register_path(pipeline: &Pipeline, path: &Path) -> Result<Vec<Document>> {
    if path.is_dir() {
        let files = discover_pdfs(&pipeline.config().registry, path)?;
        if files.is_empty() {
            tracing::warn!(root = %path.display(), "no files matched the registry globs");
        }
        let mut docs = Vec::with_capacity(files.len());
        for file in files {
            docs.push(register(pipeline, &file).await?);
        }
        Ok(docs)
    } else {
        Ok(vec![register(pipeline, path).await?])
    }
}

/// Files under `root` matching the include globs and none of the excludes,
/// sorted by relative path.
pub fn discover_pdfs(config: &RegistryConfig, root: &Path) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PipelineError::InvalidInput(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::InvalidInput(e.to_string()))
}

pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub async fn get_document(pipeline: &Pipeline, document_id: &str) -> Result<Document> {
    store::fetch_document(pipeline.pool(), document_id).await
}

pub async fn get_status(pipeline: &Pipeline, document_id: &str) -> Result<IngestionStatus> {
    Ok(get_document(pipeline, document_id).await?.ingestion_status)
}

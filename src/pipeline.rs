//! The pipeline context shared by every stage, and the one-shot `run`.

use std::path::Path;
use std::sync::Arc;

use pagetrail_core::models::Document;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::audit::{self, AuditReport};
use crate::chunk::{self, ChunkOptions, ChunkOutcome};
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::migrate;
use crate::ocr::TesseractOcr;
use crate::parse::{self, ParseOptions, ParseOutcome};
use crate::pdf::PdfLoader;
use crate::probe::{self, ProbeOutcome};
use crate::registry;
use crate::source::{OcrEngine, SourceLoader};

/// Database pool, configuration and source capabilities.
pub struct Pipeline {
    pool: SqlitePool,
    config: Config,
    loader: Arc<dyn SourceLoader>,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        loader: Arc<dyn SourceLoader>,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Self {
        Self {
            pool,
            config,
            loader,
            ocr,
        }
    }

    /// Connect to the configured database with the PDF loader and, when
    /// `[ocr] enabled`, the tesseract engine.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        let ocr: Option<Arc<dyn OcrEngine>> = if config.ocr.enabled {
            Some(Arc::new(TesseractOcr::from_config(&config.ocr)))
        } else {
            None
        };
        Ok(Self::new(pool, config, Arc::new(PdfLoader), ocr))
    }

    pub async fn init(&self) -> Result<()> {
        migrate::run_migrations(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loader(&self) -> &dyn SourceLoader {
        self.loader.as_ref()
    }

    pub fn ocr(&self) -> Option<&dyn OcrEngine> {
        self.ocr.as_deref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Everything `run` did to one file.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub document: Document,
    pub probe: ProbeOutcome,
    pub parse: ParseOutcome,
    pub chunk: ChunkOutcome,
    pub audit: AuditReport,
}

/// Register a file and drive it through probe, parse, chunk and audit,
/// stopping at the first fatal failure.
pub async fn run_file(pipeline: &Pipeline, path: &Path) -> Result<RunSummary> {
    let document = registry::register(pipeline, path).await?;
    let id = document.document_id.as_str();

    let probe = probe::probe_with_default_sample(pipeline, id).await?;
    let parse = parse::parse(pipeline, id, ParseOptions::default()).await?;
    let chunk = chunk::chunk(pipeline, id, ChunkOptions::default()).await?;
    let audit = audit::audit(pipeline, id).await?;

    let document = registry::get_document(pipeline, id).await?;
    Ok(RunSummary {
        document,
        probe,
        parse,
        chunk,
        audit,
    })
}

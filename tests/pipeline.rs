//! Stage-level tests against a real SQLite database with in-memory page
//! sources, so every scenario is deterministic and needs no PDF tooling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;
use tempfile::TempDir;

use pagetrail::audit;
use pagetrail::chunk::{self, ChunkOptions};
use pagetrail::config::Config;
use pagetrail::db;
use pagetrail::error::PipelineError;
use pagetrail::parse::{self, ParseOptions, ParseWarning};
use pagetrail::pipeline::{self, Pipeline};
use pagetrail::probe;
use pagetrail::registry;
use pagetrail::source::{OcrEngine, OcrOutput, PageSource, SourceError, SourceLoader};
use pagetrail::store;
use pagetrail::validate::{self, PageCheck};
use pagetrail_core::models::{method, Block, Chunk, IngestionStatus, RecommendedAction};

#[derive(Debug, Clone, Default)]
struct FakePage {
    text: String,
    scanned: bool,
}

fn text_page(text: String) -> FakePage {
    FakePage {
        text,
        scanned: false,
    }
}

fn scanned_page() -> FakePage {
    FakePage {
        text: String::new(),
        scanned: true,
    }
}

fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}

struct FakeDocument {
    pages: Vec<FakePage>,
}

impl PageSource for FakeDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, SourceError> {
        self.check_page(page)?;
        Ok(self.pages[page as usize - 1].text.clone())
    }

    fn is_page_scanned(&self, page: u32) -> Result<bool, SourceError> {
        self.check_page(page)?;
        Ok(self.pages[page as usize - 1].scanned)
    }
}

/// Serves pages by file name. Tests keep a clone to change pages between stages.
#[derive(Clone, Default)]
struct FakeLoader {
    documents: Arc<Mutex<HashMap<String, Vec<FakePage>>>>,
}

impl FakeLoader {
    fn set(&self, filename: &str, pages: Vec<FakePage>) {
        self.documents
            .lock()
            .unwrap()
            .insert(filename.to_string(), pages);
    }
}

impl SourceLoader for FakeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn PageSource>, SourceError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let pages = self
            .documents
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| SourceError::Open {
                path: path.display().to_string(),
                reason: "unknown test document".to_string(),
            })?;
        Ok(Box::new(FakeDocument { pages }))
    }
}

/// Rewrites the document status the next time a stage opens a source,
/// standing in for a second writer.
struct StatusRewritingLoader {
    inner: FakeLoader,
    pool: SqlitePool,
    rewrite_to: Mutex<Option<&'static str>>,
}

impl SourceLoader for StatusRewritingLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn PageSource>, SourceError> {
        let rewrite = self.rewrite_to.lock().unwrap().take();
        if let Some(status) = rewrite {
            let pool = self.pool.clone();
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(
                    sqlx::query("UPDATE documents SET ingestion_status = ?")
                        .bind(status)
                        .execute(&pool),
                )
            })
            .unwrap();
        }
        self.inner.open(path)
    }
}

struct FixedOcr;

impl OcrEngine for FixedOcr {
    fn name(&self) -> &str {
        "fixed"
    }

    fn recognize(&self, _path: &Path, page: u32) -> Result<OcrOutput, SourceError> {
        Ok(OcrOutput {
            text: format!("Recognized text from scanned page {}", page),
            confidence: 72.5,
        })
    }
}

struct Harness {
    tmp: TempDir,
    pipeline: Pipeline,
    loader: FakeLoader,
}

impl Harness {
    async fn new(ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("data").join("pagetrail.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        let loader = FakeLoader::default();
        let pipeline = Pipeline::new(pool, config, Arc::new(loader.clone()), ocr);
        pipeline.init().await.unwrap();
        Self {
            tmp,
            pipeline,
            loader,
        }
    }

    /// Write a placeholder file and serve `pages` for it.
    fn add_file(&self, filename: &str, pages: Vec<FakePage>) -> PathBuf {
        let path = self.tmp.path().join(filename);
        std::fs::write(&path, format!("%PDF-1.5 {}", filename)).unwrap();
        self.loader.set(filename, pages);
        path
    }

    async fn register(&self, filename: &str, pages: Vec<FakePage>) -> String {
        let path = self.add_file(filename, pages);
        registry::register(&self.pipeline, &path)
            .await
            .unwrap()
            .document_id
    }

    async fn block_count(&self, document_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(self.pipeline.pool())
            .await
            .unwrap()
    }

    async fn status(&self, document_id: &str) -> IngestionStatus {
        registry::get_status(&self.pipeline, document_id)
            .await
            .unwrap()
    }
}

fn text_pages(n: usize, words_per_page: usize) -> Vec<FakePage> {
    (0..n).map(|_| text_page(words(words_per_page))).collect()
}

#[tokio::test]
async fn test_register_records_identity() {
    let h = Harness::new(None).await;
    let path = h.add_file("report.pdf", text_pages(2, 50));

    let first = registry::register(&h.pipeline, &path).await.unwrap();
    let second = registry::register(&h.pipeline, &path).await.unwrap();

    assert_ne!(first.document_id, second.document_id);
    assert_eq!(first.sha256, second.sha256);
    assert_eq!(first.sha256.len(), 64);
    assert_eq!(first.filename, "report.pdf");
    assert_eq!(first.page_count, None);
    assert_eq!(first.ingestion_status, IngestionStatus::Registered);
}

#[tokio::test]
async fn test_register_rejects_missing_file() {
    let h = Harness::new(None).await;
    let err = registry::register(&h.pipeline, &h.tmp.path().join("absent.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)), "{err:?}");

    let err = registry::register(&h.pipeline, Path::new("")).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)), "{err:?}");
}

#[tokio::test]
async fn test_unknown_document_is_not_found() {
    let h = Harness::new(None).await;
    let missing = "00000000-0000-0000-0000-000000000000";

    assert!(matches!(
        probe::probe(&h.pipeline, missing, 1).await.unwrap_err(),
        PipelineError::NotFound(_)
    ));
    assert!(matches!(
        parse::parse(&h.pipeline, missing, ParseOptions::default())
            .await
            .unwrap_err(),
        PipelineError::NotFound(_)
    ));
    assert!(matches!(
        chunk::chunk(&h.pipeline, missing, ChunkOptions::default())
            .await
            .unwrap_err(),
        PipelineError::NotFound(_)
    ));
    assert!(matches!(
        audit::audit(&h.pipeline, missing).await.unwrap_err(),
        PipelineError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_probe_is_deterministic_and_persisted() {
    let h = Harness::new(None).await;
    let id = h.register("five.pdf", text_pages(5, 400)).await;

    let first = probe::probe(&h.pipeline, &id, 3).await.unwrap();
    let second = probe::probe(&h.pipeline, &id, 3).await.unwrap();

    assert_eq!(first.result, second.result);
    assert_eq!(first.result.sampled_pages, vec![1, 3, 5]);
    assert_eq!(first.result.recommended_action, RecommendedAction::StandardText);
    assert!(first.persisted && second.persisted);

    let doc = registry::get_document(&h.pipeline, &id).await.unwrap();
    assert_eq!(doc.ingestion_status, IngestionStatus::Probed);
    assert_eq!(doc.page_count, Some(5));
    assert_eq!(doc.probe_summary, Some(second.result));
}

#[tokio::test]
async fn test_probe_rejects_bad_sample_size() {
    let h = Harness::new(None).await;
    let id = h.register("three.pdf", text_pages(3, 100)).await;

    for n in [0, 4] {
        let err = probe::probe(&h.pipeline, &id, n).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)), "n={n}: {err:?}");
    }
    assert_eq!(h.status(&id).await, IngestionStatus::Registered);
}

#[tokio::test]
async fn test_probe_after_parse_is_transient() {
    let h = Harness::new(None).await;
    let id = h.register("later.pdf", text_pages(2, 100)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();

    let outcome = probe::probe(&h.pipeline, &id, 1).await.unwrap();
    assert!(!outcome.persisted);
    assert_eq!(outcome.status, Some(IngestionStatus::Parsed));
    assert_eq!(h.status(&id).await, IngestionStatus::Parsed);
}

#[tokio::test]
async fn test_probe_file_writes_nothing() {
    let h = Harness::new(None).await;
    let path = h.add_file("loose.pdf", vec![scanned_page(), scanned_page()]);

    let outcome = probe::probe_file(&h.pipeline, &path, None).unwrap();
    assert!(outcome.document_id.is_none());
    assert_eq!(outcome.result.recommended_action, RecommendedAction::OcrReview);
    assert!(audit::status(&h.pipeline).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_parse_registered_document_probes_first() {
    let h = Harness::new(None).await;
    let id = h.register("plain.pdf", text_pages(3, 200)).await;

    let outcome = parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, IngestionStatus::Parsed);
    assert_eq!(outcome.strategy, RecommendedAction::StandardText);
    assert_eq!(outcome.blocks_inserted, 3);
    assert_eq!(outcome.methods.get(method::PDF_TEXT), Some(&3));
    assert!(outcome.warnings.is_empty());

    let doc = registry::get_document(&h.pipeline, &id).await.unwrap();
    assert!(doc.probe_summary.is_some());
    assert_eq!(doc.page_count, Some(3));

    let blocks = store::load_blocks(h.pipeline.pool(), &id).await.unwrap();
    let pages: Vec<i64> = blocks.iter().map(|b| b.page_number).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert!(blocks.iter().all(|b| b.ordinal == 0 && b.confidence > 50.0));
}

#[tokio::test]
async fn test_reparse_requires_replace() {
    let h = Harness::new(None).await;
    let id = h.register("again.pdf", text_pages(4, 120)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap();

    let err = parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::AlreadyProcessed { stage: "parse", .. }),
        "{err:?}"
    );
    assert_eq!(h.block_count(&id).await, 4);

    let outcome = parse::parse(&h.pipeline, &id, ParseOptions { replace: true })
        .await
        .unwrap();
    assert_eq!(outcome.blocks_replaced, 4);
    assert_eq!(outcome.status, IngestionStatus::Parsed);
    assert_eq!(h.block_count(&id).await, 4);
    assert!(store::load_chunks(h.pipeline.pool(), &id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_scanned_pages_use_ocr_when_available() {
    let h = Harness::new(Some(Arc::new(FixedOcr))).await;
    let id = h
        .register("mixed.pdf", vec![text_page(words(300)), scanned_page()])
        .await;

    let outcome = parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.methods.get(method::OCR_TESSERACT), Some(&1));

    let blocks = store::load_blocks(h.pipeline.pool(), &id).await.unwrap();
    let ocr_block = blocks.iter().find(|b| b.page_number == 2).unwrap();
    assert_eq!(ocr_block.extraction_method, method::OCR_TESSERACT);
    assert_eq!(ocr_block.confidence, 72.5);
    assert!(ocr_block.content.contains("scanned page 2"));
}

#[tokio::test]
async fn test_scanned_page_without_ocr_is_partial() {
    let h = Harness::new(None).await;
    let id = h
        .register("partial.pdf", vec![text_page(words(300)), scanned_page()])
        .await;

    let outcome = parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, IngestionStatus::Parsed);
    assert_eq!(outcome.warnings.len(), 1);
    let ParseWarning::PartialExtraction { page_number, .. } = &outcome.warnings[0];
    assert_eq!(*page_number, 2);

    let blocks = store::load_blocks(h.pipeline.pool(), &id).await.unwrap();
    let placeholder = blocks.iter().find(|b| b.page_number == 2).unwrap();
    assert!(placeholder.block_type.is_placeholder());
    assert_eq!(placeholder.extraction_method, method::UNEXTRACTED);
    assert_eq!(placeholder.confidence, 0.0);
}

#[tokio::test]
async fn test_all_scanned_document_fails_without_blocks() {
    let h = Harness::new(None).await;
    let id = h
        .register("scan.pdf", vec![scanned_page(), scanned_page(), scanned_page()])
        .await;

    let err = parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::TotalExtractionFailure { .. }),
        "{err:?}"
    );
    assert_eq!(h.status(&id).await, IngestionStatus::Failed);
    assert_eq!(h.block_count(&id).await, 0);
}

#[tokio::test]
async fn test_unreadable_source_fails_document() {
    let h = Harness::new(None).await;
    let path = h.tmp.path().join("orphan.pdf");
    std::fs::write(&path, b"%PDF-1.5").unwrap();
    let id = registry::register(&h.pipeline, &path)
        .await
        .unwrap()
        .document_id;

    let err = parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::TotalExtractionFailure { .. }));
    assert_eq!(h.status(&id).await, IngestionStatus::Failed);
}

#[tokio::test]
async fn test_failed_replace_cannot_be_walked_to_verified() {
    let h = Harness::new(None).await;
    let id = h.register("fading.pdf", text_pages(3, 120)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap();

    h.loader.set("fading.pdf", vec![scanned_page(); 3]);
    let err = parse::parse(&h.pipeline, &id, ParseOptions { replace: true })
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::TotalExtractionFailure { .. }),
        "{err:?}"
    );
    assert_eq!(h.status(&id).await, IngestionStatus::Failed);
    assert_eq!(h.block_count(&id).await, 0);
    assert!(store::load_chunks(h.pipeline.pool(), &id).await.unwrap().is_empty());

    let replace = ChunkOptions {
        replace: true,
        ..ChunkOptions::default()
    };
    let err = chunk::chunk(&h.pipeline, &id, replace).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotParsed(_)), "{err:?}");

    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert!(!report.verified_now);
    assert_eq!(report.status, IngestionStatus::Failed);
    assert_eq!(h.status(&id).await, IngestionStatus::Failed);

    // Re-parsing is the way back.
    h.loader.set("fading.pdf", text_pages(3, 120));
    let outcome = parse::parse(&h.pipeline, &id, ParseOptions { replace: true })
        .await
        .unwrap();
    assert_eq!(outcome.status, IngestionStatus::Parsed);
    assert_eq!(h.block_count(&id).await, 3);
}

#[tokio::test]
async fn test_failed_document_with_stale_blocks_rejects_chunk() {
    let h = Harness::new(None).await;
    let id = h.register("stale.pdf", text_pages(2, 80)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    sqlx::query("UPDATE documents SET ingestion_status = 'failed' WHERE document_id = ?")
        .bind(&id)
        .execute(h.pipeline.pool())
        .await
        .unwrap();

    let replace = ChunkOptions {
        replace: true,
        ..ChunkOptions::default()
    };
    let err = chunk::chunk(&h.pipeline, &id, replace).await.unwrap_err();
    assert!(
        matches!(err, PipelineError::AlreadyProcessed { stage: "chunk", .. }),
        "{err:?}"
    );
    assert_eq!(h.status(&id).await, IngestionStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lost_status_swap_leaves_blocks_and_chunks() {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("data").join("pagetrail.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    let inner = FakeLoader::default();
    let loader = Arc::new(StatusRewritingLoader {
        inner: inner.clone(),
        pool: pool.clone(),
        rewrite_to: Mutex::new(None),
    });
    let pipeline = Pipeline::new(pool, config, loader.clone(), None);
    pipeline.init().await.unwrap();

    let path = tmp.path().join("contested.pdf");
    std::fs::write(&path, b"%PDF-1.5 contested").unwrap();
    inner.set("contested.pdf", text_pages(3, 120));
    let id = registry::register(&pipeline, &path)
        .await
        .unwrap()
        .document_id;
    parse::parse(&pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    chunk::chunk(&pipeline, &id, ChunkOptions::default())
        .await
        .unwrap();

    let block_ids = |blocks: Vec<Block>| -> Vec<String> {
        blocks.into_iter().map(|b| b.id).collect()
    };
    let chunk_ids = |chunks: Vec<Chunk>| -> Vec<String> {
        chunks.into_iter().map(|c| c.id).collect()
    };
    let blocks_before = block_ids(store::load_blocks(pipeline.pool(), &id).await.unwrap());
    let chunks_before = chunk_ids(store::load_chunks(pipeline.pool(), &id).await.unwrap());

    *loader.rewrite_to.lock().unwrap() = Some("verified");
    inner.set("contested.pdf", text_pages(5, 60));
    let err = parse::parse(&pipeline, &id, ParseOptions { replace: true })
        .await
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::ConcurrentModification(_)),
        "{err:?}"
    );

    assert_eq!(
        block_ids(store::load_blocks(pipeline.pool(), &id).await.unwrap()),
        blocks_before
    );
    assert_eq!(
        chunk_ids(store::load_chunks(pipeline.pool(), &id).await.unwrap()),
        chunks_before
    );
    assert_eq!(
        registry::get_status(&pipeline, &id).await.unwrap(),
        IngestionStatus::Verified
    );
}

#[tokio::test]
async fn test_leading_scanned_page_never_yields_empty_chunk() {
    let h = Harness::new(None).await;
    let id = h
        .register("cover.pdf", vec![scanned_page(), text_page(words(700))])
        .await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap();

    let chunks = store::load_chunks(h.pipeline.pool(), &id).await.unwrap();
    let counts: Vec<i64> = chunks.iter().map(|c| c.token_count).collect();
    assert_eq!(counts, vec![512, 188]);
    assert_eq!(chunks[0].source_block_ids.len(), 2);

    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert_eq!(report.chunks.as_ref().unwrap().empty_chunks, 0);
    assert!(report.issues.is_empty(), "{:?}", report.issues);
    assert!(report.verified_now);
}

#[tokio::test]
async fn test_empty_chunk_blocks_verification() {
    let h = Harness::new(None).await;
    let id = h.register("hollow.pdf", text_pages(2, 40)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap();
    sqlx::query("UPDATE chunks SET content = '' WHERE document_id = ?")
        .bind(&id)
        .execute(h.pipeline.pool())
        .await
        .unwrap();

    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert!(report.issues.iter().any(|i| i.contains("no content")));
    assert!(!report.chunks.as_ref().unwrap().is_consistent());
    assert!(!report.verified_now);
    assert_eq!(h.status(&id).await, IngestionStatus::Chunked);
}

#[tokio::test]
async fn test_chunk_requires_blocks_and_valid_bounds() {
    let h = Harness::new(None).await;
    let id = h.register("early.pdf", text_pages(2, 50)).await;

    let err = chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotParsed(_)), "{err:?}");

    let bad = ChunkOptions {
        target_tokens: Some(300),
        max_tokens: Some(100),
        replace: false,
    };
    let err = chunk::chunk(&h.pipeline, &id, bad).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)), "{err:?}");
}

#[tokio::test]
async fn test_chunks_partition_blocks_within_budget() {
    let h = Harness::new(None).await;
    let id = h.register("long.pdf", text_pages(3, 300)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();

    let options = ChunkOptions {
        target_tokens: Some(100),
        max_tokens: Some(200),
        replace: false,
    };
    let outcome = chunk::chunk(&h.pipeline, &id, options).await.unwrap();
    assert_eq!(outcome.status, IngestionStatus::Chunked);
    assert_eq!(outcome.total_tokens, 900);

    let chunks = store::load_chunks(h.pipeline.pool(), &id).await.unwrap();
    assert_eq!(chunks.len(), outcome.chunks_created);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.position, i as i64);
        assert!(c.token_count <= 200, "chunk {} has {} tokens", i, c.token_count);
        assert!(!c.source_block_ids.is_empty());
    }
    let token_sum: i64 = chunks.iter().map(|c| c.token_count).sum();
    assert_eq!(token_sum, 900);

    let blocks = store::load_blocks(h.pipeline.pool(), &id).await.unwrap();
    for block in &blocks {
        assert!(
            chunks.iter().any(|c| c.source_block_ids.contains(&block.id)),
            "block {} is not in any chunk",
            block.id
        );
    }

    let err = chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyProcessed { stage: "chunk", .. }));

    let rechunked = chunk::chunk(
        &h.pipeline,
        &id,
        ChunkOptions {
            replace: true,
            ..ChunkOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(rechunked.chunks_replaced, chunks.len() as u64);
    assert_eq!(
        store::load_chunks(h.pipeline.pool(), &id).await.unwrap().len(),
        rechunked.chunks_created
    );
}

#[tokio::test]
async fn test_status_walks_to_verified() {
    let h = Harness::new(None).await;
    let id = h.register("walk.pdf", text_pages(3, 150)).await;
    assert_eq!(h.status(&id).await, IngestionStatus::Registered);

    probe::probe_with_default_sample(&h.pipeline, &id).await.unwrap();
    assert_eq!(h.status(&id).await, IngestionStatus::Probed);

    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    assert_eq!(h.status(&id).await, IngestionStatus::Parsed);

    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert!(!report.verified_now);
    assert_eq!(report.status, IngestionStatus::Parsed);

    chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap();
    assert_eq!(h.status(&id).await, IngestionStatus::Chunked);

    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert!(report.verified_now, "issues: {:?}", report.issues);
    assert!(report.issues.is_empty());
    assert_eq!(report.total_blocks, 3);
    assert_eq!(report.page_range, Some((1, 3)));
    assert!(report.chunks.as_ref().unwrap().is_consistent());
    assert_eq!(h.status(&id).await, IngestionStatus::Verified);

    let again = audit::audit(&h.pipeline, &id).await.unwrap();
    assert!(!again.verified_now);
    assert_eq!(again.status, IngestionStatus::Verified);
}

#[tokio::test]
async fn test_audit_reports_coverage_gap() {
    let h = Harness::new(None).await;
    let id = h.register("gappy.pdf", text_pages(5, 150)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();

    sqlx::query("DELETE FROM blocks WHERE document_id = ? AND page_number = 3")
        .bind(&id)
        .execute(h.pipeline.pool())
        .await
        .unwrap();

    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert_eq!(report.missing_pages, vec![3]);
    assert_eq!(report.page_range, Some((1, 5)));
    let pages: Vec<i64> = report.pages.iter().map(|p| p.page_number).collect();
    assert_eq!(pages, vec![1, 2, 4, 5]);
    assert!(report.issues.iter().any(|i| i.contains("coverage gap")));
    assert!(!report.verified_now);
    assert_eq!(report.status, IngestionStatus::Parsed);

    chunk::chunk(&h.pipeline, &id, ChunkOptions::default())
        .await
        .unwrap();
    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert!(report.chunks.as_ref().unwrap().is_consistent());
    assert!(!report.verified_now);
    assert_eq!(report.status, IngestionStatus::Chunked);
}

#[tokio::test]
async fn test_audit_reports_single_low_confidence_block() {
    let h = Harness::new(None).await;
    let id = h.register("ten.pdf", text_pages(10, 150)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    assert_eq!(h.block_count(&id).await, 10);

    sqlx::query("UPDATE blocks SET confidence = 30 WHERE document_id = ? AND page_number = 7")
        .bind(&id)
        .execute(h.pipeline.pool())
        .await
        .unwrap();

    let report = audit::audit(&h.pipeline, &id).await.unwrap();
    assert_eq!(report.low_confidence_threshold, 50.0);
    assert_eq!(report.low_confidence.len(), 1);
    assert_eq!(report.low_confidence[0].page_number, 7);
    assert_eq!(report.low_confidence[0].confidence, 30.0);
    assert!(report.low_confidence[0].content_length > 0);
    assert!(report.missing_pages.is_empty());

    let text = report
        .by_type
        .iter()
        .find(|t| t.block_type == "text")
        .unwrap();
    assert_eq!(text.count, 10);
    assert_eq!(text.min_confidence, 30.0);
}

#[tokio::test]
async fn test_validate_flags_drift_beyond_tolerance() {
    let h = Harness::new(None).await;
    // 4 alphanumeric characters per word.
    let id = h
        .register(
            "drift.pdf",
            vec![text_page(words(220)), text_page(words(238))],
        )
        .await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();

    h.loader.set(
        "drift.pdf",
        vec![text_page(words(250)), text_page(words(250))],
    );

    let report = validate::validate(&h.pipeline, &id, None).await.unwrap();
    assert_eq!(report.pages.len(), 2);

    let first = &report.pages[0];
    assert_eq!((first.fresh_length, first.persisted_length), (1000, 880));
    assert_eq!(first.variance, Some(0.12));
    assert_eq!(first.check, PageCheck::Flagged);

    let second = &report.pages[1];
    assert_eq!(second.check, PageCheck::Pass);
    assert_eq!(report.flagged_pages, vec![1]);
    assert!(report.source_mismatch.is_none());
    assert!(!report.passed());

    // Advisory only.
    assert_eq!(h.status(&id).await, IngestionStatus::Parsed);
    assert_eq!(h.block_count(&id).await, 2);
}

#[tokio::test]
async fn test_validate_skips_ocr_pages_and_checks_sample_size() {
    let h = Harness::new(Some(Arc::new(FixedOcr))).await;
    let id = h
        .register("ocr.pdf", vec![text_page(words(300)), scanned_page()])
        .await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();

    let report = validate::validate(&h.pipeline, &id, Some(2)).await.unwrap();
    assert!(report.passed());
    assert_eq!(report.pages[0].check, PageCheck::Pass);
    assert_eq!(report.pages[1].check, PageCheck::Skipped);

    for n in [0, 3] {
        let err = validate::validate(&h.pipeline, &id, Some(n)).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)), "n={n}: {err:?}");
    }
}

#[tokio::test]
async fn test_validate_reports_changed_source_file() {
    let h = Harness::new(None).await;
    let id = h.register("edited.pdf", text_pages(2, 90)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    let registered = registry::get_document(&h.pipeline, &id).await.unwrap();

    std::fs::write(
        h.tmp.path().join("edited.pdf"),
        b"%PDF-1.5 edited.pdf with an appended revision",
    )
    .unwrap();

    let report = validate::validate(&h.pipeline, &id, None).await.unwrap();
    let mismatch = report.source_mismatch.as_ref().unwrap();
    assert_eq!(mismatch.registered_size_bytes, registered.file_size_bytes);
    assert_ne!(mismatch.current_size_bytes, registered.file_size_bytes);
    assert_eq!(mismatch.registered_sha256, registered.sha256);
    assert_ne!(mismatch.current_sha256, registered.sha256);

    // The page text still agrees; the change is reported on its own.
    assert!(report.flagged_pages.is_empty());
    assert!(!report.passed());
    assert_eq!(h.status(&id).await, IngestionStatus::Parsed);
}

#[tokio::test]
async fn test_validate_reports_effective_sample_size() {
    let h = Harness::new(None).await;
    let id = h.register("sparse.pdf", text_pages(3, 90)).await;
    parse::parse(&h.pipeline, &id, ParseOptions::default())
        .await
        .unwrap();
    sqlx::query("DELETE FROM blocks WHERE document_id = ? AND page_number = 2")
        .bind(&id)
        .execute(h.pipeline.pool())
        .await
        .unwrap();

    let report = validate::validate(&h.pipeline, &id, Some(3)).await.unwrap();
    assert_eq!(report.requested_sample_size, Some(3));
    assert_eq!(report.sample_size, 2);
    let pages: Vec<i64> = report.pages.iter().map(|p| p.page_number).collect();
    assert_eq!(pages, vec![1, 3]);
    assert!(report.passed());
}

#[tokio::test]
async fn test_validate_requires_blocks() {
    let h = Harness::new(None).await;
    let id = h.register("fresh.pdf", text_pages(1, 10)).await;
    let err = validate::validate(&h.pipeline, &id, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotParsed(_)), "{err:?}");
}

#[tokio::test]
async fn test_status_lists_every_document() {
    let h = Harness::new(None).await;
    let done = h.register("done.pdf", text_pages(2, 80)).await;
    let waiting = h.register("waiting.pdf", text_pages(2, 80)).await;
    parse::parse(&h.pipeline, &done, ParseOptions::default())
        .await
        .unwrap();

    let summaries = audit::status(&h.pipeline).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].document_id, done);
    assert_eq!(summaries[0].ingestion_status, IngestionStatus::Parsed);
    assert_eq!(summaries[0].blocks_extracted, 2);
    assert_eq!(summaries[1].document_id, waiting);
    assert_eq!(summaries[1].ingestion_status, IngestionStatus::Registered);
    assert_eq!(summaries[1].blocks_extracted, 0);
    assert_eq!(summaries[1].page_count, None);
}

#[tokio::test]
async fn test_run_file_reaches_verified() {
    let h = Harness::new(None).await;
    let path = h.add_file("oneshot.pdf", text_pages(3, 120));

    let summary = pipeline::run_file(&h.pipeline, &path).await.unwrap();
    assert_eq!(summary.document.ingestion_status, IngestionStatus::Verified);
    assert_eq!(summary.parse.blocks_inserted, 3);
    assert!(summary.chunk.chunks_created > 0);
    assert!(summary.audit.verified_now);
}

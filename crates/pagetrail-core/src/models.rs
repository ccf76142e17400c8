//! Core data models shared by every pipeline stage.
//!
//! These types describe the documents, blocks, chunks and probe results that
//! flow through the Probe → Parse → Chunk → Verify pipeline. Persistence
//! lives in the `pagetrail` crate; everything here is plain data plus the
//! ingestion status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a registered document.
///
/// Progress is strictly linear:
/// `registered → probed → parsed → chunked → verified`. Any non-failed
/// status may move to `failed`. Re-running a completed stage is only
/// possible through an explicit rewind (see [`IngestionStatus::can_rewind_to`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Registered,
    Probed,
    Parsed,
    Chunked,
    Verified,
    Failed,
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: IngestionStatus,
    pub to: IngestionStatus,
}

/// Unknown status string read from storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown ingestion status: '{0}'")]
pub struct UnknownStatus(pub String);

impl IngestionStatus {
    pub const ALL: [IngestionStatus; 6] = [
        IngestionStatus::Registered,
        IngestionStatus::Probed,
        IngestionStatus::Parsed,
        IngestionStatus::Chunked,
        IngestionStatus::Verified,
        IngestionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Registered => "registered",
            IngestionStatus::Probed => "probed",
            IngestionStatus::Parsed => "parsed",
            IngestionStatus::Chunked => "chunked",
            IngestionStatus::Verified => "verified",
            IngestionStatus::Failed => "failed",
        }
    }

    /// Position along the linear pipeline. `None` for `failed`.
    pub fn rank(&self) -> Option<u8> {
        match self {
            IngestionStatus::Registered => Some(0),
            IngestionStatus::Probed => Some(1),
            IngestionStatus::Parsed => Some(2),
            IngestionStatus::Chunked => Some(3),
            IngestionStatus::Verified => Some(4),
            IngestionStatus::Failed => None,
        }
    }

    /// The status a successful next stage produces, if any.
    pub fn next(&self) -> Option<IngestionStatus> {
        match self {
            IngestionStatus::Registered => Some(IngestionStatus::Probed),
            IngestionStatus::Probed => Some(IngestionStatus::Parsed),
            IngestionStatus::Parsed => Some(IngestionStatus::Chunked),
            IngestionStatus::Chunked => Some(IngestionStatus::Verified),
            IngestionStatus::Verified | IngestionStatus::Failed => None,
        }
    }

    /// Forward transitions: exactly one step ahead, or to `failed` from any
    /// non-failed status.
    pub fn can_transition_to(&self, to: IngestionStatus) -> bool {
        match to {
            IngestionStatus::Failed => *self != IngestionStatus::Failed,
            _ => self.next() == Some(to),
        }
    }

    /// Validate a forward transition.
    pub fn transition_to(&self, to: IngestionStatus) -> Result<IngestionStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError { from: *self, to })
        }
    }

    /// Explicit replace intent: a stage that already ran may be re-run,
    /// landing the document back on `stage`. Parse is the only stage that
    /// fails a document, so a failed document may only be re-parsed.
    pub fn can_rewind_to(&self, stage: IngestionStatus) -> bool {
        match (self.rank(), stage.rank()) {
            (_, None) => false,
            (None, Some(_)) => stage == IngestionStatus::Parsed,
            (Some(current), Some(target)) => target > 0 && current >= target,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionStatus::Verified | IngestionStatus::Failed)
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for IngestionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IngestionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Kind of content a block carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Table,
    ScannedImage,
    /// Zero-confidence placeholder for a page that produced nothing.
    Empty,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Table => "table",
            BlockType::ScannedImage => "scanned_image",
            BlockType::Empty => "empty",
        }
    }

    /// Placeholders stand in for missing content and carry none themselves.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, BlockType::ScannedImage | BlockType::Empty)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(BlockType::Text),
            "table" => Ok(BlockType::Table),
            "scanned_image" => Ok(BlockType::ScannedImage),
            "empty" => Ok(BlockType::Empty),
            other => Err(format!("unknown block type: '{}'", other)),
        }
    }
}

/// Names recorded in `blocks.extraction_method`.
pub mod method {
    /// Plain text layer, whole page.
    pub const PDF_TEXT: &str = "pdf_text";
    /// Text layer with tabular lines removed into table blocks.
    pub const LAYOUT_TEXT: &str = "layout_text";
    /// Table reconstructed from column-aligned text lines.
    pub const LAYOUT_TABLE: &str = "layout_table";
    /// OCR over a rendered page image.
    pub const OCR_TESSERACT: &str = "ocr_tesseract";
    /// No technique produced content for the page.
    pub const UNEXTRACTED: &str = "unextracted";
}

/// Structural class of a sampled page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageClass {
    #[serde(rename = "text-heavy")]
    TextHeavy,
    #[serde(rename = "table-heavy")]
    TableHeavy,
    #[serde(rename = "scanned")]
    Scanned,
}

impl PageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageClass::TextHeavy => "text-heavy",
            PageClass::TableHeavy => "table-heavy",
            PageClass::Scanned => "scanned",
        }
    }
}

impl fmt::Display for PageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Parsing strategy hint produced by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Whole-page text layer extraction.
    StandardText,
    /// Text layer plus table reconstruction.
    LayoutAware,
    /// Layout-aware extraction with OCR for image-only pages; flag for review.
    OcrReview,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::StandardText => "standard_text",
            RecommendedAction::LayoutAware => "layout_aware",
            RecommendedAction::OcrReview => "ocr_review",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Structural signals for one sampled page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSignal {
    /// 1-based page number.
    pub page_number: u32,
    pub text_chars: usize,
    /// `min(1, text_chars / 3000)`.
    pub density: f64,
    pub table_count: usize,
    pub tabular_line_ratio: f64,
    pub image_only: bool,
    pub class: PageClass,
}

/// Outcome of probing a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub page_count: u32,
    pub sample_size: u32,
    pub sampled_pages: Vec<u32>,
    pub pages: Vec<PageSignal>,
    /// 0–100, higher means structurally harder.
    pub complexity_score: f64,
    pub recommended_action: RecommendedAction,
}

/// A registered source document.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub document_id: String,
    pub filename: String,
    pub file_path: String,
    pub file_size_bytes: i64,
    pub sha256: String,
    pub page_count: Option<i64>,
    pub ingestion_status: IngestionStatus,
    pub probe_summary: Option<ProbeResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Block produced by the parser before it is assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDraft {
    /// 1-based page number.
    pub page_number: i64,
    pub block_type: BlockType,
    pub content: String,
    pub extraction_method: String,
    /// 0–100.
    pub confidence: f64,
}

/// One persisted extracted content unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub id: String,
    pub document_id: String,
    pub page_number: i64,
    /// Position within the page, starting at 0.
    pub ordinal: i64,
    pub block_type: BlockType,
    pub content: String,
    pub extraction_method: String,
    pub confidence: f64,
}

/// A token-bounded group of blocks (or block fragments).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Contiguous from 0 within the document.
    pub position: i64,
    pub token_count: i64,
    /// Contributing blocks in reading order.
    pub source_block_ids: Vec<String>,
    pub content: String,
    /// Trailing tokens of the previous chunk when an overlap window is set.
    /// Not counted in `token_count`.
    pub overlap_context: Option<String>,
    /// SHA-256 of `content`.
    pub hash: String,
}

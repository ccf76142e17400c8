//! Structural probing: page sampling, page classification, complexity
//! scoring and strategy recommendation.
//!
//! Everything here is a pure function of its inputs, so probing the same
//! document with the same sample size always yields the same result.

use crate::models::{PageClass, PageSignal, ProbeResult, RecommendedAction};
use crate::table;

/// Pages sampled when the caller does not choose.
pub const DEFAULT_SAMPLE_SIZE: u32 = 3;

/// Scores below this recommend plain text extraction.
pub const LOW_COMPLEXITY_THRESHOLD: f64 = 30.0;

/// Scores at or above this recommend OCR and manual review.
pub const HIGH_COMPLEXITY_THRESHOLD: f64 = 70.0;

/// A page with fewer text-layer characters has no usable text layer.
pub const MIN_TEXT_CHARS: usize = 20;

/// Share of tabular lines at which a page with a detected table is table-heavy.
pub const TABLE_LINE_RATIO: f64 = 0.4;

/// Characters at which a page counts as fully dense.
pub const FULL_PAGE_CHARS: f64 = 3000.0;

const NON_TEXT_WEIGHT: f64 = 0.7;
const DENSITY_SPREAD_WEIGHT: f64 = 0.3;
/// Density standard deviation that saturates the spread term.
const DENSITY_SPREAD_CAP: f64 = 0.5;

/// Tunable cut-offs for classification and recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeThresholds {
    pub low: f64,
    pub high: f64,
    pub min_text_chars: usize,
    pub table_line_ratio: f64,
}

impl Default for ProbeThresholds {
    fn default() -> Self {
        Self {
            low: LOW_COMPLEXITY_THRESHOLD,
            high: HIGH_COMPLEXITY_THRESHOLD,
            min_text_chars: MIN_TEXT_CHARS,
            table_line_ratio: TABLE_LINE_RATIO,
        }
    }
}

/// Raw measurements of one page, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct PageObservation {
    pub page_number: u32,
    pub text_chars: usize,
    pub table_count: usize,
    pub tabular_line_ratio: f64,
    /// The page carries images and no text-showing operators.
    pub image_only: bool,
}

impl PageObservation {
    /// Measure a page from its text layer.
    pub fn from_text(page_number: u32, text: &str, image_only: bool) -> Self {
        let layout = table::detect_tables(text);
        Self {
            page_number,
            text_chars: text.trim().chars().count(),
            table_count: layout.tables.len(),
            tabular_line_ratio: table::tabular_line_ratio(text),
            image_only,
        }
    }

    pub fn density(&self) -> f64 {
        (self.text_chars as f64 / FULL_PAGE_CHARS).min(1.0)
    }
}

/// Pick `sample_size` distinct 1-based pages, evenly spaced and always
/// including the first page (and the last when more than one is sampled).
///
/// `sample_size` is clamped to `page_count`.
pub fn sample_pages(page_count: u32, sample_size: u32) -> Vec<u32> {
    let n = sample_size.min(page_count);
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1];
    }
    let span = (page_count - 1) as f64;
    let mut pages: Vec<u32> = (0..n)
        .map(|i| (i as f64 * span / (n - 1) as f64).round() as u32 + 1)
        .collect();
    pages.dedup();
    pages
}

/// Classify a page. Precedence: scanned, then table-heavy, then text-heavy.
pub fn classify_page(obs: &PageObservation, thresholds: &ProbeThresholds) -> PageClass {
    if obs.image_only || obs.text_chars < thresholds.min_text_chars {
        PageClass::Scanned
    } else if obs.table_count > 0 && obs.tabular_line_ratio >= thresholds.table_line_ratio {
        PageClass::TableHeavy
    } else {
        PageClass::TextHeavy
    }
}

/// Score 0–100 from the share of non-text-heavy pages and the spread of
/// per-page text density. Increasing either never lowers the score.
pub fn complexity_score(signals: &[PageSignal]) -> f64 {
    if signals.is_empty() {
        return 0.0;
    }
    let n = signals.len() as f64;
    let non_text = signals
        .iter()
        .filter(|s| s.class != PageClass::TextHeavy)
        .count() as f64
        / n;

    let mean = signals.iter().map(|s| s.density).sum::<f64>() / n;
    let variance = signals
        .iter()
        .map(|s| (s.density - mean).powi(2))
        .sum::<f64>()
        / n;
    let spread = (variance.sqrt() / DENSITY_SPREAD_CAP).min(1.0);

    let score = 100.0 * (NON_TEXT_WEIGHT * non_text + DENSITY_SPREAD_WEIGHT * spread);
    (score.clamp(0.0, 100.0) * 1000.0).round() / 1000.0
}

/// Map a complexity score onto a parsing strategy.
pub fn recommend(score: f64, thresholds: &ProbeThresholds) -> RecommendedAction {
    if score < thresholds.low {
        RecommendedAction::StandardText
    } else if score >= thresholds.high {
        RecommendedAction::OcrReview
    } else {
        RecommendedAction::LayoutAware
    }
}

/// Classify the observed pages and assemble the probe result.
pub fn assess(
    page_count: u32,
    sample_size: u32,
    observations: &[PageObservation],
    thresholds: &ProbeThresholds,
) -> ProbeResult {
    let pages: Vec<PageSignal> = observations
        .iter()
        .map(|obs| PageSignal {
            page_number: obs.page_number,
            text_chars: obs.text_chars,
            density: obs.density(),
            table_count: obs.table_count,
            tabular_line_ratio: obs.tabular_line_ratio,
            image_only: obs.image_only,
            class: classify_page(obs, thresholds),
        })
        .collect();
    let complexity_score = complexity_score(&pages);

    ProbeResult {
        page_count,
        sample_size,
        sampled_pages: pages.iter().map(|p| p.page_number).collect(),
        recommended_action: recommend(complexity_score, thresholds),
        complexity_score,
        pages,
    }
}

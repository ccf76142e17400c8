//! Deterministic confidence scores (0–100) for extracted blocks.
//!
//! Each technique scores its own output from signals it can observe: text
//! volume and character cleanliness for text layers, row/column regularity
//! for reconstructed tables, per-word engine scores for OCR.

use crate::table::Table;

/// Confidence cut-offs used when summarizing extraction quality.
pub mod thresholds {
    /// Below this a block is reported as low-confidence by the audit.
    pub const LOW: f64 = 50.0;

    /// Above this the extraction came from a clean digital source.
    pub const HIGH: f64 = 85.0;
}

/// Upper bound of every score.
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Fraction of characters that are letters, digits, whitespace or common
/// punctuation. Replacement characters and control codes count against it.
pub fn clean_char_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut clean = 0usize;
    for ch in text.chars() {
        total += 1;
        if ch == '\u{FFFD}' {
            continue;
        }
        if ch.is_alphanumeric() || ch.is_whitespace() || ch.is_ascii_punctuation() {
            clean += 1;
        } else if !ch.is_control() && !ch.is_ascii() {
            // Symbols outside ASCII (currency, dashes, bullets) are legitimate.
            clean += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    clean as f64 / total as f64
}

/// Score a text-layer extraction.
///
/// Volume sets the base (short fragments are less trustworthy than full
/// pages), then the clean-character ratio scales it down for garbled
/// encodings.
pub fn text_confidence(text: &str) -> f64 {
    let trimmed = text.trim();
    let chars = trimmed.chars().count();
    if chars == 0 {
        return 0.0;
    }
    let base = if chars < 100 {
        60.0
    } else if chars < 1000 {
        80.0
    } else {
        95.0
    };
    round1(clamp(base * clean_char_ratio(trimmed)))
}

/// Score a reconstructed table.
///
/// Tables with at least three rows and two columns start at 85, smaller
/// ones at 60. Ragged rows and empty cells reduce the score.
pub fn table_confidence(table: &Table) -> f64 {
    if table.rows.is_empty() {
        return 0.0;
    }
    let base = if table.row_count() >= 3 && table.column_count() >= 2 {
        85.0
    } else {
        60.0
    };
    let score = base * table.column_consistency() * (1.0 - 0.5 * table.empty_cell_ratio());
    round1(clamp(score))
}

/// Score an OCR result from per-word engine confidences (0–100).
///
/// Negative values mark non-word boxes and are ignored.
pub fn ocr_confidence(word_confidences: &[f64]) -> f64 {
    let words: Vec<f64> = word_confidences
        .iter()
        .copied()
        .filter(|c| *c >= 0.0)
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    round1(clamp(words.iter().sum::<f64>() / words.len() as f64))
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, MAX_CONFIDENCE)
}

fn round1(score: f64) -> f64 {
    (score * 10.0).round() / 10.0
}

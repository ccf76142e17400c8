//! Tesseract OCR engine.
//!
//! Renders one PDF page to PNG with `pdftoppm` in a temporary directory,
//! then runs `tesseract ... tsv` and rebuilds the text line by line from
//! word boxes. Confidence is the mean of the per-word scores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use pagetrail_core::confidence;
use tempfile::TempDir;

use crate::config::OcrConfig;
use crate::source::{OcrEngine, OcrOutput, SourceError};

/// TSV column count emitted by tesseract 4+.
const TSV_COLUMNS: usize = 12;
/// TSV `level` value of a word box.
const WORD_LEVEL: &str = "5";

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    language: String,
    dpi: u32,
}

impl TesseractOcr {
    pub fn new(language: impl Into<String>, dpi: u32) -> Self {
        Self {
            language: language.into(),
            dpi,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.language.clone(), config.dpi)
    }

    fn render_page(&self, pdf_path: &Path, page: u32, output_dir: &Path) -> Result<PathBuf, SourceError> {
        let page_str = page.to_string();
        let dpi = self.dpi.to_string();
        let output_prefix = output_dir.join("page");

        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi, "-f", &page_str, "-l", &page_str])
            .arg(pdf_path)
            .arg(&output_prefix)
            .status();

        match status {
            Ok(s) if s.success() => find_page_image(output_dir, page)
                .ok_or_else(|| SourceError::Ocr(format!("no image rendered for page {}", page))),
            Ok(_) => Err(SourceError::Ocr(format!(
                "pdftoppm failed to render page {}",
                page
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                SourceError::OcrUnavailable("pdftoppm not found (install poppler-utils)".to_string()),
            ),
            Err(e) => Err(SourceError::Io(e)),
        }
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<String, SourceError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .arg("tsv")
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => Err(SourceError::Ocr(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                SourceError::OcrUnavailable("tesseract not found (install tesseract-ocr)".to_string()),
            ),
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, path: &Path, page: u32) -> Result<OcrOutput, SourceError> {
        let temp_dir = TempDir::new()?;
        let image = self.render_page(path, page, temp_dir.path())?;
        let tsv = self.run_tesseract(&image)?;
        Ok(parse_tsv(&tsv))
    }
}

/// `pdftoppm` zero-pads page numbers to the width of the document's page count.
fn find_page_image(dir: &Path, page: u32) -> Option<PathBuf> {
    (1..=6)
        .map(|width| dir.join(format!("page-{:0width$}.png", page, width = width)))
        .find(|path| path.exists())
}

/// Rebuild text and confidence from tesseract TSV output.
fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut lines: BTreeMap<(u32, u32, u32, u32), Vec<String>> = BTreeMap::new();
    let mut word_confidences = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < TSV_COLUMNS || cols[0] != WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        lines.entry(key).or_default().push(word.to_string());
        if let Ok(conf) = cols[10].trim().parse::<f64>() {
            word_confidences.push(conf);
        }
    }

    let text = lines
        .into_values()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    OcrOutput {
        text,
        confidence: confidence::ocr_confidence(&word_confidences),
    }
}

//! TOML configuration.
//!
//! Every pipeline threshold is a named field here rather than a literal at
//! the call site. Only `[db].path` is required; every other section falls
//! back to the defaults documented on each field.
//!
//! ```toml
//! [db]
//! path = "./data/pagetrail.sqlite"
//!
//! [probe]
//! sample_size = 3
//! low_threshold = 30.0
//! high_threshold = 70.0
//!
//! [chunking]
//! target_tokens = 256
//! max_tokens = 512
//!
//! [audit]
//! low_confidence_threshold = 50.0
//! variance_tolerance = 0.10
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use pagetrail_core::chunk::{ChunkParams, DEFAULT_MAX_TOKENS, DEFAULT_TARGET_TOKENS};
use pagetrail_core::confidence;
use pagetrail_core::probe::{self, ProbeThresholds};
use pagetrail_core::verify::DEFAULT_VARIANCE_TOLERANCE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Which files `register <dir>` picks up.
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string(), "**/*.PDF".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    /// Pages sampled per probe.
    #[serde(default = "default_sample_size")]
    pub sample_size: u32,
    /// Complexity below this recommends plain text extraction.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
    /// Complexity at or above this recommends OCR and manual review.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    /// Pages with fewer text-layer characters are treated as scanned.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Share of tabular lines that makes a page table-heavy.
    #[serde(default = "default_table_line_ratio")]
    pub table_line_ratio: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
            min_text_chars: default_min_text_chars(),
            table_line_ratio: default_table_line_ratio(),
        }
    }
}

impl ProbeConfig {
    pub fn thresholds(&self) -> ProbeThresholds {
        ProbeThresholds {
            low: self.low_threshold,
            high: self.high_threshold,
            min_text_chars: self.min_text_chars,
            table_line_ratio: self.table_line_ratio,
        }
    }
}

fn default_sample_size() -> u32 {
    probe::DEFAULT_SAMPLE_SIZE
}
fn default_low_threshold() -> f64 {
    probe::LOW_COMPLEXITY_THRESHOLD
}
fn default_high_threshold() -> f64 {
    probe::HIGH_COMPLEXITY_THRESHOLD
}
fn default_min_text_chars() -> usize {
    probe::MIN_TEXT_CHARS
}
fn default_table_line_ratio() -> f64 {
    probe::TABLE_LINE_RATIO
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// A chunk closes once it reaches this many tokens.
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    /// No chunk grows past this, except an indivisible table row.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Trailing tokens of the previous chunk carried as context.
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: 0,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            target_tokens: self.target_tokens,
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

fn default_target_tokens() -> usize {
    DEFAULT_TARGET_TOKENS
}
fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// Blocks scoring below this are listed as low-confidence.
    #[serde(default = "default_low_confidence")]
    pub low_confidence_threshold: f64,
    /// Allowed relative drift between a fresh sample and persisted blocks.
    #[serde(default = "default_variance_tolerance")]
    pub variance_tolerance: f64,
    /// Pages re-read by `validate` when no sample size is given.
    #[serde(default = "default_sample_size")]
    pub validate_sample_size: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: default_low_confidence(),
            variance_tolerance: default_variance_tolerance(),
            validate_sample_size: default_sample_size(),
        }
    }
}

fn default_low_confidence() -> f64 {
    confidence::thresholds::LOW
}
fn default_variance_tolerance() -> f64 {
    DEFAULT_VARIANCE_TOLERANCE
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            language: default_language(),
            dpi: default_dpi(),
        }
    }
}

fn default_language() -> String {
    "eng".to_string()
}
fn default_dpi() -> u32 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// All-defaults configuration around a database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            registry: RegistryConfig::default(),
            probe: ProbeConfig::default(),
            chunking: ChunkingConfig::default(),
            audit: AuditConfig::default(),
            ocr: OcrConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe.sample_size == 0 {
            anyhow::bail!("probe.sample_size must be > 0");
        }
        if !(0.0..=100.0).contains(&self.probe.low_threshold)
            || !(0.0..=100.0).contains(&self.probe.high_threshold)
            || self.probe.low_threshold >= self.probe.high_threshold
        {
            anyhow::bail!(
                "probe thresholds must satisfy 0 <= low_threshold < high_threshold <= 100 (got {} / {})",
                self.probe.low_threshold,
                self.probe.high_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.probe.table_line_ratio) {
            anyhow::bail!("probe.table_line_ratio must be in [0.0, 1.0]");
        }

        self.chunking
            .params()
            .validate()
            .map_err(|e| anyhow::anyhow!("chunking: {}", e))?;

        if !(0.0..=100.0).contains(&self.audit.low_confidence_threshold) {
            anyhow::bail!("audit.low_confidence_threshold must be in [0, 100]");
        }
        if !(0.0..=1.0).contains(&self.audit.variance_tolerance) {
            anyhow::bail!("audit.variance_tolerance must be in [0.0, 1.0]");
        }
        if self.audit.validate_sample_size == 0 {
            anyhow::bail!("audit.validate_sample_size must be > 0");
        }

        if self.ocr.dpi == 0 {
            anyhow::bail!("ocr.dpi must be > 0");
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

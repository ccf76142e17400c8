//! Human-readable stage reports.
//!
//! Each renderer writes to any `io::Write` so the CLI can print to stdout
//! and tests can capture into a buffer. `--json` bypasses these and
//! serializes the same structs.

use std::io::{self, Write};

use pagetrail_core::models::Document;

use crate::audit::{AuditReport, DocumentSummary};
use crate::chunk::ChunkOutcome;
use crate::parse::{ParseOutcome, ParseWarning};
use crate::pipeline::RunSummary;
use crate::probe::ProbeOutcome;
use crate::validate::{PageCheck, ValidationReport};

pub fn write_registered(w: &mut impl Write, docs: &[Document]) -> io::Result<()> {
    writeln!(w, "registered {} document{}", docs.len(), plural(docs.len()))?;
    for doc in docs {
        writeln!(
            w,
            "  {}  {}  ({})",
            doc.document_id,
            doc.filename,
            format_bytes(doc.file_size_bytes.max(0) as u64)
        )?;
    }
    Ok(())
}

pub fn write_probe(w: &mut impl Write, outcome: &ProbeOutcome) -> io::Result<()> {
    let result = &outcome.result;
    match &outcome.document_id {
        Some(id) => writeln!(w, "probe {} ({})", id, outcome.filename)?,
        None => writeln!(w, "probe {} (not registered)", outcome.filename)?,
    }
    writeln!(w, "  pages:              {}", result.page_count)?;
    writeln!(w, "  sampled:            {:?}", result.sampled_pages)?;
    writeln!(w, "  complexity score:   {:.1}", result.complexity_score)?;
    writeln!(w, "  recommended action: {}", result.recommended_action)?;
    if let Some(status) = outcome.status {
        writeln!(
            w,
            "  status:             {}{}",
            status,
            if outcome.persisted { "" } else { " (result not stored)" }
        )?;
    }
    writeln!(w)?;
    writeln!(
        w,
        "  {:>5}  {:<12} {:>7} {:>8} {:>7}  {}",
        "PAGE", "CLASS", "CHARS", "DENSITY", "TABLES", "IMAGE-ONLY"
    )?;
    writeln!(w, "  {}", "-".repeat(58))?;
    for page in &result.pages {
        writeln!(
            w,
            "  {:>5}  {:<12} {:>7} {:>8.2} {:>7}  {}",
            page.page_number,
            page.class.as_str(),
            page.text_chars,
            page.density,
            page.table_count,
            if page.image_only { "yes" } else { "no" }
        )?;
    }
    Ok(())
}

pub fn write_parse(w: &mut impl Write, outcome: &ParseOutcome) -> io::Result<()> {
    writeln!(w, "parse {}", outcome.document_id)?;
    writeln!(w, "  pages:           {}", outcome.page_count)?;
    writeln!(w, "  strategy:        {}", outcome.strategy)?;
    writeln!(w, "  blocks inserted: {}", outcome.blocks_inserted)?;
    if outcome.blocks_replaced > 0 {
        writeln!(w, "  blocks replaced: {}", outcome.blocks_replaced)?;
    }
    for (method, count) in &outcome.methods {
        writeln!(w, "    {:<16} {}", method, count)?;
    }
    writeln!(w, "  status:          {}", outcome.status)?;
    if !outcome.warnings.is_empty() {
        writeln!(w, "  warnings:")?;
        for warning in &outcome.warnings {
            match warning {
                ParseWarning::PartialExtraction { page_number, reason } => {
                    writeln!(w, "    page {}: {}", page_number, reason)?
                }
            }
        }
    }
    Ok(())
}

pub fn write_chunk(w: &mut impl Write, outcome: &ChunkOutcome) -> io::Result<()> {
    writeln!(w, "chunk {}", outcome.document_id)?;
    writeln!(w, "  chunks created: {}", outcome.chunks_created)?;
    writeln!(w, "  blocks chunked: {}", outcome.blocks_chunked)?;
    writeln!(w, "  total tokens:   {}", outcome.total_tokens)?;
    writeln!(
        w,
        "  bounds:         target {} / max {}",
        outcome.target_tokens, outcome.max_tokens
    )?;
    if outcome.chunks_replaced > 0 {
        writeln!(w, "  replaced:       {}", outcome.chunks_replaced)?;
    }
    writeln!(w, "  status:         {}", outcome.status)?;
    Ok(())
}

pub fn write_audit(w: &mut impl Write, report: &AuditReport) -> io::Result<()> {
    writeln!(w, "Audit: {} ({})", report.filename, report.document_id)?;
    writeln!(w, "{}", "=".repeat(60))?;
    writeln!(w)?;
    writeln!(
        w,
        "  Pages:       {}",
        report
            .page_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    )?;
    writeln!(w, "  Blocks:      {}", report.total_blocks)?;
    writeln!(
        w,
        "  Status:      {}{}",
        report.status,
        if report.verified_now { " (verified by this audit)" } else { "" }
    )?;

    if !report.by_type.is_empty() {
        writeln!(w)?;
        writeln!(w, "  By block type:")?;
        writeln!(
            w,
            "  {:<16} {:>6} {:>8} {:>8} {:>8}",
            "TYPE", "COUNT", "AVG", "MIN", "MAX"
        )?;
        writeln!(w, "  {}", "-".repeat(50))?;
        for t in &report.by_type {
            writeln!(
                w,
                "  {:<16} {:>6} {:>8.1} {:>8.1} {:>8.1}",
                t.block_type, t.count, t.avg_confidence, t.min_confidence, t.max_confidence
            )?;
        }
    }

    if !report.by_method.is_empty() {
        writeln!(w)?;
        writeln!(w, "  By extraction method:")?;
        for m in &report.by_method {
            writeln!(w, "    {:<16} {}", m.extraction_method, m.count)?;
        }
    }

    writeln!(w)?;
    writeln!(
        w,
        "  Low confidence (< {}): {}",
        report.low_confidence_threshold,
        report.low_confidence.len()
    )?;
    for block in &report.low_confidence {
        writeln!(
            w,
            "    page {:>4}  {:<14} {:>5.1}  {} chars  {}",
            block.page_number,
            block.block_type,
            block.confidence,
            block.content_length,
            block.block_id
        )?;
    }

    writeln!(w)?;
    match report.page_range {
        Some((lo, hi)) => writeln!(w, "  Page range:  {}..={}", lo, hi)?,
        None => writeln!(w, "  Page range:  none")?,
    }
    if report.missing_pages.is_empty() {
        writeln!(w, "  Coverage:    complete")?;
    } else {
        writeln!(w, "  Coverage gaps: {:?}", report.missing_pages)?;
    }

    if !report.pages.is_empty() {
        writeln!(w)?;
        writeln!(w, "  {:>5} {:>7} {:>10} {:>8}", "PAGE", "BLOCKS", "BYTES", "MIN CONF")?;
        writeln!(w, "  {}", "-".repeat(34))?;
        for p in &report.pages {
            writeln!(
                w,
                "  {:>5} {:>7} {:>10} {:>8.1}",
                p.page_number,
                p.block_count,
                format_bytes(p.content_bytes.max(0) as u64),
                p.min_confidence
            )?;
        }
    }

    if let Some(c) = &report.chunks {
        writeln!(w)?;
        writeln!(w, "  Chunks:      {}", c.chunk_count)?;
        writeln!(
            w,
            "  Tokens:      min {} / avg {:.1} / max {}",
            c.min_tokens, c.avg_tokens, c.max_tokens
        )?;
        writeln!(w, "  Empty chunks:        {}", c.empty_chunks)?;
        writeln!(w, "  Unchunked blocks:    {}", c.unchunked_blocks.len())?;
        writeln!(w, "  Dangling references: {}", c.dangling_references.len())?;
    }

    if !report.issues.is_empty() {
        writeln!(w)?;
        writeln!(w, "  Issues:")?;
        for issue in &report.issues {
            writeln!(w, "    - {}", issue)?;
        }
    }
    Ok(())
}

pub fn write_validation(w: &mut impl Write, report: &ValidationReport) -> io::Result<()> {
    writeln!(w, "validate {} ({})", report.document_id, report.filename)?;
    write!(
        w,
        "  sampled {} page{}, tolerance ±{:.0}%",
        report.sample_size,
        plural(report.sample_size as usize),
        report.tolerance * 100.0
    )?;
    match report.requested_sample_size {
        Some(n) if n != report.sample_size => writeln!(w, " ({} requested)", n)?,
        _ => writeln!(w)?,
    }
    if let Some(m) = &report.source_mismatch {
        writeln!(
            w,
            "  source changed since registration: {} -> {}, sha256 {} -> {}",
            format_bytes(m.registered_size_bytes.max(0) as u64),
            format_bytes(m.current_size_bytes.max(0) as u64),
            short_hash(&m.registered_sha256),
            short_hash(&m.current_sha256)
        )?;
    }
    writeln!(w)?;
    writeln!(
        w,
        "  {:>5} {:>8} {:>10} {:>9}  {}",
        "PAGE", "FRESH", "PERSISTED", "VARIANCE", "RESULT"
    )?;
    writeln!(w, "  {}", "-".repeat(48))?;
    for page in &report.pages {
        let variance = page
            .variance
            .map(|v| format!("{:.1}%", v * 100.0))
            .unwrap_or_else(|| "-".to_string());
        let result = match page.check {
            PageCheck::Pass => "ok".to_string(),
            PageCheck::Flagged => "FLAGGED".to_string(),
            PageCheck::Skipped => format!("skipped ({})", page.note.as_deref().unwrap_or("")),
        };
        writeln!(
            w,
            "  {:>5} {:>8} {:>10} {:>9}  {}",
            page.page_number, page.fresh_length, page.persisted_length, variance, result
        )?;
    }
    writeln!(w)?;
    if report.passed() {
        writeln!(w, "  result: pass")?;
    } else if report.flagged_pages.is_empty() {
        writeln!(w, "  result: source file changed")?;
    } else {
        writeln!(w, "  result: variance above tolerance on pages {:?}", report.flagged_pages)?;
    }
    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

pub fn write_status(w: &mut impl Write, docs: &[DocumentSummary]) -> io::Result<()> {
    if docs.is_empty() {
        writeln!(w, "no documents registered")?;
        return Ok(());
    }
    writeln!(
        w,
        "{:<36}  {:<28} {:<10} {:>5} {:>7} {:>6} {:>7}",
        "DOCUMENT", "FILENAME", "STATUS", "PAGES", "BLOCKS", "LOW", "CHUNKS"
    )?;
    writeln!(w, "{}", "-".repeat(108))?;
    for d in docs {
        writeln!(
            w,
            "{:<36}  {:<28} {:<10} {:>5} {:>7} {:>6} {:>7}",
            d.document_id,
            truncate(&d.filename, 28),
            d.ingestion_status,
            d.page_count.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            d.blocks_extracted,
            d.low_confidence_blocks,
            d.chunks
        )?;
    }
    Ok(())
}

pub fn write_run(w: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
    write_registered(w, std::slice::from_ref(&summary.document))?;
    writeln!(w)?;
    write_probe(w, &summary.probe)?;
    writeln!(w)?;
    write_parse(w, &summary.parse)?;
    writeln!(w)?;
    write_chunk(w, &summary.chunk)?;
    writeln!(w)?;
    write_audit(w, &summary.audit)
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let head: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

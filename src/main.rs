//! # pagetrail CLI
//!
//! Drives the Probe → Parse → Chunk → Audit pipeline one stage at a time,
//! one document per invocation.
//!
//! ## Usage
//!
//! ```bash
//! pagetrail --config ./config/pagetrail.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagetrail init` | Create the SQLite database and run schema migrations |
//! | `pagetrail register <path>` | Register a PDF, or every matching PDF under a directory |
//! | `pagetrail probe <id>` | Sample pages, score complexity, recommend a strategy |
//! | `pagetrail probe --path <file>` | Probe an unregistered file without storing anything |
//! | `pagetrail parse <id>` | Extract blocks with method and confidence |
//! | `pagetrail chunk <id>` | Group blocks into token-bounded chunks |
//! | `pagetrail audit <id>` | SQL checks: confidence, coverage gaps, chunk lineage |
//! | `pagetrail validate <id>` | Cross-check persisted blocks against the source |
//! | `pagetrail status` | Per-document summary |
//! | `pagetrail run <file>` | Register, probe, parse, chunk and audit in one go |
//!
//! Reports go to stdout (`--json` for machine-readable output); logs go to
//! stderr, filtered by `RUST_LOG` or `[logging] filter`.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pagetrail::chunk::ChunkOptions;
use pagetrail::config::{self, Config};
use pagetrail::parse::ParseOptions;
use pagetrail::pipeline::{self, Pipeline};
use pagetrail::{audit, chunk, parse, probe, registry, report, validate};

/// pagetrail: auditable PDF ingestion.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only `[db] path` is required.
#[derive(Parser)]
#[command(
    name = "pagetrail",
    about = "pagetrail: probe, parse, chunk and audit PDF documents with traceable lineage",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pagetrail.toml")]
    config: PathBuf,

    /// Print reports as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Register a PDF file, or every matching file under a directory.
    ///
    /// Each file gets a new document id, even if it was registered before.
    Register {
        /// File or directory.
        path: PathBuf,
    },

    /// Probe a document's structure and recommend a parsing strategy.
    Probe {
        /// Registered document id.
        #[arg(required_unless_present = "path", conflicts_with = "path")]
        document_id: Option<String>,

        /// Probe an unregistered file instead; nothing is stored.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Pages to sample (defaults to `[probe] sample_size`).
        #[arg(long)]
        samples: Option<u32>,
    },

    /// Extract blocks from every page.
    Parse {
        document_id: String,

        /// Replace an existing block set (drops its chunks).
        #[arg(long)]
        replace: bool,
    },

    /// Group blocks into token-bounded chunks.
    Chunk {
        document_id: String,

        #[arg(long)]
        target_tokens: Option<usize>,

        #[arg(long)]
        max_tokens: Option<usize>,

        /// Replace an existing chunk set.
        #[arg(long)]
        replace: bool,
    },

    /// Audit persisted blocks and chunks; marks the document verified when
    /// coverage and lineage are complete.
    Audit { document_id: String },

    /// Re-read sampled pages and compare against persisted blocks.
    ///
    /// Advisory only: flagged pages are reported, nothing is re-parsed.
    Validate {
        document_id: String,

        /// Pages to sample (defaults to `[audit] validate_sample_size`).
        #[arg(long)]
        samples: Option<u32>,
    },

    /// List documents with status, page and block counts.
    Status,

    /// Register a file and run every stage through audit.
    Run { path: PathBuf },
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print `value` as pretty JSON, or through the text renderer.
fn emit<T, F>(json: bool, value: &T, render: F) -> anyhow::Result<()>
where
    T: Serialize,
    F: FnOnce(&mut io::StdoutLock<'static>) -> io::Result<()>,
{
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
    } else {
        render(&mut out)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    let pipeline = Pipeline::open(cfg).await?;
    let json = cli.json;

    let result = run_command(&pipeline, cli.command, json).await;
    pipeline.close().await;
    result
}

async fn run_command(pipeline: &Pipeline, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            pipeline.init().await?;
            println!("Database initialized successfully.");
        }
        Commands::Register { path } => {
            let docs = registry::register_path(pipeline, &path).await?;
            emit(json, &docs, |w| report::write_registered(w, &docs))?;
        }
        Commands::Probe {
            document_id,
            path,
            samples,
        } => {
            let outcome = match (document_id, path) {
                (_, Some(path)) => probe::probe_file(pipeline, &path, samples)?,
                (Some(id), None) => match samples {
                    Some(n) => probe::probe(pipeline, &id, n).await?,
                    None => probe::probe_with_default_sample(pipeline, &id).await?,
                },
                (None, None) => anyhow::bail!("a document id or --path is required"),
            };
            emit(json, &outcome, |w| report::write_probe(w, &outcome))?;
        }
        Commands::Parse {
            document_id,
            replace,
        } => {
            let outcome = parse::parse(pipeline, &document_id, ParseOptions { replace }).await?;
            emit(json, &outcome, |w| report::write_parse(w, &outcome))?;
        }
        Commands::Chunk {
            document_id,
            target_tokens,
            max_tokens,
            replace,
        } => {
            let options = ChunkOptions {
                target_tokens,
                max_tokens,
                replace,
            };
            let outcome = chunk::chunk(pipeline, &document_id, options).await?;
            emit(json, &outcome, |w| report::write_chunk(w, &outcome))?;
        }
        Commands::Audit { document_id } => {
            let audited = audit::audit(pipeline, &document_id).await?;
            emit(json, &audited, |w| report::write_audit(w, &audited))?;
            if !audited.issues.is_empty() {
                anyhow::bail!(
                    "audit found {} issue{} in {}",
                    audited.issues.len(),
                    if audited.issues.len() == 1 { "" } else { "s" },
                    document_id
                );
            }
        }
        Commands::Validate {
            document_id,
            samples,
        } => {
            let checked = validate::validate(pipeline, &document_id, samples).await?;
            emit(json, &checked, |w| report::write_validation(w, &checked))?;
            if checked.source_mismatch.is_some() {
                anyhow::bail!("source file for {} changed since registration", document_id);
            }
            if !checked.passed() {
                anyhow::bail!(
                    "{} of {} sampled pages exceed the variance tolerance",
                    checked.flagged_pages.len(),
                    checked.pages.len()
                );
            }
        }
        Commands::Status => {
            let docs = audit::status(pipeline).await?;
            emit(json, &docs, |w| report::write_status(w, &docs))?;
        }
        Commands::Run { path } => {
            let summary = pipeline::run_file(pipeline, &path)
                .await
                .with_context(|| format!("pipeline run failed for {}", path.display()))?;
            emit(json, &summary, |w| report::write_run(w, &summary))?;
        }
    }
    Ok(())
}

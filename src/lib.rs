//! # pagetrail
//!
//! Local-first ingestion of PDF documents with a traceable lineage from
//! every chunk back to the page and extraction method that produced it.
//!
//! Each registered document moves through four stages, one at a time:
//! probe its structure, parse its pages into blocks, group blocks into
//! token-bounded chunks, and audit the result before it is marked
//! verified. Every stage writes its output and the status transition in a
//! single SQLite transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────┐   ┌─────────┐   ┌──────────┐
//! │ register │──▶│  probe  │──▶│  parse  │──▶│  chunk  │──▶│  audit   │
//! │ sha256   │   │ sample  │   │ blocks  │   │ tokens  │   │ verified │
//! └──────────┘   └─────────┘   └────┬────┘   └─────────┘   └──────────┘
//!                                   │
//!                      ┌────────────┴───────────┐
//!                      ▼                        ▼
//!                ┌───────────┐           ┌─────────────┐
//!                │ PDF text  │           │  tesseract  │
//!                │  layer    │           │ (optional)  │
//!                └───────────┘           └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pagetrail init
//! pagetrail register ./inbox
//! pagetrail run ./inbox/report.pdf
//! pagetrail validate <document-id>
//! pagetrail status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Pipeline error kinds |
//! | [`source`] | Page access and OCR traits |
//! | [`pdf`] | PDF-backed page source |
//! | [`ocr`] | Tesseract OCR engine |
//! | [`store`] | Row mapping and status transitions |
//! | [`registry`] | Document registration and discovery |
//! | [`probe`] | Structure probe |
//! | [`parse`] | Block extraction |
//! | [`chunk`] | Chunking stage |
//! | [`audit`] | SQL audit and verification |
//! | [`validate`] | Source cross-check |
//! | [`report`] | Text report rendering |
//! | [`pipeline`] | Shared context and one-shot runs |

pub mod audit;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod ocr;
pub mod parse;
pub mod pdf;
pub mod pipeline;
pub mod probe;
pub mod registry;
pub mod report;
pub mod source;
pub mod store;
pub mod validate;

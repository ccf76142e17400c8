//! # pagetrail core
//!
//! Pure logic for the pagetrail pipeline: data models and the ingestion
//! status machine, page sampling and complexity scoring, table detection,
//! confidence scoring, adaptive chunking and cross-check measurements.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! side-effecting dependencies; every function is deterministic in its
//! inputs (chunk ids aside).

pub mod chunk;
pub mod confidence;
pub mod models;
pub mod probe;
pub mod table;
pub mod verify;

//! # rmca
//!
//! A Rust decoder for region (`.mca`) files with bounded-concurrency chunk decompression.
//!
//! A region file packs up to 1024 independently compressed chunks behind a fixed
//! sector table. This library parses that table, frames every chunk as a zero-copy view
//! into the file buffer, and decompresses the chunks through a [`Pipeline`] that never
//! runs more than a configured number of jobs at once. One corrupt chunk never takes the
//! rest of the file down with it.
//!
//! ## Features
//!
//! - Read regions from local files, HTTP/HTTPS URLs, or in-memory buffers
//! - Zlib chunk decompression, with explicit failures for unsupported schemes
//! - Lenient (per-slot failures) and strict (first failure aborts) batch policies
//! - Optional pass-through to a structured-value decoder per chunk
//!
//! ## Example
//!
//! ```no_run
//! use rmca::{DecodeOptions, RecordRef};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut region = rmca::parse(std::path::Path::new("r.0.0.mca")).await?;
//!     let report = region.decode_all(&DecodeOptions::default().with_concurrency(8)).await?;
//!     println!("{} chunks, {} failed", report.present, report.failures.len());
//!
//!     if let RecordRef::Present(chunk) = region.record_at(0) {
//!         println!("{:?}", chunk.decompressed_bytes().map(|b| b.len()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod region;

pub use cli::Cli;
pub use error::{AggregateError, DecodeError, FormatError, PipelineError, StructuralError};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt, Source};
pub use pipeline::{BatchReport, JobPanic, Pipeline};
pub use region::{
    CompressionScheme, Container, DEFAULT_MAX_DECOMPRESSED, DecodeOptions, DecodeOutcome,
    DecodeReport, FailurePolicy, Location, Record, RecordRef, SlotFailure, StructuralDecoder, parse,
};

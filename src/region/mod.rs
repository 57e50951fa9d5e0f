//! Region (`.mca`) file decoding.
//!
//! A region file stores up to 1024 chunks of a 32x32 chunk area. Each chunk is
//! compressed on its own and addressed through a fixed header.
//!
//! ## Architecture
//!
//! - [`structures`]: format constants, location entries, compression schemes
//! - [`parser`]: header table parsing
//! - [`chunk`]: a single record and its decode state machine
//! - [`container`]: slot framing and batch decoding through the [`Pipeline`](crate::Pipeline)
//!
//! ## Format Overview
//!
//! | bytes        | content                                            |
//! |--------------|----------------------------------------------------|
//! | `0..4096`    | 1024 locations: 3-byte sector offset, 1-byte count |
//! | `4096..8192` | 1024 big-endian `u32` timestamps                   |
//! | `8192..`     | sector-aligned records                             |
//!
//! A location of `(0, 0)` marks an absent chunk. Sectors are 4096 bytes.
//!
//! ## Limitations
//!
//! - Decode only; nothing is written back
//! - Only zlib-compressed chunks are decompressed

mod chunk;
mod container;
mod parser;
mod structures;

pub use chunk::{DEFAULT_MAX_DECOMPRESSED, DecodeOutcome, Record, StructuralDecoder};
pub use container::{
    Container, DecodeOptions, DecodeReport, FailurePolicy, RecordRef, Slot, SlotFailure,
};
pub use parser::{Header, parse_header};
pub use structures::*;

use crate::error::FormatError;
use crate::io::{Source, resolve};

/// Resolve `source` into a buffer and parse its header.
///
/// Records are framed but not yet decompressed; call
/// [`Container::decode_all`] for that.
pub async fn parse(source: impl Into<Source>) -> Result<Container, FormatError> {
    let buffer = resolve(source.into()).await.map_err(FormatError::Load)?;
    Container::from_bytes(buffer)
}

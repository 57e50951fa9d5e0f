//! Region header parser.
//!
//! The first 8 KiB of a region file hold two fixed tables of 1024 big-endian entries:
//!
//! 1. Location table (`0..4096`): 3-byte sector offset, 1-byte sector count
//! 2. Timestamp table (`4096..8192`): last modification time as a `u32`
//!
//! Everything after that is sector-aligned record data, addressed only through the
//! location table. Parsing the header is a pure function of those 8192 bytes.

use byteorder::{BigEndian, ByteOrder};

use crate::error::FormatError;

use super::structures::*;

/// The two parsed header tables, index-aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub locations: Vec<Location>,
    pub timestamps: Vec<u32>,
}

impl Header {
    /// A header with every slot absent, used for zero-length sources.
    pub fn empty() -> Self {
        Self {
            locations: vec![Location::default(); SLOT_COUNT],
            timestamps: vec![0; SLOT_COUNT],
        }
    }
}

/// Parse both header tables from the start of `data`.
///
/// An empty buffer yields an all-absent header. Any other buffer shorter than
/// [`HEADER_SIZE`] is rejected as truncated.
pub fn parse_header(data: &[u8]) -> Result<Header, FormatError> {
    if data.is_empty() {
        return Ok(Header::empty());
    }
    if data.len() < HEADER_SIZE {
        return Err(FormatError::Truncated {
            len: data.len(),
            required: HEADER_SIZE,
        });
    }

    let locations: Vec<Location> = data[..TIMESTAMP_TABLE_OFFSET]
        .chunks_exact(Location::SIZE)
        .map(|entry| Location::from_entry(BigEndian::read_u32(entry)))
        .collect();

    let timestamps: Vec<u32> = data[TIMESTAMP_TABLE_OFFSET..HEADER_SIZE]
        .chunks_exact(4)
        .map(BigEndian::read_u32)
        .collect();

    let present = locations.iter().filter(|l| !l.is_absent()).count();
    tracing::debug!(present, "Parsed region header");

    Ok(Header {
        locations,
        timestamps,
    })
}

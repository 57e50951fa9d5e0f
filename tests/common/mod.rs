//! In-memory region file fixtures.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::Write;

pub const SECTOR: usize = 4096;

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Deterministic chunk body for a slot, large enough to span a few sectors when `big`.
pub fn body(slot: usize, big: bool) -> Vec<u8> {
    let len = if big { 3 * SECTOR + slot } else { 64 + slot };
    (0..len).map(|i| ((i * 31 + slot * 7) % 256) as u8).collect()
}

/// Builds region buffers sector by sector.
pub struct RegionBuilder {
    data: Vec<u8>,
}

impl RegionBuilder {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; 2 * SECTOR],
        }
    }

    /// Append a framed record and point `slot` at it.
    pub fn record(mut self, slot: usize, scheme: u8, compressed: &[u8], timestamp: u32) -> Self {
        let offset = self.data.len() / SECTOR;
        self.data
            .extend_from_slice(&(compressed.len() as u32 + 1).to_be_bytes());
        self.data.push(scheme);
        self.data.extend_from_slice(compressed);
        let padded = self.data.len().div_ceil(SECTOR) * SECTOR;
        self.data.resize(padded, 0);

        let count = padded / SECTOR - offset;
        self.location(slot, offset as u32, count as u8)
            .timestamp(slot, timestamp)
    }

    /// A zlib record holding `payload`.
    pub fn chunk(self, slot: usize, payload: &[u8]) -> Self {
        self.record(slot, 2, &zlib(payload), 1_700_000_000 + slot as u32)
    }

    /// Write a location entry directly.
    pub fn location(mut self, slot: usize, offset: u32, count: u8) -> Self {
        self.data[slot * 4..slot * 4 + 3].copy_from_slice(&offset.to_be_bytes()[1..]);
        self.data[slot * 4 + 3] = count;
        self
    }

    pub fn timestamp(mut self, slot: usize, timestamp: u32) -> Self {
        let at = SECTOR + slot * 4;
        self.data[at..at + 4].copy_from_slice(&timestamp.to_be_bytes());
        self
    }

    /// Append raw sectors without touching the header.
    pub fn raw_sectors(mut self, sectors: &[u8]) -> Self {
        self.data.extend_from_slice(sectors);
        let padded = self.data.len().div_ceil(SECTOR) * SECTOR;
        self.data.resize(padded, 0);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

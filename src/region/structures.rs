/// Size of one addressing unit in a region file.
pub const SECTOR_SIZE: usize = 4096;

/// Number of slots in the location and timestamp tables.
pub const SLOT_COUNT: usize = 1024;

/// Chunks per side of the 32x32 grid a region covers.
pub const REGION_WIDTH: usize = 32;

/// Byte offset of the timestamp table.
pub const TIMESTAMP_TABLE_OFFSET: usize = SECTOR_SIZE;

/// Both header tables together.
pub const HEADER_SIZE: usize = 2 * SECTOR_SIZE;

/// Length prefix plus compression type byte.
pub const RECORD_PREFIX_SIZE: usize = 5;

/// Chunk compression schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    /// GZip (RFC 1952). Recognized, never written by current producers.
    Gzip,
    /// Zlib (RFC 1950).
    Zlib,
    Unknown(u8),
}

impl CompressionScheme {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CompressionScheme::Gzip,
            2 => CompressionScheme::Zlib,
            _ => CompressionScheme::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CompressionScheme::Gzip => 1,
            CompressionScheme::Zlib => 2,
            CompressionScheme::Unknown(v) => *v,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionScheme::Gzip => "gzip",
            CompressionScheme::Zlib => "zlib",
            CompressionScheme::Unknown(_) => "unknown",
        }
    }
}

/// One entry of the location table - 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// Offset from the start of the file, in sectors. Only the low 24 bits are used.
    pub sector_offset: u32,
    /// Length of the record, in sectors, rounded up.
    pub sector_count: u8,
}

impl Location {
    pub const SIZE: usize = 4;

    /// Split a big-endian table entry into its 24-bit offset and 8-bit count.
    pub fn from_entry(entry: u32) -> Self {
        Self {
            sector_offset: entry >> 8,
            sector_count: (entry & 0xFF) as u8,
        }
    }

    /// `(0, 0)` is the only encoding of an absent record.
    pub fn is_absent(&self) -> bool {
        self.sector_offset == 0 && self.sector_count == 0
    }

    /// Byte range `[start, end)` covered by this entry.
    ///
    /// Computed in `u64` so that a 24-bit offset near its maximum cannot wrap.
    pub fn byte_range(&self) -> (u64, u64) {
        let start = self.sector_offset as u64 * SECTOR_SIZE as u64;
        let end = start + self.sector_count as u64 * SECTOR_SIZE as u64;
        (start, end)
    }
}

/// Chunk-local `(x, z)` coordinates of a slot.
pub fn slot_coords(index: usize) -> (usize, usize) {
    (index % REGION_WIDTH, index / REGION_WIDTH)
}

/// Slot index for chunk-local `(x, z)`. Coordinates outside `0..32` wrap like the format does.
pub fn slot_index(x: i32, z: i32) -> usize {
    let width = REGION_WIDTH as i32;
    (x.rem_euclid(width) + z.rem_euclid(width) * width) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_splits_24_bit_offset() {
        let loc = Location::from_entry(u32::from_be_bytes([0x01, 0x02, 0x03, 0x04]));
        assert_eq!(loc.sector_offset, 0x010203);
        assert_eq!(loc.sector_count, 4);
        assert!(!loc.is_absent());
    }

    #[test]
    fn location_max_values() {
        let loc = Location::from_entry(u32::MAX);
        assert_eq!(loc.sector_offset, 0xFF_FFFF);
        assert_eq!(loc.sector_count, 0xFF);
    }

    #[test]
    fn byte_range_does_not_wrap() {
        let loc = Location {
            sector_offset: 0xFF_FFFF,
            sector_count: 0xFF,
        };
        let (start, end) = loc.byte_range();
        assert_eq!(start, 0xFF_FFFF * 4096);
        assert_eq!(end, start + 0xFF * 4096);
    }

    #[test]
    fn only_zero_zero_is_absent() {
        assert!(Location::default().is_absent());
        let zero_count = Location {
            sector_offset: 2,
            sector_count: 0,
        };
        assert!(!zero_count.is_absent());
    }

    #[test]
    fn coordinates_map_both_ways() {
        assert_eq!(slot_coords(0), (0, 0));
        assert_eq!(slot_coords(33), (1, 1));
        assert_eq!(slot_coords(1023), (31, 31));
        assert_eq!(slot_index(31, 31), 1023);
        assert_eq!(slot_index(-1, 0), 31);
        assert_eq!(slot_index(32, 1), 32);
    }

    #[test]
    fn scheme_codes() {
        assert_eq!(CompressionScheme::from_u8(2), CompressionScheme::Zlib);
        assert_eq!(CompressionScheme::from_u8(1), CompressionScheme::Gzip);
        assert_eq!(CompressionScheme::from_u8(9).as_u8(), 9);
    }
}

//! A single chunk record and its decode state machine.
//!
//! Record layout inside its sectors:
//!
//! | bytes     | content                                   |
//! |-----------|-------------------------------------------|
//! | `0..4`    | length `L` (big-endian), counts from byte 4 |
//! | `4`       | compression scheme                        |
//! | `5..4+L`  | compressed payload                        |
//!
//! Whatever follows `4 + L` up to the sector boundary is padding.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{DecodeError, StructuralError};

use super::structures::{CompressionScheme, RECORD_PREFIX_SIZE, slot_coords};

/// Default ceiling on one record's decompressed size.
///
/// A region record spans at most 255 sectors (about 1 MiB) of compressed input, and zlib
/// can expand that by three orders of magnitude. Real chunk bodies stay far below this.
pub const DEFAULT_MAX_DECOMPRESSED: usize = 64 * 1024 * 1024;

/// Where a record is in its decode lifecycle.
///
/// `Empty`, `Decompressed` and `Failed` are terminal for [`Record::decompress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    NotAttempted,
    Empty,
    Decompressed(Bytes),
    Failed(DecodeError),
}

impl DecodeOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecodeOutcome::NotAttempted)
    }

    pub fn error(&self) -> Option<&DecodeError> {
        match self {
            DecodeOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Turns decompressed chunk bytes into a structured value tree.
///
/// Implemented outside this crate; records only hand bytes over and keep the verdict.
pub trait StructuralDecoder {
    type Tree;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Tree, StructuralError>;
}

/// One present slot of a region file.
#[derive(Debug, Clone)]
pub struct Record {
    index: usize,
    view: Bytes,
    empty: bool,
    length_field: u32,
    compression_type: u8,
    outcome: DecodeOutcome,
    #[cfg(test)]
    panic_on_decode: bool,
}

impl Record {
    /// Wrap a sector-aligned view of the region buffer.
    pub fn new(index: usize, view: Bytes) -> Self {
        let length_field = if view.len() >= 4 {
            BigEndian::read_u32(&view[..4])
        } else {
            0
        };
        let compression_type = view.get(4).copied().unwrap_or(0);

        Self {
            index,
            empty: view.is_empty(),
            view,
            length_field,
            compression_type,
            outcome: DecodeOutcome::NotAttempted,
            #[cfg(test)]
            panic_on_decode: false,
        }
    }

    /// A record whose framing failed before any bytes could be viewed.
    pub fn failed(index: usize, error: DecodeError) -> Self {
        Self {
            index,
            view: Bytes::new(),
            empty: false,
            length_field: 0,
            compression_type: 0,
            outcome: DecodeOutcome::Failed(error),
            #[cfg(test)]
            panic_on_decode: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Chunk-local `(x, z)` inside the region.
    pub fn coords(&self) -> (usize, usize) {
        slot_coords(self.index)
    }

    /// True when the slot's sector range has zero length.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn length_field(&self) -> u32 {
        self.length_field
    }

    pub fn compression_scheme(&self) -> CompressionScheme {
        CompressionScheme::from_u8(self.compression_type)
    }

    /// The record's sectors as stored, padding included.
    pub fn raw_bytes(&self) -> &Bytes {
        &self.view
    }

    pub fn decode_outcome(&self) -> &DecodeOutcome {
        &self.outcome
    }

    /// Decompressed payload, once the outcome is `Decompressed`.
    pub fn decompressed_bytes(&self) -> Option<&Bytes> {
        match &self.outcome {
            DecodeOutcome::Decompressed(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Decompress the payload. Runs at most once; later calls return the cached outcome.
    ///
    /// Output is capped at [`DEFAULT_MAX_DECOMPRESSED`].
    pub fn decompress(&mut self) -> &DecodeOutcome {
        self.decompress_with_limit(DEFAULT_MAX_DECOMPRESSED)
    }

    /// [`decompress`](Self::decompress) with an explicit output ceiling in bytes.
    ///
    /// A stream that inflates past `max_output` fails with
    /// [`DecodeError::OversizedPayload`].
    pub fn decompress_with_limit(&mut self, max_output: usize) -> &DecodeOutcome {
        #[cfg(test)]
        {
            if self.panic_on_decode {
                panic!("injected decode panic in slot {}", self.index);
            }
        }

        if !self.outcome.is_terminal() {
            self.outcome = self.inflate(max_output);
            if let DecodeOutcome::Failed(e) = &self.outcome {
                tracing::trace!(index = self.index, error = %e, "Record decode failed");
            }
        }
        &self.outcome
    }

    fn inflate(&self, max_output: usize) -> DecodeOutcome {
        if self.empty {
            return DecodeOutcome::Empty;
        }

        let available = self.view.len().saturating_sub(4);
        if self.view.len() < RECORD_PREFIX_SIZE
            || self.length_field == 0
            || self.length_field as usize > available
        {
            return DecodeOutcome::Failed(DecodeError::BadLength {
                declared: self.length_field,
                available,
            });
        }

        match self.compression_scheme() {
            CompressionScheme::Zlib => {}
            other => return DecodeOutcome::Failed(DecodeError::UnsupportedScheme(other.as_u8())),
        }

        let payload = &self.view[RECORD_PREFIX_SIZE..4 + self.length_field as usize];
        match inflate_zlib(payload, max_output) {
            Ok(output) => DecodeOutcome::Decompressed(Bytes::from(output)),
            Err(e) => DecodeOutcome::Failed(e),
        }
    }

    /// Force a terminal failure, e.g. when the job driving this record died.
    pub(crate) fn fail(&mut self, error: DecodeError) {
        self.outcome = DecodeOutcome::Failed(error);
    }

    #[cfg(test)]
    pub(crate) fn set_panic_on_decode(&mut self) {
        self.panic_on_decode = true;
    }

    /// Hand the decompressed bytes to `decoder`.
    ///
    /// Decompresses first if that has not happened yet. Empty records yield `Ok(None)`.
    /// A decoder error moves the record to `Failed(Structural(..))`.
    pub fn structural_decode<D: StructuralDecoder>(
        &mut self,
        decoder: &D,
    ) -> Result<Option<D::Tree>, DecodeError> {
        self.decompress();
        let result = match &self.outcome {
            DecodeOutcome::Empty | DecodeOutcome::NotAttempted => return Ok(None),
            DecodeOutcome::Failed(e) => return Err(e.clone()),
            DecodeOutcome::Decompressed(bytes) => decoder.decode(bytes),
        };

        match result {
            Ok(tree) => Ok(Some(tree)),
            Err(e) => {
                let error = DecodeError::Structural(e);
                self.outcome = DecodeOutcome::Failed(error.clone());
                Err(error)
            }
        }
    }
}

/// Inflate a complete zlib stream of at most `max_output` bytes.
///
/// A stream that stops before its final block is corrupt.
fn inflate_zlib(payload: &[u8], max_output: usize) -> Result<Vec<u8>, DecodeError> {
    // One byte of headroom past the ceiling is how an oversized stream is detected.
    let ceiling = max_output.saturating_add(1);
    let mut inflater = Decompress::new(true);
    let mut output = Vec::with_capacity(payload.len().saturating_mul(4).max(64).min(ceiling));

    loop {
        let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
        let status = inflater
            .decompress_vec(
                &payload[in_before as usize..],
                &mut output,
                FlushDecompress::None,
            )
            .map_err(|e| DecodeError::CorruptStream(e.to_string()))?;

        if output.len() > max_output {
            return Err(DecodeError::OversizedPayload { limit: max_output });
        }
        if status == Status::StreamEnd {
            return Ok(output);
        }
        if output.len() == output.capacity() {
            let grow = output.capacity().min(ceiling - output.len());
            output.reserve_exact(grow);
        } else if inflater.total_in() == in_before && inflater.total_out() == out_before {
            return Err(DecodeError::CorruptStream(
                "stream ended before its final block".to_string(),
            ));
        }
    }
}

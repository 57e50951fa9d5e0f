//! Error types for region decoding.
//!
//! Errors are split by how far they reach:
//!
//! - [`FormatError`]: the buffer cannot be a region file at all. Fatal to construction.
//! - [`DecodeError`]: one slot could not be decoded. Recorded on that slot only.
//! - [`AggregateError`]: the outcome of a whole `decode_all` batch.
//! - [`PipelineError`]: the scheduler was misconfigured or lost its admission gate.
//! - [`StructuralError`]: reported by a [`StructuralDecoder`](crate::StructuralDecoder).

use thiserror::Error;

/// Errors raised while building a [`Container`](crate::Container).
#[derive(Debug, Error)]
pub enum FormatError {
    /// The buffer is non-empty but shorter than the two header tables.
    #[error("region buffer truncated: {len} bytes, header needs {required}")]
    Truncated { len: usize, required: usize },

    /// The byte source could not be resolved into a buffer.
    #[error("failed to load region source: {0:#}")]
    Load(anyhow::Error),
}

/// Errors for a single record. Never aborts sibling slots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported compression scheme {0}")]
    UnsupportedScheme(u8),

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),

    /// The sector range points past the end of the file.
    #[error("sector range {start}..{end} exceeds buffer length {len}")]
    OutOfBounds { start: u64, end: u64, len: usize },

    /// The length prefix is zero or overruns the record's sectors.
    #[error("declared length {declared} does not fit in {available} available bytes")]
    BadLength { declared: u32, available: usize },

    /// Inflating the payload would exceed the configured output ceiling.
    #[error("decompressed payload exceeds {limit} bytes")]
    OversizedPayload { limit: usize },

    #[error("structural decode failed: {0}")]
    Structural(#[from] StructuralError),

    #[error("decode job panicked: {0}")]
    JobPanicked(String),
}

/// Error reported by a structured-value decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StructuralError {
    pub message: String,
}

impl StructuralError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,

    /// The admission semaphore was closed while jobs were still queued.
    #[error("pipeline admission closed with jobs still queued")]
    Closed,
}

impl From<tokio::sync::AcquireError> for PipelineError {
    fn from(_: tokio::sync::AcquireError) -> Self {
        PipelineError::Closed
    }
}

/// Batch-level failure from `decode_all`.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Strict policy: the lowest-indexed failing slot.
    #[error("decode aborted at slot {index}: {source}")]
    Aborted {
        index: usize,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// A convenience `Result` alias for fallible construction.
pub type Result<T> = std::result::Result<T, FormatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_names_slot_and_reason() {
        let err = AggregateError::Aborted {
            index: 37,
            source: DecodeError::UnsupportedScheme(1),
        };
        assert_eq!(
            err.to_string(),
            "decode aborted at slot 37: unsupported compression scheme 1"
        );
    }

    #[tokio::test]
    async fn closed_semaphore_maps_to_pipeline_closed() {
        let semaphore = tokio::sync::Semaphore::new(1);
        semaphore.close();
        let err = semaphore.acquire().await.unwrap_err();
        assert_eq!(PipelineError::from(err), PipelineError::Closed);
    }

    #[test]
    fn oversized_payload_names_the_ceiling() {
        let err = DecodeError::OversizedPayload { limit: 1024 };
        assert_eq!(err.to_string(), "decompressed payload exceeds 1024 bytes");
    }

    #[test]
    fn structural_error_converts_into_decode_error() {
        let err: DecodeError = StructuralError::new("bad tag 0x0f").into();
        assert_eq!(err.to_string(), "structural decode failed: bad tag 0x0f");
    }
}

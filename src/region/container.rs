use bytes::Bytes;

use crate::error::{AggregateError, DecodeError, FormatError};
use crate::pipeline::Pipeline;

use super::chunk::{DEFAULT_MAX_DECOMPRESSED, DecodeOutcome, Record, StructuralDecoder};
use super::parser::{Header, parse_header};
use super::structures::{Location, SLOT_COUNT, slot_index};

/// What to do when some slots fail during [`Container::decode_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep every success and report each failure by index.
    #[default]
    Lenient,
    /// Turn the lowest-indexed failure into the batch error.
    Strict,
}

/// Settings for a decode batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Maximum number of records decompressing at once. Must be at least 1.
    pub concurrency: usize,
    pub policy: FailurePolicy,
    /// Ceiling on one record's decompressed size, in bytes.
    pub max_decompressed_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            policy: FailurePolicy::Lenient,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED,
        }
    }
}

impl DecodeOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_decompressed_size(mut self, bytes: usize) -> Self {
        self.max_decompressed_size = bytes;
        self
    }

    pub fn strict(self) -> Self {
        self.with_policy(FailurePolicy::Strict)
    }
}

/// A failed slot and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFailure {
    pub index: usize,
    pub error: DecodeError,
}

/// Summary of a finished decode batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub present: usize,
    pub decompressed: usize,
    pub empty: usize,
    /// In slot order.
    pub failures: Vec<SlotFailure>,
    /// Highest number of decode jobs observed running together.
    pub peak_in_flight: usize,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Contents of one header slot.
#[derive(Debug, Clone)]
pub enum Slot {
    Absent,
    Present(Record),
}

/// Result of looking a slot up by index.
#[derive(Debug, Clone, Copy)]
pub enum RecordRef<'a> {
    Present(&'a Record),
    Absent,
    IndexOutOfRange,
}

impl<'a> RecordRef<'a> {
    pub fn present(self) -> Option<&'a Record> {
        match self {
            RecordRef::Present(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RecordRef::Absent)
    }
}

/// A parsed region file.
///
/// Built once from a buffer; [`decode_all`](Self::decode_all) then drives every present
/// record through decompression. Records keep reference-counted views into the buffer
/// rather than copies.
#[derive(Debug, Clone)]
pub struct Container {
    raw: Bytes,
    header: Header,
    slots: Vec<Slot>,
}

impl Container {
    /// Parse the header tables and frame every present slot.
    ///
    /// Only a non-empty buffer shorter than the header fails. Slots whose sectors run past
    /// the end of the buffer become `Failed(OutOfBounds)` records without reading
    /// out of range.
    pub fn from_bytes(raw: impl Into<Bytes>) -> Result<Self, FormatError> {
        let raw = raw.into();
        let header = parse_header(&raw)?;

        let slots = header
            .locations
            .iter()
            .enumerate()
            .map(|(index, location)| frame_slot(&raw, index, location))
            .collect();

        Ok(Self { raw, header, slots })
    }

    /// Number of slots in the table. Always 1024.
    pub fn chunk_count(&self) -> usize {
        SLOT_COUNT
    }

    /// Number of slots that are not absent.
    pub fn present_count(&self) -> usize {
        self.present_slots().count()
    }

    pub fn record_at(&self, index: usize) -> RecordRef<'_> {
        match self.slots.get(index) {
            Some(Slot::Present(record)) => RecordRef::Present(record),
            Some(Slot::Absent) => RecordRef::Absent,
            None => RecordRef::IndexOutOfRange,
        }
    }

    /// Look a record up by chunk-local coordinates.
    pub fn record_at_coords(&self, x: i32, z: i32) -> RecordRef<'_> {
        self.record_at(Self::index_of(x, z))
    }

    pub fn index_of(x: i32, z: i32) -> usize {
        slot_index(x, z)
    }

    pub fn location(&self, index: usize) -> Option<Location> {
        self.header.locations.get(index).copied()
    }

    pub fn timestamp(&self, index: usize) -> Option<u32> {
        self.header.timestamps.get(index).copied()
    }

    pub fn locations(&self) -> &[Location] {
        &self.header.locations
    }

    pub fn timestamps(&self) -> &[u32] {
        &self.header.timestamps
    }

    /// Present records in slot order.
    pub fn present_slots(&self) -> impl Iterator<Item = &Record> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Present(record) => Some(record),
            Slot::Absent => None,
        })
    }

    /// The whole file buffer.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Decompress every present record through a bounded pipeline.
    ///
    /// Suspends until all jobs have finished. Records that already reached a terminal
    /// state are not resubmitted, so calling this twice only re-reports.
    pub async fn decode_all(
        &mut self,
        options: &DecodeOptions,
    ) -> Result<DecodeReport, AggregateError> {
        let mut pipeline = Pipeline::new(options.concurrency)?;
        let max_output = options.max_decompressed_size;
        let mut submitted = Vec::new();

        for slot in &self.slots {
            let Slot::Present(record) = slot else {
                continue;
            };
            if record.decode_outcome().is_terminal() {
                continue;
            }

            let index = record.index();
            let mut record = record.clone();
            pipeline.submit(async move {
                let inflated = tokio::task::spawn_blocking(move || {
                    record.decompress_with_limit(max_output);
                    record
                })
                .await;
                match inflated {
                    Ok(record) => Ok(record),
                    // Surface the panic at the job boundary so it keeps its message.
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(e) => Err(DecodeError::JobPanicked(e.to_string())),
                }
            });
            submitted.push(index);
        }

        let batch = pipeline
            .run_with(|batch| {
                tracing::debug!(
                    jobs = batch.len(),
                    peak_in_flight = batch.peak_in_flight(),
                    "Decode batch drained"
                );
            })
            .await?;
        let peak_in_flight = batch.peak_in_flight();

        for (index, result) in submitted.into_iter().zip(batch.into_results()) {
            let Slot::Present(record) = &mut self.slots[index] else {
                continue;
            };
            match result {
                Ok(Ok(decoded)) => *record = decoded,
                Ok(Err(error)) => record.fail(error),
                Err(panic) => record.fail(DecodeError::JobPanicked(panic.0)),
            }
        }

        let report = self.report(peak_in_flight);

        for failure in &report.failures {
            tracing::warn!(index = failure.index, error = %failure.error, "Chunk failed to decode");
        }
        tracing::info!(
            present = report.present,
            decompressed = report.decompressed,
            empty = report.empty,
            failed = report.failures.len(),
            "Region decode complete"
        );

        match (options.policy, report.failures.first()) {
            (FailurePolicy::Strict, Some(first)) => Err(AggregateError::Aborted {
                index: first.index,
                source: first.error.clone(),
            }),
            _ => Ok(report),
        }
    }

    /// Decompress the single record at `index` in place, leaving every other slot untouched.
    pub fn decode_record(&mut self, index: usize, max_output: usize) -> RecordRef<'_> {
        match self.slots.get_mut(index) {
            Some(Slot::Present(record)) => {
                record.decompress_with_limit(max_output);
                RecordRef::Present(record)
            }
            Some(Slot::Absent) => RecordRef::Absent,
            None => RecordRef::IndexOutOfRange,
        }
    }

    /// Run `decoder` over every present record, decompressing first where needed.
    ///
    /// Returns one entry per non-empty present record in slot order. Decoder failures
    /// mark the record `Failed` and never stop the pass.
    pub fn decode_structures<D: StructuralDecoder>(
        &mut self,
        decoder: &D,
    ) -> Vec<(usize, Result<D::Tree, DecodeError>)> {
        let mut trees = Vec::new();
        for slot in &mut self.slots {
            let Slot::Present(record) = slot else {
                continue;
            };
            match record.structural_decode(decoder) {
                Ok(Some(tree)) => trees.push((record.index(), Ok(tree))),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(index = record.index(), error = %e, "Structural decode failed");
                    trees.push((record.index(), Err(e)));
                }
            }
        }
        trees
    }

    #[cfg(test)]
    fn poison_slot(&mut self, index: usize) {
        if let Some(Slot::Present(record)) = self.slots.get_mut(index) {
            record.set_panic_on_decode();
        }
    }

    fn report(&self, peak_in_flight: usize) -> DecodeReport {
        let mut report = DecodeReport {
            peak_in_flight,
            ..DecodeReport::default()
        };
        for record in self.present_slots() {
            report.present += 1;
            match record.decode_outcome() {
                DecodeOutcome::Decompressed(_) => report.decompressed += 1,
                DecodeOutcome::Empty => report.empty += 1,
                DecodeOutcome::Failed(error) => report.failures.push(SlotFailure {
                    index: record.index(),
                    error: error.clone(),
                }),
                DecodeOutcome::NotAttempted => {}
            }
        }
        report
    }
}

fn frame_slot(raw: &Bytes, index: usize, location: &Location) -> Slot {
    if location.is_absent() {
        return Slot::Absent;
    }

    let (start, end) = location.byte_range();
    if end > raw.len() as u64 {
        tracing::debug!(
            index,
            sector_offset = location.sector_offset,
            sector_count = location.sector_count,
            "Chunk sectors exceed buffer"
        );
        return Slot::Present(Record::failed(
            index,
            DecodeError::OutOfBounds {
                start,
                end,
                len: raw.len(),
            },
        ));
    }

    Slot::Present(Record::new(index, raw.slice(start as usize..end as usize)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::structures::{HEADER_SIZE, SECTOR_SIZE};
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    /// One sector holding a zlib record of `payload`.
    fn zlib_sector(payload: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut sector = (compressed.len() as u32 + 1).to_be_bytes().to_vec();
        sector.push(2);
        sector.extend_from_slice(&compressed);
        sector.resize(SECTOR_SIZE, 0);
        sector
    }

    fn three_record_region() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        let payloads: [&[u8]; 3] = [b"first", b"second", b"third"];
        for (slot, payload) in payloads.into_iter().enumerate() {
            data = with_location(data, slot, 2 + slot as u32, 1);
            data.extend_from_slice(&zlib_sector(payload));
        }
        data
    }

    fn with_location(mut data: Vec<u8>, slot: usize, offset: u32, count: u8) -> Vec<u8> {
        data[slot * 4..slot * 4 + 3].copy_from_slice(&offset.to_be_bytes()[1..]);
        data[slot * 4 + 3] = count;
        data
    }

    #[test]
    fn empty_buffer_has_no_present_slots() {
        let container = Container::from_bytes(Vec::new()).unwrap();
        assert_eq!(container.chunk_count(), 1024);
        assert_eq!(container.present_count(), 0);
        assert_eq!(container.locations().len(), 1024);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(matches!(
            Container::from_bytes(vec![0u8; 100]),
            Err(FormatError::Truncated { len: 100, .. })
        ));
    }

    #[test]
    fn out_of_range_index_is_reported() {
        let container = Container::from_bytes(vec![0u8; HEADER_SIZE]).unwrap();
        assert!(matches!(container.record_at(1024), RecordRef::IndexOutOfRange));
        assert!(container.record_at(0).is_absent());
        assert_eq!(container.location(5000), None);
        assert_eq!(container.timestamp(5000), None);
    }

    #[test]
    fn record_views_share_the_buffer() {
        let data = with_location(vec![0u8; HEADER_SIZE + SECTOR_SIZE], 7, 2, 1);
        let container = Container::from_bytes(data).unwrap();
        let record = container.record_at(7).present().unwrap();
        let view = record.raw_bytes();
        assert_eq!(view.len(), SECTOR_SIZE);
        assert_eq!(view.as_ptr(), container.raw()[HEADER_SIZE..].as_ptr());
    }

    #[test]
    fn sectors_past_eof_fail_at_framing() {
        let data = with_location(vec![0u8; HEADER_SIZE + SECTOR_SIZE], 3, 2, 2);
        let container = Container::from_bytes(data).unwrap();
        let record = container.record_at(3).present().unwrap();
        assert_eq!(
            record.decode_outcome().error(),
            Some(&DecodeError::OutOfBounds {
                start: 8192,
                end: 16384,
                len: 12288
            })
        );
        assert!(!record.is_empty());
    }

    #[test]
    fn zero_sector_count_is_an_empty_record() {
        let data = with_location(vec![0u8; HEADER_SIZE], 12, 2, 0);
        let container = Container::from_bytes(data).unwrap();
        assert!(container.record_at(12).present().unwrap().is_empty());
    }

    #[test]
    fn coordinates_resolve_to_slots() {
        let data = with_location(vec![0u8; HEADER_SIZE + SECTOR_SIZE], 33, 2, 1);
        let container = Container::from_bytes(data).unwrap();
        assert_eq!(Container::index_of(1, 1), 33);
        let record = container.record_at_coords(1, 1).present().unwrap();
        assert_eq!(record.coords(), (1, 1));
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let mut container = Container::from_bytes(vec![0u8; HEADER_SIZE]).unwrap();
        let options = DecodeOptions::default().with_concurrency(0);
        assert!(matches!(
            container.decode_all(&options).await,
            Err(AggregateError::Pipeline(_))
        ));
    }

    #[test]
    fn default_options_are_lenient() {
        let options = DecodeOptions::default();
        assert!(options.concurrency >= 1);
        assert_eq!(options.policy, FailurePolicy::Lenient);
        assert_eq!(options.max_decompressed_size, DEFAULT_MAX_DECOMPRESSED);
        assert_eq!(options.strict().policy, FailurePolicy::Strict);
    }

    #[tokio::test]
    async fn panicking_decode_job_fails_only_its_slot() {
        let mut container = Container::from_bytes(three_record_region()).unwrap();
        container.poison_slot(1);

        let report = container
            .decode_all(&DecodeOptions::default().with_concurrency(2))
            .await
            .unwrap();

        assert_eq!(report.present, 3);
        assert_eq!(report.decompressed, 2);
        assert_eq!(
            report.failures,
            vec![SlotFailure {
                index: 1,
                error: DecodeError::JobPanicked("injected decode panic in slot 1".to_string()),
            }]
        );
        let bytes = |i| container.record_at(i).present().unwrap().decompressed_bytes().cloned();
        assert_eq!(bytes(0).as_deref(), Some(&b"first"[..]));
        assert_eq!(bytes(2).as_deref(), Some(&b"third"[..]));
        assert!(bytes(1).is_none());
    }

    #[tokio::test]
    async fn panicking_decode_job_aborts_strict_batch() {
        let mut container = Container::from_bytes(three_record_region()).unwrap();
        container.poison_slot(2);

        let err = container
            .decode_all(&DecodeOptions::default().strict())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AggregateError::Aborted {
                index: 2,
                source: DecodeError::JobPanicked(_)
            }
        ));
        assert!(container.record_at(0).present().unwrap().decompressed_bytes().is_some());
    }

    #[test]
    fn decode_record_touches_only_that_slot() {
        let mut container = Container::from_bytes(three_record_region()).unwrap();

        let record = container.decode_record(1, DEFAULT_MAX_DECOMPRESSED).present().unwrap();
        assert_eq!(record.decompressed_bytes().map(|b| b.as_ref()), Some(&b"second"[..]));

        for other in [0, 2] {
            assert_eq!(
                container.record_at(other).present().unwrap().decode_outcome(),
                &DecodeOutcome::NotAttempted
            );
        }
        assert!(container.decode_record(500, DEFAULT_MAX_DECOMPRESSED).is_absent());
        assert!(matches!(
            container.decode_record(1024, DEFAULT_MAX_DECOMPRESSED),
            RecordRef::IndexOutOfRange
        ));
    }

    #[tokio::test]
    async fn decode_ceiling_flows_from_options() {
        let mut data = vec![0u8; HEADER_SIZE];
        data = with_location(data, 4, 2, 1);
        data.extend_from_slice(&zlib_sector(&[0u8; 20_000]));
        let mut container = Container::from_bytes(data).unwrap();

        let report = container
            .decode_all(&DecodeOptions::default().with_max_decompressed_size(10_000))
            .await
            .unwrap();
        assert_eq!(
            report.failures,
            vec![SlotFailure {
                index: 4,
                error: DecodeError::OversizedPayload { limit: 10_000 },
            }]
        );
    }
}

//! Byte sources for region files.
//!
//! A region is always decoded from a complete in-memory buffer. This module turns a
//! [`Source`] (local path, http(s) URL, or a buffer the caller already holds) into that
//! buffer through the [`ReadAt`] random-access readers.
//!
//! Local files are read whole. Remote files are read sparsely with [`read_region`]: the
//! header first, then only the sectors its location table points at.

mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::region::{HEADER_SIZE, Location, parse_header};

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer, returning how many bytes were read
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Where a region file comes from.
#[derive(Debug, Clone)]
pub enum Source {
    Path(PathBuf),
    Url(String),
    Buffer(Bytes),
}

impl Source {
    /// Interpret a command-line argument as a URL or a path.
    pub fn from_arg(arg: &str) -> Self {
        if is_http_url(arg) {
            Source::Url(arg.to_string())
        } else {
            Source::Path(PathBuf::from(arg))
        }
    }
}

impl From<Bytes> for Source {
    fn from(buffer: Bytes) -> Self {
        Source::Buffer(buffer)
    }
}

impl From<Vec<u8>> for Source {
    fn from(buffer: Vec<u8>) -> Self {
        Source::Buffer(Bytes::from(buffer))
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

pub fn is_http_url(arg: &str) -> bool {
    arg.starts_with("http://") || arg.starts_with("https://")
}

/// Resolve a source into a complete buffer.
///
/// A missing local file resolves to an empty buffer: a region that was never written
/// holds no chunks. Every other I/O failure is an error.
pub async fn resolve(source: Source) -> Result<Bytes> {
    match source {
        Source::Buffer(buffer) => Ok(buffer),
        Source::Path(path) => match LocalFileReader::new(&path) {
            Ok(reader) => read_all(&reader).await,
            Err(e) if is_not_found(&e) => {
                tracing::warn!(path = %path.display(), "Region file not found, treating as empty");
                Ok(Bytes::new())
            }
            Err(e) => Err(e),
        },
        Source::Url(url) => {
            let reader = HttpRangeReader::new(url).await?;
            let data = read_region(&reader).await?;
            tracing::debug!(
                bytes = reader.transferred_bytes(),
                requests = reader.request_count(),
                size = data.len(),
                "Fetched remote region"
            );
            Ok(data)
        }
    }
}

/// Read a whole source into memory.
pub async fn read_all<R: ReadAt + ?Sized>(reader: &R) -> Result<Bytes> {
    let size = usize::try_from(reader.size())?;
    let mut buf = vec![0u8; size];
    read_exact_at(reader, 0, &mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Read a region into a buffer of its full size, fetching only what decoding needs.
///
/// The header comes first. After that only the sectors of present slots that lie inside
/// the source are read, with adjacent ranges merged into one read. Bytes no slot points
/// at stay zero. A source shorter than the header is returned as-is so that parsing can
/// reject it.
pub async fn read_region<R: ReadAt + ?Sized>(reader: &R) -> Result<Bytes> {
    let size = usize::try_from(reader.size())?;
    let mut buf = vec![0u8; size];

    let header_len = size.min(HEADER_SIZE);
    read_exact_at(reader, 0, &mut buf[..header_len]).await?;
    if header_len < HEADER_SIZE {
        return Ok(Bytes::from(buf));
    }

    let header = parse_header(&buf[..HEADER_SIZE])?;
    let spans = sector_spans(&header.locations, size as u64);
    tracing::debug!(spans = spans.len(), "Reading referenced sectors");

    for (start, end) in spans {
        read_exact_at(reader, start, &mut buf[start as usize..end as usize]).await?;
    }

    Ok(Bytes::from(buf))
}

/// Merged byte ranges of every present slot that fits in `len`, header excluded.
fn sector_spans(locations: &[Location], len: u64) -> Vec<(u64, u64)> {
    let mut ranges: Vec<(u64, u64)> = locations
        .iter()
        .filter(|l| !l.is_absent())
        .map(Location::byte_range)
        .filter(|&(_, end)| end <= len)
        .map(|(start, end)| (start.max(HEADER_SIZE as u64), end))
        .filter(|&(start, end)| start < end)
        .collect();
    ranges.sort_unstable();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

async fn read_exact_at<R: ReadAt + ?Sized>(reader: &R, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read_at(offset + filled as u64, &mut buf[filled..])
            .await?;
        if n == 0 {
            bail!(
                "Source ended at byte {} while reading {} bytes from {}",
                offset + filled as u64,
                buf.len(),
                offset
            );
        }
        filled += n;
    }
    Ok(())
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

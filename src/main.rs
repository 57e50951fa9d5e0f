//! Main entry point for the rmca CLI application.
//!
//! This binary decodes region files from the local filesystem or remote HTTP URLs
//! and reports on, lists, or extracts their chunks.

use anyhow::{Result, bail};
use chrono::DateTime;
use clap::Parser;
use tokio::io::AsyncWriteExt;

use rmca::{Cli, Container, DecodeOutcome, Record, RecordRef, Source};

/// Application entry point.
///
/// Parses command-line arguments, sets up logging, then either pipes a single chunk
/// or decodes every chunk and reports.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut region = rmca::parse(Source::from_arg(&cli.file)).await?;
    let options = cli.decode_options();

    // Pipe mode: decode just the requested chunk, write it to stdout and exit
    if let Some(index) = cli.pipe {
        return pipe_chunk(&mut region, index, options.max_decompressed_size).await;
    }

    let report = region.decode_all(&options).await?;

    if cli.list || cli.verbose {
        list_chunks(&region, cli.verbose);
    }

    if !cli.is_quiet() {
        println!(
            "{}: {} chunks present, {} decoded, {} empty, {} failed",
            cli.file,
            report.present,
            report.decompressed,
            report.empty,
            report.failures.len()
        );
        for failure in &report.failures {
            println!("  slot {:>4}: {}", failure.index, failure.error);
        }
    }

    Ok(())
}

/// Write the decompressed bytes of the chunk at `index` to stdout.
async fn pipe_chunk(region: &mut Container, index: usize, max_output: usize) -> Result<()> {
    let chunk_count = region.chunk_count();
    let record = match region.decode_record(index, max_output) {
        RecordRef::Present(record) => record,
        RecordRef::Absent => bail!("Chunk {} is not present in this region", index),
        RecordRef::IndexOutOfRange => bail!(
            "Chunk index {} out of range (0..{})",
            index,
            chunk_count
        ),
    };

    match record.decode_outcome() {
        DecodeOutcome::Decompressed(bytes) => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(bytes).await?;
            stdout.flush().await?;
            Ok(())
        }
        DecodeOutcome::Empty => Ok(()),
        DecodeOutcome::Failed(e) => bail!("Chunk {} failed to decode: {}", index, e),
        DecodeOutcome::NotAttempted => bail!("Chunk {} was never decoded", index),
    }
}

/// List present chunks.
///
/// Supports two output formats:
/// - Simple format (`-l`): slot index and coordinates, one per line
/// - Verbose format (`-v`): table with sectors, timestamp, sizes and outcome
fn list_chunks(region: &Container, verbose: bool) {
    if verbose {
        println!(
            "{:>5}  {:>7}  {:>8}  {:>5}  {:>19}  {:>8}  {:>8}  {:>6}  Status",
            "Slot", "X,Z", "Sector", "Count", "Modified (UTC)", "Length", "Size", "Scheme"
        );
        println!("{}", "-".repeat(96));
    }

    let mut total_compressed = 0u64;
    let mut total_decompressed = 0u64;

    for record in region.present_slots() {
        let index = record.index();
        let (x, z) = record.coords();

        if !verbose {
            println!("{:>4}  ({},{})", index, x, z);
            continue;
        }

        let location = region.location(index).unwrap_or_default();
        let timestamp = region.timestamp(index).unwrap_or(0);
        let size = record.decompressed_bytes().map(|b| b.len()).unwrap_or(0);

        println!(
            "{:>5}  {:>7}  {:>8}  {:>5}  {:>19}  {:>8}  {:>8}  {:>6}  {}",
            index,
            format!("{},{}", x, z),
            location.sector_offset,
            location.sector_count,
            format_timestamp(timestamp),
            record.length_field(),
            size,
            record.compression_scheme().name(),
            status(record)
        );

        total_compressed += record.length_field() as u64;
        total_decompressed += size as u64;
    }

    if verbose {
        println!("{}", "-".repeat(96));
        println!(
            "{:>5}  {:>54}  {:>8}  {:>8}",
            region.present_count(),
            "",
            total_compressed,
            total_decompressed
        );
    }
}

fn status(record: &Record) -> String {
    match record.decode_outcome() {
        DecodeOutcome::NotAttempted => "pending".to_string(),
        DecodeOutcome::Empty => "empty".to_string(),
        DecodeOutcome::Decompressed(_) => "ok".to_string(),
        DecodeOutcome::Failed(e) => format!("FAILED: {}", e),
    }
}

/// Render a region timestamp (Unix seconds) as UTC.
fn format_timestamp(secs: u32) -> String {
    DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

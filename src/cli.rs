use std::num::NonZeroUsize;

use clap::Parser;

use crate::region::{DecodeOptions, FailurePolicy};

#[derive(Parser, Debug)]
#[command(name = "rmca")]
#[command(version)]
#[command(about = "Decode region (.mca) files, locally or over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  rmca r.0.0.mca                 decode all chunks and print a summary\n  \
  rmca -v -j 8 r.0.0.mca         decode with 8 jobs and list every chunk\n  \
  rmca -p 33 r.0.0.mca > c.nbt   write chunk 33's decompressed bytes to c.nbt\n  \
  rmca -l https://example.com/r.-1.2.mca   list chunks of a remote region")]
pub struct Cli {
    /// Region file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// List present chunks (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely and log progress
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write one chunk's decompressed bytes to stdout
    #[arg(short = 'p', value_name = "INDEX")]
    pub pipe: Option<usize>,

    /// Maximum chunks decompressing at once (default: available cores)
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<NonZeroUsize>,

    /// Abort on the first chunk that fails to decode
    #[arg(long)]
    pub strict: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe.is_some()
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Decode settings derived from the flags.
    pub fn decode_options(&self) -> DecodeOptions {
        let mut options = DecodeOptions::default();
        if let Some(jobs) = self.jobs {
            options = options.with_concurrency(jobs.get());
        }
        if self.strict {
            options = options.with_policy(FailurePolicy::Strict);
        }
        options
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.is_very_quiet() {
            "off"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_options() {
        let cli = Cli::parse_from(["rmca", "-j", "3", "--strict", "r.0.0.mca"]);
        let options = cli.decode_options();
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.policy, FailurePolicy::Strict);
    }

    #[test]
    fn zero_jobs_is_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["rmca", "-j", "0", "r.0.0.mca"]).is_err());
        assert!(Cli::try_parse_from(["rmca", "--jobs", "1", "r.0.0.mca"]).is_ok());
    }

    #[test]
    fn pipe_implies_quiet() {
        let cli = Cli::parse_from(["rmca", "-p", "33", "r.0.0.mca"]);
        assert_eq!(cli.pipe, Some(33));
        assert!(cli.is_quiet());
        assert_eq!(cli.decode_options().policy, FailurePolicy::Lenient);
    }

    #[test]
    fn log_level_follows_verbosity() {
        assert_eq!(Cli::parse_from(["rmca", "x"]).log_level(), "warn");
        assert_eq!(Cli::parse_from(["rmca", "-v", "x"]).log_level(), "info");
        assert_eq!(Cli::parse_from(["rmca", "-qq", "x"]).log_level(), "off");
    }
}

//! CLI module for bitdex
//!
//! Provides command-line interface for:
//! - codec: Compression statistics of random leaves
//! - bench: Build a random index and time queries

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{bench, codec_stats, log_threshold, run, run_command, BenchReport, CodecReport, QueryReport};
pub use errors::{CliError, CliResult};
pub use io::{write_error, write_response};

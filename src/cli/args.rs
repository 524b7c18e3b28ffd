//! CLI argument definitions using clap
//!
//! Commands:
//! - bitdex codec --density <p> --seed <n>
//! - bitdex bench --ids <n> --keys <k> --seed <n> [--parallel]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// bitdex - hierarchical bitmap indexes with compressed leaf segments
#[derive(Parser, Debug)]
#[command(name = "bitdex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log engine events down to TRACE instead of WARN
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compress random leaves and report size statistics
    Codec {
        /// Probability of each bit being set
        #[arg(long, default_value_t = 0.01)]
        density: f64,

        /// Seed of the random generator
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Number of leaves to generate
        #[arg(long, default_value_t = 1000)]
        leaves: usize,
    },

    /// Build an index with random assignments and time AND/OR/NOT queries
    Bench {
        /// Number of entity ids
        #[arg(long, default_value_t = 1_000_000)]
        ids: u64,

        /// Distinct keys per field
        #[arg(long, default_value_t = 16)]
        keys: u32,

        /// Seed of the random generator
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Also run every query on the worker pool
        #[arg(long)]
        parallel: bool,

        /// Index configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

//! CLI command implementations
//!
//! Commands build their report first and print it last, so tests can check
//! reports without capturing stdout. Both commands verify their own output
//! against a plain model and fail with a verification error on mismatch.

use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::algebra::ResultNode;
use crate::bitmap::codec;
use crate::bitmap::{LeafWords, LEAF_BYTES, LEAF_WORDS, WORD_BITS};
use crate::index::{IndexConfig, IndexKey, IndexManager, IndexStats};
use crate::observability::{Logger, Severity};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Result of `bitdex codec`
#[derive(Debug, Clone, Serialize)]
pub struct CodecReport {
    pub leaves: usize,
    pub density: f64,
    pub seed: u64,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub ratio: f64,
    pub trivial_leaves: u64,
    pub min_stream: usize,
    pub max_stream: usize,
}

/// Timing of one query
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub name: &'static str,
    pub count: u64,
    pub micros: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_micros: Option<u64>,
}

/// Result of `bitdex bench`
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub ids: u64,
    pub keys: u32,
    pub seed: u64,
    pub build_micros: u64,
    pub flush_segments: usize,
    pub queries: Vec<QueryReport>,
    pub stats: IndexStats,
}

/// Log threshold of the binary. Info lines share stdout with the JSON
/// response, so only `--verbose` lets them through.
pub fn log_threshold(verbose: bool) -> Severity {
    if verbose {
        Severity::Trace
    } else {
        Severity::Warn
    }
}

/// Parse arguments and run the command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    Logger::set_min_severity(log_threshold(cli.verbose));
    Logger::trace("CLI_VERBOSE", &[("min_severity", Logger::min_severity().as_str())]);
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Codec { density, seed, leaves } => write_response(&codec_stats(density, seed, leaves)?),
        Command::Bench {
            ids,
            keys,
            seed,
            parallel,
            config,
        } => write_response(&bench(ids, keys, seed, parallel, config.as_deref())?),
    }
}

fn random_leaf(rng: &mut StdRng, density: f64) -> LeafWords {
    let mut words = [0u64; LEAF_WORDS];
    for word in words.iter_mut() {
        for bit in 0..WORD_BITS {
            if rng.gen_bool(density) {
                *word |= 1 << bit;
            }
        }
    }
    words
}

/// Compress random leaves and check every stream decodes back
pub fn codec_stats(density: f64, seed: u64, leaves: usize) -> CliResult<CodecReport> {
    if !(0.0..=1.0).contains(&density) {
        return Err(CliError::InvalidArgument(format!(
            "density must be within [0, 1], got {}",
            density
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = CodecReport {
        leaves,
        density,
        seed,
        raw_bytes: (leaves * LEAF_BYTES) as u64,
        compressed_bytes: 0,
        ratio: 0.0,
        trivial_leaves: 0,
        min_stream: if leaves == 0 { 0 } else { usize::MAX },
        max_stream: 0,
    };

    for i in 0..leaves {
        let words = random_leaf(&mut rng, density);
        let stream = codec::compress(&words);
        if codec::decompress(&stream)? != words {
            return Err(CliError::Verification(format!("leaf {} does not round-trip", i)));
        }
        if codec::trivial_kind(&stream).is_some() {
            report.trivial_leaves += 1;
        }
        report.compressed_bytes += stream.len() as u64;
        report.min_stream = report.min_stream.min(stream.len());
        report.max_stream = report.max_stream.max(stream.len());
    }

    if report.compressed_bytes > 0 {
        report.ratio = report.raw_bytes as f64 / report.compressed_bytes as f64;
    }
    Ok(report)
}

struct Query {
    name: &'static str,
    node: ResultNode,
    expected: u64,
}

fn micros(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}

/// Build an index with two randomly assigned fields, then time queries
pub fn bench(ids: u64, keys: u32, seed: u64, parallel: bool, config: Option<&Path>) -> CliResult<BenchReport> {
    if keys == 0 {
        return Err(CliError::InvalidArgument("keys must be positive".into()));
    }
    let config = match config {
        Some(path) => IndexConfig::from_file(path)?,
        None => IndexConfig::default(),
    };
    if ids > config.id_ceiling {
        return Err(CliError::InvalidArgument(format!(
            "ids {} exceed id_ceiling {}",
            ids, config.id_ceiling
        )));
    }

    let manager = IndexManager::new(config)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let key = |k: u32| IndexKey::from_int(k as i64);

    let started = Instant::now();
    let mut assignments: Vec<Vec<u32>> = Vec::new();
    for field in ["a", "b"] {
        manager.define_index(field);
        let assigned: Vec<u32> = (0..ids).map(|_| rng.gen_range(0..keys)).collect();
        let mut groups: Vec<Vec<u64>> = vec![Vec::new(); keys as usize];
        for (id, &k) in assigned.iter().enumerate() {
            groups[k as usize].push(id as u64);
        }
        for (k, group) in groups.into_iter().enumerate() {
            manager.insert_all(field, key(k as u32), group)?;
        }
        assignments.push(assigned);
    }
    let flush_segments = manager.flush();
    let build_micros = micros(started);

    let expected = |pred: &dyn Fn(u32, u32) -> bool| -> u64 {
        assignments[0]
            .iter()
            .zip(&assignments[1])
            .filter(|&(&a, &b)| pred(a, b))
            .count() as u64
    };

    let view = manager.read();
    let a0 = view.key("a", key(0))?;
    let a1 = view.key("a", key(1))?;
    let b0 = view.key("b", key(0))?;
    let b1 = view.key("b", key(1))?;
    let queries = vec![
        Query {
            name: "and",
            node: a0.clone() & b1,
            expected: expected(&|a, b| a == 0 && b == 1),
        },
        Query {
            name: "or",
            node: view.any_of("a", [key(0), key(1)])?,
            expected: expected(&|a, _| a <= 1),
        },
        Query {
            name: "not",
            node: !a0.clone(),
            expected: expected(&|a, _| a != 0),
        },
        Query {
            name: "nested",
            node: (a0 | a1) & !b0,
            expected: expected(&|a, b| a <= 1 && b != 0),
        },
    ];

    let mut reports = Vec::with_capacity(queries.len());
    for query in queries {
        let started = Instant::now();
        let count = view.count(&query.node);
        let elapsed = micros(started);
        if count != query.expected {
            return Err(CliError::Verification(format!(
                "query '{}' matched {} ids, expected {}",
                query.name, count, query.expected
            )));
        }

        let parallel_micros = if parallel {
            let started = Instant::now();
            let par_count = view.par_ids(&query.node).count_remaining();
            let elapsed = micros(started);
            if par_count != count {
                return Err(CliError::Verification(format!(
                    "parallel query '{}' matched {} ids, sequential {}",
                    query.name, par_count, count
                )));
            }
            Some(elapsed)
        } else {
            None
        };

        reports.push(QueryReport {
            name: query.name,
            count,
            micros: elapsed,
            parallel_micros,
        });
    }
    view.release();

    Ok(BenchReport {
        ids,
        keys,
        seed,
        build_micros,
        flush_segments,
        queries: reports,
        stats: manager.stats(),
    })
}

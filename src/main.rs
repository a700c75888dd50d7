//! Coverage-guided schedule fuzzer for a Raft-based replicated state
//! machine: generates and mutates interleavings, replays them against a
//! freshly provisioned cluster of target subprocesses behind an
//! interception network, and scores each trace against a model-checker
//! oracle to decide which schedules are worth mutating further.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use modelfuzz_raft::config::FuzzerConfig;
use modelfuzz_raft::driver;
use modelfuzz_raft::error::Result;

/// Runs one fuzzing experiment against a configured target.
#[derive(Parser, Debug)]
#[command(name = "modelfuzz-raft", author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file; CLI flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the target server/client binary.
    #[arg(long)]
    target_path: Option<PathBuf>,

    /// Parallel cluster runs per batch.
    #[arg(long)]
    workers: Option<usize>,

    /// Total iterations per fuzzing strategy.
    #[arg(long)]
    iterations: Option<usize>,

    /// RNG seed; omit to seed from entropy.
    #[arg(long)]
    seed: Option<u64>,

    /// Directory stats and error reports are written under.
    #[arg(long)]
    result_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(self, mut config: FuzzerConfig) -> FuzzerConfig {
        if let Some(target_path) = self.target_path {
            config.target_path = target_path;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(result_dir) = self.result_dir {
            config.errors_dir = result_dir.join("errors");
            config.result_dir = result_dir;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let base = match &cli.config {
        Some(path) => FuzzerConfig::load(path)?,
        None => FuzzerConfig::default(),
    };
    let config = cli.apply(base);
    config.validate()?;

    let stats = driver::run_experiment(&config).await;
    for (experiment, strategy_stats) in &stats {
        for (fuzzer, stat) in strategy_stats {
            tracing::info!(
                experiment,
                fuzzer,
                bugs = stat.bugs.len(),
                coverage = stat.coverage.last().copied().unwrap_or(0),
                runtime_secs = stat.runtime_secs,
                "strategy complete"
            );
        }
    }

    Ok(())
}

//! The Fuzzer Driver: the outer loop that ties schedule generation,
//! mutation, cluster runs and coverage guidance together into one
//! experiment. Grounded on `fuzzer.py`'s `Fuzzer.run`/`get_configs`/
//! `run_batch`.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::info;

use crate::bug::ErrorRecord;
use crate::config::{FuzzerConfig, FuzzerType};
use crate::generator::generate_schedule;
use crate::guider::{Guider, TlcGuider, TraceGuider};
use crate::mutator::build_mutator;
use crate::orchestrator::{ports_for_slot, run_cluster, RunConfig};
use crate::rng::FuzzRng;
use crate::schedule::Schedule;

/// The fixed pool of 15 UUID-shaped `group_id`s cycled across worker slots,
/// carried unchanged from the original so parallel cluster runs never
/// collide on the target's own Raft-group namespace.
const GROUP_IDS: [&str; 15] = [
    "02511d47-d67c-49a3-9011-abb3109a44c1",
    "02511d47-d67c-49a3-9011-abb3109a44c2",
    "02511d47-d67c-49a3-9011-abb3109a44c3",
    "02511d47-d67c-49a3-9011-abb3109a44c4",
    "02511d47-d67c-49a3-9011-abb3109a44c5",
    "02511d47-d67c-49a3-9011-abb3109a44c6",
    "02511d47-d67c-49a3-9011-abb3109a44c7",
    "02511d47-d67c-49a3-9011-abb3109a44c8",
    "02511d47-d67c-49a3-9011-abb3109a44c9",
    "02511d47-d67c-49a3-9011-abb3109a44ca",
    "02511d47-d67c-49a3-9011-abb3109a44cb",
    "02511d47-d67c-49a3-9011-abb3109a44cc",
    "02511d47-d67c-49a3-9011-abb3109a44cd",
    "02511d47-d67c-49a3-9011-abb3109a44ce",
    "02511d47-d67c-49a3-9011-abb3109a44cf",
];

#[derive(Debug, Default, Clone, Serialize)]
pub struct FuzzerStats {
    pub coverage: Vec<usize>,
    pub random_schedules: usize,
    pub mutated_schedules: usize,
    pub bugs: Vec<(String, usize)>,
    pub runtime_secs: f64,
}

/// One unit of pool-pending work: whether it came from mutation (and so
/// counts against `mutated_schedules`) or straight generation.
type PoolEntry = (bool, Schedule);

fn build_guider(fuzzer: FuzzerType, oracle_addr: String) -> Box<dyn Guider> {
    match fuzzer {
        FuzzerType::Trace => Box::new(TraceGuider::new(oracle_addr)),
        FuzzerType::ModelFuzz | FuzzerType::Random => Box::new(TlcGuider::new(oracle_addr)),
    }
}

/// Runs one strategy (one `FuzzerType`) to completion: `config.iterations`
/// total runs, `config.workers` at a time, re-seeding the schedule pool
/// every `config.seed_frequency` iterations.
pub async fn run_strategy(
    config: &FuzzerConfig,
    fuzzer: FuzzerType,
    oracle_addr: String,
    rng: &mut FuzzRng,
) -> FuzzerStats {
    let started = std::time::Instant::now();
    let mutator = build_mutator(config.mutator_type, config);
    let mut guider = build_guider(fuzzer, oracle_addr);
    let mut pool: VecDeque<PoolEntry> = VecDeque::new();
    let mut stats = FuzzerStats::default();

    let mut i = 0usize;
    while i < config.iterations {
        if i % config.seed_frequency == 0 {
            pool.clear();
            for _ in 0..config.seed_population {
                pool.push_back((false, generate_schedule(config, rng)));
            }
        }
        while pool.len() < config.workers {
            pool.push_back((false, generate_schedule(config, rng)));
        }

        let batch_size = config.workers.min(config.iterations - i);
        let mut run_configs = Vec::with_capacity(batch_size);
        for slot in 0..batch_size {
            let (mutated, schedule) = pool.pop_front().expect("pool refilled above batch_size");
            if mutated {
                stats.mutated_schedules += 1;
            } else {
                stats.random_schedules += 1;
            }
            let (fuzzer_port, node_ports, listener_ports) = ports_for_slot(config, slot);
            run_configs.push(RunConfig {
                run_id: i + slot,
                fuzzer,
                group_id: GROUP_IDS[(i + slot) % GROUP_IDS.len()].to_string(),
                node_ports,
                listener_ports,
                fuzzer_port,
                schedule,
            });
        }

        info!(
            iteration = i,
            batch_size, "dispatching cluster run batch"
        );
        let results = run_batch(config, run_configs).await;

        for (j, (executed_schedule, event_trace, errors)) in results.into_iter().enumerate() {
            let new_states = guider.add_and_get_new_states(&event_trace).await;

            if !errors.is_empty() {
                let iter = i + j;
                stats.bugs.push((fuzzer.as_str().to_string(), iter));
                let dir = config.errors_dir.join(format!("{}_{}", fuzzer.as_str(), iter));
                let error_states = guider.get_states(&event_trace).await;
                for mut error in errors {
                    error.states = error_states.iter().map(|s| s.state.clone()).collect();
                    if let Err(e) = error.persist(&dir) {
                        tracing::warn!("failed to persist error record: {e}");
                    }
                }
                info!("{} found error(s) at iteration: {}", fuzzer, iter);
            } else if new_states > 0 && fuzzer != FuzzerType::Random {
                for _ in 0..config.mutations_per_schedule * new_states {
                    let mutated = mutator.mutate(executed_schedule.clone(), rng);
                    pool.push_back((true, mutated));
                }
            }

            stats.coverage.push(guider.get_coverage());
        }

        i += batch_size;
    }

    stats.runtime_secs = started.elapsed().as_secs_f64();
    stats
}

/// Dispatches one batch of cluster runs concurrently via a `JoinSet`, the
/// Rust realization of the original's `ProcessPoolExecutor.map` — disjoint
/// ports per slot substitute for OS-process isolation between runs.
async fn run_batch(
    config: &FuzzerConfig,
    run_configs: Vec<RunConfig>,
) -> Vec<(Schedule, Vec<crate::event::Event>, Vec<ErrorRecord>)> {
    let mut set = JoinSet::new();
    for (slot, run) in run_configs.into_iter().enumerate() {
        let config = config.clone();
        set.spawn(async move {
            let result = run_cluster(&config, run).await;
            (slot, result)
        });
    }

    let mut slotted = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((slot, result)) => slotted.push((slot, result)),
            Err(e) => tracing::warn!("cluster run task panicked: {e}"),
        }
    }
    slotted.sort_by_key(|(slot, _)| *slot);
    slotted
        .into_iter()
        .map(|(_, r)| (r.executed_schedule, r.event_trace, r.errors))
        .collect()
}

/// Stats for every configured strategy, for one replication of the
/// experiment.
type StrategyStats = std::collections::BTreeMap<String, FuzzerStats>;

/// Runs the whole configured set of strategies `config.experiments` times
/// (replications, for the statistical tests downstream analysis runs over
/// the result), re-seeding the driver's RNG between replications, and
/// persists the combined stats file after every replication — mirroring
/// `main.py`'s `for i in range(args.experiments): ... exp_stats[i] = ...`
/// outer loop and its re-seed-then-rewrite-the-file body.
pub async fn run_experiment(config: &FuzzerConfig) -> std::collections::BTreeMap<usize, StrategyStats> {
    let mut rng = match config.seed {
        Some(seed) => FuzzRng::from_seed(seed),
        None => FuzzRng::from_entropy(),
    };

    let mut exp_stats: std::collections::BTreeMap<usize, StrategyStats> = std::collections::BTreeMap::new();
    for experiment in 0..config.experiments as usize {
        let mut all_stats = StrategyStats::new();
        for &fuzzer in &config.fuzzers {
            info!(experiment, "instantiating {fuzzer}");
            let oracle_addr = format!("127.0.0.1:{}", config.base_tlc_port);
            let stats = run_strategy(config, fuzzer, oracle_addr, &mut rng).await;
            all_stats.insert(fuzzer.as_str().to_string(), stats);
        }
        exp_stats.insert(experiment, all_stats);

        if let Err(e) = persist_stats(&config.result_dir, &exp_stats) {
            tracing::warn!("failed to persist experiment stats: {e}");
        }

        let next_seed = rng.next_seed();
        rng = FuzzRng::from_seed(next_seed);
    }

    exp_stats
}

fn persist_stats(
    result_dir: &std::path::Path,
    stats: &std::collections::BTreeMap<usize, StrategyStats>,
) -> std::io::Result<()> {
    std::fs::create_dir_all(result_dir)?;
    let path: PathBuf = result_dir.join("experiment_stats.json");
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, stats)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_pool_has_fifteen_unique_entries() {
        let unique: std::collections::HashSet<_> = GROUP_IDS.iter().collect();
        assert_eq!(unique.len(), 15);
    }

    #[test]
    fn group_id_cycles_past_pool_length() {
        assert_eq!(GROUP_IDS[15 % GROUP_IDS.len()], GROUP_IDS[0]);
    }
}

//! Fuzzer configuration: defaults, TOML loading, and the CLI-overridable
//! knobs listed in `spec.md` §6.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FuzzerError, Result};

/// Which coverage-feedback strategy drives an experiment.
///
/// `Random` still runs the guider (for coverage plotting) but never feeds
/// new states back into the mutation pool — mirrors the original's
/// `fuzzer != FuzzerType.RANDOM` gate in the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuzzerType {
    ModelFuzz,
    Random,
    Trace,
}

impl FuzzerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuzzerType::ModelFuzz => "modelfuzz",
            FuzzerType::Random => "random",
            FuzzerType::Trace => "trace",
        }
    }
}

impl std::fmt::Display for FuzzerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutatorType {
    All,
    SwapNodes,
    SwapCrashNodes,
    SwapCrashSteps,
    SwapMaxMessages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerConfig {
    /// Parallel cluster runs per batch.
    pub workers: usize,
    /// Wall-clock budget per run, in seconds (also used to derive the
    /// subprocess wait deadline, `timeout + 10`).
    pub timeout: u64,
    /// Path to the target binary (server/client entrypoint).
    pub target_path: PathBuf,
    /// Directory the TLC model-checker process (if any) runs from.
    pub tlc_dir: Option<PathBuf>,
    /// Base seed for the fuzzer's own RNG; `None` seeds from entropy.
    pub seed: Option<u64>,
    pub experiments: u32,
    pub fuzzers: Vec<FuzzerType>,
    pub iterations: usize,
    pub nodes: usize,
    pub client_requests: usize,
    pub seed_population: usize,
    pub seed_frequency: usize,
    pub crash_quota: usize,
    pub steps: usize,
    pub max_messages: u32,
    pub mutation_count: usize,
    pub mutations_per_schedule: usize,
    pub mutator_type: MutatorType,
    pub base_network_port: u16,
    pub base_listener_port: u16,
    pub base_node_port: u16,
    pub base_tlc_port: u16,
    pub result_dir: PathBuf,
    pub errors_dir: PathBuf,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout: 30,
            target_path: PathBuf::from("./target-bin"),
            tlc_dir: None,
            seed: None,
            experiments: 1,
            fuzzers: vec![FuzzerType::ModelFuzz],
            iterations: 1000,
            nodes: 3,
            client_requests: 5,
            seed_population: 20,
            seed_frequency: 100,
            crash_quota: 2,
            steps: 20,
            max_messages: 5,
            mutation_count: 1,
            mutations_per_schedule: 2,
            mutator_type: MutatorType::All,
            base_network_port: 9000,
            base_listener_port: 9500,
            base_node_port: 10000,
            base_tlc_port: 2023,
            result_dir: PathBuf::from("./results"),
            errors_dir: PathBuf::from("./results/errors"),
        }
    }
}

impl FuzzerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| FuzzerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| FuzzerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| FuzzerError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes < 1 {
            return Err(FuzzerError::InvalidConfig(
                "nodes must be at least 1".into(),
            ));
        }
        if self.workers < 1 {
            return Err(FuzzerError::InvalidConfig(
                "workers must be at least 1".into(),
            ));
        }
        if self.seed_frequency == 0 {
            return Err(FuzzerError::InvalidConfig(
                "seed_frequency must be non-zero".into(),
            ));
        }
        if self.max_messages < 1 {
            return Err(FuzzerError::InvalidConfig(
                "max_messages must be at least 1".into(),
            ));
        }
        if self.seed_frequency % self.workers != 0 {
            return Err(FuzzerError::InvalidConfig(
                "seed_frequency must be a multiple of workers so pool refresh aligns with batch boundaries".into(),
            ));
        }
        if self.crash_quota > 0 && self.nodes < 2 {
            return Err(FuzzerError::InvalidConfig(
                "nodes must be at least 2 when crash_quota > 0 (SwapCrashNodes needs a node to reassign a crash to)".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        FuzzerConfig::default().validate().unwrap();
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuzzer.toml");
        let config = FuzzerConfig::default();
        config.save(&path).unwrap();
        let loaded = FuzzerConfig::load(&path).unwrap();
        assert_eq!(loaded.nodes, config.nodes);
        assert_eq!(loaded.fuzzers, config.fuzzers);
    }

    #[test]
    fn rejects_zero_nodes() {
        let mut config = FuzzerConfig::default();
        config.nodes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_seed_frequency_not_a_multiple_of_workers() {
        let mut config = FuzzerConfig::default();
        config.workers = 4;
        config.seed_frequency = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_single_node_with_nonzero_crash_quota() {
        let mut config = FuzzerConfig::default();
        config.nodes = 1;
        config.crash_quota = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn single_node_with_zero_crash_quota_is_fine() {
        let mut config = FuzzerConfig::default();
        config.nodes = 1;
        config.crash_quota = 0;
        assert!(config.validate().is_ok());
    }
}

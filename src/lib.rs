//! Coverage-guided schedule fuzzer for a Raft-based replicated state
//! machine: generates and mutates interleavings, replays them against a
//! freshly provisioned cluster of target subprocesses behind an
//! interception network, and scores each trace against a model-checker
//! oracle to decide which schedules are worth mutating further.

pub mod bug;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod generator;
pub mod guider;
pub mod message;
pub mod mutator;
pub mod network;
pub mod orchestrator;
pub mod rng;
pub mod schedule;
pub mod supervisor;

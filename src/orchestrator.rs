//! The cluster orchestrator: runs one schedule against one freshly
//! provisioned cluster of target subprocesses, per `spec.md` §4.4.
//!
//! Grounded on `cluster.py`'s `Cluster.run` (provision → start → execute →
//! post-check → teardown) and on `kimberlite-cluster::supervisor`'s
//! `ClusterSupervisor` for the shape of "own a `Vec` of per-node
//! supervisors, scan them for crashes between steps".

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info_span, warn, Instrument};

use crate::bug::ErrorRecord;
use crate::config::{FuzzerConfig, FuzzerType};
use crate::event::{client_request_event, membership_event, Event};
use crate::network::{run_network, NetworkHandle};
use crate::schedule::{NodeId, Schedule, Step};
use crate::supervisor::{client_log_paths, log_paths, ClientSupervisor, ServerSupervisor};

/// Per-invocation parameters the driver assigns before dispatching a run:
/// disjoint ports, a `group_id` and a `run_id`, layered over the shared
/// [`FuzzerConfig`]. Mirrors the `run_config` dict `fuzzer.py`'s
/// `get_configs` builds per worker slot.
pub struct RunConfig {
    pub run_id: usize,
    pub fuzzer: FuzzerType,
    pub group_id: String,
    pub node_ports: Vec<u16>,
    pub listener_ports: Vec<u16>,
    pub fuzzer_port: u16,
    pub schedule: Schedule,
}

/// The outcome of one cluster run: the steps actually executed (a prefix
/// of `schedule`, per `spec.md` §8's `len(executed) <= len(schedule)`
/// invariant), the full event trace, and any target failures observed.
pub struct ClusterRunResult {
    pub executed_schedule: Schedule,
    pub event_trace: Vec<Event>,
    pub errors: Vec<ErrorRecord>,
}

const STEP_GAP: Duration = Duration::from_millis(30);
const REGISTER_POLL: Duration = Duration::from_millis(10);

/// Runs `run.schedule` to completion (or until the wall-clock deadline)
/// against a cluster provisioned from `config`/`run`.
///
/// Wraps the actual work in `.instrument(..)` rather than entering the span
/// directly: an `EnteredSpan` guard held across an `.await` point is `!Send`,
/// which would make this future unusable with `JoinSet::spawn`'s `Send`
/// bound in `driver::run_batch`.
pub async fn run_cluster(config: &FuzzerConfig, run: RunConfig) -> ClusterRunResult {
    let span = info_span!("cluster_run", run_id = run.run_id, fuzzer = %run.fuzzer);
    run_cluster_inner(config, run).instrument(span).await
}

async fn run_cluster_inner(config: &FuzzerConfig, run: RunConfig) -> ClusterRunResult {
    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            warn!("failed to provision scratch directory: {e}");
            return ClusterRunResult {
                executed_schedule: Vec::new(),
                event_trace: Vec::new(),
                errors: Vec::new(),
            };
        }
    };

    let peer_addresses = run
        .node_ports
        .iter()
        .map(|p| format!("127.0.0.1:{p}"))
        .collect::<Vec<_>>()
        .join(",");

    let network = match run_network(run.fuzzer_port).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("failed to start interception network: {e}");
            return ClusterRunResult {
                executed_schedule: Vec::new(),
                event_trace: Vec::new(),
                errors: Vec::new(),
            };
        }
    };

    let mut servers = Vec::with_capacity(config.nodes);
    for i in 0..config.nodes {
        let node: NodeId = i + 1;
        let (stdout, stderr) = log_paths(scratch.path(), node);
        let args = vec![
            run.run_id.to_string(),
            run.fuzzer_port.to_string(),
            run.listener_ports[i].to_string(),
            node.to_string(),
            peer_addresses.clone(),
            run.group_id.clone(),
        ];
        let mut supervisor =
            ServerSupervisor::new(node, config.target_path.clone(), args, Duration::from_secs(config.timeout), stdout, stderr);
        if let Err(e) = supervisor.start().await {
            warn!(node, "failed to spawn server subprocess: {e}");
        }
        servers.push(supervisor);
    }

    if !wait_for_registration(&network, config).await {
        network.stop().await;
        return ClusterRunResult {
            executed_schedule: Vec::new(),
            event_trace: Vec::new(),
            errors: vec![ErrorRecord {
                name: "NodeRegisterTimeout".to_string(),
                run_id: run.run_id,
                fuzzer: run.fuzzer,
                returncode: None,
                stderr: String::new(),
                stdout: String::new(),
                schedule: Vec::new(),
                event_trace: Vec::new(),
                states: Vec::new(),
            }],
        };
    }

    let mut clients: Vec<ClientSupervisor> = Vec::new();
    let mut next_request_id: usize = 1;
    let mut executed_schedule = Schedule::new();
    let mut crashed: std::collections::HashSet<NodeId> = std::collections::HashSet::new();

    let deadline = Instant::now() + Duration::from_secs(config.timeout);
    'steps: for step in run.schedule.iter().cloned() {
        if Instant::now() > deadline {
            break;
        }
        for server in servers.iter_mut() {
            server.poll().await;
        }
        if check_errors(&servers, &clients, &run, &executed_schedule, &network).is_some() {
            break 'steps;
        }

        match &step {
            Step::Crash { node, .. } => {
                if !crashed.contains(node) {
                    if let Some(server) = servers.get_mut(*node - 1) {
                        server.crash().await;
                    }
                    crashed.insert(*node);
                    network.state.record_event(membership_event("Remove", *node));
                }
            }
            Step::Restart { node, .. } => {
                if crashed.contains(node) {
                    if let Some(server) = servers.get_mut(*node - 1) {
                        if let Err(e) = server.restart().await {
                            warn!(node, "failed to restart server subprocess: {e}");
                        }
                    }
                    network.state.record_event(membership_event("Add", *node));
                    crashed.remove(node);
                }
            }
            Step::ClientRequest => {
                let leader = network.state.leader_id();
                if leader > 0 && !crashed.contains(&(leader as NodeId)) {
                    let request_id = next_request_id;
                    next_request_id += 1;
                    let (stdout, stderr) = client_log_paths(scratch.path(), request_id);
                    let args = vec![request_id.to_string(), peer_addresses.clone(), run.group_id.clone()];
                    let mut client = ClientSupervisor::new(
                        request_id,
                        config.target_path.clone(),
                        args,
                        Duration::from_secs(config.timeout),
                        stdout,
                        stderr,
                    );
                    let _ = client.run().await;
                    clients.push(client);
                    network
                        .state
                        .record_client_request(client_request_event(leader as NodeId, request_id as i64));
                }
            }
            Step::Schedule { from, to, max_msgs } => {
                if !crashed.contains(from) {
                    network.state.schedule_node(*from, *to, *max_msgs, crashed.contains(to)).await;
                }
            }
        }

        executed_schedule.push(step);
        tokio::time::sleep(STEP_GAP).await;
    }

    for server in servers.iter_mut() {
        server.poll().await;
    }
    let errors = check_errors(&servers, &clients, &run, &executed_schedule, &network).unwrap_or_default();

    let event_trace = network.state.event_trace();
    network.stop().await;
    for mut server in servers {
        server.close().await;
    }

    ClusterRunResult {
        executed_schedule,
        event_trace,
        errors,
    }
}

async fn wait_for_registration(network: &NetworkHandle, config: &FuzzerConfig) -> bool {
    let deadline = Instant::now() + Duration::from_secs(config.timeout);
    while network.state.num_replicas() != config.nodes {
        if Instant::now() > deadline {
            warn!("timed out waiting for {} replica(s) to register", config.nodes);
            return false;
        }
        tokio::time::sleep(REGISTER_POLL).await;
    }
    true
}

/// Polls every supervisor and, for any with `error_flg` set, builds an
/// [`ErrorRecord`] — the Rust realization of `Cluster.check_error`.
/// Returns `None` if nothing has failed yet.
fn check_errors(
    servers: &[ServerSupervisor],
    clients: &[ClientSupervisor],
    run: &RunConfig,
    executed_schedule: &Schedule,
    network: &NetworkHandle,
) -> Option<Vec<ErrorRecord>> {
    let mut errors = Vec::new();

    for (i, server) in servers.iter().enumerate() {
        if server.has_errored() {
            debug!(node = server.node(), "server exited uncleanly");
            errors.push(ErrorRecord {
                name: ErrorRecord::for_server(i, server.returncode()),
                run_id: run.run_id,
                fuzzer: run.fuzzer,
                returncode: server.returncode(),
                stderr: server.read_stderr(),
                stdout: server.read_stdout(),
                schedule: executed_schedule.clone(),
                event_trace: network.state.event_trace(),
                states: Vec::new(),
            });
        }
    }

    for (i, client) in clients.iter().enumerate() {
        if client.has_errored() {
            errors.push(ErrorRecord {
                name: ErrorRecord::for_client(i, client.returncode()),
                run_id: run.run_id,
                fuzzer: run.fuzzer,
                returncode: client.returncode(),
                stderr: client.read_stderr(),
                stdout: client.read_stdout(),
                schedule: executed_schedule.clone(),
                event_trace: network.state.event_trace(),
                states: Vec::new(),
            });
        }
    }

    if errors.is_empty() {
        None
    } else {
        Some(errors)
    }
}

/// Computes the disjoint port ranges for worker slot `slot` within a batch,
/// per `spec.md` §4.7 / §8's port-isolation property: each slot gets
/// `nodes` consecutive node ports and listener ports, and one fuzzer port.
pub fn ports_for_slot(config: &FuzzerConfig, slot: usize) -> (u16, Vec<u16>, Vec<u16>) {
    let fuzzer_port = config.base_network_port + slot as u16;
    let node_ports = (0..config.nodes)
        .map(|j| config.base_node_port + (config.nodes * slot + j) as u16)
        .collect();
    let listener_ports = (0..config.nodes)
        .map(|j| config.base_listener_port + (config.nodes * slot + j) as u16)
        .collect();
    (fuzzer_port, node_ports, listener_ports)
}

pub fn scratch_root(result_dir: &std::path::Path) -> PathBuf {
    result_dir.join("tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_for_slot_are_disjoint_across_workers() {
        let config = FuzzerConfig {
            nodes: 3,
            base_network_port: 7071,
            base_node_port: 10000,
            base_listener_port: 9500,
            ..Default::default()
        };

        let mut all_node_ports = std::collections::HashSet::new();
        let mut all_fuzzer_ports = std::collections::HashSet::new();
        for slot in 0..4 {
            let (fuzzer_port, node_ports, listener_ports) = ports_for_slot(&config, slot);
            assert!(all_fuzzer_ports.insert(fuzzer_port), "fuzzer port collision at slot {slot}");
            for p in node_ports.iter().chain(listener_ports.iter()) {
                assert!(all_node_ports.insert(*p), "port collision at slot {slot}: {p}");
            }
        }
        assert_eq!(all_fuzzer_ports, std::collections::HashSet::from([7071, 7072, 7073, 7074]));
    }
}

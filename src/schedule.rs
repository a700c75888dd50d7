//! The schedule data model: the sequence of [`Step`]s [`crate::orchestrator::run_cluster`]
//! drives a cluster run through.

use serde::{Deserialize, Serialize};

pub type NodeId = usize;

/// One instruction in a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Step {
    /// Drain up to `max_msgs` queued messages from `from`'s mailbox to `to`.
    Schedule {
        from: NodeId,
        to: NodeId,
        max_msgs: u32,
    },
    /// Kill `node`'s subprocess. `crash_id` indexes this crash within the
    /// run (`0..crash_quota`) and pairs it with the matching `Restart`.
    Crash { node: NodeId, crash_id: usize },
    /// Bring a previously crashed `node` back up.
    Restart { node: NodeId, crash_id: usize },
    /// Issue a client request against the current leader (if any).
    ClientRequest,
}

impl Step {
    pub fn is_schedule(&self) -> bool {
        matches!(self, Step::Schedule { .. })
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, Step::Crash { .. })
    }

    pub fn is_restart(&self) -> bool {
        matches!(self, Step::Restart { .. })
    }

    pub fn crash_id(&self) -> Option<usize> {
        match self {
            Step::Crash { crash_id, .. } | Step::Restart { crash_id, .. } => Some(*crash_id),
            _ => None,
        }
    }
}

pub type Schedule = Vec<Step>;

/// Checks that every `Crash` in `schedule` has a matching `Restart` with the
/// same `crash_id` and `node`, appearing strictly later.
pub fn crash_restart_pairs_well_formed(schedule: &Schedule) -> bool {
    use std::collections::HashMap;

    let mut crashes: HashMap<usize, (usize, NodeId)> = HashMap::new();
    for (idx, step) in schedule.iter().enumerate() {
        if let Step::Crash { node, crash_id } = step {
            if crashes.insert(*crash_id, (idx, *node)).is_some() {
                return false;
            }
        }
    }

    let mut seen_restarts: std::collections::HashSet<usize> = std::collections::HashSet::new();
    for (idx, step) in schedule.iter().enumerate() {
        if let Step::Restart { node, crash_id } = step {
            let Some(&(crash_idx, crash_node)) = crashes.get(crash_id) else {
                return false;
            };
            if crash_node != *node || crash_idx >= idx {
                return false;
            }
            if !seen_restarts.insert(*crash_id) {
                return false;
            }
        }
    }

    seen_restarts.len() == crashes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_schedule_is_well_formed() {
        assert!(crash_restart_pairs_well_formed(&Vec::new()));
    }

    #[test]
    fn detects_missing_restart() {
        let schedule = vec![Step::Crash { node: 1, crash_id: 0 }];
        assert!(!crash_restart_pairs_well_formed(&schedule));
    }

    #[test]
    fn detects_restart_before_crash() {
        let schedule = vec![
            Step::Restart { node: 1, crash_id: 0 },
            Step::Crash { node: 1, crash_id: 0 },
        ];
        assert!(!crash_restart_pairs_well_formed(&schedule));
    }

    #[test]
    fn accepts_well_formed_pair() {
        let schedule = vec![
            Step::Schedule { from: 1, to: 2, max_msgs: 3 },
            Step::Crash { node: 1, crash_id: 0 },
            Step::ClientRequest,
            Step::Restart { node: 1, crash_id: 0 },
        ];
        assert!(crash_restart_pairs_well_formed(&schedule));
    }
}

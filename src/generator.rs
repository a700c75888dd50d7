//! Random schedule generation.
//!
//! Follows `Fuzzer.generate_schedules` in the original implementation:
//! `Schedule` steps first, then `Crash` steps inserted at random growing
//! positions, then the matching `Restart` steps inserted strictly after
//! their crash, then `ClientRequest` steps last.

use crate::config::FuzzerConfig;
use crate::rng::FuzzRng;
use crate::schedule::{NodeId, Schedule, Step};

pub fn generate_schedule(config: &FuzzerConfig, rng: &mut FuzzRng) -> Schedule {
    let nodes: Vec<NodeId> = (1..=config.nodes).collect();
    let mut schedule = Schedule::with_capacity(config.steps + config.crash_quota * 2 + config.client_requests);

    for _ in 0..config.steps {
        let from = rng.choice(&nodes);
        let to = rng.choice_excluding(&nodes, from);
        let max_msgs = rng.range_u32(1, config.max_messages);
        schedule.push(Step::Schedule { from, to, max_msgs });
    }

    for crash_id in 0..config.crash_quota {
        let index = rng.insertion_index(schedule.len());
        let node = rng.choice(&nodes);
        schedule.insert(index, Step::Crash { node, crash_id });
    }

    // Recompute each crash's *current* position (rather than the position it
    // was inserted at) before placing its restart — an earlier crash's index
    // shifts every time a later crash lands at or before it, and a restart
    // placed using a stale index could land before its own crash.
    for crash_id in 0..config.crash_quota {
        let crash_index = schedule
            .iter()
            .position(|s| matches!(s, Step::Crash { crash_id: c, .. } if *c == crash_id))
            .expect("crash step must exist for every crash_id below crash_quota");
        let node = match schedule[crash_index] {
            Step::Crash { node, .. } => node,
            _ => unreachable!(),
        };
        let index = crash_index + 1 + rng.index(schedule.len() - crash_index);
        schedule.insert(index, Step::Restart { node, crash_id });
    }

    for _ in 0..config.client_requests {
        let index = rng.insertion_index(schedule.len());
        schedule.insert(index, Step::ClientRequest);
    }

    schedule
}

pub fn generate_schedule_pool(
    config: &FuzzerConfig,
    rng: &mut FuzzRng,
    count: usize,
) -> Vec<(bool, Schedule)> {
    (0..count)
        .map(|_| (false, generate_schedule(config, rng)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::crash_restart_pairs_well_formed;

    fn config_with(steps: usize, crash_quota: usize, client_requests: usize) -> FuzzerConfig {
        FuzzerConfig {
            steps,
            crash_quota,
            client_requests,
            nodes: 3,
            max_messages: 4,
            ..Default::default()
        }
    }

    #[test]
    fn generated_schedule_pairs_crashes_with_restarts() {
        let config = config_with(10, 3, 2);
        let mut rng = FuzzRng::from_seed(7);
        for _ in 0..50 {
            let schedule = generate_schedule(&config, &mut rng);
            assert!(crash_restart_pairs_well_formed(&schedule));
        }
    }

    #[test]
    fn schedule_steps_never_target_self() {
        let config = config_with(20, 0, 0);
        let mut rng = FuzzRng::from_seed(11);
        let schedule = generate_schedule(&config, &mut rng);
        for step in &schedule {
            if let Step::Schedule { from, to, .. } = step {
                assert_ne!(from, to);
            }
        }
    }

    #[test]
    fn no_crashes_means_no_restarts() {
        let config = config_with(5, 0, 3);
        let mut rng = FuzzRng::from_seed(3);
        let schedule = generate_schedule(&config, &mut rng);
        assert!(!schedule.iter().any(|s| s.is_restart() || s.is_crash()));
    }

    #[test]
    fn pool_has_requested_size_and_is_unmutated() {
        let config = config_with(4, 1, 1);
        let mut rng = FuzzRng::from_seed(42);
        let pool = generate_schedule_pool(&config, &mut rng, 6);
        assert_eq!(pool.len(), 6);
        assert!(pool.iter().all(|(mutated, _)| !mutated));
    }

    use proptest::prelude::*;

    proptest! {
        /// Property: for any reasonable `(steps, crash_quota, client_requests,
        /// nodes, max_messages)` combination, every generated schedule
        /// satisfies spec.md §8's all-quantified invariants: balanced
        /// crash/restart pairing, `from != to`, and `1 <= max_msgs <=
        /// max_messages_cap`.
        #[test]
        fn prop_generated_schedule_satisfies_invariants(
            steps in 0_usize..15,
            crash_quota in 0_usize..4,
            client_requests in 0_usize..4,
            nodes in 2_usize..6,
            max_messages in 1_u32..8,
            seed in any::<u64>(),
        ) {
            let config = FuzzerConfig {
                steps,
                crash_quota,
                client_requests,
                nodes,
                max_messages,
                ..Default::default()
            };
            let mut rng = FuzzRng::from_seed(seed);
            let schedule = generate_schedule(&config, &mut rng);

            prop_assert!(crash_restart_pairs_well_formed(&schedule));
            for step in &schedule {
                if let Step::Schedule { from, to, max_msgs } = step {
                    prop_assert_ne!(from, to);
                    prop_assert!(*max_msgs >= 1 && *max_msgs <= max_messages);
                    prop_assert!((1..=nodes).contains(from));
                    prop_assert!((1..=nodes).contains(to));
                }
            }
        }
    }
}

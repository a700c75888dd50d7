//! Seedable RNG wrapper shared by the schedule generator and the mutators.
//!
//! A thin wrapper rather than a bare `SmallRng` so call sites read as
//! `rng.node(nodes)` / `rng.index(len)` instead of repeating `gen_range`
//! boilerplate everywhere.

use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng};

pub struct FuzzRng(SmallRng);

impl FuzzRng {
    pub fn from_seed(seed: u64) -> Self {
        Self(SmallRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self(SmallRng::from_entropy())
    }

    /// A uniform index in `0..len`. Panics if `len == 0`, matching
    /// `random.randint`/`random.choice` on an empty range.
    pub fn index(&mut self, len: usize) -> usize {
        self.0.gen_range(0..len)
    }

    /// A uniform index in `0..=len`, for insertion positions.
    pub fn insertion_index(&mut self, len: usize) -> usize {
        self.0.gen_range(0..=len)
    }

    pub fn range_u32(&mut self, low: u32, high_inclusive: u32) -> u32 {
        self.0.gen_range(low..=high_inclusive)
    }

    /// Picks a uniformly random element distinct from `exclude`.
    pub fn choice_excluding<T: Copy + PartialEq>(&mut self, choices: &[T], exclude: T) -> T {
        let candidates: Vec<T> = choices.iter().copied().filter(|c| *c != exclude).collect();
        candidates[self.index(candidates.len())]
    }

    pub fn choice<T: Copy>(&mut self, choices: &[T]) -> T {
        choices[self.index(choices.len())]
    }

    /// Derives a fresh seed from the current RNG stream, for re-seeding
    /// between replications of a multi-`experiments` run — the Rust
    /// equivalent of the original's `args.seed += random.randint(0, 1e20)`.
    pub fn next_seed(&mut self) -> u64 {
        self.0.gen()
    }
}

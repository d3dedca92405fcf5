use std::convert::identity;

use datasize::DataSize;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{time::Tick, validators::PublicKey, validators::Validators};

/// The deterministic, weighted leader schedule of one era.
///
/// Every round has exactly one leader, drawn pseudorandomly with probability proportional to the
/// validator's weight. All nodes derive the same sequence from the era's seed.
#[derive(DataSize, Debug, Clone)]
pub struct LeaderSequence {
    seed: u64,
    validators: Vec<PublicKey>,
    /// `cumulative_weight[i]` is the last weight unit that belongs to validator `i`.
    cumulative_weight: Vec<u64>,
}

impl LeaderSequence {
    /// Creates the leader schedule for an era with the given seed and bonded validators.
    pub fn new(seed: u64, validators: &Validators) -> Self {
        let mut ids = Vec::with_capacity(validators.len());
        let mut cumulative_weight = Vec::with_capacity(validators.len());
        let mut sum = 0u64;
        for (id, weight) in validators.iter() {
            sum = sum.saturating_add(*weight);
            ids.push(*id);
            cumulative_weight.push(sum);
        }
        LeaderSequence {
            seed,
            validators: ids,
            cumulative_weight,
        }
    }

    /// Returns the leader of the round starting at `round_start`.
    pub fn leader(&self, round_start: Tick) -> PublicKey {
        let seed = self.seed.wrapping_add(round_start.value());
        let total_weight = *self
            .cumulative_weight
            .last()
            .expect("leader sequence requires at least one validator");
        // We select a random one out of the `total_weight` weight units, starting numbering at 1.
        // `binary_search` returns the first index with `cumulative_weight[i] >= r`, i.e. the
        // validator who owns the randomly selected weight unit.
        let r = leader_prng(total_weight, seed);
        let index = self
            .cumulative_weight
            .binary_search(&r)
            .unwrap_or_else(identity);
        self.validators[index]
    }
}

/// Returns a pseudorandom `u64` between `1` and `upper` (inclusive).
fn leader_prng(upper: u64, seed: u64) -> u64 {
    ChaCha8Rng::seed_from_u64(seed).gen_range(1..=upper)
}

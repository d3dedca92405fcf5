use std::fmt::{self, Display, Formatter};

use datasize::DataSize;
use serde::{Deserialize, Serialize};

use crate::{
    hashing::{self, Digest},
    message::BlockSummary,
    time::{Tick, TickDiff},
    validators::Validators,
};

/// A persisted era record.
///
/// An era is a time-bounded slice of the consensus protocol with a fixed bonded-validator
/// snapshot and leader schedule. It is identified by the hash of the switch block that opened it.
/// The era tree is acyclic; every non-genesis era has exactly one parent that is present in
/// storage before the era itself is added.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Era {
    key_block_hash: Digest,
    /// `None` iff this is the genesis era.
    parent_key_block_hash: Option<Digest>,
    start_tick: Tick,
    end_tick: Tick,
    validators: Validators,
    leader_seed: u64,
}

impl Era {
    /// Creates an era record. Panics if the era would be empty.
    pub fn new(
        key_block_hash: Digest,
        parent_key_block_hash: Option<Digest>,
        start_tick: Tick,
        end_tick: Tick,
        validators: Validators,
        leader_seed: u64,
    ) -> Self {
        assert!(end_tick > start_tick, "era must span at least one tick");
        Era {
            key_block_hash,
            parent_key_block_hash,
            start_tick,
            end_tick,
            validators,
            leader_seed,
        }
    }

    /// Creates the genesis era from the configured genesis block summary.
    pub fn genesis(summary: &BlockSummary, duration: TickDiff, validators: Validators) -> Self {
        let leader_seed = derive_seed(summary.hash, 0);
        Era::new(
            summary.hash,
            None,
            summary.tick,
            summary.tick + duration,
            validators,
            leader_seed,
        )
    }

    /// Creates the child era opened by the switch message with hash `key_block_hash`.
    ///
    /// The child starts where this era ends and inherits the validator snapshot; validator
    /// rotation is applied by the block pipeline before the era is persisted, outside this core.
    pub fn child(&self, key_block_hash: Digest, duration: TickDiff) -> Era {
        let leader_seed = derive_seed(key_block_hash, self.leader_seed);
        Era::new(
            key_block_hash,
            Some(self.key_block_hash),
            self.end_tick,
            self.end_tick + duration,
            self.validators.clone(),
            leader_seed,
        )
    }

    /// The era's primary identifier: the hash of the switch block that opened it.
    pub fn key_block_hash(&self) -> Digest {
        self.key_block_hash
    }

    /// The parent era's key block hash; `None` iff this is genesis.
    pub fn parent_key_block_hash(&self) -> Option<Digest> {
        self.parent_key_block_hash
    }

    /// The first tick of the era.
    pub fn start_tick(&self) -> Tick {
        self.start_tick
    }

    /// The first tick past the era.
    pub fn end_tick(&self) -> Tick {
        self.end_tick
    }

    /// The bonded-validators snapshot.
    pub fn validators(&self) -> &Validators {
        &self.validators
    }

    /// The seed of the era's leader schedule.
    pub fn leader_seed(&self) -> u64 {
        self.leader_seed
    }

    /// Returns whether this is the genesis era.
    pub fn is_genesis(&self) -> bool {
        self.parent_key_block_hash.is_none()
    }
}

impl Display for Era {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "era {:10}", self.key_block_hash)
    }
}

fn derive_seed(key_block_hash: Digest, parent_seed: u64) -> u64 {
    let mut data = Vec::with_capacity(Digest::LENGTH + 8);
    data.extend_from_slice(key_block_hash.as_bytes());
    data.extend_from_slice(&parent_seed.to_le_bytes());
    hashing::hash(data).to_seed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::PublicKey;

    fn validators() -> Validators {
        vec![(PublicKey::new([1; 32]), 5)].into_iter().collect()
    }

    fn genesis_summary() -> BlockSummary {
        BlockSummary {
            hash: hashing::hash(b"genesis"),
            parent_hash: None,
            key_block_hash: hashing::hash(b"genesis"),
            round_id: 0,
            creator: None,
            kind_tag: 4,
            tick: Tick::from(1000),
        }
    }

    #[test]
    fn genesis_has_no_parent() {
        let era = Era::genesis(&genesis_summary(), TickDiff::from(64), validators());
        assert!(era.is_genesis());
        assert_eq!(era.start_tick(), Tick::from(1000));
        assert_eq!(era.end_tick(), Tick::from(1064));
    }

    #[test]
    fn child_starts_where_parent_ends() {
        let parent = Era::genesis(&genesis_summary(), TickDiff::from(64), validators());
        let child = parent.child(hashing::hash(b"switch"), TickDiff::from(32));
        assert_eq!(child.parent_key_block_hash(), Some(parent.key_block_hash()));
        assert_eq!(child.start_tick(), parent.end_tick());
        assert_eq!(child.end_tick(), parent.end_tick() + TickDiff::from(32));
        assert_ne!(child.leader_seed(), parent.leader_seed());
    }

    #[test]
    #[should_panic(expected = "at least one tick")]
    fn empty_era_is_rejected() {
        let _ = Era::new(
            hashing::hash(b"era"),
            None,
            Tick::from(10),
            Tick::from(10),
            validators(),
            0,
        );
    }
}

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::Duration,
};

use datasize::DataSize;
use serde::{Deserialize, Serialize};

use crate::{message::BlockSummary, time::TickDiff, validators::PublicKey, validators::Validators};

/// Consensus configuration.
#[derive(DataSize, Debug, Clone, Serialize, Deserialize)]
// Disallow unknown fields to ensure config files and command-line overrides contain valid keys.
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Length of one tick of the consensus logical clock.
    pub tick_unit: Duration,
    /// Rounds are `1 << init_round_exponent` ticks long.
    pub init_round_exponent: u8,
    /// How many ticks an era spans.
    pub era_duration: TickDiff,
    /// Position of the omega message within a round, in percent of the round length.
    pub witness_offset_percent: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tick_unit: Duration::from_secs(1),
            init_round_exponent: 4,
            era_duration: TickDiff::from(86_400),
            witness_offset_percent: 67,
        }
    }
}

impl Config {
    /// The length of one round in ticks.
    pub fn round_length(&self) -> TickDiff {
        TickDiff::from(1u64 << self.init_round_exponent)
    }

    /// The offset of the omega message from the round start.
    pub fn witness_offset(&self) -> TickDiff {
        self.round_length() * self.witness_offset_percent / 100
    }
}

/// A check whether this node's protocol state is sufficiently synchronized to create messages.
pub type SyncCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// The full wiring of the Highway consensus core.
#[derive(Clone)]
pub struct HighwayConf {
    /// Plain configuration values.
    pub config: Config,
    /// Summary of the genesis block; its hash is the genesis era's key block hash.
    pub genesis_summary: BlockSummary,
    /// The bonded-validators snapshot of the genesis era.
    pub genesis_validators: Validators,
    /// Our own identity, if this node is a bonded validator.
    pub bonded_validator: Option<PublicKey>,
    /// Whether it is safe to create new messages yet.
    pub is_synced: SyncCheck,
}

impl HighwayConf {
    /// Returns whether the node considers itself synchronized.
    pub fn is_synced(&self) -> bool {
        (self.is_synced)()
    }
}

impl Debug for HighwayConf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HighwayConf")
            .field("config", &self.config)
            .field("genesis_summary", &self.genesis_summary)
            .field("genesis_validators", &self.genesis_validators)
            .field("bonded_validator", &self.bonded_validator)
            .finish()
    }
}

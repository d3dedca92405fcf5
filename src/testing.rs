//! Testing utilities: in-memory collaborator fakes and builders for eras, messages and configs.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    config::Config,
    era::Era,
    error::StorageError,
    hashing::{self, Digest},
    message::{Block, BlockSummary, Message, MessageKind, RoundId},
    time::{Tick, TickDiff},
    traits::{BlockExecutor, EraStorage, ForkChoiceManager, Relaying},
    validators::PublicKey,
};

pub(crate) fn test_public_key(n: u8) -> PublicKey {
    PublicKey::new([n; 32])
}

/// Four-tick rounds, four rounds per era.
pub(crate) fn test_config() -> Config {
    Config {
        tick_unit: Duration::from_secs(1),
        init_round_exponent: 2,
        era_duration: TickDiff::from(16),
        witness_offset_percent: 50,
    }
}

/// A valid ballot by `creator` in the given round of `era`, with a hash unique to the three.
pub(crate) fn ballot_in(era: &Era, creator: PublicKey, round: u64) -> Message {
    let mut data = Vec::new();
    data.extend_from_slice(era.key_block_hash().as_bytes());
    data.extend_from_slice(creator.as_bytes());
    data.extend_from_slice(&round.to_le_bytes());
    Message {
        hash: hashing::hash(data),
        parent_hash: None,
        key_block_hash: era.key_block_hash(),
        round_id: RoundId::from(round),
        creator,
        kind: MessageKind::Ballot,
    }
}

/// Wraps a message back into the block shape the gossip intake delivers.
pub(crate) fn block_for(message: &Message, tick: Tick) -> Block {
    Block {
        summary: BlockSummary {
            hash: message.hash,
            parent_hash: message.parent_hash,
            key_block_hash: message.key_block_hash,
            round_id: message.round_id.value(),
            creator: Some(message.creator),
            kind_tag: message.kind.tag(),
            tick,
        },
        payload: vec![],
    }
}

/// An era store backed by a hash map.
#[derive(Default)]
pub(crate) struct InMemoryEraStorage {
    eras: Mutex<HashMap<Digest, Era>>,
    get_era_calls: AtomicUsize,
}

impl InMemoryEraStorage {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(InMemoryEraStorage::default())
    }

    pub(crate) fn with_eras<I: IntoIterator<Item = Era>>(eras: I) -> Arc<Self> {
        let storage = InMemoryEraStorage::new();
        {
            let mut map = storage.eras.lock().unwrap();
            for era in eras {
                map.insert(era.key_block_hash(), era);
            }
        }
        storage
    }

    /// How many times `get_era_unsafe` was called.
    pub(crate) fn get_era_calls(&self) -> usize {
        self.get_era_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn contains(&self, key: Digest) -> bool {
        self.eras.lock().unwrap().contains_key(&key)
    }
}

#[async_trait]
impl EraStorage for InMemoryEraStorage {
    async fn add_era(&self, era: Era) -> Result<(), StorageError> {
        self.eras.lock().unwrap().insert(era.key_block_hash(), era);
        Ok(())
    }

    async fn get_era_unsafe(&self, hash: Digest) -> Result<Era, StorageError> {
        self.get_era_calls.fetch_add(1, Ordering::SeqCst);
        self.eras
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or(StorageError::EraNotFound { era_key: hash })
    }

    async fn get_children(&self, hash: Digest) -> Result<Vec<Era>, StorageError> {
        Ok(self
            .eras
            .lock()
            .unwrap()
            .values()
            .filter(|era| era.parent_key_block_hash() == Some(hash))
            .cloned()
            .collect())
    }

    async fn get_childless_eras(&self) -> Result<Vec<Era>, StorageError> {
        let eras = self.eras.lock().unwrap();
        Ok(eras
            .values()
            .filter(|era| {
                !eras
                    .values()
                    .any(|other| other.parent_key_block_hash() == Some(era.key_block_hash()))
            })
            .cloned()
            .collect())
    }
}

/// Records relayed hashes instead of gossiping them.
#[derive(Default)]
pub(crate) struct RecordingRelay {
    relayed: Mutex<Vec<Digest>>,
}

impl RecordingRelay {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(RecordingRelay::default())
    }

    pub(crate) fn relayed(&self) -> Vec<Digest> {
        self.relayed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Relaying for RecordingRelay {
    async fn relay(&self, hashes: Vec<Digest>) -> anyhow::Result<()> {
        self.relayed.lock().unwrap().extend(hashes);
        Ok(())
    }
}

/// Records latest-message updates in call order.
#[derive(Default)]
pub(crate) struct RecordingForkChoice {
    updates: Mutex<Vec<(Digest, Message)>>,
}

impl RecordingForkChoice {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(RecordingForkChoice::default())
    }

    pub(crate) fn updates(&self) -> Vec<(Digest, Message)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForkChoiceManager for RecordingForkChoice {
    async fn update_latest_message(&self, era_key: Digest, message: Message) -> anyhow::Result<()> {
        self.updates.lock().unwrap().push((era_key, message));
        Ok(())
    }
}

/// A block pipeline that accepts everything.
pub(crate) struct NoopBlockExecutor;

#[async_trait]
impl BlockExecutor for NoopBlockExecutor {
    async fn execute(&self, _block: &Block) -> anyhow::Result<()> {
        Ok(())
    }
}

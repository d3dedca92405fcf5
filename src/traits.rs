//! Contracts of the supervisor's external collaborators.
//!
//! The supervisor tries to know as little as possible about the rest of the node: everything it
//! needs from storage, gossip and fork choice is behind the traits below, and tests drive it with
//! in-memory fakes.

use async_trait::async_trait;

use crate::{era::Era, error::StorageError, hashing::Digest, message::Block, message::Message};

/// The persisted era store.
#[async_trait]
pub trait EraStorage: Send + Sync {
    /// Idempotent upsert keyed by the era's key block hash.
    async fn add_era(&self, era: Era) -> Result<(), StorageError>;

    /// Returns the era, or fails with [`StorageError::EraNotFound`].
    ///
    /// "Unsafe" in the sense that the caller asserts the era exists; an unknown hash is not a
    /// recoverable condition at the call sites.
    async fn get_era_unsafe(&self, hash: Digest) -> Result<Era, StorageError>;

    /// Returns the known child eras; empty if none.
    async fn get_children(&self, hash: Digest) -> Result<Vec<Era>, StorageError>;

    /// Returns the current tips of the era tree.
    async fn get_childless_eras(&self) -> Result<Vec<Era>, StorageError>;
}

/// Broadcasts locally produced message hashes to peers.
///
/// Fire-and-forget: errors are non-fatal and only logged by the caller.
#[async_trait]
pub trait Relaying: Send + Sync {
    async fn relay(&self, hashes: Vec<Digest>) -> anyhow::Result<()>;
}

/// Receives per-era latest-message notifications; consulted elsewhere to pick parents.
#[async_trait]
pub trait ForkChoiceManager: Send + Sync {
    /// Idempotent per `(era_key, message.hash)`; the manager reconciles with its own persisted
    /// state on first observation per era.
    async fn update_latest_message(&self, era_key: Digest, message: Message) -> anyhow::Result<()>;
}

/// The block persist/execute pipeline.
///
/// Invoked after the issuing era validated a block and before it is propagated; the internals are
/// outside this core.
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    async fn execute(&self, block: &Block) -> anyhow::Result<()>;
}

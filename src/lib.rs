//! The era supervisor core of the Highway consensus protocol.
//!
//! Highway organizes consensus as a tree of time-bounded *eras*, each with its own bonded
//! validator snapshot and round-based message schedule. This crate provides the concurrent
//! control plane over that tree: the [`EraSupervisor`] owns one [`era_runtime::EraRuntime`] per
//! loaded era, drives their agendas through cancellable timer fibers, validates inbound blocks
//! against the era that issued them, and propagates latest-message observations down to every
//! descendant era so that later fork-choice queries see the full picture.
//!
//! The supervisor tries to know as little as possible about the rest of the node. Block
//! execution, the stores, the gossip relay and the fork-choice manager are collaborators behind
//! the traits in [`traits`]; the runtimes themselves are pure state machines that surface
//! everything they want done in the world as [`HighwayEvent`]s.

pub mod agenda;
pub mod config;
pub mod era;
pub mod era_runtime;
pub mod era_supervisor;
pub mod error;
pub mod event;
pub mod hashing;
pub mod leader_sequence;
pub mod message;
pub mod metrics;
#[cfg(test)]
pub(crate) mod testing;
pub mod time;
pub mod traits;
pub(crate) mod utils;
pub mod validators;

pub use agenda::{Action, Agenda, DelayedAction};
pub use config::{Config, HighwayConf, SyncCheck};
pub use era::Era;
pub use era_runtime::EraRuntime;
pub use era_supervisor::{EraEntry, EraSupervisor};
pub use error::{Error, MalformedBlockError, StorageError, ValidationError};
pub use event::HighwayEvent;
pub use hashing::Digest;
pub use message::{Block, BlockSummary, Message, MessageKind, RoundId};
pub use metrics::HighwayMetrics;
pub use time::{Tick, TickClock, TickDiff};
pub use traits::{BlockExecutor, EraStorage, ForkChoiceManager, Relaying};
pub use validators::{PublicKey, Validators};

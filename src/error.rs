use thiserror::Error;

use crate::{
    hashing::Digest,
    message::{MessageKind, RoundId},
    validators::PublicKey,
};

/// The error kinds surfaced by the supervisor's public operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The supervisor rejects new work because it is shutting down.
    #[error("consensus is shutting down")]
    ShuttingDown,

    /// The inbound block could not be normalized into a consensus message.
    #[error("malformed block: {0}")]
    Malformed(#[from] MalformedBlockError),

    /// The issuing era's runtime rejected the message. The block is dropped: no relay, no
    /// propagation, no event handling.
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] ValidationError),

    /// An underlying store or collaborator failed. No local recovery beyond logging.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Reasons a block fails to parse as a consensus message.
#[derive(Error, Debug)]
pub enum MalformedBlockError {
    #[error("block {hash:10} has no creator")]
    MissingCreator { hash: Digest },

    #[error("block {hash:10} has unknown message kind tag {tag}")]
    UnknownKindTag { hash: Digest, tag: u8 },

    #[error("block {hash:10} is missing its key block hash")]
    MissingKeyBlock { hash: Digest },
}

/// Reasons an era runtime rejects a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message {hash:10} was issued for a different era")]
    WrongEra { hash: Digest },

    #[error("creator {creator} is not bonded in this era")]
    UnbondedValidator { creator: PublicKey },

    #[error("{round_id} is outside the era's bounds")]
    RoundOutOfBounds { round_id: RoundId },

    #[error("parent {parent_hash:10} is not known in this era or its parent")]
    UnknownParent { parent_hash: Digest },

    #[error("creator {creator} already sent a {kind} message in {round_id}")]
    DoubleRound {
        creator: PublicKey,
        kind: MessageKind,
        round_id: RoundId,
    },
}

/// Failures of the underlying era store or its collaborators.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("era {era_key:10} not found in era storage")]
    EraNotFound { era_key: Digest },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

use std::fmt::{self, Display, Formatter};

use datasize::DataSize;
use serde::{Deserialize, Serialize};

use crate::{error::MalformedBlockError, hashing::Digest, time::Tick, validators::PublicKey};

/// The number of a round within an era, starting at zero.
#[derive(
    DataSize, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RoundId(pub(crate) u64);

impl RoundId {
    /// Returns the round's number.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns the next round.
    pub(crate) fn successor(self) -> RoundId {
        RoundId(self.0 + 1)
    }
}

impl Display for RoundId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "round {}", self.0)
    }
}

#[cfg(test)]
impl From<u64> for RoundId {
    fn from(arg: u64) -> RoundId {
        RoundId(arg)
    }
}

/// The kind of a consensus message, as produced by the round schedule.
#[derive(
    DataSize, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum MessageKind {
    /// The round leader's proposal.
    Lambda,
    /// A non-leader's confirmation of the leader's lambda message.
    LambdaResponse,
    /// The unconditional end-of-round witness message.
    Omega,
    /// A message citing earlier ones without proposing a block.
    Ballot,
    /// A proposal carrying a full block.
    Block,
}

impl MessageKind {
    /// The kind's stable wire tag, also fed into message hashes.
    pub(crate) fn tag(self) -> u8 {
        match self {
            MessageKind::Lambda => 0,
            MessageKind::LambdaResponse => 1,
            MessageKind::Omega => 2,
            MessageKind::Ballot => 3,
            MessageKind::Block => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<MessageKind> {
        match tag {
            0 => Some(MessageKind::Lambda),
            1 => Some(MessageKind::LambdaResponse),
            2 => Some(MessageKind::Omega),
            3 => Some(MessageKind::Ballot),
            4 => Some(MessageKind::Block),
            _ => None,
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Lambda => write!(f, "lambda"),
            MessageKind::LambdaResponse => write!(f, "lambda response"),
            MessageKind::Omega => write!(f, "omega"),
            MessageKind::Ballot => write!(f, "ballot"),
            MessageKind::Block => write!(f, "block"),
        }
    }
}

/// The normalized view of a consensus message: everything the era supervisor needs to route,
/// validate and propagate it, regardless of the wire shape it arrived in.
#[derive(DataSize, Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The message's own hash.
    pub hash: Digest,
    /// The hash of the message this one cites as its parent, if any.
    pub parent_hash: Option<Digest>,
    /// The key block hash of the era this message was issued in.
    pub key_block_hash: Digest,
    /// The round the message belongs to.
    pub round_id: RoundId,
    /// The bonded validator that created the message.
    pub creator: PublicKey,
    /// What role the message plays in the round schedule.
    pub kind: MessageKind,
}

impl Message {
    /// Normalizes an inbound block into a `Message`.
    ///
    /// This is the only parse point: everything downstream of the supervisor's entry operation
    /// works on `Message` values and can assume the fields below are present.
    pub fn from_block(block: &Block) -> Result<Message, MalformedBlockError> {
        let summary = &block.summary;
        let creator = summary
            .creator
            .ok_or(MalformedBlockError::MissingCreator { hash: summary.hash })?;
        let kind = MessageKind::from_tag(summary.kind_tag).ok_or(
            MalformedBlockError::UnknownKindTag {
                hash: summary.hash,
                tag: summary.kind_tag,
            },
        )?;
        if summary.key_block_hash == Digest::default() {
            return Err(MalformedBlockError::MissingKeyBlock { hash: summary.hash });
        }
        Ok(Message {
            hash: summary.hash,
            parent_hash: summary.parent_hash,
            key_block_hash: summary.key_block_hash,
            round_id: RoundId(summary.round_id),
            creator,
            kind,
        })
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} message {:10} by {} in {}",
            self.kind, self.hash, self.creator, self.round_id
        )
    }
}

/// The header-level summary of a block, as handed over by the gossip intake.
///
/// Fields that a well-formed consensus message must carry are optional here; [`Message::from_block`]
/// rejects summaries that lack them.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// The block's hash.
    pub hash: Digest,
    /// The hash of the cited parent message, if any.
    pub parent_hash: Option<Digest>,
    /// The key block hash of the issuing era; all zeros when absent.
    pub key_block_hash: Digest,
    /// The round the block was proposed in.
    pub round_id: u64,
    /// The claimed creator.
    pub creator: Option<PublicKey>,
    /// Wire tag of the message kind.
    pub kind_tag: u8,
    /// The tick the block was created at.
    pub tick: Tick,
}

/// An inbound block: the already-deserialized gossip item.
#[derive(DataSize, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The header-level summary.
    pub summary: BlockSummary,
    /// The opaque payload handed to the block execution pipeline.
    pub payload: Vec<u8>,
}

use std::fmt::{self, Display, Formatter};

use datasize::DataSize;

use crate::{era::Era, message::Message};

/// A domain event emitted by an era runtime.
///
/// Runtime methods are pure with respect to externally observable storage: everything they want
/// done in the world is surfaced as one of these, and the supervisor replays them as side effects
/// in emission order.
#[derive(DataSize, Debug, Clone, PartialEq, Eq)]
pub enum HighwayEvent {
    /// A switch message opened a child era.
    CreatedEra(Era),
    /// We created a round proposal.
    CreatedLambdaMessage(Message),
    /// We confirmed the round leader's proposal.
    CreatedLambdaResponse(Message),
    /// We created an end-of-round witness message.
    CreatedOmegaMessage(Message),
}

impl HighwayEvent {
    /// Returns the message carried by the event, if it carries one.
    pub fn message(&self) -> Option<&Message> {
        match self {
            HighwayEvent::CreatedEra(_) => None,
            HighwayEvent::CreatedLambdaMessage(message)
            | HighwayEvent::CreatedLambdaResponse(message)
            | HighwayEvent::CreatedOmegaMessage(message) => Some(message),
        }
    }
}

impl Display for HighwayEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HighwayEvent::CreatedEra(era) => write!(f, "created {}", era),
            HighwayEvent::CreatedLambdaMessage(message)
            | HighwayEvent::CreatedLambdaResponse(message)
            | HighwayEvent::CreatedOmegaMessage(message) => write!(f, "created {}", message),
        }
    }
}

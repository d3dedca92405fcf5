use std::fmt::{self, Display, Formatter};

use datasize::DataSize;
use serde::{Deserialize, Serialize};

use crate::{message::RoundId, time::Tick};

/// An action an era runtime asks to be woken up for.
///
/// The sum is closed and structurally comparable, so the supervisor's scheduling table can key on
/// `(key_block_hash, Action)`.
#[derive(
    DataSize, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Action {
    /// Open the given round: create the lambda message if we lead it, and chain the schedule.
    StartRound(RoundId),
    /// Create the end-of-round witness message.
    CreateOmegaMessage(RoundId),
    /// Respond to the round leader's lambda message if it is known and still unanswered.
    CreateLambdaResponse(RoundId),
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Action::StartRound(round_id) => write!(f, "start {}", round_id),
            Action::CreateOmegaMessage(round_id) => {
                write!(f, "create omega message for {}", round_id)
            }
            Action::CreateLambdaResponse(round_id) => {
                write!(f, "create lambda response for {}", round_id)
            }
        }
    }
}

/// An action bound to the tick it should fire at.
#[derive(DataSize, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedAction {
    /// When the action should fire.
    pub tick: Tick,
    /// What to do.
    pub action: Action,
}

impl DelayedAction {
    /// Creates a delayed action.
    pub fn new(tick: Tick, action: Action) -> Self {
        DelayedAction { tick, action }
    }
}

impl Display for DelayedAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} at tick {}", self.action, self.tick)
    }
}

/// The ordered set of future self-invocations an era runtime currently wants.
///
/// Two distinct actions scheduled for the same tick fire independently.
#[derive(DataSize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Agenda(Vec<DelayedAction>);

impl Agenda {
    /// Creates an empty agenda.
    pub fn new() -> Self {
        Agenda::default()
    }

    /// Appends an action firing at `tick`.
    pub fn push(&mut self, tick: Tick, action: Action) {
        self.0.push(DelayedAction::new(tick, action));
    }

    /// Returns whether the agenda holds no actions. An era with an empty agenda is finished.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of scheduled actions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the scheduled actions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &DelayedAction> {
        self.0.iter()
    }
}

impl IntoIterator for Agenda {
    type Item = DelayedAction;
    type IntoIter = std::vec::IntoIter<DelayedAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<DelayedAction> for Agenda {
    fn from_iter<I: IntoIterator<Item = DelayedAction>>(iter: I) -> Self {
        Agenda(iter.into_iter().collect())
    }
}

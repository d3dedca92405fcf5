use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Formatter},
    mem,
};

use datasize::DataSize;
use tracing::{debug, trace};

use crate::{
    agenda::{Action, Agenda},
    config::{Config, SyncCheck},
    era::Era,
    error::ValidationError,
    event::HighwayEvent,
    hashing::{self, Digest},
    leader_sequence::LeaderSequence,
    message::{Message, MessageKind, RoundId},
    time::{Tick, TickClock, TickDiff},
    validators::PublicKey,
};

/// The per-era state machine.
///
/// A runtime validates messages against its era's rules, reacts to scheduled agenda actions, and
/// produces new messages and era-creation events. It is pure with respect to externally
/// observable storage: all side effects are surfaced as [`HighwayEvent`]s, which the supervisor
/// replays, and follow-up wake-ups are returned as an [`Agenda`].
pub struct EraRuntime {
    era: Era,
    config: Config,
    clock: TickClock,
    /// Our own identity, if this node holds a signing key.
    our_id: Option<PublicKey>,
    is_synced: SyncCheck,
    leader_sequence: LeaderSequence,
    /// Ledger of all message hashes this runtime has seen or produced.
    known_messages: HashSet<Digest>,
    /// One message per `(round, creator, kind)`; a second distinct one is an equivocation.
    round_index: HashMap<(RoundId, PublicKey, MessageKind), Digest>,
    /// Rounds whose leader lambda we already confirmed.
    responded_rounds: HashSet<RoundId>,
    /// Switch messages we already opened child eras for.
    created_children: HashSet<Digest>,
    /// The hash of our own latest message, cited as parent by the next one.
    own_latest: Option<Digest>,
}

impl EraRuntime {
    /// Creates a runtime bound to the given era.
    pub fn new(
        era: Era,
        config: Config,
        clock: TickClock,
        our_id: Option<PublicKey>,
        is_synced: SyncCheck,
    ) -> Self {
        let leader_sequence = LeaderSequence::new(era.leader_seed(), era.validators());
        EraRuntime {
            era,
            config,
            clock,
            our_id,
            is_synced,
            leader_sequence,
            known_messages: HashSet::new(),
            round_index: HashMap::new(),
            responded_rounds: HashSet::new(),
            created_children: HashSet::new(),
            own_latest: None,
        }
    }

    /// The era this runtime is bound to.
    pub fn era(&self) -> &Era {
        &self.era
    }

    /// Produces the initial set of delayed actions, given the current position of the wall clock
    /// within the era's round schedule. Empty iff the era is already finished.
    pub fn init_agenda(&self) -> Agenda {
        let now = self.clock.now();
        if now >= self.era.end_tick() {
            return Agenda::new();
        }
        let round_id = self.current_round(now);
        let mut agenda = Agenda::new();
        agenda.push(self.round_start(round_id), Action::StartRound(round_id));
        // If the leader's lambda for the current round is already in the ledger and we still owe
        // a confirmation, get woken up for it right away.
        if self.leader_lambda(round_id).is_some() && self.can_respond(round_id) {
            agenda.push(now, Action::CreateLambdaResponse(round_id));
        }
        agenda
    }

    /// Checks a message against the era's rules. Does not mutate.
    ///
    /// [`EraRuntime::handle_message`] must never be called with a message that failed here.
    pub fn validate(&self, message: &Message) -> Result<(), ValidationError> {
        if message.key_block_hash != self.era.key_block_hash() {
            return Err(ValidationError::WrongEra { hash: message.hash });
        }
        if !self.era.validators().contains(&message.creator) {
            return Err(ValidationError::UnbondedValidator {
                creator: message.creator,
            });
        }
        if message.round_id > self.last_round() {
            return Err(ValidationError::RoundOutOfBounds {
                round_id: message.round_id,
            });
        }
        if let Some(parent_hash) = message.parent_hash {
            // The parent must live in this era, or be the switch block that opened it, which is
            // the closest a citation can get to the parent era.
            if parent_hash != self.era.key_block_hash() && !self.known_messages.contains(&parent_hash)
            {
                return Err(ValidationError::UnknownParent { parent_hash });
            }
        }
        if let Some(existing) = self
            .round_index
            .get(&(message.round_id, message.creator, message.kind))
        {
            // Re-delivery of the identical message is fine; a different one is an equivocation.
            if *existing != message.hash {
                return Err(ValidationError::DoubleRound {
                    creator: message.creator,
                    kind: message.kind,
                    round_id: message.round_id,
                });
            }
        }
        Ok(())
    }

    /// Reacts to an externally received, validated message.
    ///
    /// Idempotent under re-delivery: a message that is already in the ledger emits nothing.
    pub fn handle_message(&mut self, message: Message) -> (Vec<HighwayEvent>, ()) {
        if self.known_messages.contains(&message.hash) {
            trace!(%message, "message already known");
            return (Vec::new(), ());
        }
        let mut events = Vec::new();
        self.record(&message, &mut events);
        if message.kind == MessageKind::Lambda {
            self.maybe_respond(&message, &mut events);
        }
        (events, ())
    }

    /// Fires a scheduled action; returns the emitted events plus any follow-up delayed actions.
    ///
    /// Never fails under normal operation; the supervisor guards the replay of the returned
    /// events instead.
    pub fn handle_agenda(&mut self, action: Action) -> (Vec<HighwayEvent>, Agenda) {
        let mut events = Vec::new();
        let mut agenda = Agenda::new();
        match action {
            Action::StartRound(round_id) => {
                let start = self.round_start(round_id);
                if start >= self.era.end_tick() {
                    // The era ended before this round.
                    return (events, agenda);
                }
                if self.can_propose()
                    && self.our_id == Some(self.leader_of(round_id))
                    && self.own_message(round_id, MessageKind::Lambda).is_none()
                {
                    let lambda = self.new_own_message(round_id, MessageKind::Lambda, None);
                    events.push(HighwayEvent::CreatedLambdaMessage(lambda.clone()));
                    self.record(&lambda, &mut events);
                }
                if self.can_propose() {
                    agenda.push(
                        start + self.config.witness_offset(),
                        Action::CreateOmegaMessage(round_id),
                    );
                }
                let next = round_id.successor();
                if self.round_start(next) < self.era.end_tick() {
                    agenda.push(self.round_start(next), Action::StartRound(next));
                }
            }
            Action::CreateOmegaMessage(round_id) => {
                if self.can_propose() && self.own_message(round_id, MessageKind::Omega).is_none() {
                    let omega = self.new_own_message(round_id, MessageKind::Omega, None);
                    events.push(HighwayEvent::CreatedOmegaMessage(omega.clone()));
                    self.record(&omega, &mut events);
                }
            }
            Action::CreateLambdaResponse(round_id) => {
                if let Some(lambda_hash) = self.leader_lambda(round_id) {
                    if self.can_respond(round_id) {
                        self.create_lambda_response(round_id, lambda_hash, &mut events);
                    }
                }
            }
        }
        (events, agenda)
    }

    /// Adds a message to the ledger and opens a child era if it is a switch message.
    fn record(&mut self, message: &Message, events: &mut Vec<HighwayEvent>) {
        self.known_messages.insert(message.hash);
        self.round_index.insert(
            (message.round_id, message.creator, message.kind),
            message.hash,
        );
        // A proposal in the era's last round is a switch block: it opens a child era keyed by its
        // own hash. Every distinct switch message spawns its own branch of the era tree.
        if message.round_id == self.last_round()
            && matches!(message.kind, MessageKind::Lambda | MessageKind::Block)
            && self.created_children.insert(message.hash)
        {
            let child = self.era.child(message.hash, self.config.era_duration);
            debug!(parent = %self.era, child = %child, "switch message opened a child era");
            events.push(HighwayEvent::CreatedEra(child));
        }
    }

    /// Confirms a freshly received leader lambda, if we are in a position to.
    fn maybe_respond(&mut self, lambda: &Message, events: &mut Vec<HighwayEvent>) {
        let round_id = lambda.round_id;
        if !self.can_respond(round_id) || self.leader_of(round_id) != lambda.creator {
            return;
        }
        // A lambda observed long after its round ended no longer needs a confirmation.
        let now = self.clock.now();
        if self.round_start(round_id) + self.round_length() * 2 < now {
            debug!(%lambda, "not confirming a stale lambda message");
            return;
        }
        self.create_lambda_response(round_id, lambda.hash, events);
    }

    fn create_lambda_response(
        &mut self,
        round_id: RoundId,
        lambda_hash: Digest,
        events: &mut Vec<HighwayEvent>,
    ) {
        let response =
            self.new_own_message(round_id, MessageKind::LambdaResponse, Some(lambda_hash));
        self.responded_rounds.insert(round_id);
        self.record(&response, events);
        events.push(HighwayEvent::CreatedLambdaResponse(response));
    }

    /// Creates one of our own messages and makes it our latest.
    fn new_own_message(
        &mut self,
        round_id: RoundId,
        kind: MessageKind,
        parent: Option<Digest>,
    ) -> Message {
        let creator = self.our_id.expect("only bonded validators create messages");
        let parent_hash = parent
            .or(self.own_latest)
            .or_else(|| Some(self.era.key_block_hash()));
        let mut data = Vec::with_capacity(2 * Digest::LENGTH + PublicKey::LENGTH + 9);
        data.extend_from_slice(self.era.key_block_hash().as_bytes());
        data.extend_from_slice(&round_id.value().to_le_bytes());
        data.push(kind.tag());
        data.extend_from_slice(creator.as_bytes());
        if let Some(parent_hash) = parent_hash {
            data.extend_from_slice(parent_hash.as_bytes());
        }
        let hash = hashing::hash(data);
        let message = Message {
            hash,
            parent_hash,
            key_block_hash: self.era.key_block_hash(),
            round_id,
            creator,
            kind,
        };
        self.own_latest = Some(hash);
        message
    }

    /// Returns our own message of the given kind in the given round, if we made one.
    fn own_message(&self, round_id: RoundId, kind: MessageKind) -> Option<Digest> {
        let our_id = self.our_id?;
        self.round_index.get(&(round_id, our_id, kind)).copied()
    }

    /// Returns the round leader's lambda message, if it is in the ledger.
    fn leader_lambda(&self, round_id: RoundId) -> Option<Digest> {
        self.round_index
            .get(&(round_id, self.leader_of(round_id), MessageKind::Lambda))
            .copied()
    }

    /// Whether this node may create new messages at all.
    fn can_propose(&self) -> bool {
        self.our_id
            .map_or(false, |id| self.era.validators().contains(&id))
            && (self.is_synced)()
    }

    /// Whether this node should confirm the leader's lambda in the given round.
    fn can_respond(&self, round_id: RoundId) -> bool {
        self.can_propose()
            && self.our_id != Some(self.leader_of(round_id))
            && !self.responded_rounds.contains(&round_id)
    }

    fn leader_of(&self, round_id: RoundId) -> PublicKey {
        self.leader_sequence.leader(self.round_start(round_id))
    }

    fn round_length(&self) -> TickDiff {
        self.config.round_length()
    }

    fn round_start(&self, round_id: RoundId) -> Tick {
        self.era.start_tick() + self.round_length() * round_id.value()
    }

    /// The round containing `now`, clamped into the era's bounds.
    fn current_round(&self, now: Tick) -> RoundId {
        if now <= self.era.start_tick() {
            return RoundId(0);
        }
        let elapsed = now - self.era.start_tick();
        RoundId((elapsed.value() / self.round_length().value()).min(self.last_round().value()))
    }

    /// The last round that still starts within the era.
    fn last_round(&self) -> RoundId {
        let span = self.era.end_tick() - self.era.start_tick();
        RoundId((span.value() - 1) / self.round_length().value())
    }
}

impl Debug for EraRuntime {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("EraRuntime")
            .field("era", &self.era)
            .field("our_id", &self.our_id)
            .field("known_messages", &self.known_messages.len())
            .field("responded_rounds", &self.responded_rounds)
            .finish()
    }
}

impl DataSize for EraRuntime {
    const IS_DYNAMIC: bool = true;

    const STATIC_HEAP_SIZE: usize = 0;

    #[inline]
    fn estimate_heap_size(&self) -> usize {
        // Destructure self, so we can't miss any fields. The sync check is a shared closure
        // handle with no measurable heap of its own.
        let EraRuntime {
            era,
            config,
            clock,
            our_id,
            is_synced: _,
            leader_sequence,
            known_messages,
            round_index,
            responded_rounds,
            created_children,
            own_latest,
        } = self;

        let round_index_heap = round_index.capacity()
            * mem::size_of::<((RoundId, PublicKey, MessageKind), Digest)>();

        era.estimate_heap_size()
            .saturating_add(config.estimate_heap_size())
            .saturating_add(clock.estimate_heap_size())
            .saturating_add(our_id.estimate_heap_size())
            .saturating_add(leader_sequence.estimate_heap_size())
            .saturating_add(known_messages.estimate_heap_size())
            .saturating_add(round_index_heap)
            .saturating_add(responded_rounds.estimate_heap_size())
            .saturating_add(created_children.estimate_heap_size())
            .saturating_add(own_latest.estimate_heap_size())
    }
}

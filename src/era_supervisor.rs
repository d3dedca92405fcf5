//! The era supervisor: the concurrent control plane of the Highway consensus protocol.
//!
//! The supervisor owns one [`EraRuntime`] per loaded era, a scheduling table of pending timer
//! fibers, and the handles to its external collaborators. It tries to know as little as possible
//! about the protocol itself: the runtimes decide *what* happens, the supervisor decides *when*
//! and replays their domain events as side effects.

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, Weak,
    },
};

use itertools::Itertools;
use prometheus::Registry;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::{
    agenda::{Action, Agenda},
    config::HighwayConf,
    era::Era,
    era_runtime::EraRuntime,
    error::Error,
    event::HighwayEvent,
    hashing::Digest,
    message::{Block, Message, MessageKind},
    metrics::HighwayMetrics,
    time::TickClock,
    traits::{BlockExecutor, EraStorage, ForkChoiceManager, Relaying},
    utils::KeyedBfs,
};

#[cfg(test)]
mod tests;

/// A loaded era: its record, its runtime, and the child eras it is known to have.
///
/// The child links are keys, not pointers; they are resolved through the supervisor's era map, so
/// the era tree carries no ownership cycles. External callers receive clones of this entry as
/// read-only snapshots.
#[derive(Clone)]
pub struct EraEntry {
    era: Era,
    /// The per-era serialization point: message and agenda handling on one runtime never overlap.
    runtime: Arc<tokio::sync::Mutex<EraRuntime>>,
    children: HashSet<Digest>,
}

impl EraEntry {
    /// The era's persisted record.
    pub fn era(&self) -> &Era {
        &self.era
    }

    /// Key block hashes of the era's known children.
    pub fn children(&self) -> &HashSet<Digest> {
        &self.children
    }
}

impl Debug for EraEntry {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "EraEntry {{ era: {}, children: {} }}",
            self.era,
            self.children.len()
        )
    }
}

struct Inner {
    conf: HighwayConf,
    clock: TickClock,
    /// Monotonic false-to-true; checked before any state mutation that would outlive a shutdown.
    is_shutdown: AtomicBool,
    eras: RwLock<HashMap<Digest, EraEntry>>,
    /// One entry per live timer fiber that has not fired yet.
    schedule: Mutex<HashMap<(Digest, Action), JoinHandle<()>>>,
    /// Serializes all first-time era loads. Cold loads are rare relative to message traffic, so a
    /// single global permit is enough.
    load_semaphore: Semaphore,
    era_storage: Arc<dyn EraStorage>,
    relaying: Arc<dyn Relaying>,
    fork_choice: Arc<dyn ForkChoiceManager>,
    block_executor: Arc<dyn BlockExecutor>,
    metrics: HighwayMetrics,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Timer fibers only hold weak handles, so the last strong handle going away must take
        // any still-sleeping fibers with it.
        if let Ok(mut schedule) = self.schedule.lock() {
            for (_, handle) in schedule.drain() {
                handle.abort();
            }
        }
    }
}

/// The era supervisor.
///
/// Cheap to clone; all clones share the same state. Dropping the last clone aborts any timers
/// that are still pending, but an orderly exit should call [`EraSupervisor::shutdown`].
#[derive(Clone)]
pub struct EraSupervisor {
    inner: Arc<Inner>,
}

impl EraSupervisor {
    /// Creates a supervisor and rebuilds the active frontier of eras from storage.
    ///
    /// Adds the genesis era to storage if it is absent, then walks the stored era tree upward
    /// from its childless tips and starts every era whose round schedule still has work to do.
    pub async fn new(
        conf: HighwayConf,
        era_storage: Arc<dyn EraStorage>,
        relaying: Arc<dyn Relaying>,
        fork_choice: Arc<dyn ForkChoiceManager>,
        block_executor: Arc<dyn BlockExecutor>,
        registry: &Registry,
    ) -> Result<Self, anyhow::Error> {
        let metrics = HighwayMetrics::new(registry)?;
        let clock = TickClock::new(conf.config.tick_unit);
        let supervisor = EraSupervisor {
            inner: Arc::new(Inner {
                conf,
                clock,
                is_shutdown: AtomicBool::new(false),
                eras: RwLock::new(HashMap::new()),
                schedule: Mutex::new(HashMap::new()),
                load_semaphore: Semaphore::new(1),
                era_storage,
                relaying,
                fork_choice,
                block_executor,
                metrics,
            }),
        };
        supervisor.bootstrap().await?;
        Ok(supervisor)
    }

    /// Validates an inbound block against its issuing era and feeds it through the protocol.
    pub async fn validate_and_add_block(&self, block: &Block) -> Result<(), Error> {
        if self.inner.is_shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let message = Message::from_block(block)?;
        trace!(%message, "received block");
        let entry = self.load(message.key_block_hash).await?;
        entry.runtime.lock().await.validate(&message)?;
        self.inner
            .block_executor
            .execute(block)
            .await
            .map_err(crate::error::StorageError::Other)?;
        self.propagate_latest_message(&message).await?;
        let (events, ()) = entry.runtime.lock().await.handle_message(message);
        self.inner.metrics.messages_handled.inc();
        self.handle_events(events).await
    }

    /// Returns a point-in-time copy of the loaded eras. Not ordered.
    pub fn eras(&self) -> Vec<EraEntry> {
        self.inner
            .eras
            .read()
            .expect("eras lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Sets the shutdown flag and cancels every outstanding scheduled fiber.
    ///
    /// Safe to call more than once; calls after the first are no-ops. Fibers that are already
    /// mid-execution complete best-effort and are not awaited.
    pub async fn shutdown(&self) {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<((Digest, Action), JoinHandle<()>)> = self
            .inner
            .schedule
            .lock()
            .expect("schedule table poisoned")
            .drain()
            .collect();
        for ((era_key, action), handle) in handles {
            debug!(era_id = %era_key, %action, "cancelling scheduled action");
            handle.abort();
        }
        info!("era supervisor shut down");
    }

    /// Performs the startup bootstrap: genesis insertion and reconstruction of the active tips.
    async fn bootstrap(&self) -> Result<(), Error> {
        let genesis = Era::genesis(
            &self.inner.conf.genesis_summary,
            self.inner.conf.config.era_duration,
            self.inner.conf.genesis_validators.clone(),
        );
        let genesis_key = genesis.key_block_hash();
        self.inner.era_storage.add_era(genesis).await?;
        info!(era_id = %genesis_key, "genesis era is in storage");

        for era in self.collect_active_eras().await? {
            self.load(era.key_block_hash()).await?;
        }
        Ok(())
    }

    /// Collects every stored era whose agenda is non-empty: the childless tips, plus any of their
    /// ancestors that are still running.
    ///
    /// The walk is upward because a finished tip whose parent runs overlapping rounds past the
    /// tip's birth must keep the parent ticking.
    async fn collect_active_eras(&self) -> Result<Vec<Era>, Error> {
        let mut active = Vec::new();
        let mut bfs = KeyedBfs::new();
        let mut frontier: Vec<Era> = Vec::new();
        for tip in self.inner.era_storage.get_childless_eras().await? {
            if bfs.mark_visited(tip.key_block_hash()) {
                frontier.push(tip);
            }
        }
        while let Some(era) = frontier.pop() {
            let parent = era.parent_key_block_hash();
            if self.is_active(&era) {
                active.push(era);
            }
            if let Some(parent_key) = parent {
                if bfs.mark_visited(parent_key) {
                    frontier.push(self.inner.era_storage.get_era_unsafe(parent_key).await?);
                }
            }
        }
        debug!(count = active.len(), "collected active eras");
        Ok(active)
    }

    /// An era is active iff its initial agenda is non-empty.
    fn is_active(&self, era: &Era) -> bool {
        !self.make_runtime(era.clone()).init_agenda().is_empty()
    }

    fn make_runtime(&self, era: Era) -> EraRuntime {
        EraRuntime::new(
            era,
            self.inner.conf.config.clone(),
            self.inner.clock,
            self.inner.conf.bonded_validator,
            self.inner.conf.is_synced.clone(),
        )
    }

    /// Returns the entry for the given era, instantiating it from storage on first reference.
    ///
    /// Double-checked through the load semaphore: for any era, [`EraSupervisor::start`] runs at
    /// most once during the supervisor's lifetime.
    async fn load(&self, key_block_hash: Digest) -> Result<EraEntry, Error> {
        if let Some(entry) = self
            .inner
            .eras
            .read()
            .expect("eras lock poisoned")
            .get(&key_block_hash)
        {
            return Ok(entry.clone());
        }
        let _permit = self
            .inner
            .load_semaphore
            .acquire()
            .await
            .expect("load semaphore closed");
        if let Some(entry) = self
            .inner
            .eras
            .read()
            .expect("eras lock poisoned")
            .get(&key_block_hash)
        {
            return Ok(entry.clone());
        }
        self.start(key_block_hash).await
    }

    /// Builds the runtime for a stored era, registers it, and schedules its initial agenda.
    ///
    /// Callers must hold the load semaphore; the era must exist in storage.
    async fn start(&self, key_block_hash: Digest) -> Result<EraEntry, Error> {
        let era = self.inner.era_storage.get_era_unsafe(key_block_hash).await?;
        let runtime = self.make_runtime(era.clone());
        let agenda = runtime.init_agenda();
        let children: HashSet<Digest> = self
            .inner
            .era_storage
            .get_children(key_block_hash)
            .await?
            .into_iter()
            .map(|child| child.key_block_hash())
            .collect();
        let entry = EraEntry {
            era,
            runtime: Arc::new(tokio::sync::Mutex::new(runtime)),
            children,
        };
        {
            let mut eras = self.inner.eras.write().expect("eras lock poisoned");
            let previous = eras.insert(key_block_hash, entry.clone());
            assert!(
                previous.is_none(),
                "era {:10} was started twice",
                key_block_hash
            );
        }
        self.inner.metrics.loaded_eras.inc();
        info!(era_id = %key_block_hash, actions = agenda.len(), "started era");
        self.schedule(key_block_hash, &entry.runtime, agenda);
        Ok(entry)
    }

    /// Spawns one cancellable timer fiber per delayed action and installs it in the scheduling
    /// table. Delays for past ticks are clamped to zero.
    fn schedule(
        &self,
        era_key: Digest,
        runtime: &Arc<tokio::sync::Mutex<EraRuntime>>,
        agenda: Agenda,
    ) {
        if agenda.is_empty() {
            return;
        }
        let now = self.inner.clock.now();
        let mut schedule = self.inner.schedule.lock().expect("schedule table poisoned");
        // Checked under the table lock: a concurrent shutdown either sees our entries when it
        // drains the table, or has already set the flag and we bail out here.
        if self.inner.is_shutdown.load(Ordering::SeqCst) {
            return;
        }
        for delayed in agenda {
            let delay = self.inner.clock.delay_until(now, delayed.tick);
            let action = delayed.action;
            let weak = Arc::downgrade(&self.inner);
            let runtime = Arc::clone(runtime);
            trace!(era_id = %era_key, %action, ?delay, "scheduling action");
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let inner = match Weak::upgrade(&weak) {
                    Some(inner) => inner,
                    None => return,
                };
                let supervisor = EraSupervisor { inner };
                supervisor.fire(era_key, action, runtime).await;
            });
            let previous = schedule.insert((era_key, action), handle);
            assert!(
                previous.is_none(),
                "{} was scheduled twice for era {:10}",
                action,
                era_key
            );
        }
    }

    /// The body of a timer fiber.
    ///
    /// Removes its own table entry first, so the table only ever holds fibers that have not fired
    /// yet, then runs the action. Failures inside the body are logged and swallowed; the action
    /// is not retried, the protocol's redundant round schedule recovers instead.
    async fn fire(&self, era_key: Digest, action: Action, runtime: Arc<tokio::sync::Mutex<EraRuntime>>) {
        self.inner
            .schedule
            .lock()
            .expect("schedule table poisoned")
            .remove(&(era_key, action));
        if self.inner.is_shutdown.load(Ordering::SeqCst) {
            return;
        }
        trace!(era_id = %era_key, %action, "scheduled action fired");
        let (events, next_agenda) = runtime.lock().await.handle_agenda(action);
        if let Err(err) = self.handle_events(events).await {
            error!(%err, era_id = %era_key, %action, "scheduled action failed; dropping");
        }
        self.schedule(era_key, &runtime, next_agenda);
    }

    /// Replays a runtime's domain events as side effects, in emission order.
    async fn handle_events(&self, events: Vec<HighwayEvent>) -> Result<(), Error> {
        for event in events {
            match event {
                HighwayEvent::CreatedEra(era) => {
                    info!(era_id = %era.key_block_hash(), "created era");
                    let key = era.key_block_hash();
                    let parent_key = era.parent_key_block_hash();
                    self.inner.era_storage.add_era(era).await?;
                    let _child = self.load(key).await?;
                    if let Some(parent_key) = parent_key {
                        let mut eras = self.inner.eras.write().expect("eras lock poisoned");
                        if let Some(parent) = eras.get_mut(&parent_key) {
                            parent.children.insert(key);
                        }
                    }
                }
                HighwayEvent::CreatedLambdaMessage(message)
                | HighwayEvent::CreatedLambdaResponse(message)
                | HighwayEvent::CreatedOmegaMessage(message) => {
                    debug!(%message, "created message");
                    if message.kind == MessageKind::Lambda {
                        self.inner.metrics.lambda_messages_created.inc();
                    }
                    if let Err(err) = self.inner.relaying.relay(vec![message.hash]).await {
                        warn!(%err, %message, "failed to relay message");
                    }
                    self.propagate_latest_message(&message).await?;
                }
            }
        }
        Ok(())
    }

    /// Notifies fork choice of a latest-message observation, for the issuing era and for every
    /// descendant era loaded now or during the traversal.
    ///
    /// Descendants must hear about ancestor messages even where the creator is unbonded in
    /// between: a stray message in the grandparent must not be lost by the grandchild. Children
    /// that are cold in memory are loaded as the traversal encounters them, so no branch is
    /// silently skipped.
    async fn propagate_latest_message(&self, message: &Message) -> Result<(), Error> {
        let origin = message.key_block_hash;
        self.inner
            .fork_choice
            .update_latest_message(origin, message.clone())
            .await
            .map_err(crate::error::StorageError::Other)?;
        let mut bfs = KeyedBfs::new();
        bfs.mark_visited(origin);
        let origin_children = {
            let eras = self.inner.eras.read().expect("eras lock poisoned");
            match eras.get(&origin) {
                Some(entry) => entry.children.clone(),
                None => return Ok(()),
            }
        };
        for child in origin_children {
            bfs.enqueue(child);
        }
        while let Some(key) = bfs.next() {
            let entry = self.load(key).await?;
            self.inner
                .fork_choice
                .update_latest_message(key, message.clone())
                .await
                .map_err(crate::error::StorageError::Other)?;
            for child in entry.children {
                bfs.enqueue(child);
            }
        }
        Ok(())
    }

    /// The pending entries of the scheduling table, for test inspection.
    #[cfg(test)]
    pub(crate) fn scheduled(&self) -> Vec<(Digest, Action)> {
        self.inner
            .schedule
            .lock()
            .expect("schedule table poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// The entry of a single era, for test inspection.
    #[cfg(test)]
    pub(crate) fn era_entry(&self, key_block_hash: Digest) -> Option<EraEntry> {
        self.inner
            .eras
            .read()
            .expect("eras lock poisoned")
            .get(&key_block_hash)
            .cloned()
    }
}

impl Debug for EraSupervisor {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let keys = self
            .inner
            .eras
            .read()
            .expect("eras lock poisoned")
            .keys()
            .map(|key| format!("{:10}", key))
            .join(", ");
        write!(f, "EraSupervisor {{ eras: [{}], .. }}", keys)
    }
}

use std::{sync::Arc, time::Duration};

use prometheus::Registry;

use super::*;
use crate::{
    config::Config,
    error::StorageError,
    hashing,
    leader_sequence::LeaderSequence,
    message::RoundId,
    testing::{
        ballot_in, block_for, test_config, InMemoryEraStorage, NoopBlockExecutor,
        RecordingForkChoice, RecordingRelay,
    },
    time::{Tick, TickDiff},
    validators::{PublicKey, Validators},
};

const ALICE: PublicKey = PublicKey::new([1; 32]);
const BOB: PublicKey = PublicKey::new([2; 32]);

fn single_validator() -> Validators {
    vec![(ALICE, 10)].into_iter().collect()
}

fn two_validators() -> Validators {
    vec![(ALICE, 3), (BOB, 4)].into_iter().collect()
}

fn genesis_summary(tick: Tick) -> crate::message::BlockSummary {
    let hash = hashing::hash(b"genesis block");
    crate::message::BlockSummary {
        hash,
        parent_hash: None,
        key_block_hash: hash,
        round_id: 0,
        creator: None,
        kind_tag: 4,
        tick,
    }
}

fn conf(
    config: Config,
    validators: Validators,
    bonded: Option<PublicKey>,
    genesis_tick: Tick,
) -> HighwayConf {
    HighwayConf {
        config,
        genesis_summary: genesis_summary(genesis_tick),
        genesis_validators: validators,
        bonded_validator: bonded,
        is_synced: Arc::new(|| true),
    }
}

struct TestHarness {
    supervisor: EraSupervisor,
    storage: Arc<InMemoryEraStorage>,
    relay: Arc<RecordingRelay>,
    fork_choice: Arc<RecordingForkChoice>,
    // Keeps the metrics registered for the supervisor's lifetime.
    _registry: Registry,
}

async fn setup(conf: HighwayConf, stored_eras: Vec<Era>) -> TestHarness {
    let storage = InMemoryEraStorage::with_eras(stored_eras);
    let relay = RecordingRelay::new();
    let fork_choice = RecordingForkChoice::new();
    let registry = Registry::new();
    let supervisor = EraSupervisor::new(
        conf,
        storage.clone(),
        relay.clone(),
        fork_choice.clone(),
        Arc::new(NoopBlockExecutor),
        &registry,
    )
    .await
    .expect("supervisor setup should succeed");
    TestHarness {
        supervisor,
        storage,
        relay,
        fork_choice,
        _registry: registry,
    }
}

/// Lets spawned fibers run to completion on the current-thread test runtime.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn now() -> Tick {
    crate::time::TickClock::new(test_config().tick_unit).now()
}

fn era_after(parent: &Era, name: &[u8]) -> Era {
    parent.child(hashing::hash(name), test_config().era_duration)
}

#[tokio::test(start_paused = true)]
async fn genesis_only_startup_schedules_the_first_round() {
    let start = now() + TickDiff::from(10);
    let harness = setup(
        conf(test_config(), single_validator(), Some(ALICE), start),
        vec![],
    )
    .await;
    let genesis_key = genesis_summary(start).hash;

    assert_eq!(harness.supervisor.eras().len(), 1);
    assert_eq!(
        harness.supervisor.scheduled(),
        vec![(genesis_key, Action::StartRound(RoundId::from(0)))]
    );

    // At the round's start tick the fiber fires, deregisters itself, and the sole bonded
    // validator's lambda message goes out.
    tokio::time::advance(Duration::from_secs(11)).await;
    settle().await;

    let relayed = harness.relay.relayed();
    assert_eq!(relayed.len(), 1);
    let updates = harness.fork_choice.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, genesis_key);
    assert_eq!(updates[0].1.hash, relayed[0]);
    assert_eq!(updates[0].1.kind, MessageKind::Lambda);

    let scheduled = harness.supervisor.scheduled();
    assert!(!scheduled.contains(&(genesis_key, Action::StartRound(RoundId::from(0)))));
    assert_eq!(scheduled.len(), 2, "omega and the next round are pending");
}

#[tokio::test(start_paused = true)]
async fn past_round_starts_fire_promptly() {
    // The era began a tick ago: the delay for the current round clamps to zero. Sixteen-tick
    // rounds keep the follow-up omega comfortably in the future.
    let config = Config {
        init_round_exponent: 4,
        era_duration: TickDiff::from(32),
        ..test_config()
    };
    let start = now() - TickDiff::from(1);
    let harness = setup(
        conf(config, single_validator(), Some(ALICE), start),
        vec![],
    )
    .await;
    settle().await;

    let relayed = harness.relay.relayed();
    assert_eq!(relayed.len(), 1, "the round 0 lambda went out without a wait");
    assert_eq!(harness.fork_choice.updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_block_lazily_loads_its_era() {
    let start = now() + TickDiff::from(10);
    let genesis = Era::genesis(&genesis_summary(start), TickDiff::from(16), two_validators());
    // A child era that is already finished: childless, but inactive at startup.
    let child = Era::new(
        hashing::hash(b"finished child"),
        Some(genesis.key_block_hash()),
        now() - TickDiff::from(40),
        now() - TickDiff::from(24),
        two_validators(),
        7,
    );
    let harness = setup(
        conf(test_config(), two_validators(), None, start),
        vec![child.clone()],
    )
    .await;

    assert_eq!(harness.supervisor.eras().len(), 1, "only genesis is active");
    let scheduled_before = harness.supervisor.scheduled();

    let ballot = ballot_in(&child, BOB, 0);
    let block = block_for(&ballot, child.start_tick());
    harness
        .supervisor
        .validate_and_add_block(&block)
        .await
        .expect("block in a cold era should be accepted");

    assert_eq!(harness.supervisor.eras().len(), 2);
    let genesis_entry = harness
        .supervisor
        .era_entry(genesis.key_block_hash())
        .expect("genesis entry");
    assert!(genesis_entry.children().contains(&child.key_block_hash()));
    // The child is finished, so its agenda added nothing to the schedule.
    assert_eq!(harness.supervisor.scheduled(), scheduled_before);
}

#[tokio::test(start_paused = true)]
async fn latest_messages_reach_all_descendants_in_order() {
    let start = now() + TickDiff::from(10);
    let genesis = Era::genesis(&genesis_summary(start), TickDiff::from(16), two_validators());
    let child = era_after(&genesis, b"child");
    let grandchild = era_after(&child, b"grandchild");
    let harness = setup(
        conf(test_config(), two_validators(), None, start),
        vec![child.clone(), grandchild.clone()],
    )
    .await;
    assert_eq!(harness.supervisor.eras().len(), 3);

    let ballot = ballot_in(&genesis, BOB, 0);
    let block = block_for(&ballot, start);
    harness
        .supervisor
        .validate_and_add_block(&block)
        .await
        .expect("ballot should be accepted");

    let observed: Vec<(Digest, Digest)> = harness
        .fork_choice
        .updates()
        .into_iter()
        .map(|(era_key, message)| (era_key, message.hash))
        .collect();
    assert_eq!(
        observed,
        vec![
            (genesis.key_block_hash(), ballot.hash),
            (child.key_block_hash(), ballot.hash),
            (grandchild.key_block_hash(), ballot.hash),
        ]
    );
}

#[tokio::test]
async fn concurrent_blocks_load_their_era_exactly_once() {
    let genesis_tick = now() - TickDiff::from(100);
    let harness = setup(
        conf(test_config(), two_validators(), None, genesis_tick),
        vec![],
    )
    .await;
    // The genesis era is long finished, so nothing was started at setup.
    assert!(harness.supervisor.eras().is_empty());
    assert_eq!(harness.storage.get_era_calls(), 0);

    let genesis = Era::genesis(
        &genesis_summary(genesis_tick),
        TickDiff::from(16),
        two_validators(),
    );
    let ballot = ballot_in(&genesis, BOB, 0);
    let block = block_for(&ballot, genesis_tick);

    let mut tasks = Vec::new();
    for _ in 0..100 {
        let supervisor = harness.supervisor.clone();
        let block = block.clone();
        tasks.push(tokio::spawn(async move {
            supervisor.validate_and_add_block(&block).await
        }));
    }
    for task in tasks {
        task.await
            .expect("task should not panic")
            .expect("block should be accepted");
    }

    assert_eq!(harness.storage.get_era_calls(), 1, "start ran exactly once");
    assert_eq!(harness.supervisor.eras().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_all_scheduled_fibers() {
    let start = now() + TickDiff::from(10);
    let genesis = Era::genesis(&genesis_summary(start), TickDiff::from(16), single_validator());
    let c1 = era_after(&genesis, b"c1");
    let c2 = era_after(&c1, b"c2");
    let c3 = era_after(&c2, b"c3");
    let c4 = era_after(&c3, b"c4");
    let harness = setup(
        conf(test_config(), single_validator(), Some(ALICE), start),
        vec![c1, c2, c3, c4.clone()],
    )
    .await;
    assert_eq!(harness.supervisor.scheduled().len(), 5);

    harness.supervisor.shutdown().await;
    assert!(harness.supervisor.scheduled().is_empty());

    // None of the cancelled rounds ever produces an effect.
    tokio::time::advance(Duration::from_secs(3600)).await;
    settle().await;
    assert!(harness.relay.relayed().is_empty());
    assert!(harness.fork_choice.updates().is_empty());

    let ballot = ballot_in(&c4, ALICE, 0);
    let result = harness
        .supervisor
        .validate_and_add_block(&block_for(&ballot, start))
        .await;
    assert!(matches!(result, Err(Error::ShuttingDown)));

    // Repeated shutdowns are no-ops.
    harness.supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn switch_block_creates_and_schedules_the_child_era() {
    let start = now() + TickDiff::from(10);
    // A single-round era: any proposal in round 0 is a switch block.
    let config = Config {
        era_duration: TickDiff::from(4),
        ..test_config()
    };
    let harness = setup(conf(config, two_validators(), None, start), vec![]).await;
    let genesis_key = genesis_summary(start).hash;

    let genesis_entry = harness
        .supervisor
        .era_entry(genesis_key)
        .expect("genesis entry");
    let mut switch = ballot_in(genesis_entry.era(), BOB, 0);
    switch.kind = MessageKind::Block;
    harness
        .supervisor
        .validate_and_add_block(&block_for(&switch, start))
        .await
        .expect("switch block should be accepted");

    let child_key = switch.hash;
    let child_entry = harness
        .supervisor
        .era_entry(child_key)
        .expect("child era should be loaded");
    assert_eq!(
        child_entry.era().parent_key_block_hash(),
        Some(genesis_key)
    );
    assert!(harness.storage.contains(child_key), "child era persisted");
    let genesis_entry = harness
        .supervisor
        .era_entry(genesis_key)
        .expect("genesis entry");
    assert!(genesis_entry.children().contains(&child_key));
    assert!(harness
        .supervisor
        .scheduled()
        .contains(&(child_key, Action::StartRound(RoundId::from(0)))));
}

#[tokio::test(start_paused = true)]
async fn lambda_response_effects_follow_emission_order() {
    let start = now() + TickDiff::from(10);
    // Plenty of rounds, so Bob is certain to lead one before the last.
    let config = Config {
        era_duration: TickDiff::from(128),
        ..test_config()
    };
    let harness = setup(
        conf(config.clone(), two_validators(), Some(ALICE), start),
        vec![],
    )
    .await;
    let genesis_key = genesis_summary(start).hash;
    let genesis_entry = harness
        .supervisor
        .era_entry(genesis_key)
        .expect("genesis entry");

    let leaders = LeaderSequence::new(
        genesis_entry.era().leader_seed(),
        genesis_entry.era().validators(),
    );
    let bob_round = (0..31u64)
        .find(|round| leaders.leader(start + config.round_length() * *round) == BOB)
        .expect("bob never led a round");

    let mut lambda = ballot_in(genesis_entry.era(), BOB, bob_round);
    lambda.kind = MessageKind::Lambda;
    harness
        .supervisor
        .validate_and_add_block(&block_for(&lambda, start))
        .await
        .expect("lambda should be accepted");

    // Exactly one response went out, and fork choice heard the lambda before the response.
    let relayed = harness.relay.relayed();
    assert_eq!(relayed.len(), 1);
    let observed: Vec<(Digest, Digest)> = harness
        .fork_choice
        .updates()
        .into_iter()
        .map(|(era_key, message)| (era_key, message.hash))
        .collect();
    assert_eq!(
        observed,
        vec![(genesis_key, lambda.hash), (genesis_key, relayed[0])]
    );
}

#[tokio::test]
async fn block_in_an_unknown_era_fails_cleanly() {
    let harness = setup(
        conf(test_config(), two_validators(), None, now() - TickDiff::from(100)),
        vec![],
    )
    .await;
    let stray_era = Era::new(
        hashing::hash(b"never stored"),
        None,
        Tick::from(1),
        Tick::from(17),
        two_validators(),
        0,
    );
    let ballot = ballot_in(&stray_era, ALICE, 0);
    let result = harness
        .supervisor
        .validate_and_add_block(&block_for(&ballot, Tick::from(1)))
        .await;
    assert!(matches!(
        result,
        Err(Error::Storage(StorageError::EraNotFound { .. }))
    ));
}

#[tokio::test]
async fn malformed_blocks_are_rejected() {
    let harness = setup(
        conf(test_config(), two_validators(), None, now() - TickDiff::from(100)),
        vec![],
    )
    .await;
    let genesis = Era::genesis(
        &genesis_summary(now() - TickDiff::from(100)),
        TickDiff::from(16),
        two_validators(),
    );
    let ballot = ballot_in(&genesis, BOB, 0);
    let mut block = block_for(&ballot, Tick::from(1));
    block.summary.creator = None;
    let result = harness.supervisor.validate_and_add_block(&block).await;
    assert!(matches!(result, Err(Error::Malformed(_))));
}

#[tokio::test]
async fn invalid_blocks_are_dropped_without_side_effects() {
    let genesis_tick = now() - TickDiff::from(100);
    let harness = setup(
        conf(test_config(), two_validators(), None, genesis_tick),
        vec![],
    )
    .await;
    let genesis = Era::genesis(
        &genesis_summary(genesis_tick),
        TickDiff::from(16),
        two_validators(),
    );
    let ballot = ballot_in(&genesis, PublicKey::new([9; 32]), 0);
    let result = harness
        .supervisor
        .validate_and_add_block(&block_for(&ballot, genesis_tick))
        .await;
    assert!(matches!(result, Err(Error::InvalidBlock(_))));
    assert!(harness.relay.relayed().is_empty());
    assert!(harness.fork_choice.updates().is_empty());
}

#[tokio::test]
async fn finished_eras_still_serve_messages() {
    // All stored eras are finished: the supervisor comes up with an empty schedule.
    let genesis_tick = now() - TickDiff::from(100);
    let harness = setup(
        conf(test_config(), two_validators(), None, genesis_tick),
        vec![],
    )
    .await;
    assert!(harness.supervisor.eras().is_empty());
    assert!(harness.supervisor.scheduled().is_empty());

    let genesis = Era::genesis(
        &genesis_summary(genesis_tick),
        TickDiff::from(16),
        two_validators(),
    );
    let ballot = ballot_in(&genesis, BOB, 1);
    harness
        .supervisor
        .validate_and_add_block(&block_for(&ballot, genesis_tick))
        .await
        .expect("finished eras still accept messages");
    assert_eq!(harness.supervisor.eras().len(), 1);
    assert!(harness.supervisor.scheduled().is_empty());
}

#[tokio::test]
async fn redelivered_blocks_emit_nothing_new() {
    let genesis_tick = now() - TickDiff::from(100);
    let harness = setup(
        conf(test_config(), two_validators(), None, genesis_tick),
        vec![],
    )
    .await;
    let genesis = Era::genesis(
        &genesis_summary(genesis_tick),
        TickDiff::from(16),
        two_validators(),
    );
    let ballot = ballot_in(&genesis, BOB, 0);
    let block = block_for(&ballot, genesis_tick);

    harness
        .supervisor
        .validate_and_add_block(&block)
        .await
        .expect("first delivery");
    harness
        .supervisor
        .validate_and_add_block(&block)
        .await
        .expect("re-delivery");

    assert!(harness.relay.relayed().is_empty(), "ballots are not relayed");
    // The latest-message observation repeats; fork choice is idempotent per (era, hash).
    assert_eq!(harness.fork_choice.updates().len(), 2);
    assert!(harness.supervisor.scheduled().is_empty());
}

//! End-to-end scenarios through a fully wired node: blocks enter through the
//! block processor, votes through the vote processor, and confirmed winners
//! come out the other side cemented.

use orv_consensus::{
    DetailType, ElectionBehavior, ElectionStatus, FrontiersConfirmationMode, StatType, VoteCode,
};
use orv_crypto::{keypair_from_seed, sign_block};
use orv_ledger::{dev_genesis_key, LedgerConstants, ProcessResult};
use orv_messages::{ChannelId, Vote};
use orv_node::{Node, NodeConfig};
use orv_nullables::{NullNetwork, SteadyClock};
use orv_types::{Account, Amount, Block, BlockHash, KeyPair, Link};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.active_elections.frontier_confirmation = FrontiersConfirmationMode::Disabled;
    config
}

fn start_node() -> Node {
    let node = Node::with_clock(
        test_config(),
        LedgerConstants::dev(),
        Arc::new(NullNetwork::new()),
        SteadyClock::new_null(),
    )
    .unwrap();
    node.start().unwrap();
    node
}

fn genesis_send(node: &Node, amount: u128, destination: u64) -> Arc<Block> {
    let key = dev_genesis_key();
    let mut block = Block::new_state(
        key.account(),
        node.ledger().constants().genesis_hash(),
        key.account(),
        Amount::MAX - Amount::raw(amount),
        Link::from(Account::from(destination)),
    );
    sign_block(&mut block, &key.private);
    Arc::new(block)
}

/// Send `amount` from genesis to `key` and open its account as its own
/// representative.
fn fund(node: &Node, key: &KeyPair, amount: Amount) {
    let genesis = dev_genesis_key();
    let info = node.ledger().account_info(&genesis.account()).unwrap();
    let mut send = Block::new_state(
        genesis.account(),
        info.head,
        genesis.account(),
        info.balance - amount,
        Link::from(key.account()),
    );
    sign_block(&mut send, &genesis.private);
    let send = Arc::new(send);
    assert_eq!(node.ledger().process(&send), ProcessResult::Progress);
    let mut open = Block::new_state(
        key.account(),
        BlockHash::ZERO,
        key.account(),
        amount,
        Link::from(send.hash()),
    );
    sign_block(&mut open, &key.private);
    assert_eq!(node.ledger().process(&Arc::new(open)), ProcessResult::Progress);
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn genesis_vote_resolves_fork_and_cements_winner() {
    let node = start_node();
    let confirmed: Arc<Mutex<Vec<ElectionStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&confirmed);
    node.active()
        .add_election_confirmed_observer(Box::new(move |status| sink.lock().unwrap().push(status.clone())));

    let a = genesis_send(&node, 1, 1);
    let b = genesis_send(&node, 2, 2);
    assert_eq!(node.process_local(&a), ProcessResult::Progress);
    wait_until(|| node.active().active(&a));

    assert!(node.process_live(&b));
    wait_until(|| {
        node.active()
            .election(&a.qualified_root())
            .is_some_and(|election| election.contains(&b.hash()))
    });
    assert_eq!(node.active().len(), 1);

    let vote = Arc::new(Vote::new_final(&dev_genesis_key(), vec![b.hash()]));
    assert_eq!(
        node.vote_processor().vote_blocking(&vote, ChannelId(1), false),
        VoteCode::Vote
    );

    {
        let confirmed = confirmed.lock().unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].winner.hash(), b.hash());
    }
    assert_eq!(node.stats().count(StatType::Election, DetailType::ForkSwitch), 1);

    // The losing block is rolled back and the winner forced in and cemented.
    wait_until(|| node.ledger().block_confirmed(&b.hash()));
    assert!(!node.ledger().block_exists(&a.hash()));
    wait_until(|| node.active().is_empty());
    node.stop();
}

#[test]
fn corrupted_vote_is_invalid_every_time() {
    let node = start_node();
    let send = genesis_send(&node, 1, 1);
    node.process_local(&send);
    wait_until(|| node.active().active(&send));

    let good = Vote::new(&dev_genesis_key(), 16, 0, vec![send.hash()]);
    let mut signature = good.signature;
    signature.0[10] ^= 0xff;
    let bad = Arc::new(Vote::from_parts(
        good.voting_account,
        signature,
        good.timestamp(),
        good.hashes().to_vec(),
    ));

    for _ in 0..2 {
        assert_eq!(
            node.vote_processor().vote_blocking(&bad, ChannelId(1), false),
            VoteCode::Invalid
        );
    }
    assert!(!node.active().election(&send.qualified_root()).unwrap().confirmed());
    assert_eq!(node.stats().count(StatType::Vote, DetailType::VoteInvalid), 2);
}

#[test]
fn vote_flood_from_many_accounts_is_fully_counted() {
    let node = start_node();
    let keys: Vec<_> = (0..1000u32)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[..4].copy_from_slice(&i.to_be_bytes());
            keypair_from_seed(&seed)
        })
        .collect();
    // A few voters carry weight, far below quorum.
    for key in &keys[..3] {
        fund(&node, key, Amount::raw(1_000));
    }

    let genesis = dev_genesis_key();
    let info = node.ledger().account_info(&genesis.account()).unwrap();
    let mut send = Block::new_state(
        genesis.account(),
        info.head,
        genesis.account(),
        info.balance - Amount::raw(1),
        Link::from(Account::from(1)),
    );
    sign_block(&mut send, &genesis.private);
    let send = Arc::new(send);
    assert_eq!(node.ledger().process(&send), ProcessResult::Progress);
    let (election, inserted) = node
        .active()
        .insert(&send, None, ElectionBehavior::Manual, None);
    assert!(inserted);
    let election = election.unwrap();

    let mut dropped = 0;
    for key in &keys {
        let vote = Arc::new(Vote::new(key, 16, 0, vec![send.hash()]));
        dropped += node.vote_processor().vote(&vote, ChannelId(1)) as usize;
    }
    // Final votes are never held back by the cooldown.
    for key in &keys {
        let vote = Arc::new(Vote::new_final(key, vec![send.hash()]));
        dropped += node.vote_processor().vote(&vote, ChannelId(1)) as usize;
    }
    node.vote_processor().flush();

    assert_eq!(dropped, 0);
    // One entry per voter plus the placeholder the election starts with.
    assert_eq!(election.vote_count(), 1001);
    assert!(!election.confirmed());
    assert_eq!(node.vote_processor().total_processed(), 2000);

    // Every voter's newest vote replaced its older one.
    let votes = election.votes();
    for key in &keys {
        let info = &votes[&key.account()];
        assert!(info.is_final());
        assert_eq!(info.timestamp, Vote::TIMESTAMP_MAX);
    }
    let voter_weight: Amount = keys.iter().map(|key| node.ledger().weight(&key.account())).sum();
    assert_eq!(voter_weight, Amount::raw(3_000));
    assert_eq!(election.final_weight(), voter_weight);
}

#[test]
fn node_runs_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orv.toml");
    std::fs::write(
        &path,
        r#"
            network = "dev"
            enable_voting = false

            [active_elections]
            size = 10
            frontier_confirmation = "disabled"
        "#,
    )
    .unwrap();

    let config = NodeConfig::from_toml_file(&path).unwrap();
    let node = Node::new(config, LedgerConstants::dev(), Arc::new(NullNetwork::new())).unwrap();
    assert_eq!(node.active().vacancy(), 10);

    node.start().unwrap();
    let send = genesis_send(&node, 1, 1);
    assert_eq!(node.process_local(&send), ProcessResult::Progress);
    wait_until(|| node.active().active(&send));
    assert_eq!(node.active().vacancy(), 9);

    let metrics = node.metrics_text().unwrap();
    assert!(metrics.contains("orv_stats_total"));
    assert!(metrics.contains("election_scheduler"));
    node.stop();
}

#[test]
fn local_representative_votes_for_new_elections() {
    let node = start_node();
    node.wallets().insert(dev_genesis_key());
    let key = dev_genesis_key();
    let send = genesis_send(&node, 1, 1);
    let mut next = Block::new_state(
        key.account(),
        send.hash(),
        key.account(),
        Amount::MAX - Amount::raw(3),
        Link::from(Account::from(2)),
    );
    sign_block(&mut next, &key.private);
    let next = Arc::new(next);
    assert_eq!(node.process_local(&send), ProcessResult::Progress);
    assert_eq!(node.process_local(&next), ProcessResult::Progress);

    // The generated vote loops back through the vote processor and confirms.
    // Cementing the first send then activates the second.
    wait_until(|| node.ledger().block_confirmed(&next.hash()));
    assert!(node.ledger().block_confirmed(&send.hash()));
    assert!(node.stats().count(StatType::Election, DetailType::GenerateVote) >= 1);
    assert!(node.stats().count(StatType::VoteGenerator, DetailType::GeneratorBroadcasts) >= 1);
    node.stop();
}

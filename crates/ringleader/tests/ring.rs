//! End-to-end ring tests over loopback TCP
//!
//! Each test runs a registry plus a set of participants on its own port
//! range, exercising registration, topology pushes, and full election
//! rounds exactly as separate processes would.

use ringleader::{
    ElectionState, Participant, PeerId, Registry, RegistryHandle, RingClient, RingConfig,
    RingError, RingRequest, RingResponse, ServerHandle,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

/// Build a config on a dedicated port range so tests can run in parallel
fn test_config(port_base: u16) -> RingConfig {
    RingConfig {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        peer_port_base: port_base,
        registry_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port_base + 900),
        connect_timeout: Duration::from_millis(500),
        call_timeout: Duration::from_secs(2),
        trigger_stagger_max: Duration::from_millis(50),
        election_grace: Duration::from_secs(30),
    }
}

struct TestRing {
    registry: RegistryHandle,
    peers: Vec<Participant>,
    servers: Vec<ServerHandle>,
}

impl TestRing {
    /// Start a registry and the given peers, registering them in order
    async fn start(config: &RingConfig, ids: &[PeerId]) -> Self {
        let (registry, registry_server) = Registry::serve(config.clone()).await.unwrap();

        let mut peers = Vec::new();
        let mut servers = vec![registry_server];

        for &id in ids {
            let peer = Participant::new(id, config.clone()).unwrap();
            servers.push(peer.serve().await.unwrap());
            peer.register().await.unwrap();
            peers.push(peer);
        }

        Self {
            registry,
            peers,
            servers,
        }
    }

    fn peer(&self, id: PeerId) -> &Participant {
        self.peers
            .iter()
            .find(|p| p.id() == id)
            .expect("peer not in test ring")
    }

    async fn shutdown(self) {
        for server in &self.servers {
            server.shutdown().await;
        }
    }
}

/// Poll `condition` until it holds or the deadline passes
async fn wait_until<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_topology_follows_arrival_order() {
    let config = test_config(42000);
    let ring = TestRing::start(&config, &[5, 11, 2, 7]).await;

    // Arrival order [5, 11, 2, 7] induces 5→11, 11→2, 2→7, 7→5,
    // independent of identifier magnitude.
    wait_until("topology push", || async {
        ring.peer(7).successor().await.is_some()
    })
    .await;

    assert_eq!(ring.peer(5).successor().await, Some(11));
    assert_eq!(ring.peer(11).successor().await, Some(2));
    assert_eq!(ring.peer(2).successor().await, Some(7));
    assert_eq!(ring.peer(7).successor().await, Some(5));

    // Following successors from any node returns to it in exactly 4 hops
    let mut current: PeerId = 11;
    for _ in 0..4 {
        current = ring.peer(current).successor().await.unwrap();
    }
    assert_eq!(current, 11);

    ring.shutdown().await;
}

#[tokio::test]
async fn test_membership_snapshot_in_arrival_order() {
    let config = test_config(43000);
    let ring = TestRing::start(&config, &[5, 11, 2, 7]).await;

    let members: Vec<PeerId> = ring
        .registry
        .members()
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(members, vec![5, 11, 2, 7]);

    ring.shutdown().await;
}

#[tokio::test]
async fn test_election_started_by_max_peer() {
    let config = test_config(44000);
    let ring = TestRing::start(&config, &[5, 11, 2, 7]).await;

    wait_until("topology push", || async {
        ring.peer(7).successor().await.is_some()
    })
    .await;

    // The maximum identifier's own candidacy survives the full circuit.
    ring.peer(11).start_election().await.unwrap();

    wait_until("election to settle", || async {
        for peer in &ring.peers {
            if !peer.state().await.is_settled() {
                return false;
            }
        }
        true
    })
    .await;

    // Exactly one leader, and it is the maximum identifier
    for peer in &ring.peers {
        let state = peer.state().await;
        if peer.id() == 11 {
            assert_eq!(state, ElectionState::Leader);
        } else {
            assert_eq!(state, ElectionState::Notified);
        }
    }

    ring.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_elects_max_identifier() {
    let config = test_config(45000);
    let ring = TestRing::start(&config, &[5, 11, 2, 7]).await;

    wait_until("topology push", || async {
        ring.peer(7).successor().await.is_some()
    })
    .await;

    // Any peer may request the broadcast; every member then starts its
    // own candidacy and only the maximum survives.
    ring.peer(5).request_broadcast().await.unwrap();

    wait_until("election to settle", || async {
        for peer in &ring.peers {
            if !peer.state().await.is_settled() {
                return false;
            }
        }
        true
    })
    .await;

    let leaders: Vec<PeerId> = {
        let mut ids = Vec::new();
        for peer in &ring.peers {
            if peer.state().await.is_leader() {
                ids.push(peer.id());
            }
        }
        ids
    };
    assert_eq!(leaders, vec![11]);

    // Every member agrees on the winner
    for peer in &ring.peers {
        assert_eq!(peer.leader().await, Some(11));
    }

    ring.shutdown().await;
}

#[tokio::test]
async fn test_lone_non_max_candidacy_dies_silently() {
    let config = test_config(46000);
    let ring = TestRing::start(&config, &[5, 11]).await;

    wait_until("topology push", || async {
        ring.peer(11).successor().await.is_some()
    })
    .await;

    // Peer 5's candidacy is dropped at peer 11 and nothing else moves:
    // a liveness gap, never an incorrect leader.
    ring.peer(5).start_election().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(ring.peer(5).state().await, ElectionState::Candidate);
    assert_eq!(ring.peer(11).state().await, ElectionState::Idle);

    ring.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let config = test_config(47000);
    let ring = TestRing::start(&config, &[7, 3]).await;

    let err = ring.peer(7).register().await.unwrap_err();
    assert!(matches!(err, RingError::DuplicateId(7)));

    // Membership unchanged after the rejection
    assert_eq!(ring.registry.members().await.unwrap().len(), 2);

    ring.shutdown().await;
}

#[tokio::test]
async fn test_registration_blocked_while_election_in_flight() {
    let config = test_config(48000);
    let ring = TestRing::start(&config, &[4]).await;

    let client = RingClient::new(config.connect_timeout, config.call_timeout);

    // Wire-level flag notifications, twice each to check idempotence
    for _ in 0..2 {
        let response = client
            .call(config.registry_addr, &RingRequest::ElectionStarted { id: 4 })
            .await
            .unwrap();
        assert_eq!(response, RingResponse::Ack);
    }

    let late = Participant::new(9, config.clone()).unwrap();
    let late_server = late.serve().await.unwrap();
    let err = late.register().await.unwrap_err();
    assert!(matches!(err, RingError::ElectionInProgress));

    for _ in 0..2 {
        let response = client
            .call(config.registry_addr, &RingRequest::ElectionEnded { id: 4 })
            .await
            .unwrap();
        assert_eq!(response, RingResponse::Ack);
    }

    late.register().await.unwrap();
    assert_eq!(ring.registry.members().await.unwrap().len(), 2);

    late_server.shutdown().await;
    ring.shutdown().await;
}

#[tokio::test]
async fn test_winner_unblocks_registration() {
    // Short grace: if a straggler's ElectionStarted lands after the
    // winner's ElectionEnded, the stale flag expires instead of
    // blocking the late joiner for the full default window.
    let mut config = test_config(49000);
    config.election_grace = Duration::from_millis(500);
    let ring = TestRing::start(&config, &[5, 11, 2]).await;

    wait_until("topology push", || async {
        ring.peer(2).successor().await.is_some()
    })
    .await;

    ring.peer(5).request_broadcast().await.unwrap();

    wait_until("election to settle", || async {
        for peer in &ring.peers {
            if !peer.state().await.is_settled() {
                return false;
            }
        }
        true
    })
    .await;

    // The winner reports the election end once its announcement has
    // completed the circuit; a new peer can then join.
    let late = Participant::new(7, config.clone()).unwrap();
    let late_server = late.serve().await.unwrap();

    wait_until("registration to reopen", || async {
        match late.register().await {
            Ok(()) => true,
            Err(RingError::ElectionInProgress) => false,
            Err(RingError::DuplicateId(_)) => true, // a previous attempt got through
            Err(e) => panic!("unexpected registration error: {}", e),
        }
    })
    .await;

    assert_eq!(ring.registry.members().await.unwrap().len(), 4);

    late_server.shutdown().await;
    ring.shutdown().await;
}

#[tokio::test]
async fn test_new_max_wins_reelection_after_joining() {
    let mut config = test_config(51000);
    config.election_grace = Duration::from_millis(500);
    let ring = TestRing::start(&config, &[5, 11, 2]).await;

    wait_until("topology push", || async {
        ring.peer(2).successor().await.is_some()
    })
    .await;

    ring.peer(5).request_broadcast().await.unwrap();
    wait_until("first election to settle", || async {
        for peer in &ring.peers {
            if !peer.state().await.is_settled() {
                return false;
            }
        }
        true
    })
    .await;
    assert_eq!(ring.peer(11).state().await, ElectionState::Leader);

    // A larger identifier joins after the first round settled. Straggler
    // start notifications may briefly re-block registration, hence the
    // retry loop and the short grace.
    let late = Participant::new(20, config.clone()).unwrap();
    let late_server = late.serve().await.unwrap();
    wait_until("registration to reopen", || async {
        match late.register().await {
            Ok(()) => true,
            Err(RingError::ElectionInProgress) => false,
            Err(RingError::DuplicateId(_)) => true,
            Err(e) => panic!("unexpected registration error: {}", e),
        }
    })
    .await;
    wait_until("topology to include the new peer", || async {
        late.successor().await.is_some()
    })
    .await;

    // The second round must converge on the new maximum everywhere;
    // in particular the round-one winner hands over leadership and no
    // peer clings to the previous result.
    ring.peer(2).request_broadcast().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    wait_until("second election to settle", || async {
        if !late.state().await.is_settled() {
            return false;
        }
        for peer in &ring.peers {
            if !peer.state().await.is_settled() {
                return false;
            }
        }
        true
    })
    .await;

    assert_eq!(late.state().await, ElectionState::Leader);
    assert_eq!(late.leader().await, Some(20));
    for peer in &ring.peers {
        assert_eq!(peer.state().await, ElectionState::Notified);
        assert_eq!(peer.leader().await, Some(20));
    }

    late_server.shutdown().await;
    ring.shutdown().await;
}

#[tokio::test]
async fn test_reelection_after_settled_round() {
    let config = test_config(50000);
    let ring = TestRing::start(&config, &[5, 11, 2, 7]).await;

    wait_until("topology push", || async {
        ring.peer(7).successor().await.is_some()
    })
    .await;

    ring.peer(5).request_broadcast().await.unwrap();
    wait_until("first election to settle", || async {
        for peer in &ring.peers {
            if !peer.state().await.is_settled() {
                return false;
            }
        }
        true
    })
    .await;

    // A second, independent round resets the per-peer flags and reaches
    // the same outcome. The sleep outlasts the randomized stagger so
    // every triggered restart has fired before convergence is checked.
    ring.peer(2).request_broadcast().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    wait_until("second election to settle", || async {
        for peer in &ring.peers {
            if !peer.state().await.is_settled() {
                return false;
            }
        }
        true
    })
    .await;

    assert_eq!(ring.peer(11).state().await, ElectionState::Leader);
    for peer in &ring.peers {
        assert_eq!(peer.leader().await, Some(11));
    }

    ring.shutdown().await;
}

//! Ring participant: the per-peer LCR election state machine
//!
//! LCR rules, evaluated purely on identifier comparison:
//! 1. A starting peer sends `Election(ownId)` to its successor.
//! 2. On `Election(id)`: `id == ownId` means this peer won and emits
//!    `Leader(ownId)`; `id > ownId` is forwarded unchanged; `id < ownId`
//!    is dropped. Only the maximum identifier survives a full circuit.
//! 3. The `Leader` message circulates exactly once so every member
//!    learns the result; the winner does not forward its own
//!    announcement a second time.
//!
//! All mutable state sits behind one lock. Inbound operations take the
//! lock, decide, release it, and acknowledge the caller; any forwarding
//! happens in a spawned task afterwards. No lock is ever held across a
//! ring hop, so a message circling back to its origin cannot deadlock.

use crate::config::RingConfig;
use crate::error::{Result, RingError};
use crate::protocol::{ErrorCode, RingRequest, RingResponse};
use crate::transport::{self, RingClient, ServerHandle};
use crate::PeerId;
use rand::Rng;
use std::cmp::Ordering;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Election progress of a participant.
///
/// `Leader` and `Notified` are stable until the next locally-started
/// election resets to `Candidate` or a newer announcement hands
/// leadership over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// No election seen yet
    Idle,
    /// Own identifier is circulating
    Candidate,
    /// Own identifier came back: this peer won
    Leader,
    /// Learned the winner from a `Leader` message
    Notified,
}

impl ElectionState {
    /// True once this peer's own identifier circulated back to it
    pub fn is_leader(&self) -> bool {
        matches!(self, ElectionState::Leader)
    }

    /// True once this peer has processed a leader announcement for the
    /// current round (guards against reprocessing)
    pub fn is_settled(&self) -> bool {
        matches!(self, ElectionState::Leader | ElectionState::Notified)
    }
}

/// Outcome of the LCR comparison for one incoming candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LcrAction {
    /// Own id returned: declare victory, announce
    Win,
    /// Candidate is larger: forward unchanged
    Forward,
    /// Candidate is smaller: drop silently
    Drop,
}

/// Core LCR decision, free of side effects
fn decide(own: PeerId, candidate: PeerId) -> LcrAction {
    match candidate.cmp(&own) {
        Ordering::Equal => LcrAction::Win,
        Ordering::Greater => LcrAction::Forward,
        Ordering::Less => LcrAction::Drop,
    }
}

/// Mutable participant state, serialized behind one lock
#[derive(Debug)]
struct ParticipantState {
    state: ElectionState,
    successor: Option<PeerId>,
    leader: Option<PeerId>,
    /// Number of rounds this peer has seen settle. A triggered start
    /// compares this against the value captured before its stagger and
    /// skips if the round it belongs to already concluded.
    settlements: u64,
    /// Whether the current leadership already reported `ElectionEnded`
    end_reported: bool,
}

#[derive(Debug)]
struct Shared {
    /// Own identifier (immutable)
    id: PeerId,

    /// Address this participant listens on
    addr: SocketAddr,

    /// Ring configuration (addressing, timeouts)
    config: RingConfig,

    /// Transport client for successor and registry calls
    client: RingClient,

    /// Election state and successor link
    state: Mutex<ParticipantState>,
}

/// One ring participant. Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct Participant {
    shared: Arc<Shared>,
}

impl Participant {
    /// Create a participant for `id`. Fails if the id does not fit the
    /// deterministic port space.
    pub fn new(id: PeerId, config: RingConfig) -> Result<Self> {
        let addr = config.peer_addr(id)?;
        let client = RingClient::new(config.connect_timeout, config.call_timeout);
        Ok(Self {
            shared: Arc::new(Shared {
                id,
                addr,
                config,
                client,
                state: Mutex::new(ParticipantState {
                    state: ElectionState::Idle,
                    successor: None,
                    leader: None,
                    settlements: 0,
                    end_reported: false,
                }),
            }),
        })
    }

    /// Own identifier
    pub fn id(&self) -> PeerId {
        self.shared.id
    }

    /// Address this participant listens on
    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    /// Current election state
    pub async fn state(&self) -> ElectionState {
        self.shared.state.lock().await.state
    }

    /// Currently configured successor, if any
    pub async fn successor(&self) -> Option<PeerId> {
        self.shared.state.lock().await.successor
    }

    /// Winner of the last settled election round, if any
    pub async fn leader(&self) -> Option<PeerId> {
        self.shared.state.lock().await.leader
    }

    /// Start serving inbound ring operations
    pub async fn serve(&self) -> Result<ServerHandle> {
        let participant = self.clone();
        transport::serve(
            self.shared.addr,
            self.shared.config.call_timeout,
            move |request| {
                let participant = participant.clone();
                async move { participant.handle(request).await }
            },
        )
        .await
    }

    /// Register with the registry at the well-known address
    pub async fn register(&self) -> Result<()> {
        let request = RingRequest::Register {
            id: self.shared.id,
            addr: self.shared.addr,
        };
        let response = self
            .shared
            .client
            .call(self.shared.config.registry_addr, &request)
            .await?;
        match response {
            RingResponse::Ack => {
                info!(id = self.shared.id, "registered with registry");
                Ok(())
            }
            RingResponse::Error {
                code: ErrorCode::DuplicateId,
                ..
            } => Err(RingError::DuplicateId(self.shared.id)),
            RingResponse::Error { code, message } => Err(code.into_error(message)),
        }
    }

    /// Ask the registry to trigger an election on every registered member
    pub async fn request_broadcast(&self) -> Result<()> {
        let request = RingRequest::BroadcastElection {
            origin: self.shared.id,
        };
        self.shared
            .client
            .call(self.shared.config.registry_addr, &request)
            .await?
            .into_result()
    }

    /// Install a new successor link, replacing any prior one.
    ///
    /// The successor is probed with a bounded connect first; on failure
    /// the previous link is kept and the error reported to the caller.
    pub async fn configure_successor(&self, next: PeerId) -> Result<()> {
        let addr = self.shared.config.peer_addr(next)?;
        self.shared.client.probe(addr).await?;

        let mut state = self.shared.state.lock().await;
        let previous = state.successor.replace(next);
        drop(state);

        info!(id = self.shared.id, successor = next, ?previous, "successor configured");
        Ok(())
    }

    /// Start a new election round from this peer.
    ///
    /// Resets the election state and sends `Election(ownId)` to the
    /// successor. Fails with `NotConfigured` before topology setup.
    pub async fn start_election(&self) -> Result<()> {
        self.begin_election(None).await
    }

    /// Start a candidacy, optionally skipping if a round has settled
    /// since `unless_settled_since` was captured. The check and the
    /// state reset share one lock acquisition, so a settling
    /// announcement cannot slip between them.
    async fn begin_election(&self, unless_settled_since: Option<u64>) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if let Some(seen) = unless_settled_since {
            if state.settlements != seen {
                debug!(
                    id = self.shared.id,
                    "round settled during stagger, skipping triggered start"
                );
                return Ok(());
            }
        }
        let successor = state.successor.ok_or(RingError::NotConfigured)?;
        state.state = ElectionState::Candidate;
        state.leader = None;
        state.end_reported = false;
        drop(state);

        info!(id = self.shared.id, "starting election");
        self.notify_registry(RingRequest::ElectionStarted { id: self.shared.id })
            .await;

        let request = RingRequest::Election {
            candidate: self.shared.id,
            origin: self.shared.id,
        };
        self.send_to(successor, request).await
    }

    /// Handle one inbound ring request
    async fn handle(&self, request: RingRequest) -> RingResponse {
        match request {
            RingRequest::ConfigureSuccessor { successor } => {
                match self.configure_successor(successor).await {
                    Ok(()) => RingResponse::Ack,
                    Err(e) => {
                        warn!(id = self.shared.id, successor, error = %e, "successor rejected");
                        e.to_response()
                    }
                }
            }
            RingRequest::Election { candidate, origin } => {
                self.receive_election(candidate, origin).await;
                RingResponse::Ack
            }
            RingRequest::Leader { winner } => {
                self.receive_leader(winner).await;
                RingResponse::Ack
            }
            RingRequest::TriggerElection { origin } => {
                self.trigger_election(origin);
                RingResponse::Ack
            }
            other => {
                debug!(id = self.shared.id, request = ?other, "unexpected request");
                RingResponse::error(ErrorCode::InvalidRequest, "not a participant operation")
            }
        }
    }

    /// Process an incoming `Election` message (the LCR core).
    ///
    /// The caller is acknowledged independent of the forwarding outcome;
    /// forwarding runs in a spawned task after the state decision.
    async fn receive_election(&self, candidate: PeerId, origin: PeerId) {
        let mut state = self.shared.state.lock().await;
        let action = decide(self.shared.id, candidate);
        if action == LcrAction::Win {
            state.state = ElectionState::Leader;
            state.leader = Some(self.shared.id);
            state.settlements += 1;
        }
        let successor = state.successor;
        drop(state);

        match action {
            LcrAction::Win => {
                info!(id = self.shared.id, "election won, announcing leadership");
                self.forward(
                    successor,
                    RingRequest::Leader {
                        winner: self.shared.id,
                    },
                );
            }
            LcrAction::Forward => {
                debug!(id = self.shared.id, candidate, origin, "forwarding election message");
                self.forward(successor, RingRequest::Election { candidate, origin });
            }
            LcrAction::Drop => {
                // Dropped means dropped: nothing is sent onward, the
                // smaller candidacy simply cannot win this ring.
                debug!(id = self.shared.id, candidate, origin, "dropping election message");
            }
        }
    }

    /// Process a `Leader` announcement.
    ///
    /// Another peer's announcement settles the round here and is
    /// forwarded; our own announcement is absorbed, completing the round
    /// if we hold the leadership it announces.
    async fn receive_leader(&self, winner: PeerId) {
        let mut state = self.shared.state.lock().await;

        // An announcement is absorbed exactly where it originated; that
        // alone bounds the circulation to one circuit.
        if winner == self.shared.id {
            if state.state == ElectionState::Leader {
                if state.end_reported {
                    drop(state);
                    debug!(id = self.shared.id, "completion already reported, ignored");
                } else {
                    // Our own announcement made it around the ring: the
                    // round is complete everywhere.
                    state.end_reported = true;
                    drop(state);
                    info!(id = self.shared.id, "leader announcement completed the circuit");
                    self.notify_registry(RingRequest::ElectionEnded { id: self.shared.id })
                        .await;
                }
            } else {
                // Left over from an earlier round; only a returning
                // candidacy can make this peer leader again.
                drop(state);
                warn!(id = self.shared.id, "stale own leader announcement ignored");
            }
            return;
        }

        // Another peer's announcement settles the round here and moves
        // on. A peer still holding an older result, including a previous
        // winner, hands over to the announced leader, so announcements
        // pass peers that never restarted for the current round.
        state.state = ElectionState::Notified;
        state.leader = Some(winner);
        state.settlements += 1;
        let successor = state.successor;
        drop(state);

        info!(id = self.shared.id, winner, "leader elected");
        self.forward(successor, RingRequest::Leader { winner });
    }

    /// Registry-driven election start: acks immediately, then starts the
    /// election after a randomized stagger so concurrently triggered
    /// peers do not all emit at the same instant.
    fn trigger_election(&self, origin: PeerId) {
        debug!(id = self.shared.id, origin, "election trigger received");
        // The floor keeps every start behind the registry's trigger
        // fan-out, so no candidacy can begin before all members hold a
        // settlement count predating the round.
        let max = self.shared.config.trigger_stagger_max;
        let stagger = rand::thread_rng().gen_range(max / 4..=max);
        let participant = self.clone();
        tokio::spawn(async move {
            let seen = participant.shared.state.lock().await.settlements;
            tokio::time::sleep(stagger).await;
            if let Err(e) = participant.begin_election(Some(seen)).await {
                warn!(id = participant.shared.id, error = %e, "triggered election failed");
            }
        });
    }

    /// Forward a message to the successor from a spawned task so the
    /// caller of the current request is never kept waiting on the next
    /// hop; failures are logged, never retried, and never crash the
    /// participant.
    fn forward(&self, successor: Option<PeerId>, request: RingRequest) {
        let Some(successor) = successor else {
            warn!(id = self.shared.id, "cannot forward, no successor configured");
            return;
        };
        let participant = self.clone();
        tokio::spawn(async move {
            if let Err(e) = participant.send_to(successor, request).await {
                warn!(
                    id = participant.shared.id,
                    successor,
                    error = %e,
                    "failed to forward to successor"
                );
            }
        });
    }

    /// Send one request to a peer and check its ack
    async fn send_to(&self, peer: PeerId, request: RingRequest) -> Result<()> {
        let addr = self.shared.config.peer_addr(peer)?;
        self.shared
            .client
            .call(addr, &request)
            .await?
            .into_result()
    }

    /// Best-effort notification to the registry; failure never blocks
    /// the election itself
    async fn notify_registry(&self, request: RingRequest) {
        let result = self
            .shared
            .client
            .call(self.shared.config.registry_addr, &request)
            .await
            .and_then(RingResponse::into_result);
        if let Err(e) = result {
            debug!(id = self.shared.id, error = %e, "registry notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcr_decision_table() {
        // Candidate larger than own id survives
        assert_eq!(decide(5, 11), LcrAction::Forward);
        // Candidate smaller than own id dies here
        assert_eq!(decide(11, 5), LcrAction::Drop);
        // Own id returned: victory
        assert_eq!(decide(7, 7), LcrAction::Win);
    }

    #[test]
    fn test_state_predicates() {
        assert!(ElectionState::Leader.is_leader());
        assert!(!ElectionState::Notified.is_leader());
        assert!(ElectionState::Leader.is_settled());
        assert!(ElectionState::Notified.is_settled());
        assert!(!ElectionState::Candidate.is_settled());
        assert!(!ElectionState::Idle.is_settled());
    }

    #[tokio::test]
    async fn test_start_election_without_successor() {
        let config = RingConfig::default().with_peer_port_base(41000);
        let participant = Participant::new(3, config).unwrap();

        let err = participant.start_election().await.unwrap_err();
        assert!(matches!(err, RingError::NotConfigured));
        assert_eq!(participant.state().await, ElectionState::Idle);
    }

    #[tokio::test]
    async fn test_id_out_of_port_space() {
        let config = RingConfig::default();
        let err = Participant::new(u64::from(u16::MAX), config).unwrap_err();
        assert!(matches!(err, RingError::IdOutOfRange { .. }));
    }
}

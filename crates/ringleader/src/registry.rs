//! Registry: membership admission and ring topology
//!
//! The registry is the one well-known service in the system. It owns
//! the insertion-ordered membership list, rebuilds the ring whenever a
//! peer joins (`successor(list[i]) = list[(i+1) % n]`), fans out
//! election triggers, and arbitrates between registrations and
//! in-flight elections with an exclusion flag.
//!
//! All mutable state is owned by a single actor task; the network
//! handler translates requests into commands over an mpsc channel with
//! oneshot replies. Commands are processed one at a time, so an entire
//! registration (duplicate check, append, topology push) is one
//! critical section and concurrent registrations can never interleave
//! their topology pushes.

use crate::config::RingConfig;
use crate::error::{Result, RingError};
use crate::peer::{Member, PeerId};
use crate::protocol::{ErrorCode, RingRequest, RingResponse};
use crate::transport::{self, RingClient, ServerHandle};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Commands accepted by the registry actor
enum Command {
    Register {
        id: PeerId,
        addr: SocketAddr,
        reply: oneshot::Sender<Result<()>>,
    },
    Broadcast {
        origin: PeerId,
        reply: oneshot::Sender<usize>,
    },
    ElectionStarted {
        id: PeerId,
    },
    ElectionEnded {
        id: PeerId,
    },
    Members {
        reply: oneshot::Sender<Vec<Member>>,
    },
}

/// Exclusion flag guarding registrations against in-flight elections.
///
/// The flag records when it was set so a stalled election (one that
/// never reports its end) expires after a grace period instead of
/// blocking registration forever.
#[derive(Debug, Default)]
struct ElectionGate {
    since: Option<Instant>,
}

impl ElectionGate {
    /// Set the flag; no-op if already set. Returns true if newly set.
    fn set(&mut self) -> bool {
        if self.since.is_none() {
            self.since = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Clear the flag; no-op if already clear. Returns true if it was set.
    fn clear(&mut self) -> bool {
        self.since.take().is_some()
    }

    /// Whether registrations are currently blocked. A flag older than
    /// `grace` is expired on the spot.
    fn is_blocked(&mut self, grace: Duration) -> bool {
        match self.since {
            Some(since) if since.elapsed() >= grace => {
                warn!(
                    elapsed = ?since.elapsed(),
                    "election never reported its end, expiring exclusion flag"
                );
                self.since = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}

/// Handle for talking to a running registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    /// Admit a peer into the ring
    pub async fn register(&self, id: PeerId, addr: SocketAddr) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Register { id, addr, reply }).await?;
        rx.await?
    }

    /// Trigger an election on every registered member; returns how many
    /// members the trigger was fanned out to
    pub async fn broadcast_election(&self, origin: PeerId) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Broadcast { origin, reply }).await?;
        Ok(rx.await?)
    }

    /// Mark an election as started (idempotent)
    pub async fn election_started(&self, id: PeerId) -> Result<()> {
        self.tx.send(Command::ElectionStarted { id }).await?;
        Ok(())
    }

    /// Mark the election as ended (idempotent)
    pub async fn election_ended(&self, id: PeerId) -> Result<()> {
        self.tx.send(Command::ElectionEnded { id }).await?;
        Ok(())
    }

    /// Snapshot of the current membership in arrival order
    pub async fn members(&self) -> Result<Vec<Member>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Members { reply }).await?;
        Ok(rx.await?)
    }
}

/// The registry service
pub struct Registry;

impl Registry {
    /// Spawn the registry actor without a network listener (useful for
    /// embedding and tests)
    pub fn spawn(config: RingConfig) -> RegistryHandle {
        let (tx, rx) = mpsc::channel(64);
        let client = RingClient::new(config.connect_timeout, config.call_timeout);
        tokio::spawn(actor(rx, client, config));
        RegistryHandle { tx }
    }

    /// Spawn the registry actor and serve it at the configured
    /// well-known address
    pub async fn serve(config: RingConfig) -> Result<(RegistryHandle, ServerHandle)> {
        let registry_addr = config.registry_addr;
        let call_timeout = config.call_timeout;
        let handle = Self::spawn(config);

        let dispatch = handle.clone();
        let server = transport::serve(registry_addr, call_timeout, move |request| {
            let registry = dispatch.clone();
            async move { handle_request(&registry, request).await }
        })
        .await?;

        Ok((handle, server))
    }
}

/// Translate one inbound network request into registry commands
async fn handle_request(registry: &RegistryHandle, request: RingRequest) -> RingResponse {
    match request {
        RingRequest::Register { id, addr } => match registry.register(id, addr).await {
            Ok(()) => RingResponse::Ack,
            Err(e) => e.to_response(),
        },
        RingRequest::BroadcastElection { origin } => {
            match registry.broadcast_election(origin).await {
                Ok(_) => RingResponse::Ack,
                Err(e) => e.to_response(),
            }
        }
        RingRequest::ElectionStarted { id } => match registry.election_started(id).await {
            Ok(()) => RingResponse::Ack,
            Err(e) => e.to_response(),
        },
        RingRequest::ElectionEnded { id } => match registry.election_ended(id).await {
            Ok(()) => RingResponse::Ack,
            Err(e) => e.to_response(),
        },
        other => {
            debug!(request = ?other, "unexpected request");
            RingResponse::error(ErrorCode::InvalidRequest, "not a registry operation")
        }
    }
}

/// The actor task owning all registry state
async fn actor(mut rx: mpsc::Receiver<Command>, client: RingClient, config: RingConfig) {
    let mut members: Vec<Member> = Vec::new();
    let mut gate = ElectionGate::default();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Register { id, addr, reply } => {
                let result = register(&mut members, &mut gate, &client, &config, id, addr).await;
                let _ = reply.send(result);
            }
            Command::Broadcast { origin, reply } => {
                // Snapshot only; the fan-out runs outside the actor so
                // registrations are not blocked behind it.
                let snapshot = members.clone();
                let _ = reply.send(snapshot.len());

                info!(origin, count = snapshot.len(), "broadcasting election trigger");
                let client = client.clone();
                tokio::spawn(async move {
                    for member in snapshot {
                        let request = RingRequest::TriggerElection { origin };
                        match client.call(member.addr, &request).await {
                            Ok(RingResponse::Ack) => {
                                debug!(peer = member.id, "election triggered");
                            }
                            Ok(RingResponse::Error { message, .. }) => {
                                warn!(peer = member.id, message, "trigger rejected");
                            }
                            Err(e) => {
                                warn!(peer = member.id, error = %e, "failed to trigger election");
                            }
                        }
                    }
                });
            }
            Command::ElectionStarted { id } => {
                if gate.set() {
                    info!(by = id, "election started, registration blocked");
                }
            }
            Command::ElectionEnded { id } => {
                if gate.clear() {
                    info!(by = id, "election ended, registration allowed");
                }
            }
            Command::Members { reply } => {
                let _ = reply.send(members.clone());
            }
        }
    }
}

/// One registration critical section: admission checks, append, and the
/// full topology push
async fn register(
    members: &mut Vec<Member>,
    gate: &mut ElectionGate,
    client: &RingClient,
    config: &RingConfig,
    id: PeerId,
    addr: SocketAddr,
) -> Result<()> {
    if gate.is_blocked(config.election_grace) {
        warn!(id, "registration blocked, election in progress");
        return Err(RingError::ElectionInProgress);
    }

    if members.iter().any(|m| m.id == id) {
        warn!(id, "registration rejected, duplicate id");
        return Err(RingError::DuplicateId(id));
    }

    members.push(Member::new(id, addr));
    info!(id, %addr, total = members.len(), "peer registered");

    // A ring needs at least two members; rebuild the whole cycle so the
    // new peer is spliced in and the last member wraps to the first.
    if members.len() >= 2 {
        push_topology(members, client).await;
    }

    Ok(())
}

/// Push `successor(list[i]) = list[(i+1) % n]` to every member.
///
/// A per-member failure is logged and skipped rather than aborting the
/// registration; the member keeps its previous link and is repaired on
/// the next membership change.
async fn push_topology(members: &[Member], client: &RingClient) {
    let n = members.len();
    debug!(count = n, "rebuilding ring topology");

    for (i, member) in members.iter().enumerate() {
        let successor = members[(i + 1) % n].id;
        let request = RingRequest::ConfigureSuccessor { successor };
        match client.call(member.addr, &request).await {
            Ok(RingResponse::Ack) => {
                debug!(peer = member.id, successor, "successor link configured");
            }
            Ok(RingResponse::Error { message, .. }) => {
                warn!(peer = member.id, successor, message, "successor link rejected");
            }
            Err(e) => {
                warn!(peer = member.id, successor, error = %e, "topology push failed");
            }
        }
    }
}

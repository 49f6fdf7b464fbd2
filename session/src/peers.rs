//! Full-mesh peer links driven by room membership diffs.
//!
//! Exactly one side of each unordered pair initiates: the participant whose id
//! sorts first sends the offer, the other waits to answer. Handshakes run as
//! independent tasks and report back through a channel; the owner feeds each
//! [`HandshakeOutcome`] to [`PeerConnectionManager::on_handshake`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use watchparty_protocol::ParticipantId;

use crate::error::PeerError;
use crate::ports::{RemoteStream, Rendezvous, SessionDescription};
use crate::surfaces::{SurfaceHandle, SurfaceRegistry};
use crate::task::ScheduledTask;

/// State of a live link. A closed link has no state: `teardown` and
/// `close_all` remove it from the table, and `link()` returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Offerer,
    Answerer,
}

impl HandshakeRole {
    pub fn between(local: &ParticipantId, remote: &ParticipantId) -> Self {
        if local < remote {
            HandshakeRole::Offerer
        } else {
            HandshakeRole::Answerer
        }
    }
}

#[derive(Debug)]
pub struct PeerLink {
    state: LinkState,
    role: HandshakeRole,
    generation: u64,
    handshake: Option<ScheduledTask>,
}

impl PeerLink {
    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }
}

/// Result of one spawned handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub peer: ParticipantId,
    pub generation: u64,
    pub result: Result<SessionDescription, PeerError>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<ParticipantId>,
    pub removed: Vec<ParticipantId>,
}

#[derive(Debug, PartialEq)]
pub enum PeerUpdate {
    Connected { peer: ParticipantId, surface: SurfaceHandle },
    Failed(PeerError),
}

pub struct PeerConnectionManager {
    local_id: ParticipantId,
    rendezvous: Arc<dyn Rendezvous>,
    handshake_timeout: Duration,
    links: HashMap<ParticipantId, PeerLink>,
    surfaces: SurfaceRegistry,
    outcomes: mpsc::UnboundedSender<HandshakeOutcome>,
    next_generation: u64,
}

impl PeerConnectionManager {
    pub fn new(
        local_id: ParticipantId,
        rendezvous: Arc<dyn Rendezvous>,
        handshake_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<HandshakeOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            local_id,
            rendezvous,
            handshake_timeout,
            links: HashMap::new(),
            surfaces: SurfaceRegistry::new(),
            outcomes: tx,
            next_generation: 0,
        };
        (manager, rx)
    }

    /// The hub may assign a different id than the one requested.
    pub fn set_local_id(&mut self, id: ParticipantId) {
        self.local_id = id;
    }

    pub fn link(&self, peer: &ParticipantId) -> Option<&PeerLink> {
        self.links.get(peer)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    /// Reconciles the link table with the room's current member set.
    pub fn sync_members<'a, I>(&mut self, members: I, local: &SessionDescription) -> MembershipDiff
    where
        I: IntoIterator<Item = &'a ParticipantId>,
    {
        let wanted: HashSet<&ParticipantId> = members.into_iter().filter(|id| **id != self.local_id).collect();

        let mut diff = MembershipDiff {
            removed: self.links.keys().filter(|id| !wanted.contains(id)).cloned().collect(),
            added: wanted
                .iter()
                .filter(|id| !self.links.contains_key(**id))
                .map(|id| (*id).clone())
                .collect(),
        };
        diff.added.sort();
        diff.removed.sort();

        for peer in &diff.removed {
            self.teardown(peer);
        }
        for peer in &diff.added {
            self.start_handshake(peer.clone(), local.clone());
        }
        diff
    }

    fn start_handshake(&mut self, peer: ParticipantId, local: SessionDescription) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let role = HandshakeRole::between(&self.local_id, &peer);
        log::debug!("Starting handshake with {} as {:?} (gen {})", peer, role, generation);

        let rendezvous = self.rendezvous.clone();
        let timeout = self.handshake_timeout;
        let tx = self.outcomes.clone();
        let remote = peer.clone();
        let handshake = ScheduledTask::spawn(async move {
            let exchange = async {
                match role {
                    HandshakeRole::Offerer => rendezvous.offer(&remote, local).await,
                    HandshakeRole::Answerer => rendezvous.answer(&remote, local).await,
                }
            };
            let result = match tokio::time::timeout(timeout, exchange).await {
                Ok(Ok(description)) => Ok(description),
                Ok(Err(e)) => Err(PeerError::Handshake { peer: remote.clone(), reason: e.to_string() }),
                Err(_) => Err(PeerError::Timeout(remote.clone())),
            };
            let _ = tx.send(HandshakeOutcome { peer: remote, generation, result });
        });

        self.links.insert(
            peer,
            PeerLink { state: LinkState::Connecting, role, generation, handshake: Some(handshake) },
        );
    }

    /// Applies a handshake result. Outcomes for links that were torn down or
    /// restarted since the handshake began are ignored.
    pub fn on_handshake(&mut self, outcome: HandshakeOutcome) -> Option<PeerUpdate> {
        let link = match self.links.get_mut(&outcome.peer) {
            Some(link) if link.generation == outcome.generation => link,
            _ => {
                log::debug!("Ignoring stale handshake outcome for {}", outcome.peer);
                return None;
            }
        };
        link.handshake = None;

        match outcome.result {
            Ok(description) => {
                link.state = LinkState::Connected;
                let surface = self.surfaces.insert(RemoteStream { peer: outcome.peer.clone(), description });
                log::info!("Peer link to {} connected", outcome.peer);
                Some(PeerUpdate::Connected { peer: outcome.peer, surface })
            }
            Err(e) => {
                link.state = LinkState::Failed;
                log::warn!("Peer link failed: {}", e);
                Some(PeerUpdate::Failed(e))
            }
        }
    }

    /// Aborts any in-flight handshake, releases the peer's surface and drops
    /// the link. Returns whether a link existed.
    pub fn teardown(&mut self, peer: &ParticipantId) -> bool {
        self.surfaces.remove(peer);
        match self.links.remove(peer) {
            Some(link) => {
                if let Some(handshake) = link.handshake {
                    handshake.cancel();
                }
                log::debug!("Closed peer link to {}", peer);
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        let count = self.links.len();
        // Dropping each link aborts its handshake task.
        self.links.clear();
        self.surfaces.clear();
        if count > 0 {
            log::info!("Closed {} peer link(s)", count);
        }
    }
}

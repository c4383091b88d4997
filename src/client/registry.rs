use std::{collections::HashMap, sync::Arc};

use webrtc::{ice_transport::ice_candidate::RTCIceCandidateInit, peer_connection::RTCPeerConnection};

use super::{peer::PeerState, render::ViewId};

pub struct PeerEntry {
    pub connection: Arc<RTCPeerConnection>,
    pub view: Option<ViewId>,
    pub state: PeerState,
    pub serial: u64,
    /// Remote candidates that arrived before the remote description.
    pub pending_candidates: Vec<RTCIceCandidateInit>,
}

impl PeerEntry {
    pub fn new(connection: Arc<RTCPeerConnection>, serial: u64) -> Self {
        Self {
            connection,
            view: None,
            state: PeerState::Connecting,
            serial,
            pending_candidates: Vec::new(),
        }
    }
}

/// Participant id → connection and rendered view.
///
/// Owned by the call loop; never shared across tasks.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerEntry>,
    serials: u64,
}

impl PeerRegistry {
    /// Serial for the next connection to be inserted.
    pub fn next_serial(&mut self) -> u64 {
        self.serials += 1;
        self.serials
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(&mut self, peer: &str, entry: PeerEntry) -> Option<PeerEntry> {
        self.peers.insert(peer.to_string(), entry)
    }

    pub fn get(&self, peer: &str) -> Option<&PeerEntry> {
        self.peers.get(peer)
    }

    pub fn get_mut(&mut self, peer: &str) -> Option<&mut PeerEntry> {
        self.peers.get_mut(peer)
    }

    /// The entry for `peer`, only if it is still the connection `serial`.
    pub fn current_mut(&mut self, peer: &str, serial: u64) -> Option<&mut PeerEntry> {
        self.peers.get_mut(peer).filter(|e| e.serial == serial)
    }

    pub fn remove(&mut self, peer: &str) -> Option<PeerEntry> {
        self.peers.remove(peer)
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PeerEntry)> {
        self.peers.iter().map(|(id, e)| (id.as_str(), e))
    }

    pub fn connections(&self) -> impl Iterator<Item = &Arc<RTCPeerConnection>> {
        self.peers.values().map(|e| &e.connection)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (String, PeerEntry)> + '_ {
        self.peers.drain()
    }
}

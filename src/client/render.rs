use std::collections::{HashMap, HashSet};

use tracing::{debug, info};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

pub type ViewId = u64;

/// A track received from a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: RTPCodecType,
}

/// Presents remote participants. One view per participant; tracks of that
/// participant are attached to the same view.
pub trait Renderer: Send {
    /// Attach a track, creating the participant's view on first use.
    fn attach(&mut self, peer: &str, track: &RemoteTrackInfo) -> ViewId;

    /// Remove the participant's view. Returns `false` when there was none.
    fn detach(&mut self, peer: &str) -> bool;

    fn set_presenting(&mut self, peer: &str, presenting: bool);
}

#[derive(Debug, Clone)]
pub struct RemoteView {
    pub id: ViewId,
    pub label: String,
    pub tracks: Vec<RemoteTrackInfo>,
    pub presenting: bool,
}

/// In-memory video grid.
#[derive(Debug, Default)]
pub struct Grid {
    views: HashMap<String, RemoteView>,
    /// Participants announced as presenting before their first track.
    presenting: HashSet<String>,
    next_id: ViewId,
}

impl Grid {
    pub fn view(&self, peer: &str) -> Option<&RemoteView> {
        self.views.get(peer)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

impl Renderer for Grid {
    fn attach(&mut self, peer: &str, track: &RemoteTrackInfo) -> ViewId {
        let next_id = &mut self.next_id;
        let presenting = &mut self.presenting;
        let view = self.views.entry(peer.to_string()).or_insert_with(|| {
            *next_id += 1;
            info!(peer, view = *next_id, "remote view created");
            RemoteView {
                id: *next_id,
                label: peer.to_string(),
                tracks: Vec::new(),
                presenting: presenting.remove(peer),
            }
        });
        // A renegotiated stream replaces the track of the same kind.
        view.tracks.retain(|t| t.kind != track.kind);
        view.tracks.push(track.clone());
        debug!(peer, track = %track.id, kind = ?track.kind, "track attached");
        view.id
    }

    fn detach(&mut self, peer: &str) -> bool {
        self.presenting.remove(peer);
        let removed = self.views.remove(peer).is_some();
        if removed {
            info!(peer, "remote view removed");
        }
        removed
    }

    fn set_presenting(&mut self, peer: &str, presenting: bool) {
        match self.views.get_mut(peer) {
            Some(view) => view.presenting = presenting,
            None if presenting => {
                self.presenting.insert(peer.to_string());
            }
            None => {
                self.presenting.remove(peer);
            }
        }
    }
}

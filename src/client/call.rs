use std::{future::Future, sync::Arc};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::{
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

use super::{
    media::{Constraints, LocalStream, LocalTrack, MediaSource},
    peer::{PeerConnector, PeerEvent, PeerState},
    recording::RecordingClient,
    registry::{PeerEntry, PeerRegistry},
    render::Renderer,
    screen_share::ScreenShare,
    signaling::Outbox,
};
use crate::{
    error::CallError,
    signal::{Envelope, Signal},
};

/// One participant's side of a call.
///
/// Everything here is driven from a single loop (`run`): signaling
/// envelopes and connection callbacks are handled one at a time, so the
/// registry needs no locking.
pub struct Call<S: MediaSource, R: Renderer> {
    identity: String,
    connector: PeerConnector,
    outbox: Outbox,
    peers: PeerRegistry,
    local: Option<LocalStream>,
    screen: ScreenShare,
    source: S,
    renderer: R,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    host: Option<RecordingClient>,
}

enum Next {
    Signal(Option<Envelope>),
    Peer(PeerEvent),
    Shutdown,
}

impl<S: MediaSource, R: Renderer> Call<S, R> {
    pub fn new(
        identity: impl Into<String>,
        connector: PeerConnector,
        source: S,
        renderer: R,
        outbox: Outbox,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            identity: identity.into(),
            connector,
            outbox,
            peers: PeerRegistry::default(),
            local: None,
            screen: ScreenShare::default(),
            source,
            renderer,
            events_tx,
            events_rx,
            host: None,
        }
    }

    /// Enable the recording and attendance controls.
    pub fn with_host_controls(mut self, client: RecordingClient) -> Self {
        self.host = Some(client);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local.as_ref()
    }

    pub fn screen_share(&self) -> &ScreenShare {
        &self.screen
    }

    pub fn host_controls(&mut self) -> crate::Result<&mut RecordingClient> {
        self.host.as_mut().ok_or(CallError::NotHost)
    }

    /// Capture local media and announce ourselves to the room.
    pub async fn start(&mut self, constraints: Constraints) -> crate::Result<()> {
        let stream = self.source.user_media(constraints)?;
        info!(identity = %self.identity, stream = %stream.id, "local media ready");
        if let Some(old) = self.local.replace(stream) {
            old.stop();
        }
        self.send(Signal::NewPeer, None)
    }

    /// Drive the call until the relay goes away or `shutdown` completes,
    /// then hang up.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<Envelope>,
        shutdown: impl Future,
    ) -> crate::Result<()> {
        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                env = inbound.recv() => Next::Signal(env),
                Some(event) = self.events_rx.recv() => Next::Peer(event),
                _ = &mut shutdown => Next::Shutdown,
            };
            match next {
                Next::Signal(Some(env)) => {
                    let action = env.action.clone();
                    if let Err(err) = self.handle(env).await {
                        error!(cause = %err, %action, "signal failed");
                    }
                }
                Next::Signal(None) => {
                    info!("signaling channel closed");
                    break;
                }
                Next::Peer(event) => {
                    if let Err(err) = self.handle_peer_event(event).await {
                        error!(cause = %err, "peer event failed");
                    }
                }
                Next::Shutdown => break,
            }
        }
        self.hangup().await
    }

    /// Process one envelope from the relay.
    pub async fn handle(&mut self, env: Envelope) -> crate::Result<()> {
        let Some(sender) = env.sender.clone() else {
            debug!(action = %env.action, "dropping envelope without sender");
            return Ok(());
        };
        if sender == self.identity {
            return Ok(());
        }
        debug!(from = %sender, action = %env.action, "signal");
        match env.signal()? {
            Signal::NewPeer => self.offer_to(&sender).await,
            Signal::Offer(offer) => self.answer_offer(&sender, offer).await,
            Signal::Answer(answer) => self.apply_answer(&sender, answer).await,
            Signal::Candidate(candidate) => self.add_candidate(&sender, candidate).await,
            Signal::PeerDisconnected => {
                self.remove_peer(&sender).await;
                Ok(())
            }
            Signal::ScreenShareStarted => {
                self.mark_presenting(&sender, true);
                Ok(())
            }
            Signal::ScreenShareStopped => {
                self.mark_presenting(&sender, false);
                Ok(())
            }
        }
    }

    fn mark_presenting(&mut self, peer: &str, presenting: bool) {
        debug!(%peer, presenting, "presenting");
        self.renderer.set_presenting(peer, presenting);
    }

    /// Process one callback raised by a peer connection.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> crate::Result<()> {
        let (peer, serial) = (event.peer().to_string(), event.serial());
        let Some(entry) = self.peers.current_mut(&peer, serial) else {
            debug!(%peer, serial, "event from a replaced connection");
            return Ok(());
        };
        match event {
            PeerEvent::LocalCandidate { candidate, .. } => {
                self.send(Signal::Candidate(candidate), Some(&peer))
            }
            PeerEvent::RemoteTrack { track, .. } => {
                entry.view = Some(self.renderer.attach(&peer, &track));
                Ok(())
            }
            PeerEvent::StateChanged { state, .. } => {
                match state {
                    RTCPeerConnectionState::Connected => {
                        info!(%peer, "peer connected");
                        entry.state = PeerState::Connected;
                    }
                    RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed => {
                        info!(%peer, ?state, "peer lost");
                        entry.state = PeerState::Closed;
                        self.remove_peer(&peer).await;
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    /// Caller side: a participant announced itself.
    async fn offer_to(&mut self, peer: &str) -> crate::Result<()> {
        let pc = self.open(peer).await?;
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer.clone()).await?;
        let offer = pc.local_description().await.unwrap_or(offer);
        self.send(Signal::Offer(offer), Some(peer))
    }

    /// Callee side.
    async fn answer_offer(&mut self, peer: &str, offer: RTCSessionDescription) -> crate::Result<()> {
        let pc = self.open(peer).await?;
        pc.set_remote_description(offer).await?;
        self.flush_candidates(peer).await;
        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer.clone()).await?;
        let answer = pc.local_description().await.unwrap_or(answer);
        self.send(Signal::Answer(answer), Some(peer))
    }

    async fn apply_answer(&mut self, peer: &str, answer: RTCSessionDescription) -> crate::Result<()> {
        let Some(entry) = self.peers.get(peer) else {
            warn!(%peer, "answer from unknown peer");
            return Ok(());
        };
        entry.connection.set_remote_description(answer).await?;
        self.flush_candidates(peer).await;
        Ok(())
    }

    async fn add_candidate(&mut self, peer: &str, candidate: RTCIceCandidateInit) -> crate::Result<()> {
        let Some(entry) = self.peers.get_mut(peer) else {
            debug!(%peer, "candidate from unknown peer");
            return Ok(());
        };
        if entry.connection.remote_description().await.is_none() {
            entry.pending_candidates.push(candidate);
            return Ok(());
        }
        entry.connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn flush_candidates(&mut self, peer: &str) {
        let Some(entry) = self.peers.get_mut(peer) else {
            return;
        };
        for candidate in std::mem::take(&mut entry.pending_candidates) {
            if let Err(err) = entry.connection.add_ice_candidate(candidate).await {
                warn!(cause = %err, %peer, "buffered candidate rejected");
            }
        }
    }

    /// New connection to `peer`, replacing and closing any previous one.
    async fn open(&mut self, peer: &str) -> crate::Result<Arc<RTCPeerConnection>> {
        let serial = self.peers.next_serial();
        let outgoing = self.outgoing_tracks();
        let pc = self
            .connector
            .connect(peer, serial, &outgoing, self.events_tx.clone())
            .await?;
        if let Some(stale) = self.peers.insert(peer, PeerEntry::new(pc.clone(), serial)) {
            debug!(%peer, serial = stale.serial, "replacing connection");
            if let Err(err) = stale.connection.close().await {
                warn!(cause = %err, %peer, "closing replaced connection");
            }
        }
        Ok(pc)
    }

    /// Audio from the camera stream; video from the screen while sharing.
    fn outgoing_tracks(&self) -> Vec<Arc<LocalTrack>> {
        let audio = self.local.as_ref().and_then(|s| s.audio.clone());
        let video = self.screen.video().cloned().or_else(|| self.camera().cloned());
        audio.into_iter().chain(video).collect()
    }

    fn camera(&self) -> Option<&Arc<LocalTrack>> {
        self.local.as_ref().and_then(|s| s.video.as_ref())
    }

    /// Close the connection and drop the view of `peer`. Returns whether a
    /// connection was registered.
    pub async fn remove_peer(&mut self, peer: &str) -> bool {
        let entry = self.peers.remove(peer);
        self.renderer.detach(peer);
        let Some(entry) = entry else {
            return false;
        };
        if let Err(err) = entry.connection.close().await {
            warn!(cause = %err, %peer, "closing connection");
        }
        info!(%peer, "peer removed");
        true
    }

    pub async fn start_screen_share(&mut self) -> crate::Result<bool> {
        if !self.screen.start(&mut self.source, &self.peers).await? {
            return Ok(false);
        }
        self.send(Signal::ScreenShareStarted, None)?;
        Ok(true)
    }

    pub async fn stop_screen_share(&mut self) -> crate::Result<bool> {
        let camera = self.local.as_ref().and_then(|s| s.video.clone());
        if !self.screen.stop(camera.as_ref(), &self.peers).await? {
            return Ok(false);
        }
        self.send(Signal::ScreenShareStopped, None)?;
        Ok(true)
    }

    /// Returns whether sharing is on afterwards.
    pub async fn toggle_screen_share(&mut self) -> crate::Result<bool> {
        if self.screen.is_active() {
            self.stop_screen_share().await?;
        } else {
            self.start_screen_share().await?;
        }
        Ok(self.screen.is_active())
    }

    /// Mute or unmute the microphone. Returns the new state, `false` when
    /// there is no microphone.
    pub fn toggle_audio(&mut self) -> bool {
        toggle(self.local.as_ref().and_then(|s| s.audio.as_ref()))
    }

    /// Turn the camera on or off. Returns the new state, `false` when there
    /// is no camera.
    pub fn toggle_video(&mut self) -> bool {
        toggle(self.camera())
    }

    /// Leave the call: close every connection, drop every view, stop local
    /// capture and tell the room.
    pub async fn hangup(&mut self) -> crate::Result<()> {
        let peers: Vec<_> = self.peers.drain().collect();
        for (peer, entry) in peers {
            self.renderer.detach(&peer);
            if let Err(err) = entry.connection.close().await {
                warn!(cause = %err, %peer, "closing connection");
            }
        }
        self.screen.stop(None, &self.peers).await?;
        if let Some(local) = self.local.take() {
            local.stop();
        }
        if self.send(Signal::PeerDisconnected, None).is_err() {
            debug!("relay already gone");
        }
        info!(identity = %self.identity, "hung up");
        Ok(())
    }

    fn send(&self, signal: Signal, target: Option<&str>) -> crate::Result<()> {
        let env = Envelope::new(&signal, target)?;
        self.outbox.send(env).map_err(|_| CallError::SignalingClosed)
    }
}

fn toggle(track: Option<&Arc<LocalTrack>>) -> bool {
    match track {
        Some(track) => {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            enabled
        }
        None => false,
    }
}

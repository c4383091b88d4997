use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine, APIBuilder,
        API,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_receiver::RTCRtpReceiver, RTCRtpTransceiver,
    },
    track::track_remote::TrackRemote,
};

use super::{media::LocalTrack, render::RemoteTrackInfo};

/// Lifecycle of one remote participant's connection. A participant with no
/// registry entry is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Offer/answer exchange in flight.
    Connecting,
    Connected,
    Closed,
}

/// Raised by connection callbacks and drained by the call loop.
///
/// `serial` identifies the connection that raised the event, so events of a
/// replaced connection can be told apart from those of its successor.
#[derive(Debug)]
pub enum PeerEvent {
    LocalCandidate {
        peer: String,
        serial: u64,
        candidate: RTCIceCandidateInit,
    },
    RemoteTrack {
        peer: String,
        serial: u64,
        track: RemoteTrackInfo,
    },
    StateChanged {
        peer: String,
        serial: u64,
        state: RTCPeerConnectionState,
    },
}

impl PeerEvent {
    pub fn peer(&self) -> &str {
        match self {
            PeerEvent::LocalCandidate { peer, .. }
            | PeerEvent::RemoteTrack { peer, .. }
            | PeerEvent::StateChanged { peer, .. } => peer,
        }
    }

    pub fn serial(&self) -> u64 {
        match self {
            PeerEvent::LocalCandidate { serial, .. }
            | PeerEvent::RemoteTrack { serial, .. }
            | PeerEvent::StateChanged { serial, .. } => *serial,
        }
    }
}

/// Builds peer connections that share one media engine and ICE setup.
pub struct PeerConnector {
    api: API,
    ice_servers: Vec<String>,
}

impl PeerConnector {
    pub fn new(ice_servers: Vec<String>) -> crate::Result<Self> {
        // Create a MediaEngine object to configure the supported codec
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        // Use the default set of Interceptors
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Create a connection to `peer` sending `outgoing`.
    ///
    /// The connection always has exactly one video sender: if `outgoing` has
    /// no video track an empty video transceiver is added, so the outgoing
    /// video can later be replaced without renegotiating.
    pub async fn connect(
        &self,
        peer: &str,
        serial: u64,
        outgoing: &[Arc<LocalTrack>],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> crate::Result<Arc<RTCPeerConnection>> {
        let pc = Arc::new(self.api.new_peer_connection(self.configuration()).await?);

        let mut has_video = false;
        for track in outgoing {
            let sender = pc.add_track(track.track()).await?;
            has_video |= track.kind() == RTPCodecType::Video;
            // Incoming RTCP has to be read for the interceptors to work.
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        if !has_video {
            pc.add_transceiver_from_kind(RTPCodecType::Video, None).await?;
        }

        let tx = events.clone();
        let id = peer.to_string();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            // `None` marks the end of gathering.
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(candidate) => {
                        let _ = tx.send(PeerEvent::LocalCandidate {
                            peer: id.clone(),
                            serial,
                            candidate,
                        });
                    }
                    Err(err) => debug!(cause = %err, peer = %id, "unusable local candidate"),
                }
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        let id = peer.to_string();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let _ = tx.send(PeerEvent::RemoteTrack {
                    peer: id.clone(),
                    serial,
                    track: RemoteTrackInfo {
                        id: track.id().to_string(),
                        stream_id: track.stream_id().to_string(),
                        kind: track.kind(),
                    },
                });
                Box::pin(async {})
            },
        ));

        let id = peer.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            trace!(peer = %id, ?state, "connection state");
            let _ = events.send(PeerEvent::StateChanged {
                peer: id.clone(),
                serial,
                state,
            });
            Box::pin(async {})
        }));

        Ok(pc)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    use super::PeerConnector;
    use crate::{
        client::media::{Constraints, MediaSource, SyntheticSource},
        Result,
    };

    async fn video_transceivers(pc: &webrtc::peer_connection::RTCPeerConnection) -> usize {
        pc.get_transceivers()
            .await
            .iter()
            .filter(|t| t.kind() == RTPCodecType::Video)
            .count()
    }

    #[tokio::test]
    async fn one_video_sender_with_or_without_camera() -> Result<()> {
        let connector = PeerConnector::new(vec![])?;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut source = SyntheticSource::default();

        let camera = source.user_media(Constraints { audio: true, video: true })?;
        let tracks: Vec<_> = camera.tracks().cloned().collect();
        let pc = connector.connect("bob", 1, &tracks, tx.clone()).await?;
        assert_eq!(video_transceivers(&pc).await, 1);
        assert_eq!(pc.get_transceivers().await.len(), 2);
        pc.close().await?;

        let mic = source.user_media(Constraints { audio: true, video: false })?;
        let tracks: Vec<_> = mic.tracks().cloned().collect();
        let pc = connector.connect("bob", 2, &tracks, tx).await?;
        assert_eq!(video_transceivers(&pc).await, 1);
        pc.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn offer_lists_outgoing_media() -> Result<()> {
        let connector = PeerConnector::new(vec![])?;
        let (tx, _rx) = mpsc::unbounded_channel();
        let camera = SyntheticSource::default().user_media(Constraints { audio: true, video: true })?;
        let tracks: Vec<Arc<_>> = camera.tracks().cloned().collect();
        let pc = connector.connect("bob", 1, &tracks, tx).await?;

        let offer = pc.create_offer(None).await?;
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        pc.close().await?;
        Ok(())
    }
}

use std::sync::Arc;

use tracing::{info, warn};
use webrtc::{
    peer_connection::RTCPeerConnection, rtp_transceiver::rtp_codec::RTPCodecType,
    track::track_local::TrackLocal,
};

use super::{
    media::{LocalStream, LocalTrack, MediaSource},
    registry::PeerRegistry,
};

/// Put `track` on every video sender of `pc`, or clear them with `None`.
/// Returns the number of senders touched. No sender is ever added.
///
/// A sender cleared with `None` cannot take a track again.
pub async fn replace_video_track(
    pc: &RTCPeerConnection,
    track: Option<Arc<dyn TrackLocal + Send + Sync>>,
) -> crate::Result<usize> {
    let mut replaced = 0;
    for transceiver in pc.get_transceivers().await {
        if transceiver.kind() != RTPCodecType::Video {
            continue;
        }
        transceiver.sender().await.replace_track(track.clone()).await?;
        replaced += 1;
    }
    Ok(replaced)
}

async fn video_track(pc: &RTCPeerConnection) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
    for transceiver in pc.get_transceivers().await {
        if transceiver.kind() == RTPCodecType::Video {
            return transceiver.sender().await.track().await;
        }
    }
    None
}

/// Switch every connection to `track`. If one connection refuses, the ones
/// already switched get their previous track back and the error is returned.
async fn replace_everywhere(
    peers: &PeerRegistry,
    track: Arc<dyn TrackLocal + Send + Sync>,
) -> crate::Result<()> {
    let mut switched = Vec::new();
    for (id, entry) in peers.iter() {
        let previous = video_track(&entry.connection).await;
        match replace_video_track(&entry.connection, Some(track.clone())).await {
            Ok(0) => warn!(peer = id, "connection has no video sender"),
            Ok(_) => switched.push((id, &entry.connection, previous)),
            Err(err) => {
                warn!(cause = %err, peer = id, rolled_back = switched.len(), "video replacement failed");
                for (id, pc, previous) in switched.into_iter().rev() {
                    if let Err(err) = replace_video_track(pc, previous).await {
                        warn!(cause = %err, peer = id, "failed to restore video");
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Screen capture currently replacing the camera, if any.
pub struct ScreenShare {
    stream: Option<LocalStream>,
    /// Disabled video track parked on the senders when sharing stops and
    /// there is no camera to restore.
    idle: Arc<LocalTrack>,
}

impl Default for ScreenShare {
    fn default() -> Self {
        let idle = LocalTrack::new(RTPCodecType::Video, "idle-video".to_string(), "idle".to_string());
        idle.set_enabled(false);
        Self {
            stream: None,
            idle: Arc::new(idle),
        }
    }
}

impl ScreenShare {
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn video(&self) -> Option<&Arc<LocalTrack>> {
        self.stream.as_ref().and_then(|s| s.video.as_ref())
    }

    /// Capture the display and send it instead of the camera on every
    /// connection. Returns `false` when already sharing.
    pub async fn start(
        &mut self,
        source: &mut dyn MediaSource,
        peers: &PeerRegistry,
    ) -> crate::Result<bool> {
        if self.is_active() {
            return Ok(false);
        }
        let stream = source.display_media()?;
        if let Some(video) = &stream.video {
            if let Err(err) = replace_everywhere(peers, video.track()).await {
                stream.stop();
                return Err(err);
            }
        }
        info!(stream = %stream.id, peers = peers.len(), "screen share started");
        self.stream = Some(stream);
        Ok(true)
    }

    /// Stop the capture and put `camera` back, or park a disabled track on
    /// the video senders when there is no camera. Returns `false` when not
    /// sharing. On error the share stays active.
    pub async fn stop(
        &mut self,
        camera: Option<&Arc<LocalTrack>>,
        peers: &PeerRegistry,
    ) -> crate::Result<bool> {
        if !self.is_active() {
            return Ok(false);
        }
        replace_everywhere(peers, camera.unwrap_or(&self.idle).track()).await?;
        let Some(stream) = self.stream.take() else {
            return Ok(false);
        };
        stream.stop();
        info!(stream = %stream.id, restored_camera = camera.is_some(), "screen share stopped");
        Ok(true)
    }
}

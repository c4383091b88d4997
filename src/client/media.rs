use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tracing::debug;
use webrtc::{
    api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8},
    media::Sample,
    rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType},
    track::track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
};

use crate::error::CallError;

/// What to capture when asking for user media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub audio: bool,
    pub video: bool,
}

/// A captured outgoing track.
///
/// A disabled track stays attached to every sender but drops the frames
/// written to it. A stopped track drops frames for good.
pub struct LocalTrack {
    inner: Arc<TrackLocalStaticSample>,
    kind: RTPCodecType,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: RTPCodecType, id: String, stream_id: String) -> Self {
        let capability = match kind {
            RTPCodecType::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            _ => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        Self {
            inner: Arc::new(TrackLocalStaticSample::new(capability, id, stream_id)),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn kind(&self) -> RTPCodecType {
        self.kind
    }

    /// The handle senders are bound to.
    pub fn track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::Relaxed) {
            debug!(track = self.id(), "local track stopped");
        }
    }

    /// Push one encoded frame. Returns `false` when the frame was dropped
    /// because the track is muted or stopped.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> crate::Result<bool> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(false);
        }
        self.inner
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(true)
    }
}

/// Tracks captured together: camera + microphone, or a display capture.
pub struct LocalStream {
    pub id: String,
    pub audio: Option<Arc<LocalTrack>>,
    pub video: Option<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.audio.iter().chain(self.video.iter())
    }

    pub fn stop(&self) {
        self.tracks().for_each(|t| t.stop());
    }
}

/// Where local media comes from.
pub trait MediaSource: Send {
    /// Camera and/or microphone capture.
    fn user_media(&mut self, constraints: Constraints) -> crate::Result<LocalStream>;

    /// Screen capture. Only the video track is used.
    fn display_media(&mut self) -> crate::Result<LocalStream>;
}

/// Source backed by empty sample tracks, for headless participants. Each
/// device can be switched off to behave like a denied permission.
pub struct SyntheticSource {
    camera: bool,
    microphone: bool,
    display: bool,
    captures: u64,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            display: true,
            captures: 0,
        }
    }
}

impl SyntheticSource {
    pub fn without_camera(mut self) -> Self {
        self.camera = false;
        self
    }

    pub fn without_microphone(mut self) -> Self {
        self.microphone = false;
        self
    }

    pub fn without_display(mut self) -> Self {
        self.display = false;
        self
    }

    fn next_stream_id(&mut self, prefix: &str) -> String {
        self.captures += 1;
        format!("{prefix}-{}", self.captures)
    }
}

impl MediaSource for SyntheticSource {
    fn user_media(&mut self, constraints: Constraints) -> crate::Result<LocalStream> {
        if constraints.video && !self.camera {
            return Err(CallError::CaptureDenied("camera"));
        }
        if constraints.audio && !self.microphone {
            return Err(CallError::CaptureDenied("microphone"));
        }
        let id = self.next_stream_id("camera");
        let audio = constraints.audio.then(|| {
            Arc::new(LocalTrack::new(RTPCodecType::Audio, format!("{id}-audio"), id.clone()))
        });
        let video = constraints.video.then(|| {
            Arc::new(LocalTrack::new(RTPCodecType::Video, format!("{id}-video"), id.clone()))
        });
        Ok(LocalStream { id, audio, video })
    }

    fn display_media(&mut self) -> crate::Result<LocalStream> {
        if !self.display {
            return Err(CallError::CaptureDenied("display"));
        }
        let id = self.next_stream_id("screen");
        let video = Arc::new(LocalTrack::new(RTPCodecType::Video, format!("{id}-video"), id.clone()));
        Ok(LocalStream {
            id,
            audio: None,
            video: Some(video),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    use super::{Constraints, MediaSource, SyntheticSource};
    use crate::{error::CallError, Result};

    #[test]
    fn denied_devices() {
        let mut source = SyntheticSource::default().without_camera().without_display();
        let both = Constraints { audio: true, video: true };
        assert!(matches!(source.user_media(both), Err(CallError::CaptureDenied("camera"))));
        assert!(matches!(source.display_media(), Err(CallError::CaptureDenied("display"))));

        let stream = source
            .user_media(Constraints { audio: true, video: false })
            .expect("microphone only");
        assert!(stream.video.is_none());
        assert_eq!(stream.audio.map(|t| t.kind()), Some(RTPCodecType::Audio));
    }

    #[test]
    fn denied_microphone_allows_camera_only() -> Result<()> {
        let mut source = SyntheticSource::default().without_microphone();
        let both = Constraints { audio: true, video: true };
        assert!(matches!(source.user_media(both), Err(CallError::CaptureDenied("microphone"))));

        let camera = source.user_media(Constraints { audio: false, video: true })?;
        assert!(camera.audio.is_none());
        assert_eq!(camera.video.map(|t| t.kind()), Some(RTPCodecType::Video));
        Ok(())
    }

    #[test]
    fn captures_get_distinct_ids() -> Result<()> {
        let mut source = SyntheticSource::default();
        let camera = source.user_media(Constraints { audio: true, video: true })?;
        let screen = source.display_media()?;
        assert_ne!(camera.id, screen.id);
        assert_eq!(camera.tracks().count(), 2);
        assert!(screen.audio.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn muted_and_stopped_tracks_drop_frames() -> Result<()> {
        let mut source = SyntheticSource::default();
        let stream = source.user_media(Constraints { audio: true, video: false })?;
        let mic = stream.audio.clone().expect("microphone");
        let frame = || Bytes::from_static(&[0xf8, 0xff, 0xfe]);
        let ptime = Duration::from_millis(20);

        assert!(mic.write_frame(frame(), ptime).await?);
        mic.set_enabled(false);
        assert!(!mic.write_frame(frame(), ptime).await?);
        mic.set_enabled(true);
        stream.stop();
        assert!(mic.is_stopped());
        assert!(!mic.write_frame(frame(), ptime).await?);
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::session_description::RTCSessionDescription,
};

use crate::error::CallError;

pub const NEW_PEER: &str = "new-peer";
pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const CANDIDATE: &str = "candidate";
pub const PEER_DISCONNECTED: &str = "peer-disconnected";
pub const SCREEN_SHARE_STARTED: &str = "screen-share-started";
pub const SCREEN_SHARE_STOPPED: &str = "screen-share-stopped";

/// One frame on the signaling socket.
///
/// `sender` is stamped by the relay; whatever a client puts there is
/// overwritten. A missing `target` means the frame goes to every other
/// member of the room.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Signal {
    NewPeer,
    Offer(RTCSessionDescription),
    Answer(RTCSessionDescription),
    Candidate(RTCIceCandidateInit),
    PeerDisconnected,
    ScreenShareStarted,
    ScreenShareStopped,
}

impl Signal {
    pub fn action(&self) -> &'static str {
        match self {
            Signal::NewPeer => NEW_PEER,
            Signal::Offer(_) => OFFER,
            Signal::Answer(_) => ANSWER,
            Signal::Candidate(_) => CANDIDATE,
            Signal::PeerDisconnected => PEER_DISCONNECTED,
            Signal::ScreenShareStarted => SCREEN_SHARE_STARTED,
            Signal::ScreenShareStopped => SCREEN_SHARE_STOPPED,
        }
    }

    fn data(&self) -> crate::Result<Value> {
        Ok(match self {
            Signal::Offer(sdp) | Signal::Answer(sdp) => serde_json::to_value(sdp)?,
            Signal::Candidate(candidate) => serde_json::to_value(candidate)?,
            _ => json!({}),
        })
    }

    /// Rebuild a signal from its action tag and payload.
    pub fn decode(action: &str, data: Value) -> crate::Result<Self> {
        Ok(match action {
            NEW_PEER => Signal::NewPeer,
            OFFER => Signal::Offer(serde_json::from_value(data)?),
            ANSWER => Signal::Answer(serde_json::from_value(data)?),
            CANDIDATE => Signal::Candidate(serde_json::from_value(data)?),
            PEER_DISCONNECTED => Signal::PeerDisconnected,
            SCREEN_SHARE_STARTED => Signal::ScreenShareStarted,
            SCREEN_SHARE_STOPPED => Signal::ScreenShareStopped,
            other => return Err(CallError::UnknownAction(other.to_string())),
        })
    }
}

impl Envelope {
    /// Outbound frame, as a client sends it.
    pub fn new(signal: &Signal, target: Option<&str>) -> crate::Result<Self> {
        Ok(Self {
            action: signal.action().to_string(),
            data: signal.data()?,
            sender: None,
            target: target.map(str::to_string),
        })
    }

    pub fn signal(&self) -> crate::Result<Signal> {
        Signal::decode(&self.action, self.data.clone())
    }

    /// Whether a frame published to the room should reach `member`.
    pub fn is_addressed_to(&self, member: &str) -> bool {
        match &self.target {
            Some(target) => target == member,
            None => self.sender.as_deref() != Some(member),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    use super::{Envelope, Signal};
    use crate::{error::CallError, Result};

    #[test]
    fn decode_browser_offer() -> Result<()> {
        let raw = r#"{"action":"offer","data":{"type":"offer","sdp":"v=0\r\n"},"sender":"bob","target":"alice"}"#;
        let env: Envelope = serde_json::from_str(raw)?;
        assert_eq!(env.sender.as_deref(), Some("bob"));
        match env.signal()? {
            Signal::Offer(sdp) => {
                assert_eq!(sdp.sdp_type, RTCSdpType::Offer);
                assert_eq!(sdp.sdp, "v=0\r\n");
            }
            other => panic!("Should be an offer, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn decode_browser_candidate() -> Result<()> {
        let raw = r#"{"action":"candidate","data":{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 54400 typ host","sdpMid":"0","sdpMLineIndex":0},"sender":"bob"}"#;
        let env: Envelope = serde_json::from_str(raw)?;
        assert!(env.target.is_none());
        match env.signal()? {
            Signal::Candidate(c) => {
                assert!(c.candidate.starts_with("candidate:1"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("Should be a candidate, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn payloadless_signals_carry_empty_object() -> Result<()> {
        let env = Envelope::new(&Signal::ScreenShareStarted, None)?;
        let wire: Value = serde_json::to_value(&env)?;
        assert_eq!(wire, json!({"action": "screen-share-started", "data": {}}));
        Ok(())
    }

    #[test]
    fn unknown_action_is_rejected() {
        let env = Envelope {
            action: "wave".to_string(),
            data: Value::Null,
            sender: Some("bob".to_string()),
            target: None,
        };
        assert!(matches!(env.signal(), Err(CallError::UnknownAction(a)) if a == "wave"));
    }

    #[test]
    fn addressing() {
        let mut env = Envelope {
            action: "new-peer".to_string(),
            data: json!({}),
            sender: Some("alice".to_string()),
            target: None,
        };
        assert!(!env.is_addressed_to("alice"));
        assert!(env.is_addressed_to("bob"));

        env.target = Some("carol".to_string());
        assert!(!env.is_addressed_to("bob"));
        assert!(env.is_addressed_to("carol"));
    }
}

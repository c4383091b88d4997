//! Participant side of a call: signaling connection, one peer connection
//! per remote participant, local media and host controls.

pub mod call;
pub mod media;
pub mod peer;
pub mod recording;
pub mod registry;
pub mod render;
pub mod screen_share;
pub mod signaling;

pub use call::Call;
pub use media::{Constraints, MediaSource, SyntheticSource};
pub use peer::PeerConnector;
pub use recording::RecordingClient;
pub use render::{Grid, Renderer};

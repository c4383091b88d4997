use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Websocket error: {0}")]
    WsError(#[from] tungstenite::error::Error),
    #[error("Std IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Invalid url: {0}")]
    UrlError(#[from] url::ParseError),

    /// Signaling
    #[error("Unknown signaling action: {0}")]
    UnknownAction(String),
    #[error("Invalid room path: {0}")]
    InvalidRoom(String),
    #[error("Signaling channel closed")]
    SignalingClosed,

    /// Local capture
    #[error("Could not access {0}")]
    CaptureDenied(&'static str),

    /// Host controls
    #[error("Only the host can control recording")]
    NotHost,
    #[error("A recording is already running")]
    AlreadyRecording,
    #[error("No recording is running")]
    NotRecording,
    #[error("Api error {status}: {message}")]
    Api { status: u16, message: String },

    /// WebRTC error
    #[error(transparent)]
    WebRTCError(#[from] webrtc::Error),
}

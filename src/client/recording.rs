//! Host-only HTTP controls: server-side recording and attendance.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info};
use url::Url;

use crate::{config::ApiConfig, error::CallError};

const START: &str = "videoconference/recording/start/";
const STOP: &str = "videoconference/recording/stop/";
const RECORDINGS: &str = "videoconference/recordings/";
const ATTENDANCE: &str = "videoconference/attendance/";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Recording {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub user: String,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub left_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct Started {
    recording_id: u64,
}

#[derive(Deserialize)]
struct Recordings {
    recordings: Vec<Recording>,
}

#[derive(Deserialize)]
struct Attendance {
    attendance: Vec<AttendanceRecord>,
}

#[derive(Deserialize)]
struct ApiFailure {
    error: String,
}

/// Client for the recording endpoints. The only state kept is the id of the
/// recording this client started.
pub struct RecordingClient {
    base: Url,
    token: Option<String>,
    client: reqwest::Client,
    current: Option<u64>,
}

impl RecordingClient {
    pub fn new(config: &ApiConfig) -> crate::Result<Self> {
        // A trailing slash keeps the last path segment of the base on join.
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base: Url::parse(&base)?,
            token: config.token.clone(),
            client,
            current: None,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    pub async fn start(&mut self, session_id: u64) -> crate::Result<u64> {
        if self.is_recording() {
            return Err(CallError::AlreadyRecording);
        }
        let req = self
            .client
            .post(self.base.join(START)?)
            .form(&[("session_id", session_id)]);
        let started: Started = self.send(req).await?;
        info!(session_id, recording_id = started.recording_id, "recording started");
        self.current = Some(started.recording_id);
        Ok(started.recording_id)
    }

    pub async fn stop(&mut self) -> crate::Result<u64> {
        let recording_id = self.current.ok_or(CallError::NotRecording)?;
        let req = self
            .client
            .post(self.base.join(STOP)?)
            .form(&[("recording_id", recording_id)]);
        let _: serde_json::Value = self.send(req).await?;
        info!(recording_id, "recording stopped");
        self.current = None;
        Ok(recording_id)
    }

    /// Start when idle, stop when recording. Returns the new state.
    pub async fn toggle_recording(&mut self, session_id: u64) -> crate::Result<bool> {
        if self.is_recording() {
            self.stop().await?;
        } else {
            self.start(session_id).await?;
        }
        Ok(self.is_recording())
    }

    pub async fn recordings(&self, session_id: u64) -> crate::Result<Vec<Recording>> {
        let req = self
            .client
            .get(self.base.join(RECORDINGS)?)
            .query(&[("session_id", session_id)]);
        let list: Recordings = self.send(req).await?;
        Ok(list.recordings)
    }

    pub async fn attendance(&self, session_id: u64) -> crate::Result<Vec<AttendanceRecord>> {
        let req = self
            .client
            .get(self.base.join(ATTENDANCE)?)
            .query(&[("session_id", session_id)]);
        let list: Attendance = self.send(req).await?;
        Ok(list.attendance)
    }

    async fn send<T: DeserializeOwned>(&self, mut req: RequestBuilder) -> crate::Result<T> {
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        debug!(url = %resp.url(), status = %resp.status(), "api response");
        if !resp.status().is_success() {
            return Err(failure(resp).await);
        }
        Ok(resp.json().await?)
    }
}

async fn failure(resp: Response) -> CallError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiFailure>(&body) {
        Ok(failure) => failure.error,
        Err(_) => body,
    };
    CallError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Form, Json, Router,
    };
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::RecordingClient;
    use crate::{config::ApiConfig, error::CallError, Result};

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "Bearer host-token")
            .unwrap_or(false)
    }

    async fn start(headers: HeaderMap, Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
        if !authorized(&headers) {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "You do not have permission to perform this action."})),
            );
        }
        match form.get("session_id") {
            Some(id) if id == "7" => (StatusCode::OK, Json(json!({"recording_id": 42, "status": "recording"}))),
            _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "Session ID is required."}))),
        }
    }

    async fn stop(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
        match form.get("recording_id") {
            Some(id) if id == "42" => (StatusCode::OK, Json(json!({"status": "stopped"}))),
            _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "Recording ID is required."}))),
        }
    }

    async fn recordings(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        assert_eq!(q.get("session_id").map(String::as_str), Some("7"));
        Json(json!({"recordings": [
            {"id": 42, "title": "Lesson 1", "started_at": "2026-10-01T09:00:00Z", "ended_at": "2026-10-01T10:00:00Z", "file_url": "/media/42.webm"},
            {"id": 43, "status": "processing"}
        ]}))
    }

    async fn attendance(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        assert_eq!(q.get("session_id").map(String::as_str), Some("7"));
        Json(json!({"attendance": [
            {"user": "alice", "joined_at": "2026-10-01T09:01:00Z", "left_at": "2026-10-01T09:58:00Z", "duration_seconds": 3420},
            {"user": "bob", "joined_at": "2026-10-01T09:05:00Z"}
        ]}))
    }

    async fn backend() -> Result<String> {
        let app = Router::new()
            .route("/videoconference/recording/start/", post(start))
            .route("/videoconference/recording/stop/", post(stop))
            .route("/videoconference/recordings/", get(recordings))
            .route("/videoconference/attendance/", get(attendance));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{}", addr))
    }

    fn config(base_url: String, token: Option<&str>) -> ApiConfig {
        ApiConfig {
            base_url,
            token: token.map(str::to_string),
            host: true,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn start_and_stop_recording() -> Result<()> {
        let base = backend().await?;
        let mut client = RecordingClient::new(&config(base, Some("host-token")))?;
        assert!(!client.is_recording());

        assert_eq!(client.start(7).await?, 42);
        assert!(client.is_recording());
        assert!(matches!(client.start(7).await, Err(CallError::AlreadyRecording)));

        assert_eq!(client.stop().await?, 42);
        assert!(!client.is_recording());
        assert!(matches!(client.stop().await, Err(CallError::NotRecording)));

        assert!(client.toggle_recording(7).await?);
        assert!(!client.toggle_recording(7).await?);
        Ok(())
    }

    #[tokio::test]
    async fn api_errors_carry_the_backend_message() -> Result<()> {
        let base = backend().await?;
        let mut anonymous = RecordingClient::new(&config(base.clone(), None))?;
        match anonymous.start(7).await {
            Err(CallError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert!(message.contains("permission"));
            }
            other => panic!("expected a 403, got {:?}", other.map(|_| ())),
        }
        assert!(!anonymous.is_recording());

        let mut host = RecordingClient::new(&config(base, Some("host-token")))?;
        match host.start(8).await {
            Err(CallError::Api { status, .. }) => assert_eq!(status, 400),
            other => panic!("expected a 400, got {:?}", other.map(|_| ())),
        }
        Ok(())
    }

    #[tokio::test]
    async fn lists() -> Result<()> {
        let base = backend().await?;
        let client = RecordingClient::new(&config(format!("{base}/"), None))?;

        let recordings = client.recordings(7).await?;
        assert_eq!(recordings.len(), 2);
        assert_eq!(recordings[0].title.as_deref(), Some("Lesson 1"));
        assert!(recordings[1].started_at.is_none());

        let attendance = client.attendance(7).await?;
        assert_eq!(attendance[0].duration_seconds, Some(3420));
        assert!(attendance[1].left_at.is_none());
        Ok(())
    }
}

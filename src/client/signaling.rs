use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::signal::Envelope;

/// Handle for queueing envelopes onto the signaling socket.
pub type Outbox = mpsc::UnboundedSender<Envelope>;

const INBOUND_BUFFER: usize = 64;

/// `<base>/ws/video/<room>/?user=<identity>`. A path on `base` is kept.
pub fn room_url(base: &str, room: &str, identity: &str) -> crate::Result<Url> {
    let base = format!("{}/", base.trim_end_matches('/'));
    let mut url = Url::parse(&base)?.join(&format!("ws/video/{}/", room.trim_matches('/')))?;
    url.query_pairs_mut().append_pair("user", identity);
    Ok(url)
}

/// Connect to the relay.
///
/// A writer task drains the returned `Outbox` into the socket until every
/// handle is dropped; a reader task forwards decoded envelopes to the
/// returned receiver until the socket closes.
pub async fn connect(url: &Url) -> crate::Result<(Outbox, mpsc::Receiver<Envelope>)> {
    let (ws, _) = connect_async(url.as_str()).await?;
    info!(%url, "signaling connected");
    let (mut sink, mut stream) = ws.split();

    let (outbox, mut outgoing) = mpsc::unbounded_channel::<Envelope>();
    let (incoming, inbound) = mpsc::channel::<Envelope>(INBOUND_BUFFER);

    tokio::spawn(async move {
        while let Some(env) = outgoing.recv().await {
            let text = match serde_json::to_string(&env) {
                Ok(text) => text,
                Err(err) => {
                    error!(cause = %err, "failed to encode envelope");
                    continue;
                }
            };
            if let Err(err) = sink.send(Message::Text(text)).await {
                error!(cause = %err, "failed to send envelope");
                break;
            }
        }
        let _ = sink.close().await;
        debug!("signaling writer finished");
    });

    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let env = match msg {
                Ok(Message::Text(text)) => serde_json::from_str::<Envelope>(&text),
                Ok(Message::Binary(buf)) => serde_json::from_slice::<Envelope>(&buf),
                Ok(Message::Close(_)) => {
                    info!("signaling closed by relay");
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    error!(cause = %err, "signaling read failed");
                    break;
                }
            };
            match env {
                Ok(env) => {
                    if incoming.send(env).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(cause = %err, "dropping malformed envelope"),
            }
        }
        debug!("signaling reader finished");
    });

    Ok((outbox, inbound))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{net::TcpListener, sync::oneshot, time::timeout};

    use super::{connect, room_url};
    use crate::{
        config::Config,
        signal::{Envelope, Signal},
        Result,
    };

    #[test]
    fn room_urls() -> Result<()> {
        let url = room_url("ws://127.0.0.1:8000", "regular/physics-101", "alice")?;
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/video/regular/physics-101/?user=alice");
        let url = room_url("ws://example.org/", "/lobby/", "bob smith")?;
        assert_eq!(url.as_str(), "ws://example.org/ws/video/lobby/?user=bob+smith");
        let url = room_url("wss://example.org/app", "instant/abc", "carol")?;
        assert_eq!(url.as_str(), "wss://example.org/app/ws/video/instant/abc/?user=carol");
        Ok(())
    }

    #[tokio::test]
    async fn round_trip_through_relay() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("ws://{}", listener.local_addr()?);
        let config = Config {
            port: 0,
            bind: None,
            max_connection_limit: None,
            room_buffer: None,
        };
        let (_stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(crate::server::run(config, listener, stopped));

        let (_bob_out, mut bob_in) = connect(&room_url(&base, "lobby", "bob")?).await?;
        let (alice_out, _alice_in) = connect(&room_url(&base, "lobby", "alice")?).await?;

        alice_out
            .send(Envelope::new(&Signal::NewPeer, None)?)
            .expect("writer alive");
        let env = timeout(Duration::from_secs(2), bob_in.recv())
            .await
            .expect("delivered in time")
            .expect("channel open");
        assert_eq!(env.action, "new-peer");
        assert_eq!(env.sender.as_deref(), Some("alice"));
        Ok(())
    }
}

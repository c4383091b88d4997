use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

use crate::signal::Envelope;
use crate::Result;

/// Send and receive signaling `Envelope`s over one participant's websocket.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    stream: SplitStream<WebSocketStream<TcpStream>>,
}

impl Connection {
    pub fn new(stream: WebSocketStream<TcpStream>, peer: SocketAddr) -> Connection {
        let (sink, stream) = stream.split();
        Connection { peer, sink, stream }
    }

    /// Read a single envelope from the socket.
    ///
    /// Control frames are skipped. Returns `None` once the participant closes
    /// the socket; a frame that is not a valid envelope is an error.
    pub async fn read_frame(&mut self) -> Result<Option<Envelope>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(txt))) => return Ok(Some(serde_json::from_str(&txt)?)),
                Some(Ok(Message::Binary(buf))) => return Ok(Some(serde_json::from_slice(&buf)?)),
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
                // ping / pong
                Some(Ok(_)) => {}
            }
        }
    }

    pub async fn write_frame(&mut self, envelope: &Envelope) -> Result<()> {
        let msg = Message::Text(serde_json::to_string(envelope)?);
        trace!(peer = %self.peer, "write frame: {}", &msg);
        self.sink.send(msg).await?;
        Ok(())
    }
}

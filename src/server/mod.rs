use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use serde_json::json;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, OwnedSemaphorePermit, Semaphore,
    },
    time,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::Config,
    signal::{Envelope, PEER_DISCONNECTED},
};

use self::{
    connection::Connection,
    room::{parse_membership, Hub, Membership},
    shutdown::Shutdown,
};

pub mod connection;
pub mod room;
mod shutdown;

const MAX_CONNECTIONS: usize = 200;
const ROOM_BUFFER: usize = 64;

pub struct Server {
    hub: Arc<Hub>,

    /// Broadcasts a shutdown signal to all active connections.
    ///
    /// When a connection task is spawned, it is passed a broadcast receiver
    /// handle. When a graceful shutdown is initiated, a `()` value is sent via
    /// the broadcast::Sender. Each active connection receives it, reaches a
    /// safe terminal state, and completes the task.
    notify_shutdown: broadcast::Sender<()>,
    /// Used as part of the graceful shutdown process to wait for participant
    /// connections to complete processing.
    ///
    /// Every handler holds a clone of `shutdown_complete_tx`. Once the listener
    /// drops its own sender and every handler task has finished,
    /// `shutdown_complete_rx.recv()` completes with `None`.
    shutdown_complete_rx: mpsc::Receiver<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
}

impl Server {
    pub async fn run(&mut self) -> crate::Result<()> {
        info!("accepting inbound connections");

        loop {
            // The permit moves into the handler task and is released when the
            // task finishes.
            let Ok(permit) = self.limit_connections.clone().acquire_owned().await else {
                return Ok(());
            };
            let (socket, peer) = self.accept().await?;
            trace!(%peer, "accepted tcp connection");

            let hub = self.hub.clone();
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
            let shutdown_complete = self.shutdown_complete_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = serve(socket, peer, hub, shutdown, shutdown_complete, permit).await {
                    error!(cause = ?err, %peer, "connection error");
                }
            });
        }
    }

    /// Accept an inbound connection.
    ///
    /// Errors are handled by backing off and retrying. After the first failure
    /// the task waits for 1 second, and every subsequent failure doubles the
    /// wait. If accepting fails after waiting for 64 seconds, this function
    /// returns with an error.
    async fn accept(&mut self) -> crate::Result<(TcpStream, SocketAddr)> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => return Ok((socket, peer)),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                    warn!(cause = %err, backoff, "accept failed, retrying");
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

pub async fn run(config: Config, listener: TcpListener, shutdown: impl Future) {
    // When the provided `shutdown` future completes, a shutdown message is
    // sent to all active connections through this broadcast channel.
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
    let max_conn_limit = config.max_connection_limit.unwrap_or(MAX_CONNECTIONS);
    let mut server = Server {
        hub: Arc::new(Hub::new(config.room_buffer.unwrap_or(ROOM_BUFFER))),
        listener,
        notify_shutdown,
        shutdown_complete_tx,
        shutdown_complete_rx,
        limit_connections: Arc::new(Semaphore::new(max_conn_limit)),
    };

    tokio::select! {
        res = server.run() => {
            // Accepting from the listener failed repeatedly. Errors of
            // individual connections never bubble up to here.
            if let Err(err) = res {
                error!(cause = %err, "failed to accept");
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    let Server {
        mut shutdown_complete_rx,
        shutdown_complete_tx,
        notify_shutdown,
        ..
    } = server;

    // Every subscribed handler sees the shutdown once the sender is dropped.
    drop(notify_shutdown);
    // Drop the final `Sender` so the `Receiver` below can complete.
    drop(shutdown_complete_tx);

    let _ = shutdown_complete_rx.recv().await;
}

/// Upgrade one socket, relay for it until it leaves, then announce the
/// departure to the rest of the room.
async fn serve(
    socket: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    shutdown: Shutdown,
    shutdown_complete: mpsc::Sender<()>,
    _permit: OwnedSemaphorePermit,
) -> crate::Result<()> {
    // Joining happens inside the handshake so the member is subscribed before
    // its client sees the upgrade response.
    let mut joined = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match parse_membership(req.uri().path(), req.uri().query()) {
            Ok(membership) => {
                let (room_tx, room_rx) = hub.join(&membership);
                joined = Some((membership, room_tx, room_rx));
                Ok(resp)
            }
            Err(err) => {
                debug!(cause = %err, "rejecting upgrade");
                let mut resp = ErrorResponse::new(Some(err.to_string()));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                Err(resp)
            }
        }
    };
    let upgraded = accept_hdr_async(socket, callback).await;
    let stream = match upgraded {
        Ok(stream) => stream,
        Err(err) => {
            if let Some((membership, room_tx, room_rx)) = joined {
                drop((room_tx, room_rx));
                hub.leave(&membership);
            }
            return Err(err.into());
        }
    };
    let Some((membership, room_tx, room_rx)) = joined else {
        return Ok(());
    };
    info!(room = %membership.room, user = %membership.user, %peer, "participant joined");

    let mut handler = Handler {
        connection: Connection::new(stream, peer),
        membership: membership.clone(),
        room_tx: room_tx.clone(),
        room_rx,
        shutdown,
        _shutdown_complete: shutdown_complete,
    };
    let res = handler.run().await;
    drop(handler);

    // Another socket of the same identity keeps the participant in the room.
    if hub.leave(&membership) {
        let _ = room_tx.send(Envelope {
            action: PEER_DISCONNECTED.to_string(),
            data: json!({}),
            sender: Some(membership.user.clone()),
            target: None,
        });
        info!(room = %membership.room, user = %membership.user, "participant left");
    } else {
        debug!(room = %membership.room, user = %membership.user, "socket closed, identity still connected");
    }
    res
}

/// Per-participant handler. Reads envelopes from the socket and publishes
/// them to the room, and writes room traffic addressed to this participant
/// back to the socket.
struct Handler {
    connection: Connection,
    membership: Membership,
    room_tx: broadcast::Sender<Envelope>,
    room_rx: broadcast::Receiver<Envelope>,
    /// Listen for shutdown notifications.
    shutdown: Shutdown,
    /// Not used directly. Dropped together with the handler, which tells
    /// `run` this connection has finished.
    _shutdown_complete: mpsc::Sender<()>,
}

enum Traffic {
    Inbound(Option<Envelope>),
    Room(Result<Envelope, RecvError>),
}

impl Handler {
    async fn run(&mut self) -> crate::Result<()> {
        while !self.shutdown.is_shutdown() {
            let traffic = tokio::select! {
                res = self.connection.read_frame() => Traffic::Inbound(res?),
                res = self.room_rx.recv() => Traffic::Room(res),
                _ = self.shutdown.recv() => {
                    return Ok(());
                }
            };

            match traffic {
                // The participant closed the socket.
                Traffic::Inbound(None) => return Ok(()),
                Traffic::Inbound(Some(mut env)) => {
                    env.sender = Some(self.membership.user.clone());
                    debug!(?env);
                    // This handler is itself subscribed, so the room always has
                    // a receiver.
                    let _ = self.room_tx.send(env);
                }
                Traffic::Room(Ok(mut env)) => {
                    if env.is_addressed_to(&self.membership.user) {
                        env.target = None;
                        self.connection.write_frame(&env).await?;
                    }
                }
                Traffic::Room(Err(RecvError::Lagged(skipped))) => {
                    warn!(user = %self.membership.user, skipped, "participant lagging, dropped messages");
                }
                Traffic::Room(Err(RecvError::Closed)) => return Ok(()),
            }
        }
        Ok(())
    }
}

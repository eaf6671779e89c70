//! # Socket Server
//!
//! A WebSocket channel subsystem. The process runs two of them, the user
//! channel on `/ws` and the API channel on `/mcws`, each with its own
//! [`ClientPool`]. They share nothing.
//!
//! Message schemas belong to the subsystems built on top; this layer owns the
//! handshake, the connection set, fan-out and liveness. A client that does
//! not answer a ping before the next one is due gets dropped.
//!
//! Whenever a client joins or leaves, every client of the channel is sent the
//! new head count as `{"online":N}`.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::ws::{Message, WebSocket},
    response::Response,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{header::CONNECTION, HeaderValue};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::pool::{ClientId, ClientPool};
use crate::{core::upgrade_router::ChannelSubsystem, web::upgrade::HttpUpgrade};

/// Time between liveness pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(45);

struct Inner {
    name: &'static str,
    pool: Arc<ClientPool>,
}

/// # Socket Server
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct SocketServer {
    inner: Arc<Inner>,
}

impl SocketServer {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                pool: Arc::new(ClientPool::new(name)),
            }),
        }
    }

    /// The user channel.
    pub fn user() -> Self {
        Self::new("user")
    }

    /// The API channel.
    pub fn api() -> Self {
        Self::new("api")
    }

    /// The connection pool, e.g. for memory reclamation.
    pub fn pool(&self) -> Arc<ClientPool> {
        self.inner.pool.clone()
    }

    /// Number of open connections.
    pub fn client_count(&self) -> usize {
        self.inner.pool.len()
    }

    /// Sends the current head count to every open connection. Returns the
    /// number of clients reached.
    pub fn broadcast_online(&self) -> usize {
        let online = serde_json::json!({ "online": self.client_count() });
        self.inner.pool.broadcast(&online.to_string())
    }

    async fn on_connection(self, socket: WebSocket, peer: String) {
        let pool = self.pool();
        let (id, mut outbound) = pool.add_client(&peer);
        self.broadcast_online();
        let (mut sink, mut stream) = socket.split();

        let mut heartbeat = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut alive = true;

        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Pong(_))) => alive = true,
                    Some(Ok(Message::Text(text))) => self.on_text(id, text.as_str()),
                    Some(Ok(Message::Binary(data))) => debug!(channel = self.inner.name, client = id, len = data.len(), "binary frame"),
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(channel = self.inner.name, client = id, error = %e, "socket error");
                        break;
                    }
                },
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if !alive {
                        debug!(channel = self.inner.name, client = id, "no pong, dropping client");
                        break;
                    }
                    alive = false;
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        pool.remove_client(id);
        self.broadcast_online();
    }

    fn on_text(&self, id: ClientId, text: &str) {
        debug!(channel = self.inner.name, client = id, len = text.len(), "text frame");
    }
}

impl ChannelSubsystem<HttpUpgrade> for SocketServer {
    fn name(&self) -> &'static str {
        self.inner.name
    }

    fn accept_upgrade(&self, connection: HttpUpgrade, _head: Bytes) -> Response {
        let peer = connection
            .peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| String::from("unknown"));
        match connection.handshake {
            Ok(upgrade) => {
                let server = self.clone();
                upgrade.on_upgrade(move |socket| server.on_connection(socket, peer))
            }
            Err(mut rejection) => {
                debug!(channel = self.inner.name, %peer, status = %rejection.status(), "handshake rejected");
                rejection.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
                rejection
            }
        }
    }
}

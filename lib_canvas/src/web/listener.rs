//! # Accept Loop
//!
//! One listener, one task per connection. Each connection is driven by
//! hyper's auto (HTTP/1 + HTTP/2) builder with upgrades enabled and carries a
//! [`ConnectionKill`] switch so the upgrade gate can drop it without a reply.
//! Cancelling the shutdown token stops accepting and lets open connections
//! finish their in-flight requests.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, Router};
use hyper::{body::Incoming, Request};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use super::upgrade::ConnectionKill;

/// Accepts connections until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "accepting connections"),
        Err(e) => warn!(error = %e, "listener has no local address"),
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    continue;
                }
            },
        };
        tokio::spawn(serve_connection(stream, peer, app.clone(), shutdown.clone()));
    }

    info!("accept loop stopped");
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, app: Router, shutdown: CancellationToken) {
    let kill = ConnectionKill::new();
    let service = {
        let kill = kill.clone();
        app.map_request(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(kill.clone());
            request.extensions_mut().insert(ConnectInfo(peer));
            request
        })
    };

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(service));
    tokio::pin!(conn);

    tokio::select! {
        biased;
        _ = kill.killed() => debug!(%peer, "connection destroyed"),
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(%peer, error = %e, "connection closed with error");
            }
        }
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.as_mut().await {
                debug!(%peer, error = %e, "connection closed with error during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channels::SocketServer,
        core::upgrade_router::UpgradeRouter,
        web::upgrade::{upgrade_gate, HttpUpgrade},
    };
    use axum::{middleware, routing::get};
    use futures_util::StreamExt;
    use std::{sync::Arc, time::Duration};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start() -> (SocketAddr, SocketServer, SocketServer, CancellationToken) {
        let user = SocketServer::user();
        let api = SocketServer::api();
        let router: Arc<UpgradeRouter<HttpUpgrade>> =
            Arc::new(UpgradeRouter::new(Arc::new(user.clone()), Arc::new(api.clone())));
        let app = Router::new()
            .route("/health", get(|| async { "OK" }))
            .layer(middleware::from_fn_with_state(router, upgrade_gate));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, app, shutdown.clone()));
        (addr, user, api, shutdown)
    }

    async fn wait_for(pool: &SocketServer, expected: usize) {
        for _ in 0..100 {
            if pool.client_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool never reached {expected} clients, has {}", pool.client_count());
    }

    #[tokio::test]
    async fn test_ws_path_reaches_user_channel_only() {
        let (addr, user, api, shutdown) = start().await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token=1")).await.unwrap();
        wait_for(&user, 1).await;
        assert_eq!(api.client_count(), 0);

        let greeting = socket.next().await.unwrap().unwrap();
        assert_eq!(greeting.into_text().unwrap().as_str(), r#"{"online":1}"#);

        drop(socket);
        wait_for(&user, 0).await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_mcws_path_reaches_api_channel_only() {
        let (addr, user, api, shutdown) = start().await;

        let (_socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/mcws")).await.unwrap();
        wait_for(&api, 1).await;
        assert_eq!(user.client_count(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_upgrade_path_is_dropped_without_reply() {
        let (addr, user, api, shutdown) = start().await;

        assert!(tokio_tungstenite::connect_async(format!("ws://{addr}/nope")).await.is_err());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"GET /chat HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
                  Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();
        let mut reply = Vec::new();
        let read = stream.read_to_end(&mut reply).await;
        assert!(read.is_err() || reply.is_empty(), "got a reply: {:?}", String::from_utf8_lossy(&reply));

        assert_eq!(user.client_count(), 0);
        assert_eq!(api.client_count(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_plain_requests_still_routed() {
        let (addr, _user, _api, shutdown) = start().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200"));
        shutdown.cancel();
    }
}

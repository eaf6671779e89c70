//! # HTTP Upgrade Glue
//!
//! Turns an HTTP/1.1 request carrying `Connection: upgrade` into an
//! [`UpgradeRequest`] before any route matching, and hands it to the
//! [`UpgradeRouter`]. Ordinary requests pass through untouched.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::{
    header::{CONNECTION, UPGRADE},
    HeaderMap, HeaderValue, StatusCode,
};
use tokio_util::sync::CancellationToken;

use crate::core::upgrade_router::{RawConnection, UpgradeRequest, UpgradeRoute, UpgradeRouter};

/// # Connection Kill
///
/// Per-connection switch installed by the accept loop. Cancelling it drops
/// the TCP connection without writing anything back.
#[derive(Debug, Clone, Default)]
pub struct ConnectionKill(CancellationToken);

impl ConnectionKill {
    /// A fresh, armed switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests destruction of the connection.
    pub fn kill(&self) {
        self.0.cancel();
    }

    /// Whether [`kill`](Self::kill) was called.
    pub fn is_killed(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the connection has been killed.
    pub async fn killed(&self) {
        self.0.cancelled().await
    }
}

/// True for requests asking for a protocol switch: a `Connection` header
/// listing the `upgrade` token and an `Upgrade` header.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && headers.contains_key(UPGRADE)
}

/// # HTTP Upgrade
///
/// The raw connection behind an upgrade request. `handshake` holds the
/// WebSocket extractor, or the rejection to send when the request is not a
/// valid WebSocket handshake.
pub struct HttpUpgrade {
    /// Remote address, when the accept loop provided it.
    pub peer: Option<SocketAddr>,
    /// Handshake state extracted from the request.
    pub handshake: Result<WebSocketUpgrade, Response>,
    kill: Option<ConnectionKill>,
}

impl HttpUpgrade {
    /// Wraps an extracted handshake.
    pub fn new(peer: Option<SocketAddr>, handshake: Result<WebSocketUpgrade, Response>, kill: Option<ConnectionKill>) -> Self {
        Self { peer, handshake, kill }
    }
}

impl RawConnection for HttpUpgrade {
    type Reply = Response;

    fn terminate(self) -> Response {
        if let Some(kill) = &self.kill {
            kill.kill();
        }
        // Only reaches the wire when no accept loop is there to drop the socket.
        (StatusCode::BAD_REQUEST, [(CONNECTION, HeaderValue::from_static("close"))]).into_response()
    }
}

/// Middleware intercepting upgrade requests ahead of routing.
pub async fn upgrade_gate(
    State(router): State<Arc<UpgradeRouter<HttpUpgrade>>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_upgrade_request(request.headers()) {
        return next.run(request).await;
    }

    let target = request.uri().to_string();
    let (mut parts, _body) = request.into_parts();
    let kill = parts.extensions.get::<ConnectionKill>().cloned();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let handshake = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(IntoResponse::into_response);

    let outcome = router.dispatch(UpgradeRequest {
        target,
        connection: HttpUpgrade::new(peer, handshake, kill.clone()),
        head: Bytes::new(),
    });

    if outcome.route == UpgradeRoute::Terminate {
        if let Some(kill) = kill {
            // Never answer; the accept loop drops the connection.
            kill.killed().await;
            futures_util::future::pending::<()>().await;
        }
    }
    outcome.reply
}

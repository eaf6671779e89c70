//! # Upgrade Router
//!
//! Decides which real-time subsystem owns an HTTP Upgrade request. The decision
//! is made on the path component of the request target alone (the query string
//! is ignored) and is a total function over path values:
//!
//! | path    | outcome                              |
//! |---------|--------------------------------------|
//! | `/ws`   | handed to the user channel           |
//! | `/mcws` | handed to the API channel            |
//! | other   | raw connection terminated, no reply  |
//!
//! The router is generic over the connection type so the same dispatch logic
//! drives real hyper upgrades in production and plain values in tests.

use std::sync::Arc;

use bytes::Bytes;
use http::Uri;
use tracing::debug;

/// Upgrade path served by the user channel.
pub const USER_CHANNEL_PATH: &str = "/ws";
/// Upgrade path served by the API channel.
pub const API_CHANNEL_PATH: &str = "/mcws";

/// # Raw Connection
///
/// A connection that has asked for a protocol switch and has not been answered
/// yet. The only thing the router itself can do with it is tear it down.
pub trait RawConnection: Send + 'static {
    /// Whatever the transport expects back once the request is settled
    /// (an HTTP response for hyper connections).
    type Reply;

    /// Destroys the connection without a handshake. Must release the socket
    /// immediately.
    fn terminate(self) -> Self::Reply;
}

/// # Channel Subsystem
///
/// A long-lived owner of persistent bidirectional connections under one
/// protocol. Once `accept_upgrade` is called the subsystem either completes its
/// handshake and takes the connection, or closes it. The connection is never
/// handed back.
pub trait ChannelSubsystem<C: RawConnection>: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Takes ownership of an upgrade request routed to this subsystem.
    fn accept_upgrade(&self, connection: C, head: Bytes) -> C::Reply;
}

/// # Upgrade Request
///
/// A transient value consumed exactly once by [`UpgradeRouter::dispatch`].
pub struct UpgradeRequest<C> {
    /// The request target as received (`/ws?token=..`, absolute-form, ...).
    pub target: String,
    /// The connection waiting for a protocol switch.
    pub connection: C,
    /// Bytes already read past the request head. Hyper keeps read-ahead inside
    /// the upgraded IO, so this is empty for HTTP/1 connections served by it.
    pub head: Bytes,
}

impl<C> UpgradeRequest<C> {
    /// Builds a request with an empty head buffer.
    pub fn new(target: impl Into<String>, connection: C) -> Self {
        Self {
            target: target.into(),
            connection,
            head: Bytes::new(),
        }
    }
}

/// Where an upgrade request ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRoute {
    /// `/ws`
    UserChannel,
    /// `/mcws`
    ApiChannel,
    /// Every other path, and targets that do not parse as a URI.
    Terminate,
}

impl UpgradeRoute {
    /// Classifies a raw request target.
    pub fn for_target(target: &str) -> Self {
        match target_path(target).as_deref() {
            Some(USER_CHANNEL_PATH) => Self::UserChannel,
            Some(API_CHANNEL_PATH) => Self::ApiChannel,
            _ => Self::Terminate,
        }
    }
}

/// Extracts the path component of a request target, or `None` when the target
/// is not a valid URI.
pub fn target_path(target: &str) -> Option<String> {
    target
        .parse::<Uri>()
        .ok()
        .map(|uri| uri.path().to_owned())
}

/// The outcome of a single dispatch: the route taken and the transport reply.
pub struct Dispatch<R> {
    /// Route chosen for the request.
    pub route: UpgradeRoute,
    /// Reply produced by the subsystem or by termination.
    pub reply: R,
}

/// # Upgrade Router
///
/// Holds the two channel subsystems. They share nothing with each other; the
/// router only ever forwards a connection to one of them.
pub struct UpgradeRouter<C: RawConnection> {
    user: Arc<dyn ChannelSubsystem<C>>,
    api: Arc<dyn ChannelSubsystem<C>>,
}

impl<C: RawConnection> UpgradeRouter<C> {
    /// Creates a router over the user (`/ws`) and API (`/mcws`) subsystems.
    pub fn new(user: Arc<dyn ChannelSubsystem<C>>, api: Arc<dyn ChannelSubsystem<C>>) -> Self {
        Self { user, api }
    }

    /// Routes one upgrade request. Exactly one of accept-by-user,
    /// accept-by-api or terminate happens.
    pub fn dispatch(&self, request: UpgradeRequest<C>) -> Dispatch<C::Reply> {
        let route = UpgradeRoute::for_target(&request.target);
        let reply = match route {
            UpgradeRoute::UserChannel => self.user.accept_upgrade(request.connection, request.head),
            UpgradeRoute::ApiChannel => self.api.accept_upgrade(request.connection, request.head),
            UpgradeRoute::Terminate => {
                // Not an application error.
                debug!(target = %request.target, "terminating upgrade request for unknown path");
                request.connection.terminate()
            }
        };
        Dispatch { route, reply }
    }
}

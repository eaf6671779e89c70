//! # Channels Module
//!
//! The real-time side of the gateway: two independent WebSocket subsystems
//! and the client pool each of them owns.

/// Connection registry and fan-out.
pub mod pool;
/// WebSocket channel subsystem.
pub mod socket_server;

pub use pool::{ClientId, ClientPool};
pub use socket_server::SocketServer;

//! # Client Pool
//!
//! The set of live connections of one channel subsystem. Each client task owns
//! the receiving half of an unbounded channel; the pool keeps the sending
//! halves and fans frames out to them. A message is wrapped in an `Arc` once
//! and shared by every recipient.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::reclaim::Reclaim;

/// Identifier of a client within its pool.
pub type ClientId = u64;

/// A frame queued for a client.
pub type Frame = Arc<str>;

struct ClientHandle {
    peer: String,
    sender: mpsc::UnboundedSender<Frame>,
}

/// # Client Pool
///
/// Thread-safe registry of the clients of one subsystem.
pub struct ClientPool {
    name: &'static str,
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
}

impl ClientPool {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientHandle>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Add Client
    ///
    /// Registers a client and returns its id with the receiver its task
    /// should drain.
    pub fn add_client(&self, peer: &str) -> (ClientId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            ClientHandle {
                peer: peer.to_owned(),
                sender: tx,
            },
        );
        info!(pool = self.name, client = id, peer, "client connected");
        (id, rx)
    }

    /// Removes a client. Unknown ids are ignored.
    pub fn remove_client(&self, id: ClientId) {
        if let Some(handle) = self.lock().remove(&id) {
            info!(pool = self.name, client = id, peer = %handle.peer, "client disconnected");
        }
    }

    /// # Broadcast
    ///
    /// Queues `frame` for every client. Clients whose receiver is gone are
    /// pruned on the way. Returns the number of clients reached.
    pub fn broadcast(&self, frame: &str) -> usize {
        let frame: Frame = Arc::from(frame);
        let mut clients = self.lock();
        clients.retain(|id, handle| {
            let alive = handle.sender.send(frame.clone()).is_ok();
            if !alive {
                debug!(pool = self.name, client = *id, "pruning closed client");
            }
            alive
        });
        clients.len()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Reclaim for ClientPool {
    fn label(&self) -> &str {
        self.name
    }

    fn reclaim(&self) -> usize {
        let mut clients = self.lock();
        let before = clients.capacity();
        clients.retain(|_, handle| !handle.sender.is_closed());
        clients.shrink_to_fit();
        before.saturating_sub(clients.capacity())
    }
}

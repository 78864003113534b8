//! Broadcast fan-out to every connected peer.
//!
//! The service implementation only ever sees [`SignalBroadcaster`], an
//! emit-only handle, so it never holds the server itself (no reference
//! cycle between service and transport).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use chunkbus_protocol::constants::Member;
use chunkbus_protocol::envelope::Message;

use crate::connection::Sender;

/// Registry of live peer senders, keyed by a connection id.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    peers: HashMap<u64, Sender>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer and returns its id for later removal.
    pub fn register(&self, sender: Sender) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.peers.insert(id, sender);
        id
    }

    pub fn unregister(&self, id: u64) {
        self.inner.lock().unwrap().peers.remove(&id);
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Sender> {
        self.inner.lock().unwrap().peers.values().cloned().collect()
    }
}

/// Emit-only interface handed to the service implementation.
///
/// Signals are delivered to subscribers in emission order per connection;
/// a saturated or closed peer just misses the frame.
#[derive(Clone)]
pub struct SignalBroadcaster {
    peers: PeerRegistry,
}

impl SignalBroadcaster {
    pub(crate) fn new(peers: PeerRegistry) -> Self {
        Self { peers }
    }

    /// Broadcasts `member` with `payload` to all connected peers.
    pub fn emit<T: Serialize>(&self, member: Member, signature: &str, payload: &T) {
        debug_assert!(member.is_signal());
        let msg = match Message::signal(uuid::Uuid::new_v4().to_string(), member, signature, payload)
        {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(member = ?member, "failed to encode signal: {e}");
                return;
            }
        };
        for sender in self.peers.snapshot() {
            let _ = sender.send_msg(msg.clone());
        }
    }
}
